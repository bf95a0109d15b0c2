use axum::{extract::rejection::JsonRejection, Json};
use serde_json::{json, Value};

use crate::handlers::utils::parse_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::allocation_service::{EngineerReferralRequest, HoldRequest, ReleaseRequest};
use crate::services::AllocationService;

/// POST /api/allocation/engineer-referral
pub async fn engineer_referral(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let request: EngineerReferralRequest = parse_body(payload)?;
    let service = AllocationService::new().await?;
    let updated = service.engineer_referral(request).await?;
    Ok(ApiResponse::success(json!({ "updated": updated })))
}

/// POST /api/allocation/hold
pub async fn hold(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let holds: Vec<HoldRequest> = parse_body(payload)?;
    let service = AllocationService::new().await?;
    let updated = service.hold(holds).await?;
    Ok(ApiResponse::success(json!({ "updated": updated })))
}

/// POST /api/allocation/release - Queue cases for the bulk release job
pub async fn release(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let releases: Vec<ReleaseRequest> = parse_body(payload)?;
    let service = AllocationService::new().await?;
    let queued = service.release(releases).await?;
    Ok(ApiResponse::created(json!({ "queued": queued })))
}
