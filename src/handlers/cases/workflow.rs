use axum::{
    extract::{rejection::JsonRejection, Path},
    Json,
};
use serde_json::Value;

use crate::handlers::utils::parse_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::case_service::{
    AddressRequest, ContactRequest, OpenCaseRequest, ResetRequest, ReviewOutcome, ReviewRequest,
};
use crate::services::CaseService;

/// POST /api/cases/:case_id/review - Save a review and move the case along
pub async fn review(
    Path(case_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<ReviewOutcome> {
    let request: ReviewRequest = parse_body(payload)?;
    let service = CaseService::new().await?;
    Ok(ApiResponse::success(service.review(&case_id, request).await?))
}

/// POST /api/cases/:case_id/address
pub async fn address(Path(case_id): Path<String>, payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let request: AddressRequest = parse_body(payload)?;
    let service = CaseService::new().await?;
    Ok(ApiResponse::created(service.update_address(&case_id, request).await?))
}

/// POST /api/cases/:case_id/contact
pub async fn contact(Path(case_id): Path<String>, payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let request: ContactRequest = parse_body(payload)?;
    let service = CaseService::new().await?;
    Ok(ApiResponse::success(service.update_contact(&case_id, request).await?))
}

/// POST /api/cases/:case_id/reset
pub async fn reset(Path(case_id): Path<String>, payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let request: ResetRequest = parse_body(payload)?;
    let service = CaseService::new().await?;
    Ok(ApiResponse::success(service.reset(&case_id, request).await?))
}

/// POST /api/cases/:case_id/open
pub async fn open(Path(case_id): Path<String>, payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let request: OpenCaseRequest = parse_body(payload)?;
    let service = CaseService::new().await?;
    Ok(ApiResponse::success(service.open(&case_id, request).await?))
}
