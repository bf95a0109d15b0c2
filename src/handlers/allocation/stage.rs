use axum::{
    extract::{rejection::JsonRejection, Path},
    Json,
};
use serde_json::Value;

use crate::case::Stage;
use crate::error::ApiError;
use crate::handlers::utils::parse_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::allocation_service::{StageAssigned, StageAssignment};
use crate::services::AllocationService;

/// POST /api/allocation/:stage - Assign a batch of cases to QC, QA or CTC reviewers
pub async fn post(
    Path(stage): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Vec<StageAssigned>> {
    let stage = Stage::parse(&stage).ok_or_else(|| ApiError::not_found(format!("Unknown allocation stage: {}", stage)))?;
    let assignments: Vec<StageAssignment> = parse_body(payload)?;
    let service = AllocationService::new().await?;
    Ok(ApiResponse::success(service.assign_stage(stage, assignments).await?))
}
