use axum::{
    extract::{rejection::JsonRejection, Path},
    Json,
};
use serde_json::Value;

use crate::handlers::utils::parse_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::contact_service::{ApprovalRequest, QueryAction, QueryRequest};
use crate::services::ContactService;

/// POST /api/cases/:case_id/queries - action_type new|update|close
pub async fn queries(Path(case_id): Path<String>, payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let request: QueryRequest = parse_body(payload)?;
    let opened = matches!(request.action, QueryAction::New);
    let service = ContactService::new().await?;
    let query = service.query(&case_id, request).await?;
    Ok(match opened {
        true => ApiResponse::created(query),
        false => ApiResponse::success(query),
    })
}

/// POST /api/cases/:case_id/contact/approval - Team-leader approve or reject
pub async fn approval(Path(case_id): Path<String>, payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    let request: ApprovalRequest = parse_body(payload)?;
    let service = ContactService::new().await?;
    Ok(ApiResponse::success(service.approve(&case_id, request).await?))
}
