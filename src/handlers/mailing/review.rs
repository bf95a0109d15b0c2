use axum::{extract::rejection::JsonRejection, Json};
use serde_json::Value;

use crate::handlers::utils::parse_body;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::mailing_service::{MailingReview, MailingSummary};
use crate::services::MailingService;

/// POST /api/mailing/review - Pass, fail or reset cases in a mailing batch
pub async fn post(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<MailingSummary> {
    let reviews: Vec<MailingReview> = parse_body(payload)?;
    let service = MailingService::new().await?;
    Ok(ApiResponse::success(service.review(reviews).await?))
}
