use std::collections::HashMap;

use axum::extract::Query;
use serde_json::Value;

use crate::handlers::utils::query_param;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::mailing_service::MailingQuery;
use crate::services::MailingService;

/// GET /api/mailing/cases?query_type=qc_review|qc_batch_review|mailing[&batch_number=]
pub async fn get(Query(params): Query<HashMap<String, String>>) -> ApiResult<Vec<Value>> {
    let query: MailingQuery = query_param(&params, "query_type")?;
    let service = MailingService::new().await?;
    let rows = service
        .cases(query, params.get("batch_number").map(String::as_str))
        .await?;
    Ok(ApiResponse::success(rows))
}
