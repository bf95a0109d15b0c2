use axum::extract::{rejection::QueryRejection, Query};
use serde_json::Value;

use crate::case::CaseListFilter;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::CaseService;

/// GET /api/cases - Current cases, filtered by cohort, assignee, state or sub-state
pub async fn get(query: Result<Query<CaseListFilter>, QueryRejection>) -> ApiResult<Vec<Value>> {
    let Query(filter) = query?;
    let service = CaseService::new().await?;
    let cases = service.list(&filter).await?;
    Ok(ApiResponse::success(cases))
}
