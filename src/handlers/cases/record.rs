use std::collections::HashMap;

use axum::extract::{Path, Query};
use serde_json::Value;

use crate::case::CaseState;
use crate::handlers::utils::query_param;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::case_service::DetailKind;
use crate::services::CaseService;

/// GET /api/cases/:case_id?query_type=details|history|contact
pub async fn get(Path(case_id): Path<String>, Query(params): Query<HashMap<String, String>>) -> ApiResult<Value> {
    let kind = match params.contains_key("query_type") {
        true => query_param::<DetailKind>(&params, "query_type")?,
        false => DetailKind::default(),
    };
    let service = CaseService::new().await?;
    let data = service.details(&case_id, kind).await?;
    Ok(ApiResponse::success(data))
}

/// GET /api/cases/:case_id/state
pub async fn state(Path(case_id): Path<String>) -> ApiResult<CaseState> {
    let service = CaseService::new().await?;
    Ok(ApiResponse::success(service.state(&case_id).await?))
}

/// GET /api/cases/:case_id/versions/:entity - Every version, oldest first.
/// Entities with a compound key take the rest of it as query parameters,
/// e.g. `?constraint_code=CC555` or `?query_id=12`.
pub async fn versions(
    Path((case_id, entity)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Value>> {
    let service = CaseService::new().await?;
    Ok(ApiResponse::success(service.versions(&case_id, &entity, &params).await?))
}
