use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, Query},
    Json,
};
use serde_json::{json, Value};

use crate::handlers::utils::{parse_body, query_param};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::allocation_service::{BulkAllocationRequest, BulkAllocationType, FrQueue};
use crate::services::AllocationService;

/// GET /api/allocation/fr?query_type=... - One of the fixed FR work queues
pub async fn get(Query(params): Query<HashMap<String, String>>) -> ApiResult<Vec<Value>> {
    let queue: FrQueue = query_param(&params, "query_type")?;
    let service = AllocationService::new().await?;
    Ok(ApiResponse::success(service.fr_queue(queue).await?))
}

/// POST /api/allocation/fr?allocation_type=unallocated|allocated
pub async fn post(
    Query(params): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let kind: BulkAllocationType = query_param(&params, "allocation_type")?;
    let request: BulkAllocationRequest = parse_body(payload)?;
    let service = AllocationService::new().await?;
    let allocated = service.fr_bulk_allocate(kind, request).await?;
    Ok(ApiResponse::success(json!({ "allocated": allocated })))
}
