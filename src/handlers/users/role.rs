use std::collections::HashMap;

use axum::extract::Query;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::user_service::UserRole;
use crate::services::UserService;

/// GET /api/users/role?user=<email>
pub async fn get(Query(params): Query<HashMap<String, String>>) -> ApiResult<UserRole> {
    let user = params
        .get("user")
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required query parameter \"user\""))?;
    let service = UserService::new().await?;
    Ok(ApiResponse::success(service.role(user).await?))
}
