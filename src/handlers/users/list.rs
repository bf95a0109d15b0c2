use crate::middleware::{ApiResponse, ApiResult};
use crate::services::user_service::UserEntry;
use crate::services::UserService;

/// GET /api/users - Every user with their access level and workflow role
pub async fn get() -> ApiResult<Vec<UserEntry>> {
    let service = UserService::new().await?;
    Ok(ApiResponse::success(service.list().await?))
}
