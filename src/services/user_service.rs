use serde::Serialize;
use sqlx::PgPool;
use tracing::debug;

use super::required;
use crate::case::{Role, WorkflowError};
use crate::database::DatabaseManager;

const ACCESS_LEVEL_SQL: &str = "SELECT access_level_id FROM mtl.user_access WHERE user_email = $1 LIMIT 1";

const LIST_SQL: &str = "SELECT user_email, user_name, access_level_id FROM mtl.user_access ORDER BY user_email";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserRole {
    pub user_email: String,
    pub access_level: i64,
    /// None for levels with no workflow role
    pub role: Option<Role>,
}

/// One row of the user administration screen
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserEntry {
    pub user_email: String,
    pub user_name: Option<String>,
    pub access_level: i64,
    pub role: Option<Role>,
}

impl UserEntry {
    fn from_row((user_email, user_name, level): (String, Option<String>, i32)) -> Self {
        let access_level = i64::from(level);
        Self {
            user_email,
            user_name,
            access_level,
            role: Role::from_access_level(access_level),
        }
    }
}

pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub async fn new() -> Result<Self, WorkflowError> {
        let pool = DatabaseManager::pool().await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn role(&self, user_email: &str) -> Result<UserRole, WorkflowError> {
        let user_email = required("user", user_email)?;
        let level: Option<i32> = sqlx::query_scalar(ACCESS_LEVEL_SQL)
            .bind(user_email)
            .fetch_optional(&self.pool)
            .await?;
        let level = level
            .map(i64::from)
            .ok_or_else(|| WorkflowError::NotFound(format!("user {}", user_email)))?;
        debug!("User {} has access level {}", user_email, level);
        Ok(UserRole {
            user_email: user_email.to_string(),
            access_level: level,
            role: Role::from_access_level(level),
        })
    }

    pub async fn list(&self) -> Result<Vec<UserEntry>, WorkflowError> {
        let rows: Vec<(String, Option<String>, i32)> = sqlx::query_as(LIST_SQL).fetch_all(&self.pool).await?;
        debug!("Listed {} users", rows.len());
        Ok(rows.into_iter().map(UserEntry::from_row).collect())
    }
}
