use thiserror::Error;

use crate::database::DatabaseError;
use crate::temporal::TemporalError;

/// Errors raised by case workflow operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown access level: {0}")]
    UnknownAccessLevel(i64),

    #[error("Unknown address type: {0}")]
    UnknownAddressType(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Temporal(#[from] TemporalError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        WorkflowError::Database(DatabaseError::Sqlx(err))
    }
}
