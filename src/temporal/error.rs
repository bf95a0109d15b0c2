use thiserror::Error;

use crate::database::value::ValueError;

#[derive(Debug, Error)]
pub enum TemporalError {
    #[error("Column '{column}' is not writable on {table}")]
    UnknownColumn { table: &'static str, column: String },

    #[error("Column '{0}' is maintained by the store and cannot be written")]
    SystemColumn(String),

    #[error("Key column '{column}' must equal '{expected}'")]
    KeyMismatch { column: &'static str, expected: String },

    #[error("Natural key of {table} has {expected} column(s), got {found}")]
    KeyArity { table: &'static str, expected: usize, found: usize },

    #[error("Natural key column '{0}' must not be empty")]
    EmptyKey(&'static str),

    #[error("Projection targets {found}, expected {expected}")]
    TableMismatch { expected: &'static str, found: &'static str },

    #[error("Payload must be a JSON object")]
    NotAnObject,

    #[error("Unknown versioned entity: {0}")]
    UnknownEntity(String),

    #[error("Another current version of {table} exists for key {key}")]
    Conflict { table: &'static str, key: String },

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl TemporalError {
    /// Caller-side errors: bad payload or key, never a storage failure
    pub fn is_validation(&self) -> bool {
        !matches!(self, TemporalError::Conflict { .. } | TemporalError::Database(_))
    }
}
