// HTTP API Error Types
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::case::WorkflowError;
use crate::database::{is_transient, DatabaseError, ValueError};
use crate::filter::FilterError;
use crate::temporal::TemporalError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    InvalidJson(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError { message, field_errors } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<HashMap<String, String>>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    /// Validation error naming one offending field
    pub fn field_error(message: impl Into<String>, field: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut field_errors = HashMap::new();
        field_errors.insert(field.into(), detail.into());
        Self::validation_error(message, Some(field_errors))
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

fn from_sqlx(err: sqlx::Error) -> ApiError {
    if is_transient(&err) {
        tracing::warn!("Database unavailable: {}", err);
        return ApiError::service_unavailable("Database temporarily unavailable");
    }
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            tracing::warn!("Unique violation: {}", db);
            return ApiError::conflict("The record was changed by another request");
        }
    }
    // Log the real error but return generic message
    tracing::error!("SQLx error: {}", err);
    ApiError::internal_server_error("Database error occurred")
}

impl From<ValueError> for ApiError {
    fn from(err: ValueError) -> Self {
        let detail = format!("expected {}, got {}", err.expected, err.found);
        ApiError::field_error("Invalid field value", err.column, detail)
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::InvalidValue(e) => e.into(),
            FilterError::InvalidColumn(column) => ApiError::field_error("Invalid filter", column, "Unknown column"),
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Filter(e) => e.into(),
            DatabaseError::InvalidKey(msg) => ApiError::bad_request(msg),
            DatabaseError::Unavailable { attempts, source } => {
                tracing::error!("Database unavailable after {} attempts: {}", attempts, source);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(e) => from_sqlx(e),
            DatabaseError::SecretMissing(_) | DatabaseError::InvalidSecret(_) | DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("Database configuration error: {}", err);
                ApiError::service_unavailable("Database is not configured")
            }
        }
    }
}

impl From<TemporalError> for ApiError {
    fn from(err: TemporalError) -> Self {
        match err {
            TemporalError::Value(e) => e.into(),
            TemporalError::UnknownColumn { column, .. } => {
                ApiError::field_error("Invalid field", column, "Not a writable column")
            }
            TemporalError::SystemColumn(column) => {
                ApiError::field_error("Invalid field", column, "System column cannot be set via API")
            }
            TemporalError::KeyMismatch { column, ref expected } => {
                let detail = format!("must equal '{}'", expected);
                ApiError::field_error("Key mismatch", column, detail)
            }
            TemporalError::UnknownEntity(entity) => ApiError::not_found(format!("Unknown entity: {}", entity)),
            TemporalError::Conflict { table, key } => {
                tracing::warn!("Concurrent current version of {} {}", table, key);
                ApiError::conflict(format!("Another current version of {} exists for {}", table, key))
            }
            TemporalError::Database(e) => from_sqlx(e),
            other if other.is_validation() => ApiError::bad_request(other.to_string()),
            other => {
                tracing::error!("Temporal write error: {}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::UnknownAccessLevel(level) => {
                ApiError::field_error("Unknown access level", "access_level", level.to_string())
            }
            WorkflowError::UnknownAddressType(kind) => {
                ApiError::field_error("Unknown address type", "address_type", kind)
            }
            WorkflowError::MissingField(field) => {
                ApiError::field_error("Missing required fields", field, "This field is required")
            }
            WorkflowError::InvalidRequest(msg) => ApiError::bad_request(msg),
            WorkflowError::NotFound(what) => ApiError::not_found(format!("Not found: {}", what)),
            WorkflowError::Temporal(e) => e.into(),
            WorkflowError::Database(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_json(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::validation_error(err.to_string(), None)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_input_errors_are_bad_requests() {
        let err: ApiError = WorkflowError::UnknownAccessLevel(7).into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_json()["field_errors"]["access_level"], "7");

        let err: ApiError = WorkflowError::Temporal(TemporalError::SystemColumn("end_ts".into())).into();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn conflicts_map_to_409() {
        let err: ApiError = TemporalError::Conflict { table: "mtl.case_tracker", key: "(C-1)".into() }.into();
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.error_code(), "CONFLICT");
    }

    #[test]
    fn storage_failures_do_not_leak_detail() {
        let err: ApiError = DatabaseError::Sqlx(sqlx::Error::RowNotFound).into();
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.message(), "Database error occurred");

        let err: ApiError = DatabaseError::Sqlx(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn envelope_shape() {
        let body = ApiError::not_found("Not found: case C-9").to_json();
        assert_eq!(body["error"], true);
        assert_eq!(body["code"], "NOT_FOUND");
        assert!(body.get("field_errors").is_none());
    }
}
