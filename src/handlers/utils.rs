use std::collections::HashMap;

use axum::{extract::rejection::JsonRejection, Json};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

/// Unwrap a JSON body and deserialize it into a typed request. Both
/// failures come back in the error envelope.
pub fn parse_body<T: DeserializeOwned>(payload: Result<Json<Value>, JsonRejection>) -> Result<T, ApiError> {
    let Json(body) = payload?;
    if body.is_null() {
        return Err(ApiError::bad_request("Missing JSON body payload"));
    }
    Ok(serde_json::from_value(body)?)
}

/// Required enum-valued query parameter such as `query_type`.
pub fn query_param<T: DeserializeOwned>(params: &HashMap<String, String>, name: &str) -> Result<T, ApiError> {
    let raw = params
        .get(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("Missing required query parameter \"{}\"", name)))?;
    serde_json::from_value(Value::String(raw.clone()))
        .map_err(|_| ApiError::field_error("Invalid query parameter", name, format!("Unsupported value: {}", raw)))
}
