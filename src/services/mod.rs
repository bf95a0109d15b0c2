pub mod allocation_service;
pub mod case_service;
pub mod contact_service;
pub mod mailing_service;
pub mod user_service;

pub use allocation_service::AllocationService;
pub use case_service::CaseService;
pub use contact_service::ContactService;
pub use mailing_service::MailingService;
pub use user_service::UserService;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::case::WorkflowError;

/// Trimmed, non-empty text or `MissingField`
pub(crate) fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, WorkflowError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WorkflowError::MissingField(field));
    }
    Ok(value)
}

/// Accepts `12` and `"12"` alike; browser forms send both.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got \"{}\"", s))),
        other => Err(serde::de::Error::custom(format!("expected an integer, got {}", other))),
    }
}

/// Accepts `true`, `"true"` and `"false"`
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(serde::de::Error::custom(format!("expected a boolean, got {}", other))),
    }
}

/// Optional text that also takes numbers and booleans in their JSON spelling
pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!("expected text, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Lenient {
        #[serde(deserialize_with = "lenient_i64")]
        n: i64,
        #[serde(deserialize_with = "lenient_bool")]
        b: bool,
    }

    #[derive(Debug, Deserialize)]
    struct LenientText {
        #[serde(default, deserialize_with = "lenient_text")]
        t: Option<String>,
    }

    #[test]
    fn lenient_fields_accept_strings() {
        let p: Lenient = serde_json::from_value(json!({"n": "42", "b": "TRUE"})).unwrap();
        assert_eq!((p.n, p.b), (42, true));
        let p: Lenient = serde_json::from_value(json!({"n": 7, "b": false})).unwrap();
        assert_eq!((p.n, p.b), (7, false));
        assert!(serde_json::from_value::<Lenient>(json!({"n": "x", "b": true})).is_err());
    }

    #[test]
    fn lenient_text_spells_scalars() {
        let t = |v| serde_json::from_value::<LenientText>(v).unwrap().t;
        assert_eq!(t(json!({"t": 12})), Some("12".to_string()));
        assert_eq!(t(json!({"t": "Yes"})), Some("Yes".to_string()));
        assert_eq!(t(json!({"t": true})), Some("true".to_string()));
        assert_eq!(t(json!({"t": null})), None);
        assert_eq!(t(json!({})), None);
        assert!(serde_json::from_value::<LenientText>(json!({"t": [1]})).is_err());
    }

    #[test]
    fn required_rejects_blank() {
        assert!(matches!(required("userEmail", "  "), Err(WorkflowError::MissingField("userEmail"))));
        assert_eq!(required("userEmail", " a@b ").unwrap(), "a@b");
    }
}
