use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;

/// SQL type of an allow-listed column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Numeric,
    Boolean,
    Timestamp,
    Date,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("column '{column}' expects {expected}, got {found}")]
pub struct ValueError {
    pub column: String,
    pub expected: &'static str,
    pub found: String,
}

/// A typed value ready to be bound as a query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(ColumnType),
    Text(String),
    Integer(i64),
    Numeric(Decimal),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        SqlValue::Text(value.into())
    }

    /// Text value, or a typed NULL when absent or blank.
    pub fn optional_text(value: Option<&str>) -> Self {
        match value {
            Some(s) if !s.is_empty() => SqlValue::Text(s.to_string()),
            _ => SqlValue::Null(ColumnType::Text),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            SqlValue::Null(ty) => *ty,
            SqlValue::Text(_) => ColumnType::Text,
            SqlValue::Integer(_) => ColumnType::Integer,
            SqlValue::Numeric(_) => ColumnType::Numeric,
            SqlValue::Boolean(_) => ColumnType::Boolean,
            SqlValue::Timestamp(_) => ColumnType::Timestamp,
            SqlValue::Date(_) => ColumnType::Date,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Coerce an inbound JSON value into the column's SQL type.
    /// JSON null and the empty string both become NULL.
    pub fn coerce(column: &str, ty: ColumnType, value: &Value) -> Result<Self, ValueError> {
        let mismatch = || ValueError {
            column: column.to_string(),
            expected: ty.name(),
            found: describe(value),
        };

        match value {
            Value::Null => return Ok(SqlValue::Null(ty)),
            Value::String(s) if s.is_empty() => return Ok(SqlValue::Null(ty)),
            _ => {}
        }

        match ty {
            ColumnType::Text => match value {
                Value::String(s) => Ok(SqlValue::Text(s.clone())),
                Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
                Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
                _ => Err(mismatch()),
            },
            ColumnType::Integer => match value {
                Value::Number(n) => n.as_i64().map(SqlValue::Integer).ok_or_else(mismatch),
                Value::String(s) => s.trim().parse::<i64>().map(SqlValue::Integer).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ColumnType::Numeric => match value {
                Value::Number(n) => Decimal::from_str(&n.to_string())
                    .or_else(|_| Decimal::from_scientific(&n.to_string()))
                    .map(SqlValue::Numeric)
                    .map_err(|_| mismatch()),
                Value::String(s) => Decimal::from_str(s.trim()).map(SqlValue::Numeric).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ColumnType::Boolean => match value {
                Value::Bool(b) => Ok(SqlValue::Boolean(*b)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "y" => Ok(SqlValue::Boolean(true)),
                    "false" | "no" | "n" => Ok(SqlValue::Boolean(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            ColumnType::Timestamp => match value {
                Value::String(s) => parse_timestamp(s).map(SqlValue::Timestamp).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ColumnType::Date => match value {
                Value::String(s) => {
                    let s = s.trim();
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
                        .map(SqlValue::Date)
                        .ok_or_else(mismatch)
                }
                _ => Err(mismatch()),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null(_) => Value::Null,
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Numeric(d) => Value::String(d.to_string()),
            SqlValue::Boolean(b) => Value::Bool(*b),
            SqlValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

/// Accepts RFC 3339 (offset is normalized to UTC) and the naive
/// `YYYY-MM-DD[T| ]HH:MM:SS[.fff]` forms the front end sends.
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.naive_utc());
    }
    let naive = input.strip_suffix('Z').unwrap_or(input);
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {}", b),
        Value::Number(n) => format!("number {}", n),
        Value::String(s) => format!("string {:?}", s),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

/// Bind a typed value; NULLs keep their column type so Postgres can infer the parameter.
pub fn bind_value<'q>(
    q: Query<'q, Postgres, PgArguments>,
    v: &SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match v {
        SqlValue::Null(ty) => match ty {
            ColumnType::Text => q.bind(None::<String>),
            ColumnType::Integer => q.bind(None::<i64>),
            ColumnType::Numeric => q.bind(None::<Decimal>),
            ColumnType::Boolean => q.bind(None::<bool>),
            ColumnType::Timestamp => q.bind(None::<NaiveDateTime>),
            ColumnType::Date => q.bind(None::<NaiveDate>),
        },
        SqlValue::Text(s) => q.bind(s.clone()),
        SqlValue::Integer(i) => q.bind(*i),
        SqlValue::Numeric(d) => q.bind(*d),
        SqlValue::Boolean(b) => q.bind(*b),
        SqlValue::Timestamp(ts) => q.bind(*ts),
        SqlValue::Date(d) => q.bind(*d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_string_becomes_typed_null() {
        let v = SqlValue::coerce("postcode", ColumnType::Text, &json!("")).unwrap();
        assert_eq!(v, SqlValue::Null(ColumnType::Text));
        let v = SqlValue::coerce("redress_amount", ColumnType::Numeric, &json!("")).unwrap();
        assert_eq!(v, SqlValue::Null(ColumnType::Numeric));
    }

    #[test]
    fn parses_front_end_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-05 14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T14:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T15:30:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("05/03/2024"), None);
    }

    #[test]
    fn numeric_accepts_numbers_and_strings() {
        let a = SqlValue::coerce("redress_amount", ColumnType::Numeric, &json!(125.5)).unwrap();
        let b = SqlValue::coerce("redress_amount", ColumnType::Numeric, &json!("125.50")).unwrap();
        match (a, b) {
            (SqlValue::Numeric(a), SqlValue::Numeric(b)) => assert_eq!(a, b),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_type_mismatch() {
        let err = SqlValue::coerce("complaint_upheld", ColumnType::Boolean, &json!("maybe")).unwrap_err();
        assert_eq!(err.column, "complaint_upheld");
        assert_eq!(err.expected, "boolean");

        let err = SqlValue::coerce("contact_tracker_sk", ColumnType::Integer, &json!({"a": 1})).unwrap_err();
        assert_eq!(err.found, "object");
    }

    #[test]
    fn date_accepts_timestamp_strings() {
        let v = SqlValue::coerce("fr_complete_date", ColumnType::Date, &json!("2024-01-31T09:00:00")).unwrap();
        assert_eq!(v, SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
    }
}
