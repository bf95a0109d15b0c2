use std::io::Read;

use serde_json::{json, Value};
use sqlx::PgPool;

use crate::cli::OutputFormat;
use crate::database::secrets::EnvSecretStore;
use crate::database::DatabaseManager;

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(Value::Object(extra)), Some(body)) = (data, response.as_object_mut()) {
                body.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(
    output_format: &OutputFormat,
    message: &str,
    error_code: Option<&str>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": message
            });

            if let Some(code) = error_code {
                response["error_code"] = json!(code);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(
    output_format: &OutputFormat,
    collection_name: &str,
    message: &str,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({
                collection_name: []
            }))?);
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Output a single record: pretty JSON, or one `column: value` line per field
pub fn output_record(output_format: &OutputFormat, record: &Value) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(record)?),
        OutputFormat::Text => match record {
            Value::Object(fields) => {
                let width = fields.keys().map(String::len).max().unwrap_or(0);
                for (column, value) in fields {
                    println!("{:width$}  {}", column, text_value(value), width = width);
                }
            }
            other => println!("{}", text_value(other)),
        },
    }
    Ok(())
}

/// Output a list of records, separated by blank lines in text mode
pub fn output_records(
    output_format: &OutputFormat,
    collection_name: &str,
    records: &[Value],
) -> anyhow::Result<()> {
    if records.is_empty() {
        return output_empty_collection(output_format, collection_name, &format!("No {} found", collection_name));
    }
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({ collection_name: records }))?);
        }
        OutputFormat::Text => {
            for (i, record) in records.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                output_record(output_format, record)?;
            }
        }
    }
    Ok(())
}

fn text_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read a JSON document from stdin
pub fn read_stdin_json() -> anyhow::Result<Value> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    if input.trim().is_empty() {
        anyhow::bail!("Expected a JSON document on stdin");
    }
    Ok(serde_json::from_str(&input)?)
}

/// Connect straight to the database, retrying while it comes up
pub async fn connect_database() -> anyhow::Result<PgPool> {
    let connection_string = DatabaseManager::connection_string(&EnvSecretStore).await?;
    Ok(DatabaseManager::connect(&connection_string).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_values_render_without_quotes() {
        assert_eq!(text_value(&json!("Review")), "Review");
        assert_eq!(text_value(&Value::Null), "-");
        assert_eq!(text_value(&json!(3)), "3");
    }
}
