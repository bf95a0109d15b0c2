use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;

pub async fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let pool = match connect_database().await {
        Ok(pool) => pool,
        Err(e) => {
            output_error(&output_format, &e.to_string(), Some("SERVICE_UNAVAILABLE"))?;
            std::process::exit(1);
        }
    };

    let version: String = sqlx::query_scalar("SELECT version()").fetch_one(&pool).await?;
    pool.close().await;

    output_success(
        &output_format,
        "Database reachable",
        Some(json!({ "database": "ok", "version": version })),
    )
}
