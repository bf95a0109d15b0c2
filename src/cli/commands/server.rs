use std::time::Duration;

use clap::Subcommand;
use serde_json::{json, Value};

use crate::cli::utils::*;
use crate::cli::OutputFormat;

const DEFAULT_SERVER: &str = "http://localhost:3000";

#[derive(Subcommand)]
pub enum ServerCommands {
    #[command(about = "Check server health status from API /health endpoint")]
    Ping {
        #[arg(long, env = "MTL_SERVER_URL", default_value = DEFAULT_SERVER, help = "Server base URL")]
        url: String,
    },

    #[command(about = "Show server information from API root endpoint")]
    Info {
        #[arg(long, env = "MTL_SERVER_URL", default_value = DEFAULT_SERVER, help = "Server base URL")]
        url: String,
    },
}

pub async fn handle(cmd: ServerCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;

    match cmd {
        ServerCommands::Ping { url } => {
            let endpoint = format!("{}/health", url.trim_end_matches('/'));
            match client.get(&endpoint).send().await {
                Ok(response) if response.status().is_success() => {
                    output_success(&output_format, &format!("{} is up", url), Some(json!({ "url": url, "status": "up" })))
                }
                Ok(response) => {
                    output_error(&output_format, &format!("{} answered {}", url, response.status()), Some("SERVER_DOWN"))?;
                    std::process::exit(1);
                }
                Err(e) => {
                    output_error(&output_format, &format!("{} unreachable: {}", url, e), Some("SERVER_DOWN"))?;
                    std::process::exit(1);
                }
            }
        }
        ServerCommands::Info { url } => {
            let body: Value = client.get(url.trim_end_matches('/')).send().await?.error_for_status()?.json().await?;
            output_record(&output_format, body.get("data").unwrap_or(&body))
        }
    }
}
