use clap::Subcommand;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::schema;

#[derive(Subcommand)]
pub enum SchemaCommands {
    #[command(about = "Print the DDL for tables, indexes and views")]
    Print,

    #[command(about = "Apply the DDL to the configured database")]
    Apply,
}

pub async fn handle(cmd: SchemaCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        SchemaCommands::Print => {
            println!("{}", schema::script());
            Ok(())
        }
        SchemaCommands::Apply => {
            let pool = connect_database().await?;
            schema::apply(&pool).await?;
            pool.close().await;
            output_success(&output_format, "Schema applied", None)
        }
    }
}
