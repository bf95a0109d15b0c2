use std::collections::HashMap;

use clap::Subcommand;
use serde_json::Value;

use crate::case::CaseListFilter;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::services::case_service::{DetailKind, ReviewRequest};
use crate::services::CaseService;

#[derive(Subcommand)]
pub enum CaseCommands {
    #[command(about = "Show current case details, history or contact trackers")]
    Show {
        #[arg(help = "Case ID")]
        case_id: String,
        #[arg(long, value_enum, default_value = "details")]
        kind: DetailKind,
    },

    #[command(about = "Show the case's current state and sub-state")]
    State {
        #[arg(help = "Case ID")]
        case_id: String,
    },

    #[command(about = "List every version of one entity for a case, oldest first")]
    History {
        #[arg(help = "Case ID")]
        case_id: String,
        #[arg(help = "Entity name, e.g. case_tracker")]
        entity: String,
        #[arg(long, help = "Constraint code, required for constraint history")]
        constraint_code: Option<String>,
        #[arg(long, help = "Query id, required for query history")]
        query_id: Option<String>,
    },

    #[command(about = "List current cases")]
    List {
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long, help = "Assignee email in any role")]
        assignee: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        sub_state: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },

    #[command(about = "Save a review read from stdin")]
    Review {
        #[arg(help = "Case ID")]
        case_id: String,
    },
}

pub async fn handle(cmd: CaseCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let service = CaseService::with_pool(connect_database().await?);

    match cmd {
        CaseCommands::Show { case_id, kind } => match service.details(&case_id, kind).await? {
            Value::Array(rows) => output_records(&output_format, "records", &rows),
            record => output_record(&output_format, &record),
        },
        CaseCommands::State { case_id } => {
            let state = service.state(&case_id).await?;
            output_record(&output_format, &serde_json::to_value(state)?)
        }
        CaseCommands::History { case_id, entity, constraint_code, query_id } => {
            let key_parts: HashMap<String, String> = [("constraint_code", constraint_code), ("query_id", query_id)]
                .into_iter()
                .filter_map(|(column, value)| value.map(|v| (column.to_string(), v)))
                .collect();
            let versions = service.versions(&case_id, &entity, &key_parts).await?;
            output_records(&output_format, "versions", &versions)
        }
        CaseCommands::List { cohort, assignee, state, sub_state, limit, offset } => {
            let filter = CaseListFilter { cohort, assignee, state, sub_state, limit, offset };
            let cases = service.list(&filter).await?;
            output_records(&output_format, "cases", &cases)
        }
        CaseCommands::Review { case_id } => {
            let request: ReviewRequest = serde_json::from_value(read_stdin_json()?)?;
            let outcome = service.review(&case_id, request).await?;
            output_success(
                &output_format,
                &format!("Case {} saved", case_id),
                Some(serde_json::to_value(outcome)?),
            )
        }
    }
}
