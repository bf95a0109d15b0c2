use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Executor, Postgres};

use crate::database::schema::{CASE_STATE_VW, CONTACT_TRACKER};
use crate::database::{DatabaseError, QueryBuilder};
use crate::filter::FilterData;
use crate::temporal::table::CONTACT_QUERIES;
use crate::temporal::{NaturalKey, VersionedTable, SENTINEL};

/// Workflow position of a case, read from its current tracker version.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CaseState {
    pub case_id: String,
    pub state: Option<String>,
    pub sub_state: Option<String>,
    pub descope_reason: Option<String>,
    /// Start of the current tracker version
    pub since: NaiveDateTime,
    /// User who wrote the current tracker version
    pub actor: Option<String>,
}

/// Columns a case can be assigned through, one per role
const ASSIGNEE_COLUMNS: [&str; 5] = ["assignedtoanalyst", "assignedtoqc", "assignedtoqa", "assignedtoctc", "assignedtoer"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseListFilter {
    pub cohort: Option<String>,
    /// Matches any role's assignee email
    pub assignee: Option<String>,
    pub state: Option<String>,
    pub sub_state: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl CaseListFilter {
    pub fn to_filter_data(&self) -> FilterData {
        let mut conditions = Map::new();
        if let Some(cohort) = &self.cohort {
            conditions.insert("population_cohort".to_string(), Value::String(cohort.clone()));
        }
        if let Some(state) = &self.state {
            conditions.insert("state".to_string(), Value::String(state.clone()));
        }
        if let Some(sub_state) = &self.sub_state {
            conditions.insert("sub_state".to_string(), Value::String(sub_state.clone()));
        }
        if let Some(assignee) = &self.assignee {
            let any_role = ASSIGNEE_COLUMNS
                .iter()
                .map(|column| {
                    let mut m = Map::new();
                    m.insert(column.to_string(), Value::String(assignee.clone()));
                    Value::Object(m)
                })
                .collect();
            conditions.insert("$or".to_string(), Value::Array(any_role));
        }

        FilterData {
            where_clause: Some(Value::Object(conditions)),
            order: Some(Value::String("case_id asc".to_string())),
            limit: Some(self.limit.unwrap_or(crate::config::config().query.default_limit)),
            offset: self.offset,
            ..Default::default()
        }
    }
}

fn key_conditions(table: &VersionedTable, key: &NaturalKey) -> Value {
    let conditions: Map<String, Value> = table
        .key
        .iter()
        .zip(key.values())
        .map(|(column, value)| (column.to_string(), Value::String(value.clone())))
        .collect();
    Value::Object(conditions)
}

fn by_case(case_id: &str) -> Value {
    let mut m = Map::new();
    m.insert("case_id".to_string(), Value::String(case_id.to_string()));
    Value::Object(m)
}

/// Read side of the case store. Every query only ever sees current
/// versions unless it asks for history explicitly.
pub struct CaseStateProjector;

impl CaseStateProjector {
    pub async fn current_state<'c, E>(executor: E, case_id: &str) -> Result<Option<CaseState>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let sql = format!(
            "SELECT case_id, state, sub_state, descope_reason, start_ts AS since, update_user AS actor \
             FROM mtl.case_tracker WHERE case_id = $1 AND end_ts = '{}'",
            SENTINEL
        );
        let state = sqlx::query_as::<_, CaseState>(&sql)
            .bind(case_id)
            .fetch_optional(executor)
            .await?;
        Ok(state)
    }

    /// Current version of any versioned record
    pub async fn current<'c, E>(
        executor: E,
        table: &'static VersionedTable,
        key: &NaturalKey,
    ) -> Result<Option<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        table.check_key(key).map_err(|e| DatabaseError::InvalidKey(e.to_string()))?;
        QueryBuilder::new(table)?
            .filter(FilterData {
                where_clause: Some(key_conditions(table, key)),
                ..Default::default()
            })?
            .select_optional(executor)
            .await
    }

    /// All versions of a record, oldest first
    pub async fn history<'c, E>(
        executor: E,
        table: &'static VersionedTable,
        key: &NaturalKey,
    ) -> Result<Vec<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        table.check_key(key).map_err(|e| DatabaseError::InvalidKey(e.to_string()))?;
        QueryBuilder::new(table)?
            .include_history(true)
            .filter(FilterData {
                where_clause: Some(key_conditions(table, key)),
                order: Some(Value::String(format!("start_ts asc, {} asc", table.surrogate))),
                ..Default::default()
            })?
            .select_all(executor)
            .await
    }

    pub async fn list_cases<'c, E>(executor: E, filter: &CaseListFilter) -> Result<Vec<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        QueryBuilder::new(&CASE_STATE_VW)?
            .filter(filter.to_filter_data())?
            .select_all(executor)
            .await
    }

    /// Allocation joined with the current tracker version
    pub async fn case_details<'c, E>(executor: E, case_id: &str) -> Result<Option<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        QueryBuilder::new(&CASE_STATE_VW)?
            .filter(FilterData {
                where_clause: Some(by_case(case_id)),
                ..Default::default()
            })?
            .select_optional(executor)
            .await
    }

    /// Current version of every query raised on a case, oldest first
    pub async fn queries<'c, E>(executor: E, case_id: &str) -> Result<Vec<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        QueryBuilder::new(&CONTACT_QUERIES)?
            .filter(FilterData {
                where_clause: Some(by_case(case_id)),
                order: Some(Value::String("contact_queries_sk asc".to_string())),
                ..Default::default()
            })?
            .select_all(executor)
            .await
    }

    /// Every contact row of a case, closed approval audit rows included
    pub async fn contacts<'c, E>(executor: E, case_id: &str) -> Result<Vec<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        QueryBuilder::new(&CONTACT_TRACKER)?
            .filter(FilterData {
                where_clause: Some(by_case(case_id)),
                order: Some(Value::String("contact_tracker_sk asc".to_string())),
                ..Default::default()
            })?
            .select_all(executor)
            .await
    }
}
