use serde_json::Value;
use sqlx::{Executor, Postgres, Row};

use crate::database::manager::DatabaseError;
use crate::database::value::bind_value;
use crate::filter::{Filter, FilterData, Relation, SqlResult};

/// Runs a [`Filter`] and returns rows as JSON objects.
pub struct QueryBuilder<'r> {
    filter: Filter<'r>,
}

impl<'r> QueryBuilder<'r> {
    pub fn new(relation: &'r dyn Relation) -> Result<Self, DatabaseError> {
        Ok(Self {
            filter: Filter::new(relation)?,
        })
    }

    pub fn filter(mut self, filter_data: FilterData) -> Result<Self, DatabaseError> {
        self.filter.assign(filter_data)?;
        Ok(self)
    }

    pub fn include_history(mut self, include: bool) -> Self {
        self.filter.include_history(include);
        self
    }

    pub async fn select_all<'c, E>(self, executor: E) -> Result<Vec<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let sql_result = self.json_sql()?;
        let mut q = sqlx::query(&sql_result.query);
        for p in sql_result.params.iter() {
            q = bind_value(q, p);
        }
        let rows = q.fetch_all(executor).await?;
        rows.iter()
            .map(|row| row.try_get::<Value, _>("row").map_err(DatabaseError::from))
            .collect()
    }

    pub async fn select_optional<'c, E>(self, executor: E) -> Result<Option<Value>, DatabaseError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let sql_result = self.json_sql()?;
        let mut q = sqlx::query(&sql_result.query);
        for p in sql_result.params.iter() {
            q = bind_value(q, p);
        }
        match q.fetch_optional(executor).await? {
            Some(row) => Ok(Some(row.try_get::<Value, _>("row")?)),
            None => Ok(None),
        }
    }

    /// Wrap the filter query so each row arrives as one JSON value.
    fn json_sql(&self) -> Result<SqlResult, DatabaseError> {
        let inner = self.filter.to_sql()?;
        if crate::config::config().query.debug_logging {
            tracing::debug!(sql = %inner.query, params = inner.params.len(), "projector query");
        }
        Ok(SqlResult {
            query: format!("SELECT row_to_json(t) AS row FROM ({}) t", inner.query),
            params: inner.params,
        })
    }
}
