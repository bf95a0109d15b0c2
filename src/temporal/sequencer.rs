use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::{PgConnection, Row};
use tracing::{debug, info};

use super::error::TemporalError;
use super::table::{NaturalKey, Projection, VersionedTable};
use super::SENTINEL;
use crate::database::value::bind_value;
use crate::filter::quote_relation;

/// Precondition on the current version, evaluated after it is locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    Always,
    /// Skip the write when the current version already has `column = equals`
    UnlessCurrent { column: &'static str, equals: String },
    /// Write only when a current version exists with `column = equals`
    OnlyIfCurrent { column: &'static str, equals: String },
}

impl Guard {
    pub fn unless_current(column: &'static str, equals: impl Into<String>) -> Self {
        Guard::UnlessCurrent { column, equals: equals.into() }
    }

    pub fn only_if_current(column: &'static str, equals: impl Into<String>) -> Self {
        Guard::OnlyIfCurrent { column, equals: equals.into() }
    }

    pub fn permits(&self, current: Option<&Value>) -> bool {
        let current_equals = |column: &str, equals: &str| {
            current
                .and_then(|row| row.get(column))
                .and_then(Value::as_str)
                .map(|v| v == equals)
                .unwrap_or(false)
        };
        match self {
            Guard::Always => true,
            Guard::UnlessCurrent { column, equals } => !current_equals(column, equals),
            Guard::OnlyIfCurrent { column, equals } => current_equals(column, equals),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// A new current version was written; `closed` is the version it replaced
    Inserted { record: Value, closed: Option<Value> },
    /// The guard declined the write; nothing changed
    Skipped { current: Option<Value> },
}

impl TransitionOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, TransitionOutcome::Inserted { .. })
    }

    /// The version that is current after the transition
    pub fn current(&self) -> Option<&Value> {
        match self {
            TransitionOutcome::Inserted { record, .. } => Some(record),
            TransitionOutcome::Skipped { current } => current.as_ref(),
        }
    }
}

/// Owns every write to `end_ts`. All operations run on a caller-supplied
/// transaction so that several transitions can commit together.
pub struct WriteSequencer;

impl WriteSequencer {
    /// Close the current version of `key` and insert `projection` as the new one.
    pub async fn apply(
        conn: &mut PgConnection,
        key: &NaturalKey,
        projection: &Projection,
        actor: &str,
        reason: Option<&str>,
        guard: &Guard,
    ) -> Result<TransitionOutcome, TemporalError> {
        let table = projection.table();
        table.check_key(key)?;

        let current = Self::lock_current(conn, table, key).await?;
        if !guard.permits(current.as_ref()) {
            debug!("Skipped {} transition for {}: {:?}", table.name, key, guard);
            return Ok(TransitionOutcome::Skipped { current });
        }

        let at = Self::transition_instant(conn, table, key).await?;
        let closed = match current {
            Some(_) => Self::close(conn, table, key, at).await?,
            None => None,
        };

        let sql = insert_sql(table, projection)?;
        let mut query = sqlx::query(&sql);
        for value in key.values() {
            query = query.bind(value.as_str());
        }
        for value in projection.values() {
            query = bind_value(query, value);
        }
        query = query.bind(at).bind(actor).bind(reason);

        let row = query
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| write_error(table, key, e))?;
        let record: Value = row.try_get("row")?;

        debug!("Inserted {} version for {} by {}", table.name, key, actor);
        if crate::config::config().security.enable_audit_logging {
            info!(target: "audit", table = table.name, key = %key, actor, reason = ?reason, replaced = closed.is_some(), "version written");
        }
        Ok(TransitionOutcome::Inserted { record, closed })
    }

    /// Close the current version without a replacement. Returns the closed row, if any.
    pub async fn retire(
        conn: &mut PgConnection,
        table: &'static VersionedTable,
        key: &NaturalKey,
        actor: &str,
    ) -> Result<Option<Value>, TemporalError> {
        table.check_key(key)?;
        if Self::lock_current(conn, table, key).await?.is_none() {
            return Ok(None);
        }
        let at = Self::transition_instant(conn, table, key).await?;
        let closed = Self::close(conn, table, key, at).await?;
        debug!("Retired {} version for {} by {}", table.name, key, actor);
        if crate::config::config().security.enable_audit_logging {
            info!(target: "audit", table = table.name, key = %key, actor, "version retired");
        }
        Ok(closed)
    }

    /// Serialize writers on `key` and lock its current version, if any.
    pub async fn lock_current(
        conn: &mut PgConnection,
        table: &'static VersionedTable,
        key: &NaturalKey,
    ) -> Result<Option<Value>, TemporalError> {
        sqlx::query(LOCK_SQL)
            .bind(key.lock_token(table))
            .execute(&mut *conn)
            .await?;

        let sql = select_current_sql(table)?;
        let mut query = sqlx::query(&sql);
        for value in key.values() {
            query = query.bind(value.as_str());
        }
        let row = query.fetch_optional(&mut *conn).await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<Value, _>("row")?),
            None => None,
        })
    }

    /// Wall-clock time, but never earlier than any boundary already
    /// recorded for `key`. Must be read while holding the key lock.
    async fn transition_instant(
        conn: &mut PgConnection,
        table: &'static VersionedTable,
        key: &NaturalKey,
    ) -> Result<NaiveDateTime, TemporalError> {
        let sql = instant_sql(table)?;
        let mut query = sqlx::query_scalar::<_, NaiveDateTime>(&sql);
        for value in key.values() {
            query = query.bind(value.as_str());
        }
        Ok(query.fetch_one(&mut *conn).await?)
    }

    async fn close(
        conn: &mut PgConnection,
        table: &'static VersionedTable,
        key: &NaturalKey,
        at: NaiveDateTime,
    ) -> Result<Option<Value>, TemporalError> {
        let sql = close_sql(table)?;
        let mut query = sqlx::query(&sql);
        for value in key.values() {
            query = query.bind(value.as_str());
        }
        let row = query.bind(at).fetch_optional(&mut *conn).await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<Value, _>("row")?),
            None => None,
        })
    }
}

fn write_error(table: &'static VersionedTable, key: &NaturalKey, err: sqlx::Error) -> TemporalError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return TemporalError::Conflict {
                table: table.name,
                key: key.to_string(),
            };
        }
    }
    TemporalError::Database(err)
}

const LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";

fn relation(table: &VersionedTable) -> Result<String, TemporalError> {
    quote_relation(table.name).map_err(|_| TemporalError::UnknownEntity(table.name.to_string()))
}

fn key_columns(table: &VersionedTable) -> impl Iterator<Item = String> + '_ {
    table
        .key
        .iter()
        .enumerate()
        .map(|(i, column)| format!("\"{}\" = ${}", column, i + 1))
}

fn key_predicate(table: &VersionedTable) -> String {
    key_columns(table)
        .chain(std::iter::once(format!("\"end_ts\" = '{}'", SENTINEL)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Boundary for the next transition of one key. `clock_timestamp()` rather
/// than `now()`, which is fixed at transaction start.
pub(crate) fn instant_sql(table: &VersionedTable) -> Result<String, TemporalError> {
    Ok(format!(
        "SELECT GREATEST(clock_timestamp()::timestamp, max(\"start_ts\"), \
         max(NULLIF(\"end_ts\", '{sentinel}'::timestamp))) AS at FROM {} WHERE {}",
        relation(table)?,
        key_columns(table).collect::<Vec<_>>().join(" AND "),
        sentinel = SENTINEL
    ))
}

pub(crate) fn select_current_sql(table: &VersionedTable) -> Result<String, TemporalError> {
    Ok(format!(
        "SELECT row_to_json(t) AS row FROM {} t WHERE {} FOR UPDATE",
        relation(table)?,
        key_predicate(table)
    ))
}

pub(crate) fn close_sql(table: &VersionedTable) -> Result<String, TemporalError> {
    Ok(format!(
        "UPDATE {} AS t SET \"end_ts\" = ${} WHERE {} RETURNING row_to_json(t) AS row",
        relation(table)?,
        table.key.len() + 1,
        key_predicate(table)
    ))
}

pub(crate) fn insert_sql(table: &VersionedTable, projection: &Projection) -> Result<String, TemporalError> {
    if projection.table().name != table.name {
        return Err(TemporalError::TableMismatch {
            expected: table.name,
            found: projection.table().name,
        });
    }

    let mut columns: Vec<String> = table.key.iter().map(|c| format!("\"{}\"", c)).collect();
    columns.extend(projection.columns().map(|c| format!("\"{}\"", c)));
    let bound = columns.len();
    columns.extend(["\"start_ts\"", "\"end_ts\"", "\"update_user\"", "\"audit_log\""].map(String::from));

    let mut values: Vec<String> = (1..=bound).map(|i| format!("${}", i)).collect();
    values.push(format!("${}", bound + 1));
    values.push(format!("'{}'", SENTINEL));
    values.push(format!("${}", bound + 2));
    values.push(format!("${}", bound + 3));

    Ok(format!(
        "INSERT INTO {} AS t ({}) VALUES ({}) RETURNING row_to_json(t) AS row",
        relation(table)?,
        columns.join(", "),
        values.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::table::{ADDRESS, CASE_TRACKER, CONSTRAINTS};
    use serde_json::json;

    #[test]
    fn close_targets_only_the_current_row() {
        let sql = close_sql(&CONSTRAINTS).unwrap();
        assert_eq!(
            sql,
            "UPDATE \"mtl\".\"metadata_constraints_summary\" AS t SET \"end_ts\" = $3 \
             WHERE \"case_id\" = $1 AND \"constraint_code\" = $2 AND \"end_ts\" = '9999-12-31 00:00:00' \
             RETURNING row_to_json(t) AS row"
        );
    }

    #[test]
    fn insert_binds_every_value() {
        let projection = Projection::empty(&CASE_TRACKER)
            .with_text("state", "Review")
            .unwrap()
            .with_text("sub_state", "Case Review Completed")
            .unwrap();
        let sql = insert_sql(&CASE_TRACKER, &projection).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"mtl\".\"case_tracker\" AS t (\"case_id\", \"state\", \"sub_state\", \"start_ts\", \"end_ts\", \"update_user\", \"audit_log\") \
             VALUES ($1, $2, $3, $4, '9999-12-31 00:00:00', $5, $6) RETURNING row_to_json(t) AS row"
        );
        assert!(!sql.contains("Review'"), "values must never be inlined");
    }

    #[test]
    fn insert_rejects_projection_for_another_table() {
        let projection = Projection::empty(&ADDRESS);
        assert!(matches!(
            insert_sql(&CASE_TRACKER, &projection),
            Err(TemporalError::TableMismatch { .. })
        ));
    }

    #[test]
    fn transition_instant_never_precedes_recorded_boundaries() {
        let sql = instant_sql(&CONSTRAINTS).unwrap();
        assert!(sql.starts_with("SELECT GREATEST(clock_timestamp()::timestamp, max(\"start_ts\")"));
        assert!(sql.contains("NULLIF(\"end_ts\", '9999-12-31 00:00:00'::timestamp)"));
        assert!(sql.ends_with("WHERE \"case_id\" = $1 AND \"constraint_code\" = $2"));
        assert!(!sql.contains("now()"));
    }

    #[test]
    fn current_row_is_locked() {
        let sql = select_current_sql(&CASE_TRACKER).unwrap();
        assert!(sql.ends_with("FOR UPDATE"));
        assert!(sql.contains("\"case_id\" = $1 AND \"end_ts\" = '9999-12-31 00:00:00'"));
    }

    #[test]
    fn guards_compare_against_the_current_row() {
        let current = json!({"case_id": "C-1", "sub_state": "Case Review In Progress"});

        let unless = Guard::unless_current("sub_state", "Case Review In Progress");
        assert!(!unless.permits(Some(&current)));
        assert!(unless.permits(None));

        let only = Guard::only_if_current("sub_state", "Case Review Completed");
        assert!(!only.permits(Some(&current)));
        assert!(!only.permits(None));
        assert!(Guard::only_if_current("sub_state", "Case Review In Progress").permits(Some(&current)));

        assert!(Guard::Always.permits(None));
    }
}
