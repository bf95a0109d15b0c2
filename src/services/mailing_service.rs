use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::required;
use crate::case::transitions::{state, sub_state};
use crate::case::WorkflowError;
use crate::database::DatabaseManager;
use crate::temporal::table::CASE_TRACKER;
use crate::temporal::{Guard, NaturalKey, Projection, WriteSequencer};

const AUDIT_MAILING: &str = "function: post-mailing-review";

const PASS_SQL: &str = "UPDATE mtl.qc_mailing SET qc_mailing_ready = TRUE, qc_user_email = $3, qc_insert_ts = now() \
     WHERE case_id = $1 AND mailing_batch_number = $2";

const FAIL_SQL: &str = "UPDATE mtl.qc_mailing SET qc_reason_remove_batch = $4, qc_mailing_ready = FALSE, \
     qc_user_email = $3, qc_insert_ts = now() \
     WHERE case_id = $1 AND mailing_batch_number = $2";

const RESET_MAILING_SQL: &str = "UPDATE mtl.qc_mailing SET case_reset = TRUE \
     WHERE case_id = $1 AND mailing_batch_number = $2";

const CLEAR_RELEASE_SQL: &str = "UPDATE mtl.case_allocation SET caserelease_ts = NULL \
     WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'";

const BATCH_STATS_SQL: &str = "SELECT mailing_batch_number, count(*) AS cases, \
     count(*) FILTER (WHERE qc_mailing_ready) AS passed, \
     count(*) FILTER (WHERE qc_mailing_ready = FALSE) AS failed, \
     count(*) FILTER (WHERE qc_mailing_ready IS NULL AND NOT case_reset) AS unchecked, \
     count(*) FILTER (WHERE case_reset) AS reset \
     FROM mtl.qc_mailing GROUP BY mailing_batch_number ORDER BY mailing_batch_number";

const BATCH_CASES_SQL: &str = "SELECT * FROM mtl.qc_mailing WHERE mailing_batch_number = $1 ORDER BY case_id";

const READY_SQL: &str = "SELECT * FROM mtl.qc_mailing WHERE qc_mailing_ready AND NOT case_reset \
     ORDER BY mailing_batch_number, case_id";

/// Mailing screens, selected by `query_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailingQuery {
    /// Per-batch check counts
    QcReview,
    /// Every case in one batch; needs `batch_number`
    QcBatchReview,
    /// Cases passed and ready to post
    Mailing,
}

/// Outcome of checking one case in a mailing batch
#[derive(Debug, Deserialize)]
#[serde(tag = "mailing_check", rename_all = "lowercase")]
pub enum MailingCheck {
    Pass,
    Fail { removal_reason: String },
    /// Pull the case out of the batch and back to unallocated review
    Reset,
}

#[derive(Debug, Deserialize)]
pub struct MailingReview {
    pub case_id: String,
    #[serde(rename = "userEmail")]
    pub user_email: String,
    pub batch_number: String,
    #[serde(flatten)]
    pub check: MailingCheck,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct MailingSummary {
    pub passed: u64,
    pub failed: u64,
    pub reset: u64,
}

pub struct MailingService {
    pool: PgPool,
}

impl MailingService {
    pub async fn new() -> Result<Self, WorkflowError> {
        let pool = DatabaseManager::pool().await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn cases(&self, query: MailingQuery, batch_number: Option<&str>) -> Result<Vec<Value>, WorkflowError> {
        let (inner, batch) = match query {
            MailingQuery::QcReview => (BATCH_STATS_SQL, None),
            MailingQuery::QcBatchReview => {
                let batch = required("batch_number", batch_number.unwrap_or_default())?;
                (BATCH_CASES_SQL, Some(batch))
            }
            MailingQuery::Mailing => (READY_SQL, None),
        };
        let sql = format!("SELECT row_to_json(t) AS row FROM ({}) t", inner);
        let mut select = sqlx::query(&sql);
        if let Some(batch) = batch {
            select = select.bind(batch);
        }
        let rows = select.fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get::<Value, _>("row")?);
        }
        debug!("Mailing {:?}: {} rows", query, out.len());
        Ok(out)
    }

    /// Apply a batch of mailing checks in one transaction.
    pub async fn review(&self, reviews: Vec<MailingReview>) -> Result<MailingSummary, WorkflowError> {
        if reviews.is_empty() {
            return Err(WorkflowError::InvalidRequest("no cases provided".to_string()));
        }

        let mut tx = DatabaseManager::begin(&self.pool).await?;
        let mut summary = MailingSummary::default();

        for review in &reviews {
            let case_id = required("case_id", &review.case_id)?;
            let user = required("userEmail", &review.user_email)?;
            let batch = required("batch_number", &review.batch_number)?;

            match &review.check {
                MailingCheck::Pass => {
                    let updated = sqlx::query(PASS_SQL)
                        .bind(case_id)
                        .bind(batch)
                        .bind(user)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                    summary.passed += in_batch(updated, case_id, batch)?;
                }
                MailingCheck::Fail { removal_reason } => {
                    let updated = sqlx::query(FAIL_SQL)
                        .bind(case_id)
                        .bind(batch)
                        .bind(user)
                        .bind(removal_reason.as_str())
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                    summary.failed += in_batch(updated, case_id, batch)?;
                }
                MailingCheck::Reset => {
                    sqlx::query(CLEAR_RELEASE_SQL).bind(case_id).execute(&mut *tx).await?;
                    sqlx::query(RESET_MAILING_SQL)
                        .bind(case_id)
                        .bind(batch)
                        .execute(&mut *tx)
                        .await?;
                    let key = NaturalKey::case(case_id)?;
                    let tracker = Projection::empty(&CASE_TRACKER)
                        .with_text("state", state::REVIEW)?
                        .with_text("sub_state", sub_state::REVIEW_UNALLOCATED)?;
                    WriteSequencer::apply(&mut tx, &key, &tracker, user, Some(AUDIT_MAILING), &Guard::Always).await?;
                    summary.reset += 1;
                }
            }
        }

        tx.commit().await?;
        info!("Mailing review: {:?}", summary);
        Ok(summary)
    }
}

/// Rows a pass or fail touched; none means the case is not in that batch.
fn in_batch(updated: u64, case_id: &str, batch: &str) -> Result<u64, WorkflowError> {
    if updated == 0 {
        return Err(WorkflowError::NotFound(format!("case {} in mailing batch {}", case_id, batch)));
    }
    Ok(updated)
}
