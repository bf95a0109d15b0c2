use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{lenient_i64, required};
use crate::case::{Stage, WorkflowError};
use crate::database::DatabaseManager;
use crate::temporal::{NaturalKey, WriteSequencer, SENTINEL};

/// Fixed FR work queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrQueue {
    Unallocated,
    BulkUnallocated,
    Allocated,
    BulkAllocated,
    Completed,
    EngineerReferral,
    Released,
}

impl FrQueue {
    pub fn sql(&self) -> &'static str {
        match self {
            FrQueue::Unallocated => {
                "SELECT case_id, population_cohort FROM mtl.case_allocation \
                 WHERE (length(assignedtoanalyst) = 0 OR assignedtoanalyst IS NULL) \
                 AND casestatusanalyst = 'NEW' AND end_ts = '9999-12-31 00:00:00' \
                 ORDER BY start_ts ASC"
            }
            FrQueue::BulkUnallocated => {
                "SELECT population_cohort, count(*) AS unallocated_cases FROM mtl.case_allocation \
                 WHERE (length(assignedtoanalyst) = 0 OR assignedtoanalyst IS NULL) \
                 AND casestatusanalyst = 'NEW' AND end_ts = '9999-12-31 00:00:00' \
                 GROUP BY population_cohort ORDER BY population_cohort"
            }
            FrQueue::Allocated => {
                "SELECT case_id, population_cohort, casestatusanalyst, fr_complete_date, engineer_referral, assignedtoanalystname \
                 FROM mtl.case_allocation \
                 WHERE length(assignedtoanalyst) > 1 AND end_ts = '9999-12-31 00:00:00' \
                 AND casestatusanalyst IN ('NEW', 'IN_PROGRESS') \
                 ORDER BY start_ts ASC"
            }
            FrQueue::BulkAllocated => {
                "SELECT assignedtoanalyst, assignedtoanalystname, population_cohort, count(*) AS allocated_cases \
                 FROM mtl.case_allocation \
                 WHERE length(assignedtoanalyst) > 1 AND casestatusanalyst = 'NEW' AND end_ts = '9999-12-31 00:00:00' \
                 GROUP BY assignedtoanalyst, assignedtoanalystname, population_cohort \
                 ORDER BY assignedtoanalystname, population_cohort"
            }
            FrQueue::Completed => {
                "SELECT case_id, population_cohort, casestatusanalyst, fr_complete_date, engineer_referral, assignedtoanalystname \
                 FROM mtl.case_allocation \
                 WHERE length(assignedtoanalyst) > 1 AND end_ts = '9999-12-31 00:00:00' \
                 AND casestatusanalyst = 'COMPLETED' AND caserelease_ts IS NULL \
                 ORDER BY fr_complete_date ASC"
            }
            FrQueue::EngineerReferral => {
                "SELECT * FROM mtl.case_allocation \
                 WHERE length(assignedtoanalyst) > 1 AND end_ts = '9999-12-31 00:00:00' \
                 AND engineer_referral IS NOT NULL AND casestatusanalyst <> 'COMPLETED' \
                 ORDER BY start_ts ASC"
            }
            FrQueue::Released => {
                "SELECT * FROM mtl.case_allocation \
                 WHERE caserelease_ts IS NOT NULL AND end_ts = '9999-12-31 00:00:00' \
                 ORDER BY caserelease_ts ASC"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAllocationType {
    /// Assign from the unassigned pool of a cohort
    Unallocated,
    /// Move cases from one reviewer to another
    Allocated,
}

#[derive(Debug, Deserialize)]
pub struct BulkAllocationRequest {
    pub email: String,
    pub name: String,
    pub cohort: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub amount: i64,
    #[serde(default)]
    pub original_email: Option<String>,
}

// Rows are picked once, in a materialised CTE, so `LIMIT $4` bounds the update.
const ALLOCATE_UNASSIGNED_SQL: &str = "WITH picked AS MATERIALIZED ( \
         SELECT case_allocation_sk FROM mtl.case_allocation \
         WHERE (length(assignedtoanalyst) = 0 OR assignedtoanalyst IS NULL) \
         AND casestatusanalyst = 'NEW' AND population_cohort = $3 AND end_ts = '9999-12-31 00:00:00' \
         ORDER BY start_ts LIMIT $4 FOR UPDATE SKIP LOCKED) \
     UPDATE mtl.case_allocation t SET assignedtoanalyst = $1, assignedtoanalystname = $2 \
     FROM picked WHERE t.case_allocation_sk = picked.case_allocation_sk";

const REALLOCATE_SQL: &str = "WITH picked AS MATERIALIZED ( \
         SELECT case_allocation_sk FROM mtl.case_allocation \
         WHERE assignedtoanalyst = $5 \
         AND casestatusanalyst = 'NEW' AND population_cohort = $3 AND end_ts = '9999-12-31 00:00:00' \
         ORDER BY start_ts LIMIT $4 FOR UPDATE SKIP LOCKED) \
     UPDATE mtl.case_allocation t SET assignedtoanalyst = $1, assignedtoanalystname = $2 \
     FROM picked WHERE t.case_allocation_sk = picked.case_allocation_sk";

/// One row of a QC, QA or CTC assignment batch
#[derive(Debug, Deserialize)]
pub struct StageAssignment {
    pub case_id: String,
    #[serde(alias = "qcemail", alias = "qaemail", alias = "ctcemail")]
    pub assignee_email: String,
    #[serde(default, alias = "qcname", alias = "qaname", alias = "ctcname")]
    pub assignee_name: Option<String>,
    #[serde(default, alias = "case_selection_criteria_qa", alias = "case_selection_criteria_ctc")]
    pub case_selection_criteria: Option<String>,
    /// User making the assignment
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StageAssigned {
    pub case_id: String,
    pub stage: &'static str,
    /// Whether the tracker moved to the stage's allocated sub-state
    pub handed_off: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineerApproval {
    Accepted,
    Rejected,
}

/// A single case id or a list of them
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CaseIds {
    One(String),
    Many(Vec<String>),
}

impl CaseIds {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            CaseIds::One(id) => vec![id],
            CaseIds::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EngineerReferralRequest {
    pub engineer_approval: EngineerApproval,
    #[serde(default)]
    pub engineer_email: Option<String>,
    #[serde(default)]
    pub engineer_name: Option<String>,
    pub case_id: CaseIds,
}

const ACCEPT_REFERRAL_SQL: &str = "UPDATE mtl.case_allocation SET casestatuser = 'NEW', casestatusqc = NULL, \
     assignedtoer = $2, assignedtoername = $3, engineer_referral = 'Accepted' \
     WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'";

const REJECT_REFERRAL_SQL: &str = "UPDATE mtl.case_allocation SET casestatusanalyst = 'NEW', casestatusqc = NULL, \
     engineer_referral = 'Rejected' \
     WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'";

#[derive(Debug, Deserialize)]
pub struct HoldRequest {
    pub case_id: String,
    pub on_hold_reason: String,
}

const HOLD_SQL: &str = "UPDATE mtl.case_allocation SET on_hold_reason = $2, on_hold_ts = now() \
     WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'";

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub case_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

const RELEASE_SQL: &str = "INSERT INTO mtl.bulk_case_release (case_id, caserelease_by, case_released) \
     SELECT unnest($1::text[]), $2, FALSE";

fn stage_update_sql(stage: Stage) -> String {
    let (email, name, criteria) = stage.assignment_columns();
    format!(
        "UPDATE mtl.case_allocation SET \"{}\" = $2, \"{}\" = $3, \"{}\" = $4 WHERE case_id = $1 AND end_ts = '{}'",
        email, name, criteria, SENTINEL
    )
}

fn stage_audit(stage: Stage) -> String {
    format!("function: post-{}-assigned-cases", stage.name())
}

pub struct AllocationService {
    pool: PgPool,
}

impl AllocationService {
    pub async fn new() -> Result<Self, WorkflowError> {
        let pool = DatabaseManager::pool().await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fr_queue(&self, queue: FrQueue) -> Result<Vec<Value>, WorkflowError> {
        let sql = format!("SELECT row_to_json(t) AS row FROM ({}) t", queue.sql());
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get::<Value, _>("row")?);
        }
        debug!("FR queue {:?}: {} rows", queue, out.len());
        Ok(out)
    }

    /// Assign up to `amount` NEW cases of a cohort to a reviewer. Returns how many moved.
    pub async fn fr_bulk_allocate(
        &self,
        kind: BulkAllocationType,
        request: BulkAllocationRequest,
    ) -> Result<u64, WorkflowError> {
        let email = required("email", &request.email)?;
        let cohort = required("cohort", &request.cohort)?;
        if request.amount <= 0 {
            return Err(WorkflowError::InvalidRequest(format!("amount must be positive, got {}", request.amount)));
        }

        let mut query = sqlx::query(match kind {
            BulkAllocationType::Unallocated => ALLOCATE_UNASSIGNED_SQL,
            BulkAllocationType::Allocated => REALLOCATE_SQL,
        })
        .bind(email)
        .bind(request.name.as_str())
        .bind(cohort)
        .bind(request.amount);
        if kind == BulkAllocationType::Allocated {
            let original = request
                .original_email
                .as_deref()
                .ok_or(WorkflowError::MissingField("original_email"))?;
            query = query.bind(required("original_email", original)?);
        }
        let moved = query.execute(&self.pool).await?.rows_affected();

        info!("Allocated {} {} cases to {}", moved, cohort, email);
        Ok(moved)
    }

    /// Assign a batch to a stage reviewer; QC and CTC also hand the tracker on.
    pub async fn assign_stage(
        &self,
        stage: Stage,
        assignments: Vec<StageAssignment>,
    ) -> Result<Vec<StageAssigned>, WorkflowError> {
        if assignments.is_empty() {
            return Err(WorkflowError::InvalidRequest("no cases provided".to_string()));
        }
        let sql = stage_update_sql(stage);
        let audit = stage_audit(stage);

        let mut tx = DatabaseManager::begin(&self.pool).await?;
        let mut results = Vec::with_capacity(assignments.len());

        for assignment in &assignments {
            let case_id = required("case_id", &assignment.case_id)?;
            let assignee = required("assignee_email", &assignment.assignee_email)?;
            let actor = assignment.email.as_deref().unwrap_or(assignee);

            let updated = sqlx::query(&sql)
                .bind(case_id)
                .bind(assignee)
                .bind(assignment.assignee_name.as_deref())
                .bind(assignment.case_selection_criteria.as_deref())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if updated == 0 {
                return Err(WorkflowError::NotFound(format!("allocation for case {}", case_id)));
            }

            let handed_off = match stage.hand_off() {
                Some(hand_off) => {
                    let key = NaturalKey::case(case_id)?;
                    let tracker = hand_off.tracker_projection()?;
                    WriteSequencer::apply(&mut tx, &key, &tracker, actor, Some(audit.as_str()), &hand_off.guard())
                        .await?
                        .is_inserted()
                }
                None => false,
            };
            results.push(StageAssigned {
                case_id: case_id.to_string(),
                stage: stage.name(),
                handed_off,
            });
        }

        tx.commit().await?;
        info!("Assigned {} cases for {}", results.len(), stage.name());
        Ok(results)
    }

    pub async fn engineer_referral(&self, request: EngineerReferralRequest) -> Result<u64, WorkflowError> {
        let case_ids = request.case_id.into_vec();
        if case_ids.is_empty() {
            return Err(WorkflowError::InvalidRequest("no cases provided".to_string()));
        }

        let mut tx = DatabaseManager::begin(&self.pool).await?;
        let mut updated = 0;
        match request.engineer_approval {
            EngineerApproval::Accepted => {
                let engineer = request
                    .engineer_email
                    .as_deref()
                    .ok_or(WorkflowError::MissingField("engineer_email"))?;
                let engineer = required("engineer_email", engineer)?;
                for case_id in &case_ids {
                    updated += sqlx::query(ACCEPT_REFERRAL_SQL)
                        .bind(case_id)
                        .bind(engineer)
                        .bind(request.engineer_name.as_deref())
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
            }
            EngineerApproval::Rejected => {
                for case_id in &case_ids {
                    updated += sqlx::query(REJECT_REFERRAL_SQL)
                        .bind(case_id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
            }
        }
        tx.commit().await?;

        info!("Engineer referral {:?} for {} cases", request.engineer_approval, updated);
        Ok(updated)
    }

    pub async fn hold(&self, holds: Vec<HoldRequest>) -> Result<u64, WorkflowError> {
        if holds.is_empty() {
            return Err(WorkflowError::InvalidRequest("no cases provided".to_string()));
        }
        let mut tx = DatabaseManager::begin(&self.pool).await?;
        let mut updated = 0;
        for hold in &holds {
            updated += sqlx::query(HOLD_SQL)
                .bind(required("case_id", &hold.case_id)?)
                .bind(hold.on_hold_reason.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Queue cases for bulk release, attributed to the first requester.
    pub async fn release(&self, releases: Vec<ReleaseRequest>) -> Result<u64, WorkflowError> {
        let first = releases
            .first()
            .ok_or_else(|| WorkflowError::InvalidRequest("no cases provided".to_string()))?;
        let released_by = first.email.clone();
        let case_ids = releases
            .iter()
            .map(|r| required("case_id", &r.case_id).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;

        let inserted = sqlx::query(RELEASE_SQL)
            .bind(&case_ids)
            .bind(released_by.as_deref())
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!("Queued {} cases for release", inserted);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_update_touches_only_that_stage() {
        let sql = stage_update_sql(Stage::Qa);
        assert_eq!(
            sql,
            "UPDATE mtl.case_allocation SET \"assignedtoqa\" = $2, \"assignedtoqaname\" = $3, \
             \"case_selection_criteria_qa\" = $4 WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'"
        );
        assert_eq!(stage_audit(Stage::Ctc), "function: post-ctc-assigned-cases");
    }

    #[test]
    fn stage_assignment_accepts_each_stage_shape() {
        let qc: StageAssignment = serde_json::from_value(json!({
            "qcemail": "qc@example.com", "qcname": "Q C", "case_selection_criteria": "Random",
            "case_id": "C-1", "email": "tl@example.com"
        }))
        .unwrap();
        assert_eq!(qc.assignee_email, "qc@example.com");
        assert_eq!(qc.email.as_deref(), Some("tl@example.com"));

        let qa: StageAssignment = serde_json::from_value(json!({
            "qaemail": "qa@example.com", "qaname": "Q A", "case_selection_criteria_qa": "Sample", "case_id": "C-2"
        }))
        .unwrap();
        assert_eq!(qa.case_selection_criteria.as_deref(), Some("Sample"));
        assert!(qa.email.is_none());
    }

    #[test]
    fn engineer_referral_takes_one_or_many_cases() {
        let accepted: EngineerReferralRequest = serde_json::from_value(json!({
            "engineer_approval": "accepted", "engineer_email": "er@example.com",
            "engineer_name": "E R", "case_id": ["C-1", "C-2"]
        }))
        .unwrap();
        assert_eq!(accepted.case_id.into_vec(), vec!["C-1", "C-2"]);

        let rejected: EngineerReferralRequest =
            serde_json::from_value(json!({"engineer_approval": "rejected", "case_id": "C-3"})).unwrap();
        assert_eq!(rejected.engineer_approval, EngineerApproval::Rejected);
        assert_eq!(rejected.case_id.into_vec(), vec!["C-3"]);
    }

    #[test]
    fn queues_only_read_current_allocations() {
        for queue in [
            FrQueue::Unallocated,
            FrQueue::BulkUnallocated,
            FrQueue::Allocated,
            FrQueue::BulkAllocated,
            FrQueue::Completed,
            FrQueue::EngineerReferral,
            FrQueue::Released,
        ] {
            assert!(queue.sql().contains("end_ts = '9999-12-31 00:00:00'"), "{:?}", queue);
        }
        let queue: FrQueue = serde_json::from_value(json!("bulk_unallocated")).unwrap();
        assert_eq!(queue, FrQueue::BulkUnallocated);
    }

    #[test]
    fn bulk_allocation_queries_are_bounded() {
        for sql in [ALLOCATE_UNASSIGNED_SQL, REALLOCATE_SQL] {
            assert!(sql.starts_with("WITH picked AS MATERIALIZED ("), "{}", sql);
            assert!(sql.contains("LIMIT $4 FOR UPDATE SKIP LOCKED)"));
            assert!(sql.ends_with("WHERE t.case_allocation_sk = picked.case_allocation_sk"));
            assert!(!sql.contains(" IN ("), "the pick must not be a re-evaluated IN subquery");
        }
        assert!(REALLOCATE_SQL.contains("assignedtoanalyst = $5"));
    }
}
