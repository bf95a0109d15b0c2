use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::{debug, info};

use super::{lenient_i64, lenient_text, required};
use crate::case::WorkflowError;
use crate::database::value::{parse_timestamp, ColumnType, SqlValue};
use crate::database::DatabaseManager;
use crate::temporal::table::{ADDRESS, CONTACT_QUERIES, DECEASED_ADDRESS};
use crate::temporal::{Guard, NaturalKey, Projection, TemporalError, TransitionOutcome, WriteSequencer};

pub const QUERY_OPEN: &str = "OPEN";
pub const QUERY_CLOSED: &str = "CLOSED";

const AUDIT_NEW_QUERY: &str = "New Query";
const AUDIT_UPDATE_QUERY: &str = "Update Query";
const AUDIT_CLOSE_QUERY: &str = "Close Query";
const AUDIT_APPROVAL: &str = "function: post-contact-approval";

/// Audit label the approval screen sends with a rejection
pub const REJECT_AUDIT_LOG: &str = "Approval Contact Screen - Outcome: Reject";

/// Columns of a query that stay with it for its whole life
const OPENING_COLUMNS: [&str; 2] = ["open_date", "open_user"];

const NEXT_QUERY_ID_SQL: &str = "SELECT nextval('mtl.contact_query_id_seq')::text";

const REJECT_SQL: &str = "UPDATE mtl.contact_tracker SET sc_approval_required = NULL, tl_rejection_reason = $3, \
     update_user = $4, audit_log = $5 \
     WHERE case_id = $1 AND contact_tracker_sk = $2 AND end_ts = '9999-12-31 00:00:00'";

const APPROVE_SQL: &str = "UPDATE mtl.contact_tracker SET outcome = COALESCE($3, outcome), sc_approval_required = $4, \
     update_user = $5, audit_log = $6 \
     WHERE case_id = $1 AND contact_tracker_sk = $2 AND end_ts = '9999-12-31 00:00:00'";

/// Team-leader decision, kept as a closed row next to the contact it judged
const APPROVAL_AUDIT_SQL: &str = "INSERT INTO mtl.contact_tracker (case_id, contact_type, contact_channel, outcome, \
     contact_actual_ts, call_summary, sc_approval_required, tl_rejection_reason, recalc_reason, payment_type, \
     customer_info_confirmed, start_ts, end_ts, update_user, audit_log) \
     VALUES ($1, 'TL Approval', 'MTL Tool', $2, $3, $4, $5, $6, $7, $8, $9, now(), now(), $10, $11) \
     RETURNING contact_tracker_sk";

/// Raise, amend or close a customer query
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "userEmail")]
    pub user_email: String,
    #[serde(default, rename = "claim_ref")]
    pub claim_reference: Option<String>,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub query_description: Option<String>,
    pub query_date: String,
    #[serde(flatten)]
    pub action: QueryAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action_type", rename_all = "lowercase")]
pub enum QueryAction {
    New,
    Update {
        #[serde(default, rename = "queryId", deserialize_with = "lenient_text")]
        query_id: Option<String>,
    },
    Close {
        #[serde(default, rename = "queryId", deserialize_with = "lenient_text")]
        query_id: Option<String>,
    },
}

impl QueryAction {
    fn audit(&self) -> &'static str {
        match self {
            QueryAction::New => AUDIT_NEW_QUERY,
            QueryAction::Update { .. } => AUDIT_UPDATE_QUERY,
            QueryAction::Close { .. } => AUDIT_CLOSE_QUERY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub address: ApprovalUpdate,
    #[serde(default)]
    pub deceased_address: Option<Map<String, Value>>,
}

/// Team-leader verdict on a contact, plus the address it confirms
#[derive(Debug, Deserialize)]
pub struct ApprovalUpdate {
    #[serde(deserialize_with = "lenient_i64")]
    pub contact_tracker_sk: i64,
    #[serde(default)]
    pub decision: Option<ApprovalDecision>,
    #[serde(default)]
    pub contact_type: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub actual_contact_dtm: Option<String>,
    #[serde(default)]
    pub call_summary: Option<String>,
    #[serde(default)]
    pub tl_rejection_reason: Option<String>,
    /// Copied to the approval audit row. The contact row itself gets the
    /// approver marker or `No`, never this value.
    #[serde(default, deserialize_with = "lenient_text")]
    pub sc_approval_required: Option<String>,
    #[serde(default)]
    pub recalc_reason: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub customer_info_confirmed: Option<String>,
    pub update_user: String,
    #[serde(default)]
    pub audit_log: Option<String>,
    #[serde(flatten)]
    pub address: Map<String, Value>,
}

impl ApprovalUpdate {
    /// Explicit `decision`, otherwise read from the screen's audit label
    pub fn decision(&self) -> ApprovalDecision {
        match (self.decision, self.audit_log.as_deref()) {
            (Some(decision), _) => decision,
            (None, Some(REJECT_AUDIT_LOG)) => ApprovalDecision::Reject,
            (None, _) => ApprovalDecision::Approve,
        }
    }
}

/// Marker left in `sc_approval_required` once a team leader signs off
pub fn approved_by(user: &str) -> String {
    format!("Approved by: {}", user)
}

/// `sc_approval_required` of the audit row: the submitted value on approval,
/// the contact's own marker on rejection.
fn audit_marker<'a>(decision: ApprovalDecision, submitted: Option<&'a str>, marker: &'a str) -> Option<&'a str> {
    match decision {
        ApprovalDecision::Approve => submitted.filter(|v| !v.trim().is_empty()),
        ApprovalDecision::Reject => Some(marker),
    }
}

pub struct ContactService {
    pool: PgPool,
}

impl ContactService {
    pub async fn new() -> Result<Self, WorkflowError> {
        let pool = DatabaseManager::pool().await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a new query, or version an open one as amended or closed.
    pub async fn query(&self, case_id: &str, request: QueryRequest) -> Result<Value, WorkflowError> {
        let actor = required("userEmail", &request.user_email)?;
        let date = SqlValue::coerce("query_date", ColumnType::Date, &Value::String(request.query_date.clone()))
            .map_err(TemporalError::from)?;
        if date.is_null() {
            return Err(WorkflowError::MissingField("query_date"));
        }
        let details = Projection::empty(&CONTACT_QUERIES)
            .with("claim_reference", SqlValue::optional_text(request.claim_reference.as_deref()))?
            .with("query_type", SqlValue::optional_text(request.query_type.as_deref()))?
            .with("query_description", SqlValue::optional_text(request.query_description.as_deref()))?;
        let reason = request.action.audit();
        let follow_up = match &request.action {
            QueryAction::New => None,
            QueryAction::Update { query_id } | QueryAction::Close { query_id } => {
                Some(required("queryId", query_id.as_deref().unwrap_or_default())?)
            }
        };

        let mut tx = DatabaseManager::begin(&self.pool).await?;

        let outcome = match follow_up {
            None => {
                let query_id: String = sqlx::query_scalar(NEXT_QUERY_ID_SQL).fetch_one(&mut *tx).await?;
                let key = NaturalKey::new(&CONTACT_QUERIES, &[case_id, query_id.as_str()])?;
                let projection = details
                    .with_text("query_status", QUERY_OPEN)?
                    .with("open_date", date)?
                    .with_text("open_user", actor)?;
                WriteSequencer::apply(&mut tx, &key, &projection, actor, Some(reason), &Guard::Always).await?
            }
            Some(query_id) => {
                let key = NaturalKey::new(&CONTACT_QUERIES, &[case_id, query_id])?;
                let open = || WorkflowError::NotFound(format!("open query {} for case {}", query_id, case_id));

                let current = WriteSequencer::lock_current(&mut tx, &CONTACT_QUERIES, &key)
                    .await?
                    .ok_or_else(open)?;
                let mut projection = carry_opening(details, &current)?;
                projection = match request.action {
                    QueryAction::Close { .. } => projection
                        .with_text("query_status", QUERY_CLOSED)?
                        .with("closed_date", date)?
                        .with_text("closed_user", actor)?,
                    _ => projection.with_text("query_status", QUERY_OPEN)?.with("update_date", date)?,
                };

                let guard = Guard::only_if_current("query_status", QUERY_OPEN);
                match WriteSequencer::apply(&mut tx, &key, &projection, actor, Some(reason), &guard).await? {
                    TransitionOutcome::Skipped { .. } => return Err(open()),
                    inserted => inserted,
                }
            }
        };

        tx.commit().await?;

        info!("{} on case {} by {}", reason, case_id, actor);
        Ok(outcome.current().cloned().unwrap_or(Value::Null))
    }

    /// Approve or reject a contact. A rejection clears the approval flag; an
    /// approval stamps the approver and versions the confirmed addresses.
    pub async fn approve(&self, case_id: &str, request: ApprovalRequest) -> Result<Value, WorkflowError> {
        let update = request.address;
        let actor = required("update_user", &update.update_user)?;
        let decision = update.decision();
        let reason = update.audit_log.as_deref().unwrap_or(AUDIT_APPROVAL);
        let contacted_at = match update.actual_contact_dtm.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_timestamp(raw)
                    .ok_or_else(|| WorkflowError::InvalidRequest(format!("actual_contact_dtm: {}", raw)))?,
            ),
        };

        let key = NaturalKey::case(case_id)?;
        let (marker, rejection, address, deceased) = match decision {
            ApprovalDecision::Reject => {
                let rejection = required("tl_rejection_reason", update.tl_rejection_reason.as_deref().unwrap_or_default())?;
                ("No".to_string(), Some(rejection), None, None)
            }
            ApprovalDecision::Approve => {
                let address = Projection::from_payload(&ADDRESS, &key, &Value::Object(update.address.clone()))?;
                let deceased = match &request.deceased_address {
                    Some(fields) => Some(Projection::from_payload(&DECEASED_ADDRESS, &key, &Value::Object(fields.clone()))?),
                    None => None,
                };
                (approved_by(actor), None, Some(address), deceased)
            }
        };

        let mut tx = DatabaseManager::begin(&self.pool).await?;

        let updated = match decision {
            ApprovalDecision::Reject => sqlx::query(REJECT_SQL)
                .bind(case_id)
                .bind(update.contact_tracker_sk)
                .bind(rejection)
                .bind(actor)
                .bind(reason),
            ApprovalDecision::Approve => sqlx::query(APPROVE_SQL)
                .bind(case_id)
                .bind(update.contact_tracker_sk)
                .bind(update.outcome.as_deref())
                .bind(marker.as_str())
                .bind(actor)
                .bind(reason),
        }
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(WorkflowError::NotFound(format!(
                "contact {} for case {}",
                update.contact_tracker_sk, case_id
            )));
        }

        let audit_sk: i64 = sqlx::query_scalar(APPROVAL_AUDIT_SQL)
            .bind(case_id)
            .bind(update.outcome.as_deref())
            .bind(contacted_at)
            .bind(update.call_summary.as_deref())
            .bind(audit_marker(decision, update.sc_approval_required.as_deref(), &marker))
            .bind(rejection)
            .bind(update.recalc_reason.as_deref())
            .bind(update.payment_type.as_deref())
            .bind(update.customer_info_confirmed.as_deref())
            .bind(actor)
            .bind(reason)
            .fetch_one(&mut *tx)
            .await?;

        let mut versioned = Vec::new();
        for projection in address.iter().chain(deceased.iter()).filter(|p| !p.is_empty()) {
            let outcome = WriteSequencer::apply(&mut tx, &key, projection, actor, Some(reason), &Guard::Always).await?;
            versioned.push((projection.table().entity, outcome.current().cloned()));
        }

        tx.commit().await?;

        debug!("Contact {} on case {}: {:?} by {}", update.contact_tracker_sk, case_id, decision, actor);
        let mut result = json!({
            "contact_tracker_sk": update.contact_tracker_sk,
            "decision": decision,
            "approval_contact_tracker_sk": audit_sk,
        });
        for (entity, current) in versioned {
            result[entity] = current.unwrap_or(Value::Null);
        }
        Ok(result)
    }
}

/// Start from `details` and keep the opening date and user of `current`.
fn carry_opening(details: Projection, current: &Value) -> Result<Projection, WorkflowError> {
    let mut projection = details;
    for column in OPENING_COLUMNS {
        let Some(spec) = CONTACT_QUERIES.column(column) else { continue };
        let value = current.get(column).unwrap_or(&Value::Null);
        let value = SqlValue::coerce(column, spec.ty, value).map_err(TemporalError::from)?;
        projection = projection.with(column, value)?;
    }
    Ok(projection)
}
