use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use super::{lenient_bool, lenient_i64, lenient_text, required};
use crate::case::transitions::{self, state, sub_state};
use crate::case::{CaseListFilter, CaseState, CaseStateProjector, Role, WorkflowError};
use crate::database::value::parse_timestamp;
use crate::database::DatabaseManager;
use crate::temporal::table::{ADDRESS, CASE_ALLOCATION, CASE_TRACKER, CONSTRAINTS, DECEASED_ADDRESS, INPUT_FILE_REVIEW};
use crate::temporal::{by_entity, Guard, NaturalKey, Projection, TransitionOutcome, VersionedTable, WriteSequencer};

const AUDIT_REVIEW: &str = "function: update-case";
const AUDIT_ADDRESS: &str = "function: case-update-address";
const AUDIT_CONTACT: &str = "function: post-contact-updates";
const AUDIT_RESET: &str = "function: post-reset-case";

/// Constraint code raised from the case screen
pub const FRONTEND_CONSTRAINT: &str = "CC555";

const CLOSE_SESSION_SQL: &str = "UPDATE mtl.file_review_stats SET end_ts = now(), active = FALSE \
     WHERE end_ts IS NULL AND case_id = $1 AND user_email = $2";

const OPEN_SESSION_SQL: &str = "INSERT INTO mtl.file_review_stats (case_id, user_email, role, start_ts, active) \
     VALUES ($1, $2, $3, now(), TRUE) ON CONFLICT (case_id) WHERE active DO NOTHING";

const LOG_BUTTON_SQL: &str = "INSERT INTO mtl.log_table_buttons (case_id, button_clicked, user_email, insert_ts, reason) \
     VALUES ($1, $2, $3, now(), $4)";

const CONTACT_OUTCOME_SQL: &str = "UPDATE mtl.contact_tracker SET contact_actual_ts = $1, outcome = $2, contact_type = $3, \
     update_user = $4, sc_approval_required = $5, audit_log = $6 \
     WHERE case_id = $7 AND contact_tracker_sk = $8 AND end_ts = '9999-12-31 00:00:00'";

const RETURN_TO_FR_SQL: &str = "UPDATE mtl.case_allocation SET casestatusanalyst = 'IN_PROGRESS', casestatusqc = NULL, \
     assignedtoqc = NULL, assignedtoqcname = NULL, fr_complete_date = NULL, batch_number = NULL, \
     case_selection_criteria = NULL, engineer_referral = NULL \
     WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'";

const RETURN_TO_QC_SQL: &str = "UPDATE mtl.case_allocation SET casestatusqc = 'IN_PROGRESS', qc_complete_ts = NULL \
     WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'";

const CLEAR_RELEASE_SQL: &str = "UPDATE mtl.case_allocation SET caserelease_ts = NULL \
     WHERE case_id = $1 AND end_ts = '9999-12-31 00:00:00'";

/// Body of a review save. Every field other than the named ones is a
/// column of the review snapshot.
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    #[serde(deserialize_with = "lenient_bool")]
    pub iscomplete: bool,
    #[serde(deserialize_with = "lenient_i64")]
    pub access_level: i64,
    pub update_user: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ReviewOutcome {
    pub case_id: String,
    pub role: Role,
    pub completed: bool,
    pub state: &'static str,
    pub sub_state: &'static str,
    /// False when the save repeated the current in-progress state
    pub tracker_changed: bool,
    pub sessions_closed: u64,
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub address_type: String,
    pub update_user: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub address: ContactUpdate,
    #[serde(default)]
    pub deceased_address: Option<Map<String, Value>>,
}

/// Contact outcome plus the address it was made at
#[derive(Debug, Deserialize)]
pub struct ContactUpdate {
    #[serde(deserialize_with = "lenient_i64")]
    pub contact_tracker_sk: i64,
    pub contact_type: Option<String>,
    pub outcome: Option<String>,
    pub actual_contact_dtm: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub sc_approval_required: Option<String>,
    pub update_user: String,
    #[serde(default)]
    pub audit_log: Option<String>,
    #[serde(flatten)]
    pub address: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "reset_type", rename_all = "lowercase")]
pub enum ResetRequest {
    Fr {
        #[serde(rename = "userEmail")]
        user_email: String,
    },
    Qc {
        #[serde(rename = "userEmail")]
        user_email: String,
    },
    Descope {
        #[serde(rename = "userEmail")]
        user_email: String,
        descope_reason: String,
    },
    Reset {
        #[serde(rename = "userEmail")]
        user_email: String,
        reset_reason: String,
    },
    Constrain {
        #[serde(rename = "userEmail")]
        user_email: String,
        constrain_reason: String,
    },
    Unconstrain {
        #[serde(rename = "userEmail")]
        user_email: String,
    },
}

impl ResetRequest {
    pub fn user_email(&self) -> &str {
        match self {
            ResetRequest::Fr { user_email }
            | ResetRequest::Qc { user_email }
            | ResetRequest::Descope { user_email, .. }
            | ResetRequest::Reset { user_email, .. }
            | ResetRequest::Constrain { user_email, .. }
            | ResetRequest::Unconstrain { user_email } => user_email,
        }
    }

    /// Label written to the button log
    pub fn button(&self) -> &'static str {
        match self {
            ResetRequest::Fr { .. } => "Return to FR",
            ResetRequest::Qc { .. } => "Return to QC",
            ResetRequest::Descope { .. } => "Descope",
            ResetRequest::Reset { .. } => "FR Reset",
            ResetRequest::Constrain { .. } => "Constrain",
            ResetRequest::Unconstrain { .. } => "Unconstrain",
        }
    }

    /// Reject blank reasons before anything is written.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        required("userEmail", self.user_email())?;
        match self {
            ResetRequest::Descope { descope_reason, .. } => required("descope_reason", descope_reason).map(drop),
            ResetRequest::Reset { reset_reason, .. } => required("reset_reason", reset_reason).map(drop),
            ResetRequest::Constrain { constrain_reason, .. } => required("constrain_reason", constrain_reason).map(drop),
            _ => Ok(()),
        }
    }

    fn log_reason(&self) -> &str {
        match self {
            ResetRequest::Descope { descope_reason, .. } => descope_reason.trim(),
            ResetRequest::Reset { reset_reason, .. } => reset_reason.trim(),
            _ => "",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenCaseRequest {
    #[serde(rename = "userEmail")]
    pub user_email: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// What `GET /api/cases/:id` returns, by `query_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetailKind {
    #[default]
    Details,
    History,
    Contact,
    Queries,
}

/// Address type → versioned address table
pub fn address_table(address_type: &str) -> Result<&'static VersionedTable, WorkflowError> {
    match address_type {
        "Policy Holder" => Ok(&ADDRESS),
        "Executor" | "Informant" => Ok(&DECEASED_ADDRESS),
        other => Err(WorkflowError::UnknownAddressType(other.to_string())),
    }
}

pub struct CaseService {
    pool: PgPool,
}

impl CaseService {
    pub async fn new() -> Result<Self, WorkflowError> {
        let pool = DatabaseManager::pool().await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn state(&self, case_id: &str) -> Result<CaseState, WorkflowError> {
        CaseStateProjector::current_state(&self.pool, case_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("case {}", case_id)))
    }

    pub async fn details(&self, case_id: &str, kind: DetailKind) -> Result<Value, WorkflowError> {
        match kind {
            DetailKind::Details => CaseStateProjector::case_details(&self.pool, case_id)
                .await?
                .ok_or_else(|| WorkflowError::NotFound(format!("case {}", case_id))),
            DetailKind::History => {
                let key = NaturalKey::case(case_id)?;
                let history = CaseStateProjector::history(&self.pool, &CASE_TRACKER, &key).await?;
                Ok(Value::Array(history))
            }
            DetailKind::Contact => Ok(Value::Array(CaseStateProjector::contacts(&self.pool, case_id).await?)),
            DetailKind::Queries => Ok(Value::Array(CaseStateProjector::queries(&self.pool, case_id).await?)),
        }
    }

    /// Every version of one entity of a case. Key columns beyond `case_id`
    /// (a constraint code, a query id) are looked up by name in `key_parts`.
    pub async fn versions(
        &self,
        case_id: &str,
        entity: &str,
        key_parts: &HashMap<String, String>,
    ) -> Result<Vec<Value>, WorkflowError> {
        let table = by_entity(entity)?;
        let mut values = vec![case_id];
        for column in &table.key[1..] {
            let part = key_parts.get(*column).ok_or(WorkflowError::MissingField(*column))?;
            values.push(part.as_str());
        }
        let key = NaturalKey::new(table, &values)?;
        Ok(CaseStateProjector::history(&self.pool, table, &key).await?)
    }

    pub async fn list(&self, filter: &CaseListFilter) -> Result<Vec<Value>, WorkflowError> {
        Ok(CaseStateProjector::list_cases(&self.pool, filter).await?)
    }

    /// Save a review: snapshot, allocation status, tracker and session, together.
    pub async fn review(&self, case_id: &str, request: ReviewRequest) -> Result<ReviewOutcome, WorkflowError> {
        let role = Role::from_access_level(request.access_level)
            .ok_or(WorkflowError::UnknownAccessLevel(request.access_level))?;
        let actor = required("update_user", &request.update_user)?;
        let key = NaturalKey::case(case_id)?;
        let snapshot = Projection::from_payload(&INPUT_FILE_REVIEW, &key, &Value::Object(request.fields))?;
        let rule = transitions::lookup(role, request.iscomplete);
        let tracker = rule.tracker_projection()?;

        let mut tx = DatabaseManager::begin(&self.pool).await?;

        let (sql, params) = rule.allocation_update();
        let mut query = sqlx::query(&sql).bind(case_id);
        for param in params {
            query = query.bind(param);
        }
        if query.execute(&mut *tx).await?.rows_affected() == 0 {
            return Err(WorkflowError::NotFound(format!("allocation for case {}", case_id)));
        }

        if !snapshot.is_empty() {
            WriteSequencer::apply(&mut tx, &key, &snapshot, actor, Some(AUDIT_REVIEW), &Guard::Always).await?;
        }

        let outcome = WriteSequencer::apply(&mut tx, &key, &tracker, actor, Some(AUDIT_REVIEW), &rule.tracker_guard()).await?;

        let sessions_closed = if rule.closes_session() {
            sqlx::query(CLOSE_SESSION_SQL)
                .bind(case_id)
                .bind(actor)
                .execute(&mut *tx)
                .await?
                .rows_affected()
        } else {
            0
        };

        tx.commit().await?;

        info!("Case {} reviewed by {} as {}: {}", case_id, actor, role, rule.sub_state);
        Ok(ReviewOutcome {
            case_id: case_id.to_string(),
            role,
            completed: rule.completed,
            state: rule.state(),
            sub_state: rule.sub_state,
            tracker_changed: outcome.is_inserted(),
            sessions_closed,
        })
    }

    pub async fn update_address(&self, case_id: &str, request: AddressRequest) -> Result<Value, WorkflowError> {
        let table = address_table(&request.address_type)?;
        let actor = required("update_user", &request.update_user)?;
        let key = NaturalKey::new(table, &[case_id])?;
        let projection = Projection::from_payload(table, &key, &Value::Object(request.fields))?
            .with_text("address_type", request.address_type.as_str())?;

        let mut tx = DatabaseManager::begin(&self.pool).await?;
        let outcome = WriteSequencer::apply(&mut tx, &key, &projection, actor, Some(AUDIT_ADDRESS), &Guard::Always).await?;
        tx.commit().await?;

        info!("Versioned {} for case {}", table.entity, case_id);
        Ok(outcome.current().cloned().unwrap_or(Value::Null))
    }

    /// Record a contact outcome in place, then version the addresses it carried.
    pub async fn update_contact(&self, case_id: &str, request: ContactRequest) -> Result<Value, WorkflowError> {
        let contact = request.address;
        let actor = required("update_user", &contact.update_user)?;
        let contacted_at = parse_timestamp(&contact.actual_contact_dtm)
            .ok_or_else(|| WorkflowError::InvalidRequest(format!("actual_contact_dtm: {}", contact.actual_contact_dtm)))?;
        let reason = contact.audit_log.as_deref().unwrap_or(AUDIT_CONTACT);

        let key = NaturalKey::case(case_id)?;
        let address = Projection::from_payload(&ADDRESS, &key, &Value::Object(contact.address))?;
        let deceased = match request.deceased_address {
            Some(fields) => Some(Projection::from_payload(&DECEASED_ADDRESS, &key, &Value::Object(fields))?),
            None => None,
        };

        let mut tx = DatabaseManager::begin(&self.pool).await?;

        let updated = sqlx::query(CONTACT_OUTCOME_SQL)
            .bind(contacted_at)
            .bind(contact.outcome.as_deref())
            .bind(contact.contact_type.as_deref())
            .bind(actor)
            .bind(contact.sc_approval_required.as_deref().filter(|v| !v.is_empty()))
            .bind(reason)
            .bind(case_id)
            .bind(contact.contact_tracker_sk)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(WorkflowError::NotFound(format!(
                "contact {} for case {}",
                contact.contact_tracker_sk, case_id
            )));
        }

        let address = WriteSequencer::apply(&mut tx, &key, &address, actor, Some(reason), &Guard::Always).await?;
        let deceased = match deceased {
            Some(projection) => {
                Some(WriteSequencer::apply(&mut tx, &key, &projection, actor, Some(reason), &Guard::Always).await?)
            }
            None => None,
        };

        tx.commit().await?;

        debug!("Contact {} recorded for case {}", contact.contact_tracker_sk, case_id);
        Ok(json!({
            "contact_tracker_sk": contact.contact_tracker_sk,
            "address": address.current(),
            "deceased_address": deceased.as_ref().and_then(TransitionOutcome::current),
        }))
    }

    pub async fn reset(&self, case_id: &str, request: ResetRequest) -> Result<Value, WorkflowError> {
        request.validate()?;
        let actor = required("userEmail", request.user_email())?.to_string();
        let key = NaturalKey::case(case_id)?;

        let mut tx = DatabaseManager::begin(&self.pool).await?;

        match &request {
            ResetRequest::Fr { .. } => update_allocation(&mut tx, RETURN_TO_FR_SQL, case_id).await?,
            ResetRequest::Qc { .. } => update_allocation(&mut tx, RETURN_TO_QC_SQL, case_id).await?,
            ResetRequest::Descope { descope_reason, .. } => {
                let reason = descope_reason.trim();
                if WriteSequencer::retire(&mut tx, &CASE_ALLOCATION, &key, &actor).await?.is_none() {
                    return Err(WorkflowError::NotFound(format!("allocation for case {}", case_id)));
                }
                let tracker = Projection::empty(&CASE_TRACKER)
                    .with_text("state", state::CLOSED)?
                    .with_text("sub_state", sub_state::DESCOPED)?
                    .with_text("descope_reason", reason)?;
                WriteSequencer::apply(&mut tx, &key, &tracker, &actor, Some(AUDIT_RESET), &Guard::Always).await?;
            }
            ResetRequest::Reset { .. } => {
                update_allocation(&mut tx, CLEAR_RELEASE_SQL, case_id).await?;
                let tracker = Projection::empty(&CASE_TRACKER)
                    .with_text("state", state::REVIEW)?
                    .with_text("sub_state", sub_state::REVIEW_UNALLOCATED)?;
                WriteSequencer::apply(&mut tx, &key, &tracker, &actor, Some(AUDIT_RESET), &Guard::Always).await?;
            }
            ResetRequest::Constrain { constrain_reason, .. } => {
                let reason = constrain_reason.trim();
                let key = NaturalKey::new(&CONSTRAINTS, &[case_id, FRONTEND_CONSTRAINT])?;
                let constraint =
                    Projection::empty(&CONSTRAINTS).with_text("constraint_desc", format!("Frontend: {}", reason))?;
                WriteSequencer::apply(&mut tx, &key, &constraint, &actor, Some(AUDIT_RESET), &Guard::Always).await?;
            }
            ResetRequest::Unconstrain { .. } => {
                let key = NaturalKey::new(&CONSTRAINTS, &[case_id, FRONTEND_CONSTRAINT])?;
                WriteSequencer::retire(&mut tx, &CONSTRAINTS, &key, &actor).await?;
            }
        }

        sqlx::query(LOG_BUTTON_SQL)
            .bind(case_id)
            .bind(request.button())
            .bind(&actor)
            .bind(request.log_reason())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!("{} applied to case {} by {}", request.button(), case_id, actor);
        Ok(json!({ "case_id": case_id, "action": request.button() }))
    }

    /// Start a review session unless the case already has an active one.
    pub async fn open(&self, case_id: &str, request: OpenCaseRequest) -> Result<Value, WorkflowError> {
        required("case_id", case_id)?;
        let user = required("userEmail", &request.user_email)?;
        let opened = sqlx::query(OPEN_SESSION_SQL)
            .bind(case_id)
            .bind(user)
            .bind(request.role.as_deref())
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;
        debug!("Open case {} by {}: new session = {}", case_id, user, opened);
        Ok(json!({ "case_id": case_id, "opened": opened }))
    }
}

async fn update_allocation(conn: &mut PgConnection, sql: &str, case_id: &str) -> Result<(), WorkflowError> {
    let updated = sqlx::query(sql).bind(case_id).execute(&mut *conn).await?.rows_affected();
    if updated == 0 {
        return Err(WorkflowError::NotFound(format!("allocation for case {}", case_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_types_route_to_tables() {
        assert_eq!(address_table("Policy Holder").unwrap().name, "mtl.address");
        assert_eq!(address_table("Executor").unwrap().name, "mtl.deceased_address");
        assert_eq!(address_table("Informant").unwrap().name, "mtl.deceased_address");
        assert!(matches!(address_table("Neighbour"), Err(WorkflowError::UnknownAddressType(_))));
    }

    #[test]
    fn review_request_keeps_snapshot_fields_apart() {
        let request: ReviewRequest = serde_json::from_value(json!({
            "iscomplete": "true",
            "access_level": 2,
            "update_user": "qc@example.com",
            "case_id": "C-1",
            "qc_review_outcome": "Pass"
        }))
        .unwrap();
        assert!(request.iscomplete);
        assert_eq!(request.access_level, 2);
        assert!(!request.fields.contains_key("access_level"));
        assert!(!request.fields.contains_key("update_user"));
        assert_eq!(request.fields["qc_review_outcome"], "Pass");

        let key = NaturalKey::case("C-1").unwrap();
        let snapshot = Projection::from_payload(&INPUT_FILE_REVIEW, &key, &Value::Object(request.fields)).unwrap();
        assert_eq!(snapshot.columns().collect::<Vec<_>>(), vec!["qc_review_outcome"]);
    }

    #[test]
    fn reset_requests_are_tagged_by_type() {
        let request: ResetRequest = serde_json::from_value(json!({
            "reset_type": "descope",
            "userEmail": "tl@example.com",
            "descope_reason": "Duplicate"
        }))
        .unwrap();
        assert_eq!(request.button(), "Descope");
        assert_eq!(request.log_reason(), "Duplicate");
        assert_eq!(request.user_email(), "tl@example.com");

        let request: ResetRequest =
            serde_json::from_value(json!({"reset_type": "fr", "userEmail": "tl@example.com"})).unwrap();
        assert_eq!(request.button(), "Return to FR");

        assert!(serde_json::from_value::<ResetRequest>(json!({"reset_type": "purge", "userEmail": "x"})).is_err());
        assert!(serde_json::from_value::<ResetRequest>(json!({"reset_type": "descope", "userEmail": "x"})).is_err());
    }

    #[test]
    fn reset_needs_a_reason() {
        assert!(serde_json::from_value::<ResetRequest>(json!({"reset_type": "reset", "userEmail": "tl@example.com"})).is_err());

        let blank: ResetRequest = serde_json::from_value(json!({
            "reset_type": "reset",
            "userEmail": "tl@example.com",
            "reset_reason": "  "
        }))
        .unwrap();
        assert!(matches!(blank.validate(), Err(WorkflowError::MissingField("reset_reason"))));

        let given: ResetRequest = serde_json::from_value(json!({
            "reset_type": "reset",
            "userEmail": "tl@example.com",
            "reset_reason": "Mailing returned "
        }))
        .unwrap();
        assert!(given.validate().is_ok());
        assert_eq!(given.log_reason(), "Mailing returned");
        assert_eq!(given.button(), "FR Reset");
    }

    #[test]
    fn contact_update_separates_address_columns() {
        let request: ContactRequest = serde_json::from_value(json!({
            "address": {
                "contact_tracker_sk": "17",
                "contact_type": "Letter",
                "outcome": "Delivered",
                "actual_contact_dtm": "2024-03-01 10:15:00",
                "sc_approval_required": "Yes",
                "update_user": "fr@example.com",
                "audit_log": "screen",
                "case_id": "C-1",
                "address_line_1": "1 High Street",
                "postcode": ""
            }
        }))
        .unwrap();
        assert_eq!(request.address.contact_tracker_sk, 17);
        assert_eq!(request.address.sc_approval_required.as_deref(), Some("Yes"));
        assert!(request.deceased_address.is_none());

        let key = NaturalKey::case("C-1").unwrap();
        let address = Projection::from_payload(&ADDRESS, &key, &Value::Object(request.address.address)).unwrap();
        let mut columns: Vec<_> = address.columns().collect();
        columns.sort_unstable();
        assert_eq!(columns, vec!["address_line_1", "postcode"]);
        assert!(address.get("postcode").unwrap().is_null());
    }

    #[test]
    fn detail_kind_defaults_to_details() {
        assert_eq!(DetailKind::default(), DetailKind::Details);
        assert_eq!(serde_json::from_value::<DetailKind>(json!("history")).unwrap(), DetailKind::History);
        assert_eq!(serde_json::from_value::<DetailKind>(json!("queries")).unwrap(), DetailKind::Queries);
    }
}
