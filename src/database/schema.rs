use sqlx::PgPool;
use tracing::info;

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::value::ColumnType;
use crate::filter::Relation;

/// DDL for the `mtl` schema, in dependency order. Every statement is idempotent.
pub const STATEMENTS: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS mtl",
    r#"CREATE TABLE IF NOT EXISTS mtl.case_allocation (
    case_allocation_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    population_cohort TEXT,
    assignedtoanalyst TEXT,
    assignedtoanalystname TEXT,
    casestatusanalyst TEXT,
    assignedtoqc TEXT,
    assignedtoqcname TEXT,
    casestatusqc TEXT,
    case_selection_criteria TEXT,
    assignedtoqa TEXT,
    assignedtoqaname TEXT,
    casestatusqa TEXT,
    case_selection_criteria_qa TEXT,
    assignedtoctc TEXT,
    assignedtoctcname TEXT,
    casestatusctc TEXT,
    case_selection_criteria_ctc TEXT,
    assignedtoer TEXT,
    assignedtoername TEXT,
    casestatuser TEXT,
    engineer_referral TEXT,
    fr_complete_date DATE,
    qc_complete_ts TIMESTAMP,
    qa_complete_ts TIMESTAMP,
    ctc_complete_ts TIMESTAMP,
    er_complete_ts TIMESTAMP,
    batch_number TEXT,
    on_hold_reason TEXT,
    on_hold_ts TIMESTAMP,
    caserelease_ts TIMESTAMP,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.case_tracker (
    case_tracker_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    state TEXT,
    sub_state TEXT,
    descope_reason TEXT,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.address (
    address_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    address_type TEXT,
    address_line_1 TEXT,
    address_line_2 TEXT,
    address_line_3 TEXT,
    address_line_4 TEXT,
    address_line_5 TEXT,
    postcode TEXT,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.deceased_address (
    deceased_address_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    address_type TEXT,
    address_line_1 TEXT,
    address_line_2 TEXT,
    address_line_3 TEXT,
    address_line_4 TEXT,
    address_line_5 TEXT,
    postcode TEXT,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.input_file_review (
    input_file_review_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    review_outcome TEXT,
    review_notes TEXT,
    complaint_upheld BOOLEAN,
    engineer_referral_required BOOLEAN,
    meter_serial_number TEXT,
    contract_start_date DATE,
    contract_end_date DATE,
    total_redress NUMERIC(12, 2),
    net_redress_value NUMERIC(12, 2),
    interest_amount NUMERIC(12, 2),
    qc_review_outcome TEXT,
    qc_comments TEXT,
    qa_review_outcome TEXT,
    qa_comments TEXT,
    ctc_review_outcome TEXT,
    ctc_comments TEXT,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.metadata_constraints_summary (
    metadata_constraints_summary_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    constraint_code TEXT NOT NULL,
    constraint_desc TEXT,
    insert_ts TIMESTAMP NOT NULL DEFAULT now(),
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.contact_tracker (
    contact_tracker_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    contact_type TEXT,
    outcome TEXT,
    contact_planned_ts TIMESTAMP,
    contact_actual_ts TIMESTAMP,
    contact_channel TEXT,
    call_summary TEXT,
    sc_approval_required TEXT,
    tl_rejection_reason TEXT,
    recalc_reason TEXT,
    payment_type TEXT,
    customer_info_confirmed TEXT,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    // Databases created before approvals were recorded
    "ALTER TABLE mtl.contact_tracker ALTER COLUMN sc_approval_required TYPE TEXT USING sc_approval_required::text",
    "ALTER TABLE mtl.contact_tracker ADD COLUMN IF NOT EXISTS contact_channel TEXT, \
     ADD COLUMN IF NOT EXISTS call_summary TEXT, ADD COLUMN IF NOT EXISTS tl_rejection_reason TEXT, \
     ADD COLUMN IF NOT EXISTS recalc_reason TEXT, ADD COLUMN IF NOT EXISTS payment_type TEXT, \
     ADD COLUMN IF NOT EXISTS customer_info_confirmed TEXT",
    "CREATE SEQUENCE IF NOT EXISTS mtl.contact_query_id_seq",
    r#"CREATE TABLE IF NOT EXISTS mtl.contact_queries (
    contact_queries_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    query_id TEXT NOT NULL,
    claim_reference TEXT,
    query_type TEXT,
    query_description TEXT,
    query_status TEXT,
    open_date DATE,
    open_user TEXT,
    update_date DATE,
    closed_date DATE,
    closed_user TEXT,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP NOT NULL DEFAULT '9999-12-31 00:00:00',
    update_user TEXT,
    audit_log TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.file_review_stats (
    file_review_stats_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    user_email TEXT NOT NULL,
    role TEXT,
    start_ts TIMESTAMP NOT NULL DEFAULT now(),
    end_ts TIMESTAMP,
    active BOOLEAN NOT NULL DEFAULT TRUE
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.log_table_buttons (
    log_table_buttons_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    button_clicked TEXT NOT NULL,
    user_email TEXT,
    insert_ts TIMESTAMP NOT NULL DEFAULT now(),
    reason TEXT
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.bulk_case_release (
    bulk_case_release_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    caserelease_by TEXT,
    case_released BOOLEAN NOT NULL DEFAULT FALSE,
    insert_ts TIMESTAMP NOT NULL DEFAULT now()
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.qc_mailing (
    qc_mailing_sk BIGSERIAL PRIMARY KEY,
    case_id TEXT NOT NULL,
    mailing_batch_number TEXT NOT NULL,
    qc_mailing_ready BOOLEAN,
    qc_reason_remove_batch TEXT,
    qc_user_email TEXT,
    qc_insert_ts TIMESTAMP,
    case_reset BOOLEAN NOT NULL DEFAULT FALSE
)"#,
    r#"CREATE TABLE IF NOT EXISTS mtl.user_access (
    user_email TEXT PRIMARY KEY,
    user_name TEXT,
    access_level_id INTEGER NOT NULL
)"#,
    // One current version per natural key
    "CREATE UNIQUE INDEX IF NOT EXISTS case_allocation_current_uq ON mtl.case_allocation (case_id) WHERE end_ts = '9999-12-31 00:00:00'",
    "CREATE UNIQUE INDEX IF NOT EXISTS case_tracker_current_uq ON mtl.case_tracker (case_id) WHERE end_ts = '9999-12-31 00:00:00'",
    "CREATE UNIQUE INDEX IF NOT EXISTS address_current_uq ON mtl.address (case_id) WHERE end_ts = '9999-12-31 00:00:00'",
    "CREATE UNIQUE INDEX IF NOT EXISTS deceased_address_current_uq ON mtl.deceased_address (case_id) WHERE end_ts = '9999-12-31 00:00:00'",
    "CREATE UNIQUE INDEX IF NOT EXISTS input_file_review_current_uq ON mtl.input_file_review (case_id) WHERE end_ts = '9999-12-31 00:00:00'",
    "CREATE UNIQUE INDEX IF NOT EXISTS metadata_constraints_summary_current_uq ON mtl.metadata_constraints_summary (case_id, constraint_code) WHERE end_ts = '9999-12-31 00:00:00'",
    "CREATE UNIQUE INDEX IF NOT EXISTS contact_queries_current_uq ON mtl.contact_queries (case_id, query_id) WHERE end_ts = '9999-12-31 00:00:00'",
    // One open review session per case
    "CREATE UNIQUE INDEX IF NOT EXISTS file_review_stats_active_uq ON mtl.file_review_stats (case_id) WHERE active",
    "CREATE INDEX IF NOT EXISTS case_tracker_history_idx ON mtl.case_tracker (case_id, start_ts)",
    r#"CREATE OR REPLACE VIEW mtl.case_state_vw AS
SELECT
    ca.case_id,
    ca.population_cohort,
    ca.assignedtoanalyst,
    ca.assignedtoanalystname,
    ca.casestatusanalyst,
    ca.assignedtoqc,
    ca.assignedtoqcname,
    ca.casestatusqc,
    ca.assignedtoqa,
    ca.assignedtoqaname,
    ca.casestatusqa,
    ca.assignedtoctc,
    ca.assignedtoctcname,
    ca.casestatusctc,
    ca.assignedtoer,
    ca.assignedtoername,
    ca.casestatuser,
    ca.engineer_referral,
    ca.fr_complete_date,
    ca.qc_complete_ts,
    ca.qa_complete_ts,
    ca.ctc_complete_ts,
    ca.er_complete_ts,
    ca.batch_number,
    ca.on_hold_reason,
    ca.on_hold_ts,
    ca.caserelease_ts,
    ct.state,
    ct.sub_state,
    ct.descope_reason,
    ct.start_ts AS state_since,
    ct.update_user AS state_user
FROM mtl.case_allocation ca
LEFT JOIN mtl.case_tracker ct
    ON ct.case_id = ca.case_id AND ct.end_ts = '9999-12-31 00:00:00'
WHERE ca.end_ts = '9999-12-31 00:00:00'"#,
];

/// Read-only relation that is not itself versioned (views, in-place tables).
#[derive(Debug)]
pub struct View {
    pub name: &'static str,
    pub columns: &'static [(&'static str, ColumnType)],
}

impl Relation for View {
    fn name(&self) -> &'static str {
        self.name
    }

    fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.iter().find(|(name, _)| *name == column).map(|(_, ty)| *ty)
    }

    fn is_versioned(&self) -> bool {
        false
    }
}

pub static CASE_STATE_VW: View = View {
    name: "mtl.case_state_vw",
    columns: &[
        ("case_id", ColumnType::Text),
        ("population_cohort", ColumnType::Text),
        ("assignedtoanalyst", ColumnType::Text),
        ("assignedtoanalystname", ColumnType::Text),
        ("casestatusanalyst", ColumnType::Text),
        ("assignedtoqc", ColumnType::Text),
        ("assignedtoqcname", ColumnType::Text),
        ("casestatusqc", ColumnType::Text),
        ("assignedtoqa", ColumnType::Text),
        ("assignedtoqaname", ColumnType::Text),
        ("casestatusqa", ColumnType::Text),
        ("assignedtoctc", ColumnType::Text),
        ("assignedtoctcname", ColumnType::Text),
        ("casestatusctc", ColumnType::Text),
        ("assignedtoer", ColumnType::Text),
        ("assignedtoername", ColumnType::Text),
        ("casestatuser", ColumnType::Text),
        ("engineer_referral", ColumnType::Text),
        ("fr_complete_date", ColumnType::Date),
        ("qc_complete_ts", ColumnType::Timestamp),
        ("qa_complete_ts", ColumnType::Timestamp),
        ("ctc_complete_ts", ColumnType::Timestamp),
        ("er_complete_ts", ColumnType::Timestamp),
        ("batch_number", ColumnType::Text),
        ("on_hold_reason", ColumnType::Text),
        ("on_hold_ts", ColumnType::Timestamp),
        ("caserelease_ts", ColumnType::Timestamp),
        ("state", ColumnType::Text),
        ("sub_state", ColumnType::Text),
        ("descope_reason", ColumnType::Text),
        ("state_since", ColumnType::Timestamp),
        ("state_user", ColumnType::Text),
    ],
};

/// Contact rows are updated in place, so every row is listed.
pub static CONTACT_TRACKER: View = View {
    name: "mtl.contact_tracker",
    columns: &[
        ("contact_tracker_sk", ColumnType::Integer),
        ("case_id", ColumnType::Text),
        ("contact_type", ColumnType::Text),
        ("outcome", ColumnType::Text),
        ("contact_planned_ts", ColumnType::Timestamp),
        ("contact_actual_ts", ColumnType::Timestamp),
        ("contact_channel", ColumnType::Text),
        ("call_summary", ColumnType::Text),
        ("sc_approval_required", ColumnType::Text),
        ("tl_rejection_reason", ColumnType::Text),
        ("recalc_reason", ColumnType::Text),
        ("payment_type", ColumnType::Text),
        ("customer_info_confirmed", ColumnType::Text),
        ("start_ts", ColumnType::Timestamp),
        ("end_ts", ColumnType::Timestamp),
        ("update_user", ColumnType::Text),
        ("audit_log", ColumnType::Text),
    ],
};

/// Full DDL script as printed by `mtl schema print`
pub fn script() -> String {
    STATEMENTS.iter().map(|s| format!("{};\n", s)).collect::<Vec<_>>().join("\n")
}

/// Apply the DDL in one transaction
pub async fn apply(pool: &PgPool) -> Result<(), DatabaseError> {
    let mut tx = DatabaseManager::begin(pool).await?;
    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!("Applied mtl schema ({} statements)", STATEMENTS.len());
    Ok(())
}
