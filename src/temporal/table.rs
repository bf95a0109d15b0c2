use serde_json::Value;

use super::error::TemporalError;
use crate::database::value::{ColumnType, SqlValue};
use crate::filter::Relation;

/// Columns the store maintains itself; a payload may never set them.
pub const WINDOW_COLUMNS: [&str; 2] = ["start_ts", "end_ts"];

/// Provenance columns, always taken from the explicit actor and reason.
pub const PROVENANCE_COLUMNS: [&str; 2] = ["update_user", "audit_log"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnSpec {
    ColumnSpec { name, ty }
}

const fn text(name: &'static str) -> ColumnSpec {
    col(name, ColumnType::Text)
}

/// Descriptor of a table whose rows carry a `start_ts`/`end_ts` validity window.
#[derive(Debug, PartialEq, Eq)]
pub struct VersionedTable {
    /// Schema-qualified table name
    pub name: &'static str,
    /// Name used in URLs and on the command line
    pub entity: &'static str,
    /// Surrogate key column, readable but never written
    pub surrogate: &'static str,
    /// Natural key columns, all text
    pub key: &'static [&'static str],
    /// Allow-listed business columns
    pub columns: &'static [ColumnSpec],
}

impl VersionedTable {
    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key.contains(&name)
    }

    pub fn check_key(&self, key: &NaturalKey) -> Result<(), TemporalError> {
        if key.values().len() != self.key.len() {
            return Err(TemporalError::KeyArity {
                table: self.name,
                expected: self.key.len(),
                found: key.values().len(),
            });
        }
        Ok(())
    }
}

impl Relation for VersionedTable {
    fn name(&self) -> &'static str {
        self.name
    }

    fn column_type(&self, column: &str) -> Option<ColumnType> {
        if self.is_key(column) || PROVENANCE_COLUMNS.contains(&column) {
            Some(ColumnType::Text)
        } else if WINDOW_COLUMNS.contains(&column) {
            Some(ColumnType::Timestamp)
        } else if column == self.surrogate {
            Some(ColumnType::Integer)
        } else {
            self.column(column).map(|c| c.ty)
        }
    }

    fn is_versioned(&self) -> bool {
        true
    }
}

pub static CASE_TRACKER: VersionedTable = VersionedTable {
    name: "mtl.case_tracker",
    entity: "tracker",
    surrogate: "case_tracker_sk",
    key: &["case_id"],
    columns: &[text("state"), text("sub_state"), text("descope_reason")],
};

const ADDRESS_COLUMNS: &[ColumnSpec] = &[
    text("address_type"),
    text("address_line_1"),
    text("address_line_2"),
    text("address_line_3"),
    text("address_line_4"),
    text("address_line_5"),
    text("postcode"),
];

pub static ADDRESS: VersionedTable = VersionedTable {
    name: "mtl.address",
    entity: "address",
    surrogate: "address_sk",
    key: &["case_id"],
    columns: ADDRESS_COLUMNS,
};

pub static DECEASED_ADDRESS: VersionedTable = VersionedTable {
    name: "mtl.deceased_address",
    entity: "deceased_address",
    surrogate: "deceased_address_sk",
    key: &["case_id"],
    columns: ADDRESS_COLUMNS,
};

pub static INPUT_FILE_REVIEW: VersionedTable = VersionedTable {
    name: "mtl.input_file_review",
    entity: "review",
    surrogate: "input_file_review_sk",
    key: &["case_id"],
    columns: &[
        text("review_outcome"),
        text("review_notes"),
        col("complaint_upheld", ColumnType::Boolean),
        col("engineer_referral_required", ColumnType::Boolean),
        text("meter_serial_number"),
        col("contract_start_date", ColumnType::Date),
        col("contract_end_date", ColumnType::Date),
        col("total_redress", ColumnType::Numeric),
        col("net_redress_value", ColumnType::Numeric),
        col("interest_amount", ColumnType::Numeric),
        text("qc_review_outcome"),
        text("qc_comments"),
        text("qa_review_outcome"),
        text("qa_comments"),
        text("ctc_review_outcome"),
        text("ctc_comments"),
    ],
};

pub static CONSTRAINTS: VersionedTable = VersionedTable {
    name: "mtl.metadata_constraints_summary",
    entity: "constraints",
    surrogate: "metadata_constraints_summary_sk",
    key: &["case_id", "constraint_code"],
    columns: &[text("constraint_desc")],
};

pub static CASE_ALLOCATION: VersionedTable = VersionedTable {
    name: "mtl.case_allocation",
    entity: "allocation",
    surrogate: "case_allocation_sk",
    key: &["case_id"],
    columns: &[
        text("population_cohort"),
        text("assignedtoanalyst"),
        text("assignedtoanalystname"),
        text("casestatusanalyst"),
        text("assignedtoqc"),
        text("assignedtoqcname"),
        text("casestatusqc"),
        text("case_selection_criteria"),
        text("assignedtoqa"),
        text("assignedtoqaname"),
        text("casestatusqa"),
        text("case_selection_criteria_qa"),
        text("assignedtoctc"),
        text("assignedtoctcname"),
        text("casestatusctc"),
        text("case_selection_criteria_ctc"),
        text("assignedtoer"),
        text("assignedtoername"),
        text("casestatuser"),
        text("engineer_referral"),
        col("fr_complete_date", ColumnType::Date),
        col("qc_complete_ts", ColumnType::Timestamp),
        col("qa_complete_ts", ColumnType::Timestamp),
        col("ctc_complete_ts", ColumnType::Timestamp),
        col("er_complete_ts", ColumnType::Timestamp),
        text("batch_number"),
        text("on_hold_reason"),
        col("on_hold_ts", ColumnType::Timestamp),
        col("caserelease_ts", ColumnType::Timestamp),
    ],
};

/// Customer queries raised against a case, one version chain per query id
pub static CONTACT_QUERIES: VersionedTable = VersionedTable {
    name: "mtl.contact_queries",
    entity: "queries",
    surrogate: "contact_queries_sk",
    key: &["case_id", "query_id"],
    columns: &[
        text("claim_reference"),
        text("query_type"),
        text("query_description"),
        text("query_status"),
        col("open_date", ColumnType::Date),
        text("open_user"),
        col("update_date", ColumnType::Date),
        col("closed_date", ColumnType::Date),
        text("closed_user"),
    ],
};

pub static ALL_TABLES: [&VersionedTable; 7] = [
    &CASE_TRACKER,
    &ADDRESS,
    &DECEASED_ADDRESS,
    &INPUT_FILE_REVIEW,
    &CONSTRAINTS,
    &CASE_ALLOCATION,
    &CONTACT_QUERIES,
];

/// Resolve a versioned table by its entity name or its bare table name.
pub fn by_entity(entity: &str) -> Result<&'static VersionedTable, TemporalError> {
    ALL_TABLES
        .iter()
        .copied()
        .find(|t| t.entity == entity || t.name.strip_prefix("mtl.") == Some(entity))
        .ok_or_else(|| TemporalError::UnknownEntity(entity.to_string()))
}

/// Business identifier shared by every version of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey {
    values: Vec<String>,
}

impl NaturalKey {
    pub fn new(table: &VersionedTable, values: &[&str]) -> Result<Self, TemporalError> {
        if values.len() != table.key.len() {
            return Err(TemporalError::KeyArity {
                table: table.name,
                expected: table.key.len(),
                found: values.len(),
            });
        }
        for (column, value) in table.key.iter().zip(values) {
            if value.trim().is_empty() {
                return Err(TemporalError::EmptyKey(*column));
            }
        }
        Ok(Self {
            values: values.iter().map(|v| v.to_string()).collect(),
        })
    }

    /// Key of the tables keyed by `case_id` alone
    pub fn case(case_id: &str) -> Result<Self, TemporalError> {
        Self::new(&CASE_TRACKER, &[case_id])
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Token hashed into the per-key transaction advisory lock
    pub fn lock_token(&self, table: &VersionedTable) -> String {
        format!("{}|{}", table.name, self.values.join("|"))
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.values.join(", "))
    }
}

/// Immutable list of allow-listed column values for one new version.
#[derive(Debug, Clone)]
pub struct Projection {
    table: &'static VersionedTable,
    values: Vec<(&'static ColumnSpec, SqlValue)>,
}

impl Projection {
    pub fn empty(table: &'static VersionedTable) -> Self {
        Self { table, values: Vec::new() }
    }

    /// Add or replace one column. The value's type must match the column.
    pub fn with(mut self, column: &str, value: SqlValue) -> Result<Self, TemporalError> {
        let spec = self.spec_for(column)?;
        if value.column_type() != spec.ty {
            return Err(TemporalError::Value(crate::database::value::ValueError {
                column: column.to_string(),
                expected: spec.ty.name(),
                found: value.column_type().name().to_string(),
            }));
        }
        match self.values.iter_mut().find(|(c, _)| c.name == spec.name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((spec, value)),
        }
        Ok(self)
    }

    pub fn with_text(self, column: &str, value: impl Into<String>) -> Result<Self, TemporalError> {
        self.with(column, SqlValue::text(value))
    }

    /// Project an inbound JSON object onto the table's allow-list.
    ///
    /// Window columns are rejected, provenance columns are ignored, key
    /// columns must agree with `key` and are then dropped, and any other
    /// column must be allow-listed. Empty strings become NULL.
    pub fn from_payload(
        table: &'static VersionedTable,
        key: &NaturalKey,
        payload: &Value,
    ) -> Result<Self, TemporalError> {
        table.check_key(key)?;
        let obj = payload.as_object().ok_or(TemporalError::NotAnObject)?;

        let mut projection = Self::empty(table);
        for (column, value) in obj {
            if WINDOW_COLUMNS.contains(&column.as_str()) {
                return Err(TemporalError::SystemColumn(column.clone()));
            }
            if PROVENANCE_COLUMNS.contains(&column.as_str()) {
                continue;
            }
            if let Some(pos) = table.key.iter().position(|k| *k == column) {
                let expected = &key.values()[pos];
                let matches = match value {
                    Value::String(s) => s == expected,
                    Value::Number(n) => n.to_string() == *expected,
                    _ => false,
                };
                if !matches {
                    return Err(TemporalError::KeyMismatch {
                        column: table.key[pos],
                        expected: expected.clone(),
                    });
                }
                continue;
            }
            let spec = projection.spec_for(column)?;
            let value = SqlValue::coerce(spec.name, spec.ty, value)?;
            projection.values.push((spec, value));
        }
        Ok(projection)
    }

    fn spec_for(&self, column: &str) -> Result<&'static ColumnSpec, TemporalError> {
        if WINDOW_COLUMNS.contains(&column) || PROVENANCE_COLUMNS.contains(&column) || column == self.table.surrogate {
            return Err(TemporalError::SystemColumn(column.to_string()));
        }
        self.table.column(column).ok_or_else(|| TemporalError::UnknownColumn {
            table: self.table.name,
            column: column.to_string(),
        })
    }

    pub fn table(&self) -> &'static VersionedTable {
        self.table
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|(c, _)| c.name)
    }

    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.values.iter().map(|(_, v)| v)
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.iter().find(|(c, _)| c.name == column).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
