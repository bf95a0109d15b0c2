use super::roles::Role;
use crate::temporal::table::CASE_TRACKER;
use crate::temporal::{Guard, Projection, TemporalError, SENTINEL};

pub mod status {
    pub const NEW: &str = "NEW";
    pub const IN_PROGRESS: &str = "IN_PROGRESS";
    pub const COMPLETED: &str = "COMPLETED";
}

pub mod state {
    pub const REVIEW: &str = "Review";
    pub const CLOSED: &str = "Closed";
}

pub mod sub_state {
    pub const REVIEW_UNALLOCATED: &str = "Case Review Unallocated";
    pub const REVIEW_COMPLETED: &str = "Case Review Completed";
    pub const QC_ALLOCATED: &str = "QC Allocated";
    pub const QA_COMPLETED: &str = "Case QA Completed";
    pub const CTC_ALLOCATED: &str = "CTC Allocated";
    pub const DESCOPED: &str = "Descoped";
}

/// Extra write to the current allocation row that accompanies a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationEffect {
    /// `column = value`
    Set { column: &'static str, value: &'static str },
    /// Today's date, only if not already stamped
    DateOnce(&'static str),
    /// Transaction time, only if not already stamped
    StampOnce(&'static str),
    /// Transaction time, always
    Stamp(&'static str),
    /// ISO week of today, `IYYY-IW`
    IsoWeek(&'static str),
}

impl AllocationEffect {
    pub fn column(&self) -> &'static str {
        match *self {
            AllocationEffect::Set { column, .. } => column,
            AllocationEffect::DateOnce(c)
            | AllocationEffect::StampOnce(c)
            | AllocationEffect::Stamp(c)
            | AllocationEffect::IsoWeek(c) => c,
        }
    }

    /// SQL assignment; a `Set` value is pushed to `params` and bound.
    fn assignment(&self, params: &mut Vec<&'static str>) -> String {
        let column = self.column();
        match *self {
            AllocationEffect::Set { value, .. } => {
                params.push(value);
                format!("\"{}\" = ${}", column, params.len() + 1)
            }
            AllocationEffect::DateOnce(_) => format!("\"{0}\" = COALESCE(\"{0}\", CURRENT_DATE)", column),
            AllocationEffect::StampOnce(_) => format!("\"{0}\" = COALESCE(\"{0}\", now())", column),
            AllocationEffect::Stamp(_) => format!("\"{}\" = now()", column),
            AllocationEffect::IsoWeek(_) => format!("\"{}\" = to_char(CURRENT_DATE, 'IYYY-IW')", column),
        }
    }
}

/// One row of the role-gated transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub role: Role,
    pub completed: bool,
    pub status_field: &'static str,
    pub status_value: &'static str,
    pub sub_state: &'static str,
    pub effects: &'static [AllocationEffect],
}

const fn rule(
    role: Role,
    completed: bool,
    status_field: &'static str,
    sub_state: &'static str,
    effects: &'static [AllocationEffect],
) -> TransitionRule {
    TransitionRule {
        role,
        completed,
        status_field,
        status_value: if completed { status::COMPLETED } else { status::IN_PROGRESS },
        sub_state,
        effects,
    }
}

pub static TRANSITIONS: [TransitionRule; 10] = [
    rule(
        Role::Reviewer,
        true,
        "casestatusanalyst",
        "Case Review Completed",
        &[
            AllocationEffect::Set { column: "casestatusqc", value: status::NEW },
            AllocationEffect::DateOnce("fr_complete_date"),
            AllocationEffect::IsoWeek("batch_number"),
        ],
    ),
    rule(Role::Reviewer, false, "casestatusanalyst", "Case Review In Progress", &[]),
    rule(Role::Qc, true, "casestatusqc", "Case QC Completed", &[AllocationEffect::StampOnce("qc_complete_ts")]),
    rule(Role::Qc, false, "casestatusqc", "Case QC In Progress", &[]),
    rule(Role::Qa, true, "casestatusqa", "Case QA Completed", &[AllocationEffect::StampOnce("qa_complete_ts")]),
    rule(Role::Qa, false, "casestatusqa", "Case QA In Progress", &[]),
    rule(Role::Ctc, true, "casestatusctc", "Case CTC Completed", &[AllocationEffect::StampOnce("ctc_complete_ts")]),
    rule(Role::Ctc, false, "casestatusctc", "Case CTC In Progress", &[]),
    rule(Role::Engineer, true, "casestatuser", "Case Review Completed", &[AllocationEffect::Stamp("er_complete_ts")]),
    rule(Role::Engineer, false, "casestatuser", "Engineer Referral In Progress", &[]),
];

/// Every (role, completed) pair has exactly one rule.
pub fn lookup(role: Role, completed: bool) -> &'static TransitionRule {
    let row = match role {
        Role::Reviewer => 0,
        Role::Qc => 2,
        Role::Qa => 4,
        Role::Ctc => 6,
        Role::Engineer => 8,
    };
    &TRANSITIONS[row + usize::from(!completed)]
}

impl TransitionRule {
    /// Tracker state is always `Review` for role transitions
    pub fn state(&self) -> &'static str {
        state::REVIEW
    }

    pub fn tracker_projection(&self) -> Result<Projection, TemporalError> {
        Projection::empty(&CASE_TRACKER)
            .with_text("state", self.state())?
            .with_text("sub_state", self.sub_state)
    }

    /// Repeated in-progress saves leave the tracker untouched.
    pub fn tracker_guard(&self) -> Guard {
        if self.completed {
            Guard::Always
        } else {
            Guard::unless_current("sub_state", self.sub_state)
        }
    }

    /// Completing a stage ends the user's open review session.
    pub fn closes_session(&self) -> bool {
        self.completed
    }

    /// UPDATE of the current allocation row. `$1` is the case id, the
    /// returned values bind to `$2..`.
    pub fn allocation_update(&self) -> (String, Vec<&'static str>) {
        let mut params = vec![self.status_value];
        let mut assignments = vec![format!("\"{}\" = $2", self.status_field)];
        for effect in self.effects {
            assignments.push(effect.assignment(&mut params));
        }
        let sql = format!(
            "UPDATE \"mtl\".\"case_allocation\" SET {} WHERE \"case_id\" = $1 AND \"end_ts\" = '{}'",
            assignments.join(", "),
            SENTINEL
        );
        (sql, params)
    }
}

/// Reviewer stages that are assigned in batches after case review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Qc,
    Qa,
    Ctc,
}

/// Tracker hand-off applied when a stage is assigned: only a case whose
/// current sub-state is `from` moves to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandOff {
    pub from: &'static str,
    pub to: &'static str,
}

impl Stage {
    pub fn parse(s: &str) -> Option<Stage> {
        match s.to_ascii_lowercase().as_str() {
            "qc" => Some(Stage::Qc),
            "qa" => Some(Stage::Qa),
            "ctc" => Some(Stage::Ctc),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Qc => "qc",
            Stage::Qa => "qa",
            Stage::Ctc => "ctc",
        }
    }

    /// (assignee email, assignee name, selection criteria) columns
    pub fn assignment_columns(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Stage::Qc => ("assignedtoqc", "assignedtoqcname", "case_selection_criteria"),
            Stage::Qa => ("assignedtoqa", "assignedtoqaname", "case_selection_criteria_qa"),
            Stage::Ctc => ("assignedtoctc", "assignedtoctcname", "case_selection_criteria_ctc"),
        }
    }

    pub fn hand_off(&self) -> Option<HandOff> {
        match self {
            Stage::Qc => Some(HandOff { from: sub_state::REVIEW_COMPLETED, to: sub_state::QC_ALLOCATED }),
            Stage::Qa => None,
            Stage::Ctc => Some(HandOff { from: sub_state::QA_COMPLETED, to: sub_state::CTC_ALLOCATED }),
        }
    }
}

impl HandOff {
    pub fn tracker_projection(&self) -> Result<Projection, TemporalError> {
        Projection::empty(&CASE_TRACKER)
            .with_text("state", state::REVIEW)?
            .with_text("sub_state", self.to)
    }

    pub fn guard(&self) -> Guard {
        Guard::only_if_current("sub_state", self.from)
    }
}
