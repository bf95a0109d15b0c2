use serde::{Deserialize, Serialize};

/// Workflow role, derived from a user's numeric access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Reviewer,
    Qc,
    Qa,
    Ctc,
    Engineer,
}

impl Role {
    pub const ALL: [Role; 5] = [Role::Reviewer, Role::Qc, Role::Qa, Role::Ctc, Role::Engineer];

    /// Levels 1, 4 and 6 are case reviewers and admins. Any level not listed has no workflow role.
    pub fn from_access_level(level: i64) -> Option<Role> {
        match level {
            1 | 4 | 6 => Some(Role::Reviewer),
            2 | 3 => Some(Role::Qc),
            9 | 10 => Some(Role::Qa),
            11 => Some(Role::Ctc),
            8 => Some(Role::Engineer),
            _ => None,
        }
    }

    pub fn access_levels(&self) -> &'static [i64] {
        match self {
            Role::Reviewer => &[1, 4, 6],
            Role::Qc => &[2, 3],
            Role::Qa => &[9, 10],
            Role::Ctc => &[11],
            Role::Engineer => &[8],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Reviewer => "Case Reviewer",
            Role::Qc => "QC",
            Role::Qa => "QA",
            Role::Ctc => "CTC",
            Role::Engineer => "Engineer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
