pub mod error;
pub mod projector;
pub mod roles;
pub mod transitions;

pub use error::WorkflowError;
pub use projector::{CaseListFilter, CaseState, CaseStateProjector};
pub use roles::Role;
pub use transitions::{lookup, AllocationEffect, HandOff, Stage, TransitionRule, TRANSITIONS};
