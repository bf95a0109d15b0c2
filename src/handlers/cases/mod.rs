pub mod collection;
pub mod contact;
pub mod record;
pub mod workflow;

// Re-export handler functions for use in routing
pub use collection::get as cases_get;

pub use contact::approval as case_contact_approval;
pub use contact::queries as case_queries;

pub use record::get as case_get;
pub use record::state as case_state;
pub use record::versions as case_versions;

pub use workflow::address as case_address;
pub use workflow::contact as case_contact;
pub use workflow::open as case_open;
pub use workflow::reset as case_reset;
pub use workflow::review as case_review;
