//! Append-only record versions with a `start_ts`/`end_ts` validity window.
//!
//! The current version of a key is the single row whose `end_ts` equals
//! [`SENTINEL`]. Every mutation goes through [`WriteSequencer`], which closes
//! the current version and inserts its replacement in the caller's transaction.

pub mod error;
pub mod sequencer;
pub mod table;

use chrono::{Datelike, NaiveDateTime, Timelike};

pub use error::TemporalError;
pub use sequencer::{Guard, TransitionOutcome, WriteSequencer};
pub use table::{by_entity, ColumnSpec, NaturalKey, Projection, VersionedTable};

/// End-of-time marker carried by the current version of every key.
pub const SENTINEL: &str = "9999-12-31 00:00:00";

pub fn is_sentinel(ts: &NaiveDateTime) -> bool {
    ts.year() == 9999 && ts.month() == 12 && ts.day() == 31 && ts.num_seconds_from_midnight() == 0 && ts.nanosecond() == 0
}

/// Same check for the JSON rendering of a row (`row_to_json` output).
pub fn is_sentinel_json(value: &serde_json::Value) -> bool {
    value
        .as_str()
        .and_then(crate::database::value::parse_timestamp)
        .map(|ts| is_sentinel(&ts))
        .unwrap_or(false)
}
