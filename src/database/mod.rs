pub mod manager;
pub mod query_builder;
pub mod schema;
pub mod secrets;
pub mod value;

pub use manager::{is_transient, DatabaseError, DatabaseManager};
pub use query_builder::QueryBuilder;
pub use value::{ColumnType, SqlValue, ValueError};
