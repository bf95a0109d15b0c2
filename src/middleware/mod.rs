pub mod request_id;
pub mod response;

pub use request_id::request_span;
pub use response::{ApiResponse, ApiResult};
