pub mod cases;
pub mod review;

pub use cases::get as cases_get;
pub use review::post as review_post;
