pub mod list;
pub mod role;

pub use list::get as users_get;
pub use role::get as role_get;
