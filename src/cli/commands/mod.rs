pub mod case;
pub mod health;
pub mod schema;
pub mod server;
