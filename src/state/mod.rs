pub mod database;
pub mod export;
pub mod schema;

pub use database::Database;
