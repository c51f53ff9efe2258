//! Service layer: database access.

pub mod database;

pub use database::Database;
