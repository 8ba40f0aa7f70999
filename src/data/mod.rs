//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Schema migrations applied at startup

mod database;
pub mod migrate;
mod models;

pub use database::{Database, UserRepository, is_unique_violation};
pub use migrate::{MigrationReport, Migrator};
pub use models::*;
