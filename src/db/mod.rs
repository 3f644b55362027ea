//! Database module: models and schema for persistent storage.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `ops.rs`: write-side inputs for the actor
//! - `actor.rs`: the single-consumer actor owning the pool

pub mod actor;
pub mod models;
pub mod ops;
pub mod schema;

pub use actor::{DbHandle, spawn};
pub use models::{DbAccount, DbInstallation, DbReviewRecord, InstallStatus, ReviewStatus};
pub use ops::{AccountUpsert, InstallationUpsert, ReviewApply};
pub use schema::SQLITE_INIT;
