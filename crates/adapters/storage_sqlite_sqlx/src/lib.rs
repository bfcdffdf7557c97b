//! # plughub-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement `ConfigEntryRepository` and `EntityRepository` from `plughub-app::ports::storage`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (sqlx embedded migrations in `./migrations`)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `plughub-app` (for port traits) and `plughub-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod config_entry_repo;
mod entity_repo;
mod error;
mod pool;

pub use config_entry_repo::SqliteConfigEntryRepository;
pub use entity_repo::SqliteEntityRepository;
pub use error::StorageError;
pub use pool::{Config, Database};
