//! Relational persistence for API clients.
//!
//! A client is a named credential owned by an organization. This crate stores
//! clients in SQLite and reports name collisions, missing rows and backend
//! failures as status-bearing errors.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;

pub use config::{AggregateFailurePolicy, ConfigError, StoreConfig};
pub use error::{classify_backend_error, ErrorStatus, StoreError, StoreErrorKind, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::client::{Client, DEFAULT_ORGANIZATION};
pub use repo::client_repo::{ClientRepository, SqliteClientRepository};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
