//! Repository layer for persisted clients.
//!
//! # Responsibility
//! - Define the data access contract used by client management.
//! - Keep SQL and error classification out of callers.

pub mod client_repo;
