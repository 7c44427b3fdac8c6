//! Persisted entity model.
//!
//! # Invariants
//! - A client is identified by its name, unique across all organizations.
//! - The store holds current state only: no tombstones, no versions.

pub mod client;
