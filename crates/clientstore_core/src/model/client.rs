//! Client domain model.
//!
//! # Responsibility
//! - Define the API credential record owned by an organization.
//! - Populate itself from one store row.
//!
//! # Invariants
//! - `name` is the primary identity and is globally unique.
//! - `admin` and `validator` are independent flags.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Organization every client lands in when none is given.
pub const DEFAULT_ORGANIZATION: &str = "default";

/// API credential/identity record scoped to an owning organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Primary identity.
    pub name: String,
    /// Node this client acts for. Usually the client name itself.
    #[serde(rename = "nodename", default)]
    pub node_name: String,
    #[serde(default)]
    pub validator: bool,
    #[serde(default)]
    pub admin: bool,
    /// Owning organization, referenced by name.
    #[serde(rename = "orgname", default = "default_organization")]
    pub organization: String,
    /// Opaque credential material.
    #[serde(default)]
    pub public_key: String,
    /// Opaque certificate, when one was issued.
    #[serde(default)]
    pub certificate: Option<String>,
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_string()
}

impl Client {
    /// Creates a non-admin, non-validator client bound to `organization`.
    ///
    /// `node_name` starts equal to `name`.
    pub fn new(name: impl Into<String>, organization: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            node_name: name.clone(),
            name,
            validator: false,
            admin: false,
            organization: organization.into(),
            public_key: String::new(),
            certificate: None,
        }
    }

    /// Builds a client from one row of the store's client select.
    ///
    /// Expects the columns `name, nodename, validator, admin, orgname,
    /// public_key, certificate`. Scan failures are returned unchanged.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            node_name: row.get("nodename")?,
            validator: row.get("validator")?,
            admin: row.get("admin")?,
            organization: row.get("orgname")?,
            public_key: row.get("public_key")?,
            certificate: row.get("certificate")?,
        })
    }
}
