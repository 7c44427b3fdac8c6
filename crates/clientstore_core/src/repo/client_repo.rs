//! Client repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Turn client lookups, upserts, renames and deletes into SQL.
//! - Report name collisions as conflicts, missing lookups as not-found.
//!
//! # Invariants
//! - Every write runs in exactly one transaction with one statement and is
//!   committed or explicitly rolled back before returning.
//! - Conflict detection belongs to the schema triggers and constraints; this
//!   layer only classifies the resulting error.
//! - Reads are single prepared statements released on every exit path.

use crate::config::AggregateFailurePolicy;
use crate::db::migrations::{current_user_version, latest_version};
use crate::error::{StoreError, StoreErrorKind, StoreResult};
use crate::model::client::Client;
use log::{debug, error, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::time::Instant;

const CLIENT_SELECT_SQL: &str = "SELECT
    c.name AS name,
    c.nodename AS nodename,
    c.validator AS validator,
    c.admin AS admin,
    o.name AS orgname,
    c.public_key AS public_key,
    c.certificate AS certificate
FROM clients c
JOIN organizations o ON c.organization_id = o.id";

const MERGE_CLIENT_SQL: &str = "INSERT INTO clients (
    name,
    nodename,
    validator,
    admin,
    organization_id,
    public_key,
    certificate
) VALUES (?1, ?2, ?3, ?4, (SELECT id FROM organizations WHERE name = ?5), ?6, ?7)
ON CONFLICT(name) DO UPDATE SET
    nodename = excluded.nodename,
    validator = excluded.validator,
    admin = excluded.admin,
    organization_id = excluded.organization_id,
    public_key = excluded.public_key,
    certificate = excluded.certificate,
    updated_at = (strftime('%s', 'now') * 1000);";

const RENAME_CLIENT_SQL: &str = "UPDATE clients
SET
    name = ?2,
    updated_at = (strftime('%s', 'now') * 1000)
WHERE name = ?1;";

const DELETE_CLIENT_SQL: &str = "DELETE FROM clients WHERE name = ?1;";

/// Exit status used when an aggregate read fails under [`AggregateFailurePolicy::Abort`].
pub const AGGREGATE_ABORT_EXIT_CODE: i32 = 1;

/// Persistence contract consumed by client management.
pub trait ClientRepository {
    /// Loads one client by name.
    fn fetch(&self, name: &str) -> StoreResult<Client>;
    /// Inserts `client` or fully replaces the row with the same name.
    fn merge(&self, client: &Client) -> StoreResult<()>;
    /// Removes the row named like `client`. Missing rows are not an error.
    fn delete(&self, client: &Client) -> StoreResult<()>;
    /// Renames the row named like `client` to `new_name`, keeping every other column.
    /// Missing rows are not an error.
    fn rename(&self, client: &Client, new_name: &str) -> StoreResult<()>;
    /// Counts clients with the admin flag set.
    fn count_admins(&self) -> StoreResult<usize>;
    /// Lists every client name in backend order.
    fn list_names(&self) -> StoreResult<Vec<String>>;
}

/// SQLite-backed client repository over a borrowed connection.
pub struct SqliteClientRepository<'conn> {
    conn: &'conn Connection,
    aggregate_failure: AggregateFailurePolicy,
}

impl<'conn> SqliteClientRepository<'conn> {
    /// Creates a repository from a connection carrying the client schema.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_client_connection_ready(conn)?;
        Ok(Self {
            conn,
            aggregate_failure: AggregateFailurePolicy::default(),
        })
    }

    /// Sets how `count_admins` and `list_names` react to backend failures.
    pub fn with_aggregate_failure(mut self, policy: AggregateFailurePolicy) -> Self {
        self.aggregate_failure = policy;
        self
    }

    pub fn aggregate_failure(&self) -> AggregateFailurePolicy {
        self.aggregate_failure
    }

    /// Runs `statement` in its own immediate transaction.
    ///
    /// Commits on success; on failure rolls back first and returns the
    /// classified backend error.
    fn write<T>(
        &self,
        event: &'static str,
        name: &str,
        statement: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let started_at = Instant::now();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(|err| log_write_failure(event, name, StoreError::backend(err)))?;

        let value = match statement(&tx) {
            Ok(value) => value,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!(
                        "event={} module=repo status=error name={} error_code=rollback_failed error={}",
                        event, name, rollback_err
                    );
                }
                return Err(log_write_failure(event, name, StoreError::backend(err)));
            }
        };

        tx.commit()
            .map_err(|err| log_write_failure(event, name, StoreError::backend(err)))?;
        debug!(
            "event={} module=repo status=ok name={} duration_ms={}",
            event,
            name,
            started_at.elapsed().as_millis()
        );
        Ok(value)
    }

    fn settle_aggregate<T>(&self, event: &'static str, result: StoreResult<T>) -> StoreResult<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        error!(
            "event={} module=repo status=error policy={:?} error={}",
            event, self.aggregate_failure, err
        );
        if self.aggregate_failure == AggregateFailurePolicy::Abort {
            log::Log::flush(log::logger());
            std::process::exit(AGGREGATE_ABORT_EXIT_CODE);
        }
        Err(err)
    }
}

impl ClientRepository for SqliteClientRepository<'_> {
    fn fetch(&self, name: &str) -> StoreResult<Client> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CLIENT_SELECT_SQL} WHERE c.name = ?1;"))?;
        let client = stmt.query_row([name], Client::from_row).optional()?;
        client.ok_or_else(|| StoreError::not_found(name))
    }

    fn merge(&self, client: &Client) -> StoreResult<()> {
        self.write("client_merge", &client.name, |tx| {
            tx.execute(
                MERGE_CLIENT_SQL,
                params![
                    client.name.as_str(),
                    client.node_name.as_str(),
                    client.validator,
                    client.admin,
                    client.organization.as_str(),
                    client.public_key.as_str(),
                    client.certificate.as_deref(),
                ],
            )
        })?;
        Ok(())
    }

    fn delete(&self, client: &Client) -> StoreResult<()> {
        let removed = self.write("client_delete", &client.name, |tx| {
            tx.execute(DELETE_CLIENT_SQL, [client.name.as_str()])
        })?;
        if removed == 0 {
            debug!(
                "event=client_delete module=repo status=noop name={}",
                client.name
            );
        }
        Ok(())
    }

    fn rename(&self, client: &Client, new_name: &str) -> StoreResult<()> {
        let changed = self.write("client_rename", &client.name, |tx| {
            tx.execute(RENAME_CLIENT_SQL, params![client.name.as_str(), new_name])
        })?;
        if changed == 0 {
            debug!(
                "event=client_rename module=repo status=noop name={} new_name={}",
                client.name, new_name
            );
        }
        Ok(())
    }

    fn count_admins(&self) -> StoreResult<usize> {
        let result = self.query_admin_count();
        self.settle_aggregate("client_count_admins", result)
    }

    fn list_names(&self) -> StoreResult<Vec<String>> {
        let result = self.query_names();
        self.settle_aggregate("client_list_names", result)
    }
}

impl SqliteClientRepository<'_> {
    fn query_admin_count(&self) -> StoreResult<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT count(*) FROM clients WHERE admin = 1;")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| {
            StoreError::new(StoreErrorKind::InvalidData(format!(
                "negative admin count `{count}`"
            )))
        })
    }

    fn query_names(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM clients;")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

fn log_write_failure(event: &str, name: &str, err: StoreError) -> StoreError {
    warn!(
        "event={} module=repo status=error name={} error_code={} error={}",
        event,
        name,
        err.status(),
        err
    );
    err
}

fn ensure_client_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::new(StoreErrorKind::UninitializedConnection {
            expected_version,
            actual_version,
        }));
    }

    let required: [(&'static str, &[&'static str]); 2] = [
        ("organizations", &["id", "name"]),
        (
            "clients",
            &[
                "name",
                "nodename",
                "validator",
                "admin",
                "organization_id",
                "public_key",
                "certificate",
            ],
        ),
    ];
    for (table, columns) in required {
        if !table_exists(conn, table)? {
            return Err(StoreError::new(StoreErrorKind::MissingRequiredTable(table)));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(StoreError::new(StoreErrorKind::MissingRequiredColumn {
                    table,
                    column,
                }));
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let found = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .iter()
        .any(|current| current == column);
    Ok(found)
}
