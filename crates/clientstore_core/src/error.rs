//! Status-bearing store errors and backend error classification.
//!
//! # Responsibility
//! - Wrap backend failures into one structured error type.
//! - Decide whether a backend failure is a name conflict.
//!
//! # Invariants
//! - Every backend failure keeps the original driver error as its source.
//! - Conflict classification happens only in [`classify_backend_error`].

use crate::db::DbError;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// Message prefix raised by the backend when a user already owns the name.
const USER_CONFLICT_PREFIX: &str = "a user with";
/// Message raised by the backend when a rename target is taken.
const RENAME_CONFLICT_MARKER: &str = "already exists, cannot rename";

pub type StoreResult<T> = Result<T, StoreError>;

/// HTTP-like status carried by every [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    NotFound,
    Conflict,
    Internal,
}

impl ErrorStatus {
    /// Returns the HTTP status code callers should answer with.
    pub fn http_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

impl Display for ErrorStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, independent of the status reported to callers.
#[derive(Debug)]
pub enum StoreErrorKind {
    /// No client row matched the given name.
    NotFound(String),
    /// Backend failure, original error preserved.
    Backend(DbError),
    /// Connection schema is not at the expected version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be represented in memory.
    InvalidData(String),
}

/// Structured store error with a settable status.
#[derive(Debug)]
pub struct StoreError {
    status: ErrorStatus,
    kind: StoreErrorKind,
}

impl StoreError {
    /// Creates an error with the default status for `kind`.
    pub fn new(kind: StoreErrorKind) -> Self {
        let status = match &kind {
            StoreErrorKind::NotFound(_) => ErrorStatus::NotFound,
            StoreErrorKind::Backend(DbError::Sqlite(err)) => classify_backend_error(err),
            _ => ErrorStatus::Internal,
        };
        Self { status, kind }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound(name.into()))
    }

    /// Wraps a driver error, classifying it as conflict or internal.
    pub fn backend(err: rusqlite::Error) -> Self {
        Self::new(StoreErrorKind::Backend(DbError::Sqlite(err)))
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ErrorStatus) {
        self.status = status;
    }

    pub fn kind(&self) -> &StoreErrorKind {
        &self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.status == ErrorStatus::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.status == ErrorStatus::Conflict
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            StoreErrorKind::NotFound(name) => write!(f, "client not found: {name}"),
            StoreErrorKind::Backend(err) => write!(f, "{err}"),
            StoreErrorKind::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "client store requires schema version {expected_version}, got {actual_version}"
            ),
            StoreErrorKind::MissingRequiredTable(table) => {
                write!(f, "client store requires table `{table}`")
            }
            StoreErrorKind::MissingRequiredColumn { table, column } => write!(
                f,
                "client store requires column `{column}` in table `{table}`"
            ),
            StoreErrorKind::InvalidData(message) => {
                write!(f, "invalid persisted client data: {message}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            StoreErrorKind::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::new(StoreErrorKind::Backend(value))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::backend(value)
    }
}

/// Maps a driver error to the status a caller should see.
///
/// Structured uniqueness codes win. Trigger-raised messages from the client
/// schema are matched as a fallback since SQLite reports them all under one
/// generic trigger code.
pub fn classify_backend_error(err: &rusqlite::Error) -> ErrorStatus {
    if let rusqlite::Error::SqliteFailure(failure, _) = err {
        if failure.code == ErrorCode::ConstraintViolation
            && matches!(
                failure.extended_code,
                SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY
            )
        {
            return ErrorStatus::Conflict;
        }
    }

    let message = err.to_string();
    if message.starts_with(USER_CONFLICT_PREFIX) || message.contains(RENAME_CONFLICT_MARKER) {
        return ErrorStatus::Conflict;
    }
    ErrorStatus::Internal
}
