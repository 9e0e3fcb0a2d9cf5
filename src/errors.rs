//! # Error Kinds
//!
//! IbexDB reports failures through `eyre::Report` like the rest of the
//! codebase, but the facade contract distinguishes six error kinds that
//! callers (the DDL/DML layer, the shell) dispatch on. `StorageError` is the
//! typed carrier for those kinds; it sits at the root of the report chain so
//! `error_kind` can recover it with `downcast_ref` no matter how much
//! context later layers wrapped around it.
//!
//! ## Kinds
//!
//! - `NotFound`: table absent; key absent on get/delete/update
//! - `AlreadyExists`: table create collision; duplicate key on insert
//! - `InvalidSchema`: schema blob too large for page 1, corrupt bytes
//! - `InvalidArgument`: empty key, u16 overflow, oversized record,
//!   AUTO_INCREMENT column index out of range
//! - `Io`: any disk open/seek/read/write/sync failure
//! - `Integrity`: an on-page invariant violated on read; fatal for the
//!   current transaction
//!
//! Partial writes performed before a failure are not rolled back; there is
//! no WAL. The queue rethrows the report to exactly the submitting caller.

use thiserror::Error;

/// Error kind observable at the facade boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidSchema,
    InvalidArgument,
    Io,
    Integrity,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::InvalidSchema(_) => ErrorKind::InvalidSchema,
            StorageError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StorageError::Io(_) => ErrorKind::Io,
            StorageError::Integrity(_) => ErrorKind::Integrity,
        }
    }
}

/// Recovers the typed kind from a report, if one is in the chain.
pub fn error_kind(report: &eyre::Report) -> Option<ErrorKind> {
    report.downcast_ref::<StorageError>().map(StorageError::kind)
}

pub fn not_found(msg: impl Into<String>) -> eyre::Report {
    StorageError::NotFound(msg.into()).into()
}

pub fn already_exists(msg: impl Into<String>) -> eyre::Report {
    StorageError::AlreadyExists(msg.into()).into()
}

pub fn invalid_schema(msg: impl Into<String>) -> eyre::Report {
    StorageError::InvalidSchema(msg.into()).into()
}

pub fn invalid_argument(msg: impl Into<String>) -> eyre::Report {
    StorageError::InvalidArgument(msg.into()).into()
}

pub fn io_error(msg: impl Into<String>) -> eyre::Report {
    StorageError::Io(msg.into()).into()
}

pub fn integrity_error(msg: impl Into<String>) -> eyre::Report {
    StorageError::Integrity(msg.into()).into()
}
