//! # Error Types
//!
//! - Schema and fixture errors are fatal at harness boot and always name the
//!   offending table / record.
//! - Store errors (`Cycle`, `EntityNotFound`, `Concurrency`, ...) are returned to
//!   the caller; nothing in this crate retries or swallows them.

use crate::types::{EdgeId, EntityId};
use thiserror::Error;

/// Malformed or unsupported schema, or a row that does not match it.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema could not be parsed: {0}")]
    Parse(String),

    #[error("table `{0}` is declared more than once")]
    DuplicateTable(String),

    #[error("column `{table}.{column}` is declared more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("column `{table}.{column}` has unsupported type `{type_name}`")]
    UnsupportedType {
        table: String,
        column: String,
        type_name: String,
    },

    #[error("column `{table}.{column}` uses a reserved name")]
    ReservedColumn { table: String, column: String },

    #[error("column `{table}.{column}` references unknown table `{target}`")]
    UnknownReference {
        table: String,
        column: String,
        target: String,
    },

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("unknown column `{table}.{column}`")]
    UnknownColumn { table: String, column: String },

    #[error("column `{table}.{column}` expects {expected}, got {found}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("column `{table}.{column}` is not nullable")]
    NullViolation { table: String, column: String },

    #[error("network `{network}` is misconfigured: {reason}")]
    InvalidNetwork { network: String, reason: String },
}

/// Fixture files that cannot be loaded.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fixture file `{file}` could not be parsed: {reason}")]
    Parse { file: String, reason: String },

    #[error("fixture file `{file}` targets unknown table `{table}`")]
    UnknownTable { file: String, table: String },

    #[error("record `{table}.{record}` is defined more than once")]
    DuplicateName { table: String, record: String },

    #[error("record `{table}.{record}` pins key {id}, which is already taken")]
    DuplicateKey {
        table: String,
        record: String,
        id: u64,
    },

    #[error("record `{table}.{record}` column `{column}` references unknown record `{label}`")]
    UnresolvedReference {
        table: String,
        record: String,
        column: String,
        label: String,
    },

    #[error("record `{table}.{record}` column `{column}`: {reason}")]
    InvalidValue {
        table: String,
        record: String,
        column: String,
        reason: String,
    },

    #[error("no fixture record `{table}.{record}`")]
    UnknownRecord { table: String, record: String },
}

/// Errors that can occur anywhere in netrel.
#[derive(Debug, Error)]
pub enum NetrelError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    /// Linking `child` under `parent` would make an entity its own ancestor.
    #[error("edge {parent} -> {child} would create a cycle")]
    Cycle { parent: EntityId, child: EntityId },

    #[error("entity {id} not found in `{table}`")]
    EntityNotFound { table: String, id: EntityId },

    #[error("edge {0} not found")]
    EdgeNotFound(EdgeId),

    /// Tree networks allow a single parent per entity.
    #[error("entity {child} already has parent {parent}")]
    ParentExists { child: EntityId, parent: EntityId },

    #[error("edge {parent} -> {child} already exists")]
    DuplicateEdge { parent: EntityId, child: EntityId },

    /// Another writer holds the database; safe to retry.
    #[error("concurrent write conflict: {0}")]
    Concurrency(String),

    #[error("savepoint {0} is not active")]
    InvalidSavepoint(u64),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl NetrelError {
    /// Only write conflicts are safe to retry unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. } | Self::EdgeNotFound(_))
    }
}

/// Map any redb error into `NetrelError::Storage`.
pub(crate) fn storage_err(e: impl std::fmt::Display) -> NetrelError {
    NetrelError::Storage(e.to_string())
}

/// Map postcard failures into `NetrelError::Serialization`.
pub(crate) fn codec_err(e: impl std::fmt::Display) -> NetrelError {
    NetrelError::Serialization(e.to_string())
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = NetrelError> = std::result::Result<T, E>;
