//! # netrel-core
//!
//! Directed node/edge networks over rows of an embedded relational store.
//!
//! The crate is layered bottom-up:
//! - `storage`: typed rows, sequences and savepoints on top of redb
//! - `schema`: declarative table definitions, applied drop-and-recreate
//! - `fixtures`: named rows loaded once and referenced by label
//! - `network`: parent/child edges with ancestor, descendant and sibling queries
//! - `config`: named environments read from TOML
//!
//! There is no process-wide state. A `Connection` is opened explicitly and
//! handed to every loader and store that needs it; each network operation
//! runs inside a caller-supplied `Transaction` or `Snapshot`.

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod error;
pub mod fixtures;
pub mod network;
pub mod primitives;
pub mod schema;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::{BackendKind, Config, Environment};
pub use error::{FixtureError, NetrelError, Result, SchemaError};
pub use fixtures::{FixtureCache, FixtureLoader, FixtureSet, FixtureSource};
pub use network::{
    AncestryIndex, CascadePolicy, Edge, EdgeStorage, Multiplicity, NetworkConfig, NetworkStore,
    NodeState,
};
pub use schema::{ColumnSpec, Schema, SchemaLoader, TableSpec};
pub use storage::{Backend, Connection, ReadAccess, Savepoint, Snapshot, Transaction};
pub use types::{ColumnType, EdgeId, EntityId, Row, TypeName, Value};
