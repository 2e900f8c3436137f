//! # redb-backed Relational Storage
//!
//! A thin typed-row layer over the redb embedded database:
//! - `Connection` owns the `Database` and serializes writers
//! - `Transaction` is a write transaction with savepoints
//! - `Snapshot` is an MVCC read transaction
//!
//! Both `Transaction` and `Snapshot` implement `ReadAccess`, so every query in
//! the crate can run either inside a test's isolated transaction (seeing its
//! uncommitted writes) or against committed state.
//!
//! ## Physical layout
//!
//! | redb table            | key            | value                 |
//! |-----------------------|----------------|-----------------------|
//! | `__catalog`           | table name     | postcard `TableSpec`  |
//! | `__sequences`         | sequence name  | last id handed out    |
//! | `rows/<table>`        | row id         | postcard `Row`        |
//! | `net/<network>/edges` | edge id        | postcard `Edge`       |
//! | `net/<network>/<idx>` | `(u64, u64)`   | `u64`                 |

mod connection;
mod transaction;

pub use connection::{Backend, Connection};
pub use transaction::{Savepoint, Transaction};

use crate::error::{NetrelError, Result, SchemaError, codec_err, storage_err};
use crate::primitives::{CATALOG_TABLE, SEQUENCE_TABLE, row_table_name};
use crate::schema::TableSpec;
use crate::types::{EntityId, Row};
use redb::{ReadTransaction, ReadableTable, TableDefinition};

// =============================================================================
// TABLE DEFINITIONS
// =============================================================================

/// Catalog: table name -> serialized `TableSpec`.
pub(crate) const CATALOG: TableDefinition<&str, &[u8]> = TableDefinition::new(CATALOG_TABLE);

/// Sequences: sequence name -> last value handed out.
pub(crate) const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new(SEQUENCE_TABLE);

/// Keyed byte table (rows, edge registries).
pub(crate) fn bytes_table(name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(name)
}

/// Pair-keyed index table.
pub(crate) fn pair_table(name: &str) -> TableDefinition<'_, (u64, u64), u64> {
    TableDefinition::new(name)
}

// =============================================================================
// READ ACCESS
// =============================================================================

/// Read operations shared by write transactions and read snapshots.
///
/// The `raw_*`/`pair_*` methods address physical redb tables and are used by the
/// network indexes; application code should stick to the typed row methods.
pub trait ReadAccess {
    /// Catalog entry for `table`, or `None` if the table is not declared.
    fn table_spec(&self, table: &str) -> Result<Option<TableSpec>>;

    /// All catalog entries, ordered by table name.
    fn table_specs(&self) -> Result<Vec<TableSpec>>;

    #[doc(hidden)]
    fn raw_get(&self, physical: &str, key: u64) -> Result<Option<Vec<u8>>>;

    #[doc(hidden)]
    fn raw_scan(&self, physical: &str) -> Result<Vec<(u64, Vec<u8>)>>;

    #[doc(hidden)]
    fn pair_get(&self, physical: &str, key: (u64, u64)) -> Result<Option<u64>>;

    /// All `(second, value)` entries whose key starts with `first`, in key order.
    #[doc(hidden)]
    fn pair_range(&self, physical: &str, first: u64) -> Result<Vec<(u64, u64)>>;

    /// Catalog entry for `table`, failing if it is not declared.
    fn spec(&self, table: &str) -> Result<TableSpec> {
        self.table_spec(table)?
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()).into())
    }

    /// Fetch a row by key.
    fn get(&self, table: &str, id: EntityId) -> Result<Option<Row>> {
        self.spec(table)?;
        self.raw_get(&row_table_name(table), id.0)?
            .map(|bytes| decode_row(&bytes))
            .transpose()
    }

    /// Fetch a row by key, failing with `EntityNotFound` if absent.
    fn row(&self, table: &str, id: EntityId) -> Result<Row> {
        self.get(table, id)?.ok_or_else(|| NetrelError::EntityNotFound {
            table: table.to_string(),
            id,
        })
    }

    fn contains(&self, table: &str, id: EntityId) -> Result<bool> {
        self.spec(table)?;
        Ok(self.raw_get(&row_table_name(table), id.0)?.is_some())
    }

    /// All rows of `table` in key order.
    fn scan(&self, table: &str) -> Result<Vec<(EntityId, Row)>> {
        self.spec(table)?;
        self.raw_scan(&row_table_name(table))?
            .into_iter()
            .map(|(key, bytes)| Ok((EntityId(key), decode_row(&bytes)?)))
            .collect()
    }

    fn count(&self, table: &str) -> Result<usize> {
        Ok(self.scan(table)?.len())
    }
}

pub(crate) fn decode_row(bytes: &[u8]) -> Result<Row> {
    postcard::from_bytes(bytes).map_err(codec_err)
}

pub(crate) fn encode_row(row: &Row) -> Result<Vec<u8>> {
    postcard::to_allocvec(row).map_err(codec_err)
}

// =============================================================================
// TABLE HELPERS (generic over read-only and writable tables)
// =============================================================================

pub(crate) fn read_bytes(
    table: &impl ReadableTable<u64, &'static [u8]>,
    key: u64,
) -> Result<Option<Vec<u8>>> {
    Ok(table
        .get(key)
        .map_err(storage_err)?
        .map(|guard| guard.value().to_vec()))
}

pub(crate) fn scan_bytes(
    table: &impl ReadableTable<u64, &'static [u8]>,
) -> Result<Vec<(u64, Vec<u8>)>> {
    let mut out = Vec::new();
    for entry in table.iter().map_err(storage_err)? {
        let (key, value) = entry.map_err(storage_err)?;
        out.push((key.value(), value.value().to_vec()));
    }
    Ok(out)
}

pub(crate) fn read_pair(
    table: &impl ReadableTable<(u64, u64), u64>,
    key: (u64, u64),
) -> Result<Option<u64>> {
    Ok(table.get(key).map_err(storage_err)?.map(|guard| guard.value()))
}

pub(crate) fn range_pairs(
    table: &impl ReadableTable<(u64, u64), u64>,
    first: u64,
) -> Result<Vec<(u64, u64)>> {
    let mut out = Vec::new();
    for entry in table
        .range((first, 0u64)..=(first, u64::MAX))
        .map_err(storage_err)?
    {
        let (key, value) = entry.map_err(storage_err)?;
        let (_first, second) = key.value();
        out.push((second, value.value()));
    }
    Ok(out)
}

pub(crate) fn read_specs(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<TableSpec>> {
    let mut out = Vec::new();
    for entry in table.iter().map_err(storage_err)? {
        let (_, value) = entry.map_err(storage_err)?;
        out.push(postcard::from_bytes(value.value()).map_err(codec_err)?);
    }
    Ok(out)
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Open a table in a read transaction, returning `$empty` if it was never created.
macro_rules! open_or_return {
    ($txn:expr, $def:expr, $empty:expr) => {
        match $txn.open_table($def) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok($empty),
            Err(e) => return Err(storage_err(e)),
        }
    };
}

/// A consistent read-only view of committed state.
pub struct Snapshot {
    txn: ReadTransaction,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").finish_non_exhaustive()
    }
}

impl Snapshot {
    pub(crate) fn new(txn: ReadTransaction) -> Self {
        Self { txn }
    }
}

impl ReadAccess for Snapshot {
    fn table_spec(&self, table: &str) -> Result<Option<TableSpec>> {
        let catalog = open_or_return!(self.txn, CATALOG, None);
        catalog
            .get(table)
            .map_err(storage_err)?
            .map(|guard| postcard::from_bytes(guard.value()).map_err(codec_err))
            .transpose()
    }

    fn table_specs(&self) -> Result<Vec<TableSpec>> {
        let catalog = open_or_return!(self.txn, CATALOG, Vec::new());
        read_specs(&catalog)
    }

    fn raw_get(&self, physical: &str, key: u64) -> Result<Option<Vec<u8>>> {
        let table = open_or_return!(self.txn, bytes_table(physical), None);
        read_bytes(&table, key)
    }

    fn raw_scan(&self, physical: &str) -> Result<Vec<(u64, Vec<u8>)>> {
        let table = open_or_return!(self.txn, bytes_table(physical), Vec::new());
        scan_bytes(&table)
    }

    fn pair_get(&self, physical: &str, key: (u64, u64)) -> Result<Option<u64>> {
        let table = open_or_return!(self.txn, pair_table(physical), None);
        read_pair(&table, key)
    }

    fn pair_range(&self, physical: &str, first: u64) -> Result<Vec<(u64, u64)>> {
        let table = open_or_return!(self.txn, pair_table(physical), Vec::new());
        range_pairs(&table, first)
    }
}
