//! # Storage Primitives
//!
//! Fixed names and limits compiled into the binary.
//!
//! Physical redb table names are derived from logical names with a prefix so
//! user tables can never collide with the catalog, sequences or network indexes.

/// Implicit primary key column of every table.
pub const ID_COLUMN: &str = "id";

/// Reserved fixture entry carrying per-file options (`[_fixture] table = "..."`).
pub const FIXTURE_OPTIONS_KEY: &str = "_fixture";

/// Catalog table: logical table name -> postcard `TableSpec`.
pub const CATALOG_TABLE: &str = "__catalog";

/// Sequence table: sequence name -> last value handed out.
pub const SEQUENCE_TABLE: &str = "__sequences";

/// Prefix of physical tables holding user rows.
pub const ROW_TABLE_PREFIX: &str = "rows/";

/// Prefix of physical tables owned by a network (edge registry and indexes).
pub const NETWORK_TABLE_PREFIX: &str = "net/";

/// Upper bound on the depth walked by ancestor queries.
///
/// Cycles are rejected on insert, so hitting this limit means the stored
/// indexes are corrupt.
pub const MAX_TRAVERSAL_DEPTH: usize = 100_000;

/// Physical table name for the rows of `table`.
#[must_use]
pub fn row_table_name(table: &str) -> String {
    format!("{ROW_TABLE_PREFIX}{table}")
}

/// Physical table name for one of a network's index tables.
#[must_use]
pub fn network_table_name(network: &str, part: &str) -> String {
    format!("{NETWORK_TABLE_PREFIX}{network}/{part}")
}
