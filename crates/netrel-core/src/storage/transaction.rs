//! Write transactions, savepoints and the undo journal.
//!
//! Rolling back a whole transaction is delegated to redb (abort on drop).
//! Savepoints are implemented here: while at least one savepoint is open,
//! every write records the value it replaced, and `rollback_to` replays those
//! records in reverse. Because rows, sequences and network indexes are all
//! written through the same primitives, a savepoint rollback restores all of them.

use super::connection::WriterSlot;
use super::{
    CATALOG, ReadAccess, SEQUENCES, bytes_table, encode_row, pair_table, range_pairs, read_bytes,
    read_pair, read_specs, scan_bytes,
};
use crate::error::{NetrelError, Result, codec_err, storage_err};
use crate::primitives::row_table_name;
use crate::schema::TableSpec;
use crate::types::{EntityId, Row, Value};
use redb::{ReadableTable, WriteTransaction};

/// One journaled write: the physical location and what it held before.
#[derive(Debug)]
enum UndoEntry {
    Bytes {
        table: String,
        key: u64,
        previous: Option<Vec<u8>>,
    },
    Pair {
        table: String,
        key: (u64, u64),
        previous: Option<u64>,
    },
    Sequence {
        name: String,
        previous: Option<u64>,
    },
}

/// Handle to an open savepoint.
///
/// Rolling back to a savepoint keeps it open; releasing it closes it together
/// with every savepoint opened after it.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct Savepoint {
    id: u64,
}

impl Savepoint {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A write transaction.
///
/// Dropping a transaction without calling `commit` aborts it. This also
/// happens while unwinding from a panic, so an uncommitted transaction can
/// never leak its writes.
pub struct Transaction<'c> {
    txn: Option<WriteTransaction>,
    journal: Vec<UndoEntry>,
    /// Open savepoints as (id, journal length when opened), oldest first.
    savepoints: Vec<(u64, usize)>,
    next_savepoint: u64,
    _slot: WriterSlot<'c>,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("open", &self.txn.is_some())
            .field("savepoints", &self.savepoints.len())
            .field("journal_len", &self.journal.len())
            .finish_non_exhaustive()
    }
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(txn: WriteTransaction, slot: WriterSlot<'c>) -> Self {
        Self {
            txn: Some(txn),
            journal: Vec::new(),
            savepoints: Vec::new(),
            next_savepoint: 0,
            _slot: slot,
        }
    }

    fn txn(&self) -> Result<&WriteTransaction> {
        self.txn
            .as_ref()
            .ok_or_else(|| NetrelError::Storage("transaction already finished".to_string()))
    }

    /// Make all writes durable.
    pub fn commit(mut self) -> Result<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| NetrelError::Storage("transaction already finished".to_string()))?;
        txn.commit().map_err(storage_err)?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Discard all writes.
    pub fn rollback(mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.abort().map_err(storage_err)?;
            tracing::debug!("transaction rolled back");
        }
        Ok(())
    }

    // =========================================================================
    // SAVEPOINTS
    // =========================================================================

    /// Open a savepoint at the current state.
    pub fn savepoint(&mut self) -> Savepoint {
        let id = self.next_savepoint;
        self.next_savepoint = self.next_savepoint.saturating_add(1);
        self.savepoints.push((id, self.journal.len()));
        Savepoint { id }
    }

    /// Undo every write made since `savepoint` was opened.
    ///
    /// Savepoints opened after it are closed; `savepoint` itself stays open.
    /// Entries leave the journal only once they have been undone, so after a
    /// failed replay the remaining writes are still journaled and the
    /// savepoints are unchanged.
    pub fn rollback_to(&mut self, savepoint: &Savepoint) -> Result<()> {
        let position = self.position(savepoint)?;
        let (_, mark) = self.savepoints[position];

        let undone = self.journal.len().saturating_sub(mark);
        while self.journal.len() > mark {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            if let Err(e) = self.undo(&entry) {
                self.journal.push(entry);
                return Err(e);
            }
        }
        self.savepoints.truncate(position + 1);
        tracing::debug!(savepoint = savepoint.id, undone, "rolled back to savepoint");
        Ok(())
    }

    /// Restore the value one journal entry replaced. Idempotent.
    fn undo(&self, entry: &UndoEntry) -> Result<()> {
        match entry {
            UndoEntry::Bytes {
                table,
                key,
                previous,
            } => self.write_bytes(table, *key, previous.as_deref()).map(|_| ()),
            UndoEntry::Pair {
                table,
                key,
                previous,
            } => self.write_pair(table, *key, *previous).map(|_| ()),
            UndoEntry::Sequence { name, previous } => {
                self.write_sequence(name, *previous).map(|_| ())
            }
        }
    }

    /// Close `savepoint` and every savepoint opened after it, keeping their writes.
    pub fn release(&mut self, savepoint: Savepoint) -> Result<()> {
        let position = self.position(&savepoint)?;
        self.savepoints.truncate(position);
        if self.savepoints.is_empty() {
            self.journal.clear();
        }
        Ok(())
    }

    /// Run `f` inside a savepoint: its writes are undone if it returns `Err`.
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let savepoint = self.savepoint();
        match f(self) {
            Ok(value) => {
                self.release(savepoint)?;
                Ok(value)
            }
            Err(e) => {
                self.rollback_to(&savepoint)?;
                self.release(savepoint)?;
                Err(e)
            }
        }
    }

    /// Number of open savepoints.
    #[must_use]
    pub fn savepoint_depth(&self) -> usize {
        self.savepoints.len()
    }

    fn position(&self, savepoint: &Savepoint) -> Result<usize> {
        self.savepoints
            .iter()
            .position(|(id, _)| *id == savepoint.id)
            .ok_or(NetrelError::InvalidSavepoint(savepoint.id))
    }

    fn record(&mut self, entry: UndoEntry) {
        if !self.savepoints.is_empty() {
            self.journal.push(entry);
        }
    }

    // =========================================================================
    // TYPED ROW OPERATIONS
    // =========================================================================

    /// Insert a row, assigning the next key from the table's sequence.
    pub fn insert(&mut self, table: &str, row: Row) -> Result<EntityId> {
        let spec = self.spec(table)?;
        let row = spec.conform(&row)?;
        let id = EntityId(self.next_sequence(table)?);
        self.put_bytes(&row_table_name(table), id.0, &encode_row(&row)?)?;
        tracing::trace!(table, %id, "row inserted");
        Ok(id)
    }

    /// Insert a row under an explicit key. The table sequence is moved past it.
    pub fn insert_with_id(&mut self, table: &str, id: EntityId, row: Row) -> Result<()> {
        let spec = self.spec(table)?;
        let row = spec.conform(&row)?;
        let physical = row_table_name(table);
        if self.raw_get(&physical, id.0)?.is_some() {
            return Err(NetrelError::InvalidArgument(format!(
                "key {} already exists in `{}`",
                id, table
            )));
        }
        self.bump_sequence(table, id.0)?;
        self.put_bytes(&physical, id.0, &encode_row(&row)?)
    }

    /// Replace an existing row.
    pub fn update(&mut self, table: &str, id: EntityId, row: Row) -> Result<()> {
        let spec = self.spec(table)?;
        let row = spec.conform(&row)?;
        self.row(table, id)?;
        self.put_bytes(&row_table_name(table), id.0, &encode_row(&row)?)
    }

    /// Overwrite one column of an existing row.
    pub fn set_column(
        &mut self,
        table: &str,
        id: EntityId,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let mut row = self.row(table, id)?;
        row.set(column, value);
        self.update(table, id, row)
    }

    /// Delete a row and return it.
    ///
    /// References to the row are not checked; networks over the table should
    /// unlink the entity first.
    pub fn delete(&mut self, table: &str, id: EntityId) -> Result<Row> {
        let row = self.row(table, id)?;
        self.remove_bytes(&row_table_name(table), id.0)?;
        Ok(row)
    }

    // =========================================================================
    // DDL (schema loader only)
    // =========================================================================

    fn ensure_no_savepoints(&self, what: &str) -> Result<()> {
        if self.savepoints.is_empty() {
            Ok(())
        } else {
            Err(NetrelError::InvalidArgument(format!(
                "{what} is not allowed inside a savepoint"
            )))
        }
    }

    /// Delete every physical table. Returns how many were dropped.
    pub(crate) fn drop_all_tables(&mut self) -> Result<usize> {
        self.ensure_no_savepoints("dropping tables")?;
        let txn = self.txn()?;
        let handles: Vec<_> = txn.list_tables().map_err(storage_err)?.collect();
        let dropped = handles.len();
        for handle in handles {
            txn.delete_table(handle).map_err(storage_err)?;
        }
        Ok(dropped)
    }

    /// Register `spec` in the catalog and create its row table.
    pub(crate) fn create_table(&mut self, spec: &TableSpec) -> Result<()> {
        self.ensure_no_savepoints("creating tables")?;
        let bytes = postcard::to_allocvec(spec).map_err(codec_err)?;
        let txn = self.txn()?;
        {
            let mut catalog = txn.open_table(CATALOG).map_err(storage_err)?;
            catalog
                .insert(spec.name.as_str(), bytes.as_slice())
                .map_err(storage_err)?;
        }
        {
            let _ = txn
                .open_table(bytes_table(&row_table_name(&spec.name)))
                .map_err(storage_err)?;
        }
        Ok(())
    }

    // =========================================================================
    // JOURNALED PRIMITIVES
    // =========================================================================

    pub(crate) fn put_bytes(&mut self, physical: &str, key: u64, bytes: &[u8]) -> Result<()> {
        let previous = self.write_bytes(physical, key, Some(bytes))?;
        self.record(UndoEntry::Bytes {
            table: physical.to_string(),
            key,
            previous,
        });
        Ok(())
    }

    pub(crate) fn remove_bytes(&mut self, physical: &str, key: u64) -> Result<Option<Vec<u8>>> {
        let previous = self.write_bytes(physical, key, None)?;
        if previous.is_some() {
            self.record(UndoEntry::Bytes {
                table: physical.to_string(),
                key,
                previous: previous.clone(),
            });
        }
        Ok(previous)
    }

    pub(crate) fn put_pair(&mut self, physical: &str, key: (u64, u64), value: u64) -> Result<()> {
        let previous = self.write_pair(physical, key, Some(value))?;
        self.record(UndoEntry::Pair {
            table: physical.to_string(),
            key,
            previous,
        });
        Ok(())
    }

    pub(crate) fn remove_pair(&mut self, physical: &str, key: (u64, u64)) -> Result<Option<u64>> {
        let previous = self.write_pair(physical, key, None)?;
        if previous.is_some() {
            self.record(UndoEntry::Pair {
                table: physical.to_string(),
                key,
                previous,
            });
        }
        Ok(previous)
    }

    /// Increment a sequence and return the new value (first value is 1).
    pub(crate) fn next_sequence(&mut self, name: &str) -> Result<u64> {
        let current = self.read_sequence(name)?.unwrap_or(0);
        let next = current.saturating_add(1);
        let previous = self.write_sequence(name, Some(next))?;
        self.record(UndoEntry::Sequence {
            name: name.to_string(),
            previous,
        });
        Ok(next)
    }

    /// Ensure the sequence will never hand out `value` or anything below it.
    pub(crate) fn bump_sequence(&mut self, name: &str, value: u64) -> Result<()> {
        let current = self.read_sequence(name)?;
        if current.unwrap_or(0) < value {
            let previous = self.write_sequence(name, Some(value))?;
            self.record(UndoEntry::Sequence {
                name: name.to_string(),
                previous,
            });
        }
        Ok(())
    }

    // =========================================================================
    // UNJOURNALED WRITES
    // =========================================================================

    /// Set or clear a byte entry, returning what it held before.
    fn write_bytes(&self, physical: &str, key: u64, bytes: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let txn = self.txn()?;
        let mut table = txn.open_table(bytes_table(physical)).map_err(storage_err)?;
        let previous = match bytes {
            Some(bytes) => table
                .insert(key, bytes)
                .map_err(storage_err)?
                .map(|guard| guard.value().to_vec()),
            None => table
                .remove(key)
                .map_err(storage_err)?
                .map(|guard| guard.value().to_vec()),
        };
        Ok(previous)
    }

    fn write_pair(&self, physical: &str, key: (u64, u64), value: Option<u64>) -> Result<Option<u64>> {
        let txn = self.txn()?;
        let mut table = txn.open_table(pair_table(physical)).map_err(storage_err)?;
        let previous = match value {
            Some(value) => table
                .insert(key, value)
                .map_err(storage_err)?
                .map(|guard| guard.value()),
            None => table
                .remove(key)
                .map_err(storage_err)?
                .map(|guard| guard.value()),
        };
        Ok(previous)
    }

    fn read_sequence(&self, name: &str) -> Result<Option<u64>> {
        let txn = self.txn()?;
        let table = txn.open_table(SEQUENCES).map_err(storage_err)?;
        let value = table.get(name).map_err(storage_err)?.map(|guard| guard.value());
        Ok(value)
    }

    fn write_sequence(&self, name: &str, value: Option<u64>) -> Result<Option<u64>> {
        let txn = self.txn()?;
        let mut table = txn.open_table(SEQUENCES).map_err(storage_err)?;
        let previous = match value {
            Some(value) => table
                .insert(name, value)
                .map_err(storage_err)?
                .map(|guard| guard.value()),
            None => table
                .remove(name)
                .map_err(storage_err)?
                .map(|guard| guard.value()),
        };
        Ok(previous)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.abort() {
                tracing::warn!(error = %e, "failed to abort transaction");
            } else {
                tracing::debug!("uncommitted transaction aborted");
            }
        }
    }
}

impl ReadAccess for Transaction<'_> {
    fn table_spec(&self, table: &str) -> Result<Option<TableSpec>> {
        let txn = self.txn()?;
        let catalog = txn.open_table(CATALOG).map_err(storage_err)?;
        let spec = catalog
            .get(table)
            .map_err(storage_err)?
            .map(|guard| postcard::from_bytes(guard.value()).map_err(codec_err))
            .transpose()?;
        Ok(spec)
    }

    fn table_specs(&self) -> Result<Vec<TableSpec>> {
        let txn = self.txn()?;
        let catalog = txn.open_table(CATALOG).map_err(storage_err)?;
        read_specs(&catalog)
    }

    fn raw_get(&self, physical: &str, key: u64) -> Result<Option<Vec<u8>>> {
        let txn = self.txn()?;
        let table = txn.open_table(bytes_table(physical)).map_err(storage_err)?;
        read_bytes(&table, key)
    }

    fn raw_scan(&self, physical: &str) -> Result<Vec<(u64, Vec<u8>)>> {
        let txn = self.txn()?;
        let table = txn.open_table(bytes_table(physical)).map_err(storage_err)?;
        scan_bytes(&table)
    }

    fn pair_get(&self, physical: &str, key: (u64, u64)) -> Result<Option<u64>> {
        let txn = self.txn()?;
        let table = txn.open_table(pair_table(physical)).map_err(storage_err)?;
        read_pair(&table, key)
    }

    fn pair_range(&self, physical: &str, first: u64) -> Result<Vec<(u64, u64)>> {
        let txn = self.txn()?;
        let table = txn.open_table(pair_table(physical)).map_err(storage_err)?;
        range_pairs(&table, first)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::schema::{Schema, SchemaLoader};
    use crate::storage::Connection;
    use crate::types::ColumnType;

    fn people() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        let schema = Schema::new(vec![
            TableSpec::new("people")
                .column("name", ColumnType::Text, false)
                .column("age", ColumnType::Integer, true),
        ])
        .expect("schema");
        SchemaLoader::apply(&conn, &schema).expect("apply");
        conn
    }

    fn alice() -> Row {
        Row::new().with("name", "Alice")
    }

    #[test]
    fn insert_assigns_sequential_keys() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        let a = tx.insert("people", alice()).expect("insert");
        let b = tx.insert("people", Row::new().with("name", "Bob")).expect("insert");
        assert_eq!((a, b), (EntityId(1), EntityId(2)));
        assert_eq!(tx.row("people", b).expect("row").value("name"), &Value::from("Bob"));
    }

    #[test]
    fn commit_persists_and_drop_aborts() {
        let conn = people();
        {
            let mut tx = conn.begin().expect("begin");
            tx.insert("people", alice()).expect("insert");
            tx.commit().expect("commit");
        }
        {
            let mut tx = conn.begin().expect("begin");
            tx.insert("people", Row::new().with("name", "Ghost")).expect("insert");
            // dropped without commit
        }
        let snapshot = conn.snapshot().expect("snapshot");
        assert_eq!(snapshot.count("people").expect("count"), 1);
    }

    #[test]
    fn explicit_rollback_discards_writes() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        tx.insert("people", alice()).expect("insert");
        tx.rollback().expect("rollback");
        assert_eq!(conn.snapshot().expect("snapshot").count("people").expect("count"), 0);
    }

    #[test]
    fn rollback_to_savepoint_restores_rows_and_sequence() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        let a = tx.insert("people", alice()).expect("insert");

        let sp = tx.savepoint();
        tx.set_column("people", a, "age", 30_i64).expect("update");
        tx.insert("people", Row::new().with("name", "Bob")).expect("insert");
        tx.delete("people", a).expect("delete");
        tx.rollback_to(&sp).expect("rollback");

        assert_eq!(tx.count("people").expect("count"), 1);
        assert!(tx.row("people", a).expect("row").value("age").is_null());
        // The sequence was rewound, so the next key is reused.
        let next = tx.insert("people", Row::new().with("name", "Carol")).expect("insert");
        assert_eq!(next, EntityId(2));
        assert_eq!(tx.savepoint_depth(), 1);
    }

    #[test]
    fn failed_replay_keeps_remaining_entries_journaled() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        tx.put_pair("test/pairs", (1, 1), 1).expect("pair");

        let outer = tx.savepoint();
        // Replaying this entry fails: `test/pairs` is not a byte table.
        tx.journal.push(UndoEntry::Bytes {
            table: "test/pairs".to_string(),
            key: 1,
            previous: None,
        });
        let _inner = tx.savepoint();
        tx.insert("people", alice()).expect("insert");

        assert!(tx.rollback_to(&outer).is_err());
        assert_eq!(tx.count("people").expect("count"), 0);
        assert_eq!(tx.journal.len(), 1);
        assert_eq!(tx.savepoint_depth(), 2);

        tx.journal.pop();
        tx.rollback_to(&outer).expect("retry");
        assert_eq!(tx.savepoint_depth(), 1);
        assert_eq!(tx.pair_get("test/pairs", (1, 1)).expect("pair"), Some(1));
    }

    #[test]
    fn rollback_to_outer_savepoint_closes_inner() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        let outer = tx.savepoint();
        tx.insert("people", alice()).expect("insert");
        let inner = tx.savepoint();
        tx.insert("people", Row::new().with("name", "Bob")).expect("insert");

        tx.rollback_to(&outer).expect("rollback");
        assert_eq!(tx.count("people").expect("count"), 0);
        assert!(matches!(
            tx.rollback_to(&inner),
            Err(NetrelError::InvalidSavepoint(_))
        ));
    }

    #[test]
    fn release_keeps_writes() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        let sp = tx.savepoint();
        tx.insert("people", alice()).expect("insert");
        tx.release(sp).expect("release");
        assert_eq!(tx.savepoint_depth(), 0);
        assert_eq!(tx.count("people").expect("count"), 1);
    }

    #[test]
    fn nested_rolls_back_on_error_only() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");

        tx.nested(|tx| tx.insert("people", alice())).expect("ok");
        let err = tx.nested(|tx| {
            tx.insert("people", Row::new().with("name", "Bob"))?;
            tx.insert("people", Row::new())
        });
        assert!(matches!(err, Err(NetrelError::Schema(_))));
        assert_eq!(tx.count("people").expect("count"), 1);
    }

    #[test]
    fn insert_with_id_bumps_sequence() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        tx.insert_with_id("people", EntityId(10), alice()).expect("insert");
        let next = tx.insert("people", Row::new().with("name", "Bob")).expect("insert");
        assert_eq!(next, EntityId(11));
        assert!(matches!(
            tx.insert_with_id("people", EntityId(10), alice()),
            Err(NetrelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_table_is_a_schema_error() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        assert!(matches!(
            tx.insert("pets", Row::new()),
            Err(NetrelError::Schema(_))
        ));
        assert!(matches!(
            tx.row("people", EntityId(99)),
            Err(NetrelError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn ddl_is_refused_inside_savepoint() {
        let conn = people();
        let mut tx = conn.begin().expect("begin");
        let _sp = tx.savepoint();
        assert!(tx.drop_all_tables().is_err());
    }
}
