//! Connection handle and the single-writer gate.

use super::{Snapshot, Transaction};
use crate::error::{NetrelError, Result, storage_err};
use redb::{Database, ReadableDatabase};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// A redb file on disk.
    File(PathBuf),
    /// A throwaway in-memory database.
    Memory,
}

/// An open database.
///
/// There is no process-wide connection: callers create one and pass it to the
/// schema loader, fixture loader and network stores explicitly.
pub struct Connection {
    db: Database,
    gate: WriterGate,
    backend: Backend,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open or create a database for the given backend.
    pub fn open(backend: &Backend) -> Result<Self> {
        let db = match backend {
            Backend::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        NetrelError::Io(format!("cannot create {}: {}", parent.display(), e))
                    })?;
                }
                Database::create(path).map_err(storage_err)?
            }
            Backend::Memory => Database::builder()
                .create_with_backend(redb::backends::InMemoryBackend::new())
                .map_err(storage_err)?,
        };
        tracing::debug!(?backend, "connection opened");
        Ok(Self {
            db,
            gate: WriterGate::default(),
            backend: backend.clone(),
        })
    }

    /// Open or create a file-backed database.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&Backend::File(path.as_ref().to_path_buf()))
    }

    /// Create an empty in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&Backend::Memory)
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Begin a write transaction, waiting for any other writer to finish.
    ///
    /// Calling this while the same thread already holds a transaction blocks
    /// forever; use savepoints for nesting.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let slot = self.gate.acquire();
        let txn = self.db.begin_write().map_err(storage_err)?;
        Ok(Transaction::new(txn, slot))
    }

    /// Begin a write transaction, failing with `Concurrency` if another writer is active.
    pub fn try_begin(&self) -> Result<Transaction<'_>> {
        let slot = self.gate.try_acquire()?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        Ok(Transaction::new(txn, slot))
    }

    /// Open a read-only snapshot of committed state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        Ok(Snapshot::new(txn))
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<bool> {
        self.db.compact().map_err(storage_err)
    }
}

// =============================================================================
// WRITER GATE
// =============================================================================

/// Serializes write transactions across threads.
///
/// redb already allows a single writer; the gate adds a non-blocking
/// `try_acquire` so conflicts surface as a retryable error.
#[derive(Debug, Default)]
struct WriterGate {
    busy: Mutex<bool>,
    released: Condvar,
}

impl WriterGate {
    fn acquire(&self) -> WriterSlot<'_> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        while *busy {
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *busy = true;
        WriterSlot { gate: self }
    }

    fn try_acquire(&self) -> Result<WriterSlot<'_>> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if *busy {
            return Err(NetrelError::Concurrency(
                "another write transaction is active".to_string(),
            ));
        }
        *busy = true;
        Ok(WriterSlot { gate: self })
    }
}

/// Held by a live `Transaction`; frees the gate on drop.
pub(crate) struct WriterSlot<'c> {
    gate: &'c WriterGate,
}

impl Drop for WriterSlot<'_> {
    fn drop(&mut self) {
        let mut busy = self.gate.busy.lock().unwrap_or_else(PoisonError::into_inner);
        *busy = false;
        self.gate.released.notify_one();
    }
}
