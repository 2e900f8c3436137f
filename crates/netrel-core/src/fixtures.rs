//! # Fixture Loader
//!
//! Named rows shared by every test in a process.
//!
//! One TOML file per fixture set; each top-level table is a record:
//!
//! ```toml
//! [_fixture]
//! table = "people"     # optional, defaults to the file stem
//!
//! [alice]
//! name = "Alice"
//!
//! [bob]
//! id = 10              # optional pinned key
//! name = "Bob"
//! parent_id = "alice"  # label of a record in the referenced table
//! ```
//!
//! Loading runs in two passes inside one transaction. The first hands out a
//! key to every label of every file, so references can point forward, across
//! files, or at the record itself. The second inserts the rows with labels
//! replaced by keys. Any error rolls the whole load back.

use crate::error::{FixtureError, NetrelError, Result, SchemaError};
use crate::primitives::{FIXTURE_OPTIONS_KEY, ID_COLUMN};
use crate::schema::TableSpec;
use crate::storage::{Connection, ReadAccess, Transaction};
use crate::types::{ColumnType, EntityId, Row, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

// =============================================================================
// FIXTURE SET
// =============================================================================

/// Label → key mapping produced by a load. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixtureSet {
    keys: BTreeMap<String, BTreeMap<String, EntityId>>,
}

impl FixtureSet {
    /// Key assigned to `record` in `table`.
    pub fn key(&self, table: &str, record: &str) -> Result<EntityId> {
        self.keys
            .get(table)
            .and_then(|records| records.get(record))
            .copied()
            .ok_or_else(|| {
                FixtureError::UnknownRecord {
                    table: table.to_string(),
                    record: record.to_string(),
                }
                .into()
            })
    }

    /// Record labels of `table`, sorted.
    pub fn labels(&self, table: &str) -> Vec<&str> {
        self.keys
            .get(table)
            .map(|records| records.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Tables with at least one record, sorted.
    pub fn tables(&self) -> Vec<&str> {
        self.keys.keys().map(String::as_str).collect()
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.keys.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// LOADER
// =============================================================================

/// One fixture file's contents.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    /// File name, used in error messages.
    pub file: String,
    /// Default target table.
    pub stem: String,
    pub text: String,
}

impl FixtureSource {
    pub fn new(file: impl Into<String>, text: impl Into<String>) -> Self {
        let file = file.into();
        let stem = Path::new(&file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.clone());
        Self {
            file,
            stem,
            text: text.into(),
        }
    }

    /// Read every `*.toml` file in `dir`, sorted by file name.
    pub fn read_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| NetrelError::Io(format!("cannot read {}: {}", dir.display(), e)))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| NetrelError::Io(format!("cannot read {}: {}", dir.display(), e)))?
                .path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| NetrelError::Io(format!("cannot read {}: {}", path.display(), e)))?;
            let file = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            sources.push(Self::new(file, text));
        }
        Ok(sources)
    }
}

struct ParsedFile {
    file: String,
    table: TableSpec,
    records: Vec<(String, toml::Table)>,
}

/// Loads fixture files into a connection.
pub struct FixtureLoader;

impl FixtureLoader {
    /// Load every `*.toml` file in `dir`, in file-name order.
    pub fn load_dir(conn: &Connection, dir: impl AsRef<Path>) -> Result<FixtureSet> {
        Self::load_sources(conn, &FixtureSource::read_dir(dir)?)
    }

    /// Load fixture sources in order and commit them.
    pub fn load_sources(conn: &Connection, sources: &[FixtureSource]) -> Result<FixtureSet> {
        let mut tx = conn.begin()?;
        let set = Self::load_into(&mut tx, sources)?;
        tx.commit()?;
        tracing::info!(
            files = sources.len(),
            records = set.len(),
            "fixtures loaded"
        );
        Ok(set)
    }

    /// Load fixture sources inside an existing transaction without committing.
    pub fn load_into(tx: &mut Transaction<'_>, sources: &[FixtureSource]) -> Result<FixtureSet> {
        tx.nested(|tx| {
            let files = sources
                .iter()
                .map(|source| parse_source(&*tx, source))
                .collect::<Result<Vec<_>>>()?;
            let set = assign_keys(tx, &files)?;
            for file in &files {
                insert_records(tx, file, &set)?;
            }
            Ok(set)
        })
    }
}

fn parse_source<R: ReadAccess + ?Sized>(r: &R, source: &FixtureSource) -> Result<ParsedFile> {
    let parse_err = |reason: String| FixtureError::Parse {
        file: source.file.clone(),
        reason,
    };
    let document: toml::Table =
        toml::from_str(&source.text).map_err(|e| parse_err(e.to_string()))?;

    let mut table_name = source.stem.clone();
    let mut records = Vec::new();
    for (label, value) in document {
        let toml::Value::Table(body) = value else {
            return Err(parse_err(format!("record `{label}` is not a table")).into());
        };
        if label == FIXTURE_OPTIONS_KEY {
            match body.get("table") {
                Some(toml::Value::String(name)) => table_name = name.clone(),
                Some(_) => {
                    return Err(parse_err(format!("`{FIXTURE_OPTIONS_KEY}.table` must be a string")).into());
                }
                None => {}
            }
            continue;
        }
        records.push((label, body));
    }

    let table = r
        .table_spec(&table_name)?
        .ok_or_else(|| FixtureError::UnknownTable {
            file: source.file.clone(),
            table: table_name.clone(),
        })?;
    Ok(ParsedFile {
        file: source.file.clone(),
        table,
        records,
    })
}

/// First pass: pinned keys, then sequence keys in document order.
fn assign_keys(tx: &mut Transaction<'_>, files: &[ParsedFile]) -> Result<FixtureSet> {
    let mut keys: BTreeMap<String, BTreeMap<String, EntityId>> = BTreeMap::new();
    let mut labels: BTreeSet<(&str, &str)> = BTreeSet::new();
    let mut taken: BTreeSet<(&str, EntityId)> = BTreeSet::new();
    let mut unpinned = Vec::new();

    for file in files {
        let table = file.table.name.as_str();
        for (label, body) in &file.records {
            if !labels.insert((table, label.as_str())) {
                return Err(FixtureError::DuplicateName {
                    table: table.to_string(),
                    record: label.clone(),
                }
                .into());
            }
            let Some(pinned) = body.get(ID_COLUMN) else {
                unpinned.push((table, label));
                continue;
            };
            let id = match pinned {
                toml::Value::Integer(n) => u64::try_from(*n).ok().map(EntityId),
                _ => None,
            }
            .ok_or_else(|| FixtureError::InvalidValue {
                table: table.to_string(),
                record: label.clone(),
                column: ID_COLUMN.to_string(),
                reason: "key must be a non-negative integer".to_string(),
            })?;
            if !taken.insert((table, id)) || tx.contains(table, id)? {
                return Err(FixtureError::DuplicateKey {
                    table: table.to_string(),
                    record: label.clone(),
                    id: id.0,
                }
                .into());
            }
            tx.bump_sequence(table, id.0)?;
            keys.entry(table.to_string())
                .or_default()
                .insert(label.clone(), id);
        }
    }

    for (table, label) in unpinned {
        let id = EntityId(tx.next_sequence(table)?);
        keys.entry(table.to_string())
            .or_default()
            .insert(label.clone(), id);
    }
    Ok(FixtureSet { keys })
}

/// Second pass: convert values and insert under the assigned keys.
fn insert_records(tx: &mut Transaction<'_>, file: &ParsedFile, set: &FixtureSet) -> Result<()> {
    let table = &file.table;
    for (label, body) in &file.records {
        let invalid = |column: &str, reason: String| -> NetrelError {
            FixtureError::InvalidValue {
                table: table.name.clone(),
                record: label.clone(),
                column: column.to_string(),
                reason,
            }
            .into()
        };

        let mut row = Row::new();
        for (column, value) in body {
            if column == ID_COLUMN {
                continue;
            }
            let spec = table.find_column(column).ok_or_else(|| {
                invalid(column.as_str(), format!("no such column in `{}`", table.name))
            })?;
            let converted = match (&spec.column_type, value) {
                (ColumnType::Reference { target }, toml::Value::String(target_label)) => {
                    let id = set.key(target, target_label).map_err(|_| {
                        FixtureError::UnresolvedReference {
                            table: table.name.clone(),
                            record: label.clone(),
                            column: column.clone(),
                            label: target_label.clone(),
                        }
                    })?;
                    Value::from(id)
                }
                (ColumnType::Reference { .. } | ColumnType::Integer, toml::Value::Integer(n)) => {
                    Value::Integer(*n)
                }
                (ColumnType::Text, toml::Value::String(s)) => Value::Text(s.clone()),
                (ColumnType::Boolean, toml::Value::Boolean(b)) => Value::Boolean(*b),
                (expected, other) => {
                    return Err(invalid(
                        column.as_str(),
                        format!("expected {}, got {}", expected.name(), other.type_str()),
                    ));
                }
            };
            row.set(column.as_str(), converted);
        }

        let id = set.key(&table.name, label)?;
        tx.insert_with_id(&table.name, id, row).map_err(|e| match e {
            NetrelError::Schema(schema) => {
                let column = match &schema {
                    SchemaError::NullViolation { column, .. }
                    | SchemaError::UnknownColumn { column, .. }
                    | SchemaError::TypeMismatch { column, .. } => column.clone(),
                    _ => String::new(),
                };
                invalid(column.as_str(), schema.to_string())
            }
            other => other,
        })?;
        tracing::trace!(file = %file.file, table = %table.name, record = %label, %id, "fixture inserted");
    }
    Ok(())
}

// =============================================================================
// CACHE
// =============================================================================

type Slot = Arc<Mutex<Option<Arc<FixtureSet>>>>;

/// Loads each named fixture set at most once per cache.
///
/// Concurrent callers for the same name wait on that name's slot while the
/// first one loads. A failed load leaves the slot empty, so the next caller
/// tries again.
#[derive(Debug, Default)]
pub struct FixtureCache {
    slots: Mutex<BTreeMap<String, Slot>>,
}

impl FixtureCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached set for `name`, running `load` if there is none yet.
    pub fn get_or_load(
        &self,
        name: &str,
        load: impl FnOnce() -> Result<FixtureSet>,
    ) -> Result<Arc<FixtureSet>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(name.to_string()).or_default())
        };
        let mut cached = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = cached.as_ref() {
            return Ok(Arc::clone(set));
        }
        let set = Arc::new(load()?);
        *cached = Some(Arc::clone(&set));
        tracing::debug!(fixture_set = name, records = set.len(), "fixture set cached");
        Ok(set)
    }

    /// Whether `name` has been loaded successfully.
    pub fn is_loaded(&self, name: &str) -> bool {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(name).cloned()
        };
        slot.is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
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
    use std::cell::Cell;
    use tempfile::tempdir;

    fn people_and_invites() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        let people = ColumnType::Reference {
            target: "people".into(),
        };
        let schema = Schema::new(vec![
            TableSpec::new("people")
                .column("name", ColumnType::Text, false)
                .column("parent_id", people.clone(), true)
                .column("admin", ColumnType::Boolean, true),
            TableSpec::new("invites")
                .column("inviter_id", people.clone(), false)
                .column("invitee_id", people, false),
        ])
        .expect("schema");
        SchemaLoader::apply(&conn, &schema).expect("apply");
        conn
    }

    const PEOPLE: &str = r#"
        [carol]
        name = "Carol"
        parent_id = "bob"

        [alice]
        name = "Alice"
        admin = true

        [bob]
        id = 10
        name = "Bob"
        parent_id = "alice"
    "#;

    const INVITES: &str = r#"
        [_fixture]
        table = "invites"

        [first]
        inviter_id = "alice"
        invitee_id = "carol"
    "#;

    #[test]
    fn resolves_forward_and_cross_file_references() {
        let conn = people_and_invites();
        let set = FixtureLoader::load_sources(
            &conn,
            &[
                FixtureSource::new("people.toml", PEOPLE),
                FixtureSource::new("social.toml", INVITES),
            ],
        )
        .expect("load");

        let alice = set.key("people", "alice").expect("alice");
        let bob = set.key("people", "bob").expect("bob");
        let carol = set.key("people", "carol").expect("carol");
        assert_eq!(bob, EntityId(10));
        // Sequence keys come after pinned ones, in document order.
        assert_eq!((carol, alice), (EntityId(11), EntityId(12)));

        let snapshot = conn.snapshot().expect("snapshot");
        let carol_row = snapshot.row("people", carol).expect("row");
        assert_eq!(carol_row.value("parent_id").as_entity(), Some(bob));
        assert_eq!(
            snapshot.row("people", alice).expect("row").value("admin"),
            &Value::Boolean(true)
        );
        let invite = snapshot
            .row("invites", set.key("invites", "first").expect("first"))
            .expect("row");
        assert_eq!(invite.value("invitee_id").as_entity(), Some(carol));
        assert_eq!(set.labels("people"), vec!["alice", "bob", "carol"]);
        assert_eq!(set.tables(), vec!["invites", "people"]);
    }

    #[test]
    fn unresolved_reference_aborts_whole_load() {
        let conn = people_and_invites();
        let err = FixtureLoader::load_sources(
            &conn,
            &[
                FixtureSource::new("people.toml", PEOPLE),
                FixtureSource::new(
                    "invites.toml",
                    "[broken]\ninviter_id = \"alice\"\ninvitee_id = \"mallory\"\n",
                ),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NetrelError::Fixture(FixtureError::UnresolvedReference { ref label, .. }) if label == "mallory"
        ));
        assert_eq!(conn.snapshot().expect("snapshot").count("people").expect("count"), 0);
    }

    #[test]
    fn reports_bad_files() {
        let conn = people_and_invites();
        let cases = [
            ("pets.toml", "[rex]\nname = \"Rex\"\n"),
            ("people.toml", "[a]\nname = \"A\"\n[b]\nname = 3\n"),
            ("people.toml", "[a]\nname = \"A\"\nshoe_size = 9\n"),
            ("people.toml", "[a]\nid = -1\nname = \"A\"\n"),
            ("people.toml", "[a]\nadmin = true\n"),
            ("people.toml", "not toml ["),
            ("people.toml", "stray = 1\n"),
        ];
        for (file, text) in cases {
            let err = FixtureLoader::load_sources(&conn, &[FixtureSource::new(file, text)])
                .unwrap_err();
            assert!(matches!(err, NetrelError::Fixture(_)), "{file}: {err}");
        }
    }

    #[test]
    fn duplicate_labels_and_keys_are_rejected() {
        let conn = people_and_invites();
        let err = FixtureLoader::load_sources(
            &conn,
            &[
                FixtureSource::new("people.toml", "[a]\nname = \"A\"\n"),
                FixtureSource::new("more.toml", "[_fixture]\ntable = \"people\"\n[a]\nname = \"A2\"\n"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, NetrelError::Fixture(FixtureError::DuplicateName { .. })));

        let err = FixtureLoader::load_sources(
            &conn,
            &[FixtureSource::new(
                "people.toml",
                "[a]\nid = 1\nname = \"A\"\n[b]\nid = 1\nname = \"B\"\n",
            )],
        )
        .unwrap_err();
        assert!(matches!(err, NetrelError::Fixture(FixtureError::DuplicateKey { id: 1, .. })));
    }

    #[test]
    fn loads_directory_in_file_order() {
        let conn = people_and_invites();
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join("people.toml"), PEOPLE).expect("write");
        std::fs::write(dir.path().join("social.toml"), INVITES).expect("write");
        std::fs::write(dir.path().join("README.md"), "ignored").expect("write");

        let set = FixtureLoader::load_dir(&conn, dir.path()).expect("load");
        assert_eq!(set.len(), 4);
        assert!(matches!(
            set.key("people", "nobody"),
            Err(NetrelError::Fixture(FixtureError::UnknownRecord { .. }))
        ));
    }

    #[test]
    fn cache_loads_once_and_retries_failures() {
        let cache = FixtureCache::new();
        let calls = Cell::new(0);

        let failed = cache.get_or_load("shared", || {
            calls.set(calls.get() + 1);
            Err(NetrelError::Io("disk on fire".into()))
        });
        assert!(failed.is_err());
        assert!(!cache.is_loaded("shared"));

        let first = cache
            .get_or_load("shared", || {
                calls.set(calls.get() + 1);
                Ok(FixtureSet::default())
            })
            .expect("load");
        let second = cache
            .get_or_load("shared", || {
                calls.set(calls.get() + 1);
                Ok(FixtureSet::default())
            })
            .expect("cached");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.get(), 2);
        assert!(cache.is_loaded("shared"));
    }
}
