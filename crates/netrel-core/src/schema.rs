//! # Schema Loader
//!
//! Declarative table definitions and their application to a backend.
//!
//! Format (TOML):
//!
//! ```toml
//! [[tables]]
//! name = "people"
//! columns = [
//!     { name = "name", type = "text", nullable = false },
//!     { name = "parent_id", type = "reference", references = "people" },
//! ]
//!
//! [[networks]]
//! name = "family"
//! table = "people"
//! edges = { storage = "parent_column", column = "parent_id" }
//! ```
//!
//! Applying a schema is drop-and-recreate: every existing table (rows, catalog,
//! sequences and network indexes) is removed first, so repeated application is
//! idempotent in aggregate.

use crate::error::{NetrelError, Result, SchemaError};
use crate::network::NetworkConfig;
use crate::primitives::ID_COLUMN;
use crate::storage::Connection;
use crate::types::{ColumnType, Row, TypeName, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

// =============================================================================
// TABLE & COLUMN SPECS
// =============================================================================

/// One column of a table. The `id` key column is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// A table definition as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Start a table definition with no columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Builder-style column declaration.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        self.columns.push(ColumnSpec {
            name: name.into(),
            column_type,
            nullable,
        });
        self
    }

    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check a row against this table and fill omitted nullable columns with `Null`.
    pub fn conform(&self, row: &Row) -> Result<Row, SchemaError> {
        for column in row.columns() {
            if column == ID_COLUMN {
                return Err(SchemaError::ReservedColumn {
                    table: self.name.clone(),
                    column: column.to_string(),
                });
            }
            if self.find_column(column).is_none() {
                return Err(SchemaError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.to_string(),
                });
            }
        }

        let mut out = Row::new();
        for spec in &self.columns {
            let value = row.value(&spec.name).clone();
            self.check_value(spec, &value)?;
            out.set(spec.name.clone(), value);
        }
        Ok(out)
    }

    /// Check a single value against a column.
    pub fn check_value(&self, spec: &ColumnSpec, value: &Value) -> Result<(), SchemaError> {
        if value.is_null() && !spec.nullable {
            return Err(SchemaError::NullViolation {
                table: self.name.clone(),
                column: spec.name.clone(),
            });
        }
        if !spec.column_type.accepts(value) {
            return Err(SchemaError::TypeMismatch {
                table: self.name.clone(),
                column: spec.name.clone(),
                expected: spec.column_type.name(),
                found: value.kind(),
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if column.name == ID_COLUMN {
                return Err(SchemaError::ReservedColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// An ordered, validated set of table definitions plus network declarations.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: Vec<TableSpec>,
    networks: Vec<NetworkConfig>,
}

impl Schema {
    /// Validate a list of tables.
    ///
    /// Fails on duplicate table or column names, the reserved `id` column and
    /// references to undeclared tables.
    pub fn new(tables: Vec<TableSpec>) -> Result<Self, SchemaError> {
        let mut names = BTreeSet::new();
        for table in &tables {
            if !names.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
            table.validate()?;
        }
        for table in &tables {
            for column in &table.columns {
                if let ColumnType::Reference { target } = &column.column_type {
                    if !names.contains(target.as_str()) {
                        return Err(SchemaError::UnknownReference {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }
        Ok(Self {
            tables,
            networks: Vec::new(),
        })
    }

    /// Attach network declarations. Names must be unique.
    pub fn with_networks(mut self, networks: Vec<NetworkConfig>) -> Result<Self, SchemaError> {
        let mut names = BTreeSet::new();
        for network in &networks {
            if !names.insert(network.name.as_str()) {
                return Err(SchemaError::InvalidNetwork {
                    network: network.name.clone(),
                    reason: "declared more than once".to_string(),
                });
            }
        }
        self.networks = networks;
        Ok(self)
    }

    /// Parse and validate a TOML schema document.
    pub fn from_toml_str(source: &str) -> Result<Self, SchemaError> {
        let raw: RawSchema =
            toml::from_str(source).map_err(|e| SchemaError::Parse(e.to_string()))?;
        let tables = raw
            .tables
            .into_iter()
            .map(RawTable::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(tables)?.with_networks(raw.networks)
    }

    /// Read a TOML schema from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| NetrelError::Io(format!("cannot read schema {}: {}", path.display(), e)))?;
        Ok(Self::from_toml_str(&source)?)
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn networks(&self) -> &[NetworkConfig] {
        &self.networks
    }

    #[must_use]
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }
}

// =============================================================================
// RAW TOML FORM
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    #[serde(default)]
    tables: Vec<RawTable>,
    #[serde(default)]
    networks: Vec<NetworkConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    name: String,
    #[serde(default)]
    columns: Vec<RawColumn>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawColumn {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
    references: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl RawTable {
    fn into_spec(self) -> Result<TableSpec, SchemaError> {
        let table = self.name;
        let columns = self
            .columns
            .into_iter()
            .map(|raw| {
                let type_name =
                    raw.type_name
                        .parse::<TypeName>()
                        .map_err(|t| SchemaError::UnsupportedType {
                            table: table.clone(),
                            column: raw.name.clone(),
                            type_name: t,
                        })?;
                let column_type = match (type_name, raw.references) {
                    (TypeName::Reference, Some(target)) => ColumnType::Reference { target },
                    (TypeName::Reference, None) => {
                        return Err(SchemaError::Parse(format!(
                            "reference column `{}.{}` needs `references`",
                            table, raw.name
                        )));
                    }
                    (_, Some(_)) => {
                        return Err(SchemaError::Parse(format!(
                            "column `{}.{}` is not a reference but sets `references`",
                            table, raw.name
                        )));
                    }
                    (TypeName::Integer, None) => ColumnType::Integer,
                    (TypeName::Text, None) => ColumnType::Text,
                    (TypeName::Boolean, None) => ColumnType::Boolean,
                };
                Ok(ColumnSpec {
                    name: raw.name,
                    column_type,
                    nullable: raw.nullable,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TableSpec {
            name: table,
            columns,
        })
    }
}

// =============================================================================
// LOADER
// =============================================================================

/// Applies schemas to a connection.
pub struct SchemaLoader;

impl SchemaLoader {
    /// Drop every existing table, then create the tables of `schema`.
    ///
    /// Runs in one write transaction; on failure the previous structure is kept.
    pub fn apply(conn: &Connection, schema: &Schema) -> Result<()> {
        let mut tx = conn.begin()?;
        let dropped = tx.drop_all_tables()?;
        for spec in schema.tables() {
            tx.create_table(spec)?;
        }
        tx.commit()?;
        tracing::info!(
            dropped,
            created = schema.tables().len(),
            "schema applied"
        );
        Ok(())
    }

    /// Read `path`, apply it and return the parsed schema.
    pub fn load_path(conn: &Connection, path: impl AsRef<Path>) -> Result<Schema> {
        let schema = Schema::from_path(path)?;
        Self::apply(conn, &schema)?;
        Ok(schema)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::ReadAccess;
    use crate::types::EntityId;

    const PEOPLE: &str = r#"
        [[tables]]
        name = "people"
        columns = [
            { name = "name", type = "text", nullable = false },
            { name = "parent_id", type = "reference", references = "people" },
            { name = "rank", type = "integer" },
        ]
    "#;

    #[test]
    fn parses_columns_in_order() {
        let schema = Schema::from_toml_str(PEOPLE).expect("parse");
        let people = schema.table("people").expect("table");
        let names: Vec<_> = people.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "parent_id", "rank"]);
        assert!(!people.columns[0].nullable);
        assert!(people.columns[1].nullable);
        assert_eq!(
            people.columns[1].column_type,
            ColumnType::Reference {
                target: "people".into()
            }
        );
    }

    #[test]
    fn rejects_unsupported_type() {
        let err = Schema::from_toml_str(
            r#"
            [[tables]]
            name = "readings"
            columns = [{ name = "value", type = "float" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnsupportedType { ref table, ref type_name, .. }
                if table == "readings" && type_name == "float"
        ));
    }

    #[test]
    fn rejects_duplicate_table() {
        let err = Schema::new(vec![TableSpec::new("a"), TableSpec::new("a")]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTable(ref t) if t == "a"));
    }

    #[test]
    fn rejects_reserved_and_duplicate_columns() {
        let reserved = Schema::new(vec![TableSpec::new("a").column("id", ColumnType::Integer, false)]);
        assert!(matches!(reserved, Err(SchemaError::ReservedColumn { .. })));

        let dup = Schema::new(vec![
            TableSpec::new("a")
                .column("x", ColumnType::Integer, true)
                .column("x", ColumnType::Text, true),
        ]);
        assert!(matches!(dup, Err(SchemaError::DuplicateColumn { .. })));
    }

    #[test]
    fn rejects_dangling_reference() {
        let err = Schema::new(vec![TableSpec::new("a").column(
            "b_id",
            ColumnType::Reference { target: "b".into() },
            true,
        )])
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownReference { ref target, .. } if target == "b"));
    }

    #[test]
    fn conform_fills_nulls_and_checks_types() {
        let schema = Schema::from_toml_str(PEOPLE).expect("parse");
        let people = schema.table("people").expect("table");

        let row = people.conform(&Row::new().with("name", "Alice")).expect("conform");
        assert_eq!(row.len(), 3);
        assert!(row.value("parent_id").is_null());

        let missing = people.conform(&Row::new());
        assert!(matches!(missing, Err(SchemaError::NullViolation { .. })));

        let wrong = people.conform(&Row::new().with("name", true));
        assert!(matches!(
            wrong,
            Err(SchemaError::TypeMismatch { expected: "text", found: "boolean", .. })
        ));

        let unknown = people.conform(&Row::new().with("name", "A").with("age", 3_i64));
        assert!(matches!(unknown, Err(SchemaError::UnknownColumn { .. })));
    }

    #[test]
    fn apply_is_drop_and_recreate() {
        let conn = Connection::open_in_memory().expect("open");
        let schema = Schema::from_toml_str(PEOPLE).expect("parse");
        SchemaLoader::apply(&conn, &schema).expect("apply");

        {
            let mut tx = conn.begin().expect("begin");
            tx.insert("people", Row::new().with("name", "Alice")).expect("insert");
            tx.commit().expect("commit");
        }

        SchemaLoader::apply(&conn, &schema).expect("reapply");
        let snapshot = conn.snapshot().expect("snapshot");
        assert_eq!(snapshot.count("people").expect("count"), 0);
        assert!(snapshot.get("people", EntityId(1)).expect("get").is_none());

        // Sequences restart after a reapply.
        let mut tx = conn.begin().expect("begin");
        let id = tx.insert("people", Row::new().with("name", "Bob")).expect("insert");
        assert_eq!(id, EntityId(1));
    }

    #[test]
    fn apply_drops_tables_missing_from_new_schema() {
        let conn = Connection::open_in_memory().expect("open");
        SchemaLoader::apply(&conn, &Schema::from_toml_str(PEOPLE).expect("parse")).expect("apply");
        SchemaLoader::apply(&conn, &Schema::new(vec![TableSpec::new("other")]).expect("schema"))
            .expect("apply");

        let snapshot = conn.snapshot().expect("snapshot");
        assert!(snapshot.table_spec("people").expect("spec").is_none());
        assert!(snapshot.table_spec("other").expect("spec").is_some());
    }
}
