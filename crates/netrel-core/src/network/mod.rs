//! # Network Relationship Store
//!
//! Directed parent→child relationships between rows of one entity table.
//!
//! Edges live in a user-visible source (a parent column or a join table) and
//! are mirrored into per-network redb indexes:
//!
//! | index                       | key                    | value         |
//! |-----------------------------|------------------------|---------------|
//! | `net/<name>/edges`          | edge id                | postcard `Edge` |
//! | `net/<name>/down`           | (parent, ordinal)      | edge id       |
//! | `net/<name>/up`             | (child, parent)        | edge id       |
//! | `net/<name>/closure`        | (descendant, ancestor) | distance      |
//! | `net/<name>/slots`          | (parent, child)        | ordinal       |
//!
//! `closure` is only maintained with `AncestryIndex::Closure`. `slots` is
//! never cleared by unlinking or rebuilding; it only goes away when the
//! schema is reapplied. Every write goes
//! through the journaled transaction primitives, so source rows and indexes
//! roll back together.
//!
//! ## Invariants
//!
//! - No entity is its own ancestor; cycles are rejected before any write.
//! - `up` and `down` always describe the same edge set.
//! - In tree mode every entity has at most one parent.
//! - A failed mutation leaves the transaction exactly as it was.

mod config;
mod index;
mod query;

pub use config::{AncestryIndex, CascadePolicy, EdgeStorage, Multiplicity, NetworkConfig};

use crate::error::{NetrelError, Result, SchemaError};
use crate::primitives::network_table_name;
use crate::storage::{Connection, ReadAccess, Transaction};
use crate::types::{ColumnType, EdgeId, EntityId, Row, Value};
use serde::{Deserialize, Serialize};

/// One stored edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub parent: EntityId,
    pub child: EntityId,
    /// Relationship type, for join tables with a kind column.
    pub kind: Option<String>,
    /// Insertion order within the network, fixed per (parent, child) pair.
    pub ordinal: u64,
}

/// Position of an entity in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// No parent, no children.
    Detached,
    /// No parent, at least one child.
    Root,
    /// A parent and at least one child.
    Internal,
    /// A parent and no children.
    Leaf,
}

impl NodeState {
    #[must_use]
    pub fn from_links(has_parent: bool, has_children: bool) -> Self {
        match (has_parent, has_children) {
            (false, false) => Self::Detached,
            (false, true) => Self::Root,
            (true, true) => Self::Internal,
            (true, false) => Self::Leaf,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Detached => "detached",
            Self::Root => "root",
            Self::Internal => "internal",
            Self::Leaf => "leaf",
        };
        f.write_str(name)
    }
}

/// Physical names of a network's index tables.
#[derive(Debug, Clone)]
struct IndexTables {
    edges: String,
    down: String,
    up: String,
    closure: String,
    ordinal: String,
    slots: String,
}

impl IndexTables {
    fn for_network(name: &str) -> Self {
        Self {
            edges: network_table_name(name, "edges"),
            down: network_table_name(name, "down"),
            up: network_table_name(name, "up"),
            closure: network_table_name(name, "closure"),
            ordinal: network_table_name(name, "ordinal"),
            slots: network_table_name(name, "slots"),
        }
    }
}

/// Handle to one configured network.
///
/// The store holds no data of its own: every operation takes the transaction
/// or snapshot to work in, so the same store serves isolated tests and
/// committed reads alike.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    config: NetworkConfig,
    tables: IndexTables,
}

impl NetworkStore {
    /// Validate `config` against the catalog visible to `r`.
    ///
    /// Does not touch the indexes; use `open` (or `rebuild`) after loading
    /// rows that were not written through this store.
    pub fn attach<R: ReadAccess + ?Sized>(r: &R, config: NetworkConfig) -> Result<Self> {
        validate(r, &config)?;
        let tables = IndexTables::for_network(&config.name);
        Ok(Self { config, tables })
    }

    /// Attach and rebuild the indexes from the source rows in one committed transaction.
    pub fn open(conn: &Connection, config: NetworkConfig) -> Result<Self> {
        let mut tx = conn.begin()?;
        let store = Self::attach(&tx, config)?;
        let edges = store.rebuild(&mut tx)?;
        tx.commit()?;
        tracing::info!(network = %store.config.name, edges, "network opened");
        Ok(store)
    }

    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Link `child` under `parent` and return the new edge's id.
    ///
    /// `kind` is stored in the join table's kind column and is rejected for
    /// networks without one.
    ///
    /// # Errors
    ///
    /// - `EntityNotFound` if either entity is missing
    /// - `Cycle` if `parent == child` or `child` is already an ancestor of `parent`
    /// - `ParentExists` if `child` already has a parent in tree mode
    /// - `DuplicateEdge` if the edge already exists in DAG mode
    pub fn add_child(
        &self,
        tx: &mut Transaction<'_>,
        parent: EntityId,
        child: EntityId,
        kind: Option<&str>,
    ) -> Result<EdgeId> {
        let edge_id = tx.nested(|tx| self.insert_edge(tx, parent, child, kind))?;
        tracing::debug!(network = %self.config.name, %parent, %child, edge = %edge_id, "edge added");
        Ok(edge_id)
    }

    /// Remove an edge, applying the network's cascade policy to the child's subtree.
    ///
    /// With `CascadePolicy::Reparent` the cascade only runs when the removed
    /// edge was the child's last parent link.
    pub fn remove_edge(&self, tx: &mut Transaction<'_>, edge_id: EdgeId) -> Result<Edge> {
        let edge = tx.nested(|tx| {
            let edge = self.edge(&*tx, edge_id)?;
            self.delete_edge(tx, &edge)?;
            // A child still linked under another parent keeps its own children.
            if self.config.cascade == CascadePolicy::Reparent
                && self.parent_links(&*tx, edge.child)?.is_empty()
            {
                self.reparent_children(tx, &edge)?;
            }
            Ok(edge)
        })?;
        tracing::debug!(
            network = %self.config.name,
            parent = %edge.parent,
            child = %edge.child,
            edge = %edge_id,
            cascade = ?self.config.cascade,
            "edge removed"
        );
        Ok(edge)
    }

    /// Remove the edge between `parent` and `child`, if any.
    pub fn unlink(
        &self,
        tx: &mut Transaction<'_>,
        parent: EntityId,
        child: EntityId,
    ) -> Result<Option<Edge>> {
        match self.edge_between(&*tx, parent, child)? {
            Some(edge_id) => self.remove_edge(tx, edge_id).map(Some),
            None => Ok(None),
        }
    }

    /// Set the sibling rank of an edge. Requires an ordering column.
    pub fn set_rank(
        &self,
        tx: &mut Transaction<'_>,
        edge_id: EdgeId,
        rank: Option<i64>,
    ) -> Result<()> {
        let column = self.config.ordering_column.as_deref().ok_or_else(|| {
            NetrelError::InvalidArgument(format!(
                "network `{}` has no ordering column",
                self.config.name
            ))
        })?;
        self.edge(&*tx, edge_id)?;
        tx.set_column(
            self.config.edge_row_table(),
            EntityId(edge_id.0),
            column,
            rank,
        )
    }

    fn insert_edge(
        &self,
        tx: &mut Transaction<'_>,
        parent: EntityId,
        child: EntityId,
        kind: Option<&str>,
    ) -> Result<EdgeId> {
        self.check_link(&*tx, parent, child)?;
        let edge_id = match &self.config.edges {
            EdgeStorage::ParentColumn { column } => {
                if kind.is_some() {
                    return Err(self.kind_unsupported());
                }
                tx.set_column(&self.config.table, child, column, parent)?;
                EdgeId(child.0)
            }
            EdgeStorage::JoinTable {
                table,
                parent_column,
                child_column,
                kind_column,
                ..
            } => {
                let mut row = Row::new()
                    .with(parent_column.as_str(), parent)
                    .with(child_column.as_str(), child);
                match (kind_column, kind) {
                    (Some(column), kind) => row.set(column.as_str(), kind),
                    (None, Some(_)) => return Err(self.kind_unsupported()),
                    (None, None) => {}
                }
                EdgeId(tx.insert(table, row)?.0)
            }
        };

        self.link(tx, parent, child, kind.map(str::to_string), edge_id)?;
        Ok(edge_id)
    }

    /// Remove an edge from both the source rows and the indexes.
    fn delete_edge(&self, tx: &mut Transaction<'_>, edge: &Edge) -> Result<()> {
        self.unlink_indexes(tx, edge)?;
        match &self.config.edges {
            EdgeStorage::ParentColumn { column } => {
                tx.set_column(&self.config.table, edge.child, column, Value::Null)
            }
            EdgeStorage::JoinTable { table, .. } => {
                tx.delete(table, EntityId(edge.id.0)).map(|_| ())
            }
        }
    }

    /// Move the removed child's children up to the removed edge's parent.
    fn reparent_children(&self, tx: &mut Transaction<'_>, removed: &Edge) -> Result<()> {
        for grandchild in self.child_edges(&*tx, removed.child)? {
            self.delete_edge(tx, &grandchild)?;
            if self.edge_between(&*tx, removed.parent, grandchild.child)?
                .is_none()
            {
                self.insert_edge(
                    tx,
                    removed.parent,
                    grandchild.child,
                    grandchild.kind.as_deref(),
                )?;
            }
        }
        Ok(())
    }

    fn kind_unsupported(&self) -> NetrelError {
        NetrelError::InvalidArgument(format!(
            "network `{}` has no kind column",
            self.config.name
        ))
    }

    fn ensure_entity<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<()> {
        if r.contains(&self.config.table, id)? {
            Ok(())
        } else {
            Err(NetrelError::EntityNotFound {
                table: self.config.table.clone(),
                id,
            })
        }
    }
}

// =============================================================================
// CONFIG VALIDATION
// =============================================================================

fn invalid(config: &NetworkConfig, reason: impl Into<String>) -> NetrelError {
    SchemaError::InvalidNetwork {
        network: config.name.clone(),
        reason: reason.into(),
    }
    .into()
}

fn validate<R: ReadAccess + ?Sized>(r: &R, config: &NetworkConfig) -> Result<()> {
    if config.name.is_empty() || config.name.contains('/') {
        return Err(invalid(config, "name must be non-empty and contain no `/`"));
    }
    let entities = r
        .table_spec(&config.table)?
        .ok_or_else(|| invalid(config, format!("unknown table `{}`", config.table)))?;

    let self_reference = |table: &crate::schema::TableSpec, column: &str| -> Result<()> {
        let spec = table.find_column(column).ok_or_else(|| {
            invalid(config, format!("unknown column `{}.{}`", table.name, column))
        })?;
        match &spec.column_type {
            ColumnType::Reference { target } if *target == config.table => Ok(()),
            other => Err(invalid(
                config,
                format!(
                    "column `{}.{}` must reference `{}`, found {}",
                    table.name,
                    column,
                    config.table,
                    other.name()
                ),
            )),
        }
    };

    let edge_rows = match &config.edges {
        EdgeStorage::ParentColumn { column } => {
            self_reference(&entities, column)?;
            if entities
                .find_column(column)
                .is_some_and(|spec| !spec.nullable)
            {
                return Err(invalid(
                    config,
                    format!("parent column `{}.{}` must be nullable", config.table, column),
                ));
            }
            entities
        }
        EdgeStorage::JoinTable {
            table,
            parent_column,
            child_column,
            kind_column,
            ..
        } => {
            let join = r
                .table_spec(table)?
                .ok_or_else(|| invalid(config, format!("unknown join table `{table}`")))?;
            if parent_column == child_column {
                return Err(invalid(config, "parent and child columns must differ"));
            }
            self_reference(&join, parent_column)?;
            self_reference(&join, child_column)?;
            if let Some(kind) = kind_column {
                match join.find_column(kind) {
                    Some(spec) if spec.column_type == ColumnType::Text => {}
                    _ => {
                        return Err(invalid(
                            config,
                            format!("kind column `{table}.{kind}` must be a text column"),
                        ));
                    }
                }
            }
            join
        }
    };

    if let Some(column) = &config.ordering_column {
        match edge_rows.find_column(column) {
            Some(spec) if spec.column_type == ColumnType::Integer => {}
            _ => {
                return Err(invalid(
                    config,
                    format!(
                        "ordering column `{}.{}` must be an integer column",
                        edge_rows.name, column
                    ),
                ));
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
