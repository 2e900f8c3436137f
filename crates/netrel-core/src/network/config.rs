//! Per-network configuration.
//!
//! A network is declared over one entity table, either in code with the
//! builder methods below or in the `[[networks]]` section of a schema file.

use serde::{Deserialize, Serialize};

/// How many parents an entity may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    /// Zero or one parent.
    #[default]
    Tree,
    /// Zero or more parents, still acyclic.
    Dag,
}

/// Where edges are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storage", rename_all = "snake_case")]
pub enum EdgeStorage {
    /// Self-referential reference column on the entity table. Always a tree.
    ParentColumn { column: String },
    /// Rows of a separate table with parent/child reference columns.
    JoinTable {
        table: String,
        parent_column: String,
        child_column: String,
        #[serde(default)]
        kind_column: Option<String>,
        #[serde(default)]
        multiplicity: Multiplicity,
    },
}

/// What `remove_edge` does with the removed child's own children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// The child becomes a root and keeps its subtree.
    #[default]
    Orphan,
    /// The child's children move up to the removed edge's parent.
    Reparent,
}

/// How ancestor queries are answered.
///
/// - `ParentPointer`: walk the (child, parent) index upward. Writes touch only
///   the edge itself; `ancestors`/`is_ancestor_of` cost O(depth).
/// - `Closure`: keep a materialized (descendant, ancestor) -> distance table.
///   `ancestors` is bounded by the ancestor count and `is_ancestor_of` is one
///   lookup, but every edge change rewrites the closure rows of the moved
///   subtree, O(depth) per node in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AncestryIndex {
    #[default]
    ParentPointer,
    Closure,
}

/// Declaration of one network over an entity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub name: String,
    /// Entity table whose rows are the nodes.
    pub table: String,
    pub edges: EdgeStorage,
    /// Integer column ranking siblings. It lives on the row that stores the
    /// edge: the child row for `ParentColumn`, the join row for `JoinTable`.
    #[serde(default)]
    pub ordering_column: Option<String>,
    #[serde(default)]
    pub cascade: CascadePolicy,
    #[serde(default)]
    pub index: AncestryIndex,
    /// Treat all parentless entities as siblings of each other.
    #[serde(default)]
    pub root_siblings: bool,
}

impl NetworkConfig {
    /// A tree stored in a self-referential `column` of `table`.
    #[must_use]
    pub fn parent_column(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            edges: EdgeStorage::ParentColumn {
                column: column.into(),
            },
            ordering_column: None,
            cascade: CascadePolicy::default(),
            index: AncestryIndex::default(),
            root_siblings: false,
        }
    }

    /// Edges stored as rows of `join_table`.
    #[must_use]
    pub fn join_table(
        name: impl Into<String>,
        table: impl Into<String>,
        join_table: impl Into<String>,
        parent_column: impl Into<String>,
        child_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            edges: EdgeStorage::JoinTable {
                table: join_table.into(),
                parent_column: parent_column.into(),
                child_column: child_column.into(),
                kind_column: None,
                multiplicity: Multiplicity::default(),
            },
            ordering_column: None,
            cascade: CascadePolicy::default(),
            index: AncestryIndex::default(),
            root_siblings: false,
        }
    }

    #[must_use]
    pub fn ordered_by(mut self, column: impl Into<String>) -> Self {
        self.ordering_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_cascade(mut self, cascade: CascadePolicy) -> Self {
        self.cascade = cascade;
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: AncestryIndex) -> Self {
        self.index = index;
        self
    }

    #[must_use]
    pub fn with_root_siblings(mut self, enabled: bool) -> Self {
        self.root_siblings = enabled;
        self
    }

    /// Set the relationship-type column. No effect on parent-column storage.
    #[must_use]
    pub fn with_kind_column(mut self, column: impl Into<String>) -> Self {
        if let EdgeStorage::JoinTable { kind_column, .. } = &mut self.edges {
            *kind_column = Some(column.into());
        }
        self
    }

    /// Set the multiplicity. No effect on parent-column storage.
    #[must_use]
    pub fn with_multiplicity(mut self, value: Multiplicity) -> Self {
        if let EdgeStorage::JoinTable { multiplicity, .. } = &mut self.edges {
            *multiplicity = value;
        }
        self
    }

    #[must_use]
    pub fn multiplicity(&self) -> Multiplicity {
        match &self.edges {
            EdgeStorage::ParentColumn { .. } => Multiplicity::Tree,
            EdgeStorage::JoinTable { multiplicity, .. } => *multiplicity,
        }
    }

    /// Table holding the row that stores each edge (and its ordering column).
    #[must_use]
    pub fn edge_row_table(&self) -> &str {
        match &self.edges {
            EdgeStorage::ParentColumn { .. } => &self.table,
            EdgeStorage::JoinTable { table, .. } => table,
        }
    }
}
