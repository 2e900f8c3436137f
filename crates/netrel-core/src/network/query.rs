//! Read-side operations. All of them work on a transaction or a snapshot.

use super::{AncestryIndex, Edge, Multiplicity, NetworkStore, NodeState};
use crate::error::{NetrelError, Result, codec_err};
use crate::storage::ReadAccess;
use crate::types::{EdgeId, EntityId};
use std::cmp::Reverse;
use std::collections::BTreeSet;

impl NetworkStore {
    /// The single parent of `id` in a tree network.
    pub fn parent<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<Option<EntityId>> {
        if self.config.multiplicity() == Multiplicity::Dag {
            return Err(NetrelError::InvalidArgument(format!(
                "network `{}` allows several parents; use `parents`",
                self.config.name
            )));
        }
        self.ensure_entity(r, id)?;
        Ok(self.parent_links(r, id)?.first().map(|&(parent, _)| parent))
    }

    /// Direct parents of `id`, by ascending key.
    pub fn parents<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<Vec<EntityId>> {
        self.ensure_entity(r, id)?;
        Ok(self
            .parent_links(r, id)?
            .into_iter()
            .map(|(parent, _)| parent)
            .collect())
    }

    /// Direct children of `id`, by rank (if configured) then insertion order.
    pub fn children<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<Vec<EntityId>> {
        self.ensure_entity(r, id)?;
        Ok(self
            .child_edges(r, id)?
            .into_iter()
            .map(|edge| edge.child)
            .collect())
    }

    /// All ancestors of `id`, farthest first.
    ///
    /// For trees this is the path from the root down to the parent. In a DAG,
    /// ancestors are ordered by their longest distance from `id` (descending),
    /// ties by key.
    pub fn ancestors<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<Vec<EntityId>> {
        self.ensure_entity(r, id)?;
        let mut found: Vec<(EntityId, u64)> = match self.config.index {
            AncestryIndex::Closure => r
                .pair_range(&self.tables.closure, id.0)?
                .into_iter()
                .map(|(ancestor, distance)| (EntityId(ancestor), distance))
                .collect(),
            AncestryIndex::ParentPointer => self.walk_ancestors(r, id)?.into_iter().collect(),
        };
        found.sort_by_key(|&(ancestor, distance)| (Reverse(distance), ancestor));
        Ok(found.into_iter().map(|(ancestor, _)| ancestor).collect())
    }

    /// All descendants of `id` in depth-first pre-order, each listed once.
    pub fn descendants<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<Vec<EntityId>> {
        self.ensure_entity(r, id)?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<EntityId> = self.children(r, id)?.into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            out.push(node);
            stack.extend(
                self.child_edges(r, node)?
                    .into_iter()
                    .rev()
                    .map(|edge| edge.child),
            );
        }
        Ok(out)
    }

    /// Entities sharing a parent with `id`, excluding `id`.
    ///
    /// Parentless entities have no siblings unless `root_siblings` is set, in
    /// which case every other parentless entity is one.
    pub fn siblings<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<BTreeSet<EntityId>> {
        let parents = self.parents(r, id)?;
        if parents.is_empty() {
            if !self.config.root_siblings {
                return Ok(BTreeSet::new());
            }
            return Ok(self.roots(r)?.into_iter().filter(|&root| root != id).collect());
        }
        let mut out = BTreeSet::new();
        for parent in parents {
            out.extend(self.children(r, parent)?.into_iter().filter(|&child| child != id));
        }
        Ok(out)
    }

    /// Whether `ancestor` is a proper ancestor of `descendant`.
    pub fn is_ancestor_of<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
        ancestor: EntityId,
        descendant: EntityId,
    ) -> Result<bool> {
        if ancestor == descendant {
            return Ok(false);
        }
        match self.config.index {
            AncestryIndex::Closure => Ok(r
                .pair_get(&self.tables.closure, (descendant.0, ancestor.0))?
                .is_some()),
            AncestryIndex::ParentPointer => {
                Ok(self.walk_ancestors(r, descendant)?.contains_key(&ancestor))
            }
        }
    }

    pub fn state<R: ReadAccess + ?Sized>(&self, r: &R, id: EntityId) -> Result<NodeState> {
        self.ensure_entity(r, id)?;
        let has_parent = !self.parent_links(r, id)?.is_empty();
        let has_children = !r.pair_range(&self.tables.down, id.0)?.is_empty();
        Ok(NodeState::from_links(has_parent, has_children))
    }

    /// Every entity without a parent (detached ones included), by key.
    pub fn roots<R: ReadAccess + ?Sized>(&self, r: &R) -> Result<Vec<EntityId>> {
        let mut out = Vec::new();
        for (id, _) in r.scan(&self.config.table)? {
            if r.pair_range(&self.tables.up, id.0)?.is_empty() {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Neighbours of `id` in either direction, optionally filtered by kind.
    pub fn connections<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
        id: EntityId,
        kind: Option<&str>,
    ) -> Result<Vec<EntityId>> {
        self.ensure_entity(r, id)?;
        let matches = |edge: &Edge| kind.is_none_or(|k| edge.kind.as_deref() == Some(k));
        let mut out = BTreeSet::new();
        for (_, edge_id) in self.parent_links(r, id)? {
            let edge = self.edge(r, edge_id)?;
            if matches(&edge) {
                out.insert(edge.parent);
            }
        }
        for edge in self.child_edges(r, id)? {
            if matches(&edge) {
                out.insert(edge.child);
            }
        }
        Ok(out.into_iter().collect())
    }

    pub fn edge<R: ReadAccess + ?Sized>(&self, r: &R, id: EdgeId) -> Result<Edge> {
        let bytes = r
            .raw_get(&self.tables.edges, id.0)?
            .ok_or(NetrelError::EdgeNotFound(id))?;
        postcard::from_bytes(&bytes).map_err(codec_err)
    }

    /// All edges, by edge id.
    pub fn edges<R: ReadAccess + ?Sized>(&self, r: &R) -> Result<Vec<Edge>> {
        r.raw_scan(&self.tables.edges)?
            .into_iter()
            .map(|(_, bytes)| postcard::from_bytes(&bytes).map_err(codec_err))
            .collect()
    }

    /// Id of the edge `parent -> child`, if present.
    pub fn edge_between<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
        parent: EntityId,
        child: EntityId,
    ) -> Result<Option<EdgeId>> {
        Ok(r
            .pair_get(&self.tables.up, (child.0, parent.0))?
            .map(EdgeId))
    }

    // =========================================================================
    // INDEX READS
    // =========================================================================

    /// (parent, edge id) pairs of `child`, by parent key.
    pub(super) fn parent_links<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
        child: EntityId,
    ) -> Result<Vec<(EntityId, EdgeId)>> {
        Ok(r
            .pair_range(&self.tables.up, child.0)?
            .into_iter()
            .map(|(parent, edge)| (EntityId(parent), EdgeId(edge)))
            .collect())
    }

    /// Outgoing edges of `parent` in sibling order.
    pub(super) fn child_edges<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
        parent: EntityId,
    ) -> Result<Vec<Edge>> {
        let mut edges = r
            .pair_range(&self.tables.down, parent.0)?
            .into_iter()
            .map(|(_, edge)| self.edge(r, EdgeId(edge)))
            .collect::<Result<Vec<_>>>()?;
        if let Some(column) = &self.config.ordering_column {
            let table = self.config.edge_row_table();
            let mut ranked = Vec::with_capacity(edges.len());
            for edge in edges {
                let rank = r
                    .get(table, EntityId(edge.id.0))?
                    .and_then(|row| row.value(column).as_integer());
                ranked.push((rank, edge));
            }
            // Stable: equal ranks keep ordinal order. Unranked sort last.
            ranked.sort_by_key(|(rank, _)| (rank.is_none(), *rank));
            edges = ranked.into_iter().map(|(_, edge)| edge).collect();
        }
        Ok(edges)
    }
}
