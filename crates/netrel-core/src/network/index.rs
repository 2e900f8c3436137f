//! Index maintenance: linking, unlinking, closure refresh and rebuild.

use super::{AncestryIndex, Edge, EdgeStorage, Multiplicity, NetworkStore};
use crate::error::{NetrelError, Result, codec_err};
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::storage::{ReadAccess, Transaction};
use crate::types::{EdgeId, EntityId};
use std::collections::{BTreeMap, BTreeSet};

impl NetworkStore {
    /// Checks shared by `add_child` and `rebuild`. Performs no writes.
    pub(super) fn check_link<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
        parent: EntityId,
        child: EntityId,
    ) -> Result<()> {
        self.ensure_entity(r, parent)?;
        self.ensure_entity(r, child)?;
        if parent == child || self.is_ancestor_of(r, child, parent)? {
            return Err(NetrelError::Cycle { parent, child });
        }
        if self.edge_between(r, parent, child)?.is_some() {
            return Err(NetrelError::DuplicateEdge { parent, child });
        }
        if self.config.multiplicity() == Multiplicity::Tree
            && let Some(&(existing, _)) = self.parent_links(r, child)?.first()
        {
            return Err(NetrelError::ParentExists {
                child,
                parent: existing,
            });
        }
        Ok(())
    }

    /// Record an edge in the indexes. The source row must already exist.
    ///
    /// A (parent, child) pair keeps the ordinal it was first linked with, so
    /// removing and re-adding an edge or rebuilding the indexes leaves the
    /// sibling order unchanged.
    pub(super) fn link(
        &self,
        tx: &mut Transaction<'_>,
        parent: EntityId,
        child: EntityId,
        kind: Option<String>,
        id: EdgeId,
    ) -> Result<()> {
        let ordinal = match tx.pair_get(&self.tables.slots, (parent.0, child.0))? {
            Some(ordinal) => ordinal,
            None => {
                let ordinal = tx.next_sequence(&self.tables.ordinal)?;
                tx.put_pair(&self.tables.slots, (parent.0, child.0), ordinal)?;
                ordinal
            }
        };
        let edge = Edge {
            id,
            parent,
            child,
            kind,
            ordinal,
        };
        let bytes = postcard::to_allocvec(&edge).map_err(codec_err)?;
        tx.put_bytes(&self.tables.edges, id.0, &bytes)?;
        tx.put_pair(&self.tables.down, (parent.0, ordinal), id.0)?;
        tx.put_pair(&self.tables.up, (child.0, parent.0), id.0)?;
        self.refresh_closure(tx, child)
    }

    /// Drop an edge from the indexes, leaving the source row alone.
    pub(super) fn unlink_indexes(&self, tx: &mut Transaction<'_>, edge: &Edge) -> Result<()> {
        tx.remove_bytes(&self.tables.edges, edge.id.0)?;
        tx.remove_pair(&self.tables.down, (edge.parent.0, edge.ordinal))?;
        tx.remove_pair(&self.tables.up, (edge.child.0, edge.parent.0))?;
        self.refresh_closure(tx, edge.child)
    }

    /// Recompute closure rows for `moved` and everything below it.
    fn refresh_closure(&self, tx: &mut Transaction<'_>, moved: EntityId) -> Result<()> {
        if self.config.index != AncestryIndex::Closure {
            return Ok(());
        }
        let mut affected = vec![moved];
        affected.extend(self.descendants(&*tx, moved)?);
        for node in affected {
            self.write_closure_rows(tx, node)?;
        }
        Ok(())
    }

    fn write_closure_rows(&self, tx: &mut Transaction<'_>, node: EntityId) -> Result<()> {
        for (ancestor, _) in tx.pair_range(&self.tables.closure, node.0)? {
            tx.remove_pair(&self.tables.closure, (node.0, ancestor))?;
        }
        for (ancestor, distance) in self.walk_ancestors(&*tx, node)? {
            tx.put_pair(&self.tables.closure, (node.0, ancestor.0), distance)?;
        }
        Ok(())
    }

    /// Longest distance from `node` to each of its ancestors, following `up`.
    ///
    /// Nodes are visited in reverse DFS post-order over parent links, which
    /// puts every node before its parents, so each distance is final once
    /// the node is reached.
    pub(super) fn walk_ancestors<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
        node: EntityId,
    ) -> Result<BTreeMap<EntityId, u64>> {
        let mut parents: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        let mut post_order = Vec::new();
        let mut stack = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                post_order.push(current);
                continue;
            }
            if parents.contains_key(&current) {
                continue;
            }
            if parents.len() >= MAX_TRAVERSAL_DEPTH {
                return Err(NetrelError::Storage(format!(
                    "network `{}`: ancestor walk from {} exceeded {} nodes",
                    self.config.name, node, MAX_TRAVERSAL_DEPTH
                )));
            }
            let above: Vec<EntityId> = self
                .parent_links(r, current)?
                .into_iter()
                .map(|(parent, _)| parent)
                .collect();
            stack.push((current, true));
            stack.extend(above.iter().map(|&p| (p, false)));
            parents.insert(current, above);
        }

        let mut distance: BTreeMap<EntityId, u64> = BTreeMap::new();
        distance.insert(node, 0);
        for current in post_order.into_iter().rev() {
            let Some(&here) = distance.get(&current) else {
                continue;
            };
            for parent in parents.get(&current).into_iter().flatten() {
                let entry = distance.entry(*parent).or_insert(0);
                *entry = (*entry).max(here.saturating_add(1));
            }
        }
        distance.remove(&node);
        Ok(distance)
    }

    /// Clear the indexes and re-link every edge found in the source rows.
    ///
    /// Ordinal slots survive the clear, so children keep their committed
    /// order. Pairs never linked before get fresh ordinals in source key order.
    ///
    /// Source rows are validated like `add_child` input, so a cyclic parent
    /// column or a dangling reference fails the rebuild. Returns the edge count.
    pub fn rebuild(&self, tx: &mut Transaction<'_>) -> Result<usize> {
        tx.nested(|tx| {
            self.clear(tx)?;
            let sources = self.source_edges(&*tx)?;
            let count = sources.len();
            for (id, parent, child, kind) in sources {
                self.check_link(&*tx, parent, child)?;
                self.link(tx, parent, child, kind, id)?;
            }
            tracing::debug!(network = %self.config.name, edges = count, "indexes rebuilt");
            Ok(count)
        })
    }

    fn clear(&self, tx: &mut Transaction<'_>) -> Result<()> {
        for (id, bytes) in tx.raw_scan(&self.tables.edges)? {
            let edge: Edge = postcard::from_bytes(&bytes).map_err(codec_err)?;
            tx.remove_bytes(&self.tables.edges, id)?;
            tx.remove_pair(&self.tables.down, (edge.parent.0, edge.ordinal))?;
            tx.remove_pair(&self.tables.up, (edge.child.0, edge.parent.0))?;
        }
        let entities: BTreeSet<EntityId> = tx
            .scan(&self.config.table)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        for node in entities {
            for (ancestor, _) in tx.pair_range(&self.tables.closure, node.0)? {
                tx.remove_pair(&self.tables.closure, (node.0, ancestor))?;
            }
        }
        Ok(())
    }

    /// Edges described by the source rows, in source key order.
    #[allow(clippy::type_complexity)]
    fn source_edges<R: ReadAccess + ?Sized>(
        &self,
        r: &R,
    ) -> Result<Vec<(EdgeId, EntityId, EntityId, Option<String>)>> {
        let mut out = Vec::new();
        match &self.config.edges {
            EdgeStorage::ParentColumn { column } => {
                for (child, row) in r.scan(&self.config.table)? {
                    if let Some(parent) = row.value(column).as_entity() {
                        out.push((EdgeId(child.0), parent, child, None));
                    }
                }
            }
            EdgeStorage::JoinTable {
                table,
                parent_column,
                child_column,
                kind_column,
                ..
            } => {
                for (id, row) in r.scan(table)? {
                    let endpoint = |column: &str| {
                        row.value(column).as_entity().ok_or_else(|| {
                            NetrelError::InvalidArgument(format!(
                                "join row {}.{} has no `{}`",
                                table, id, column
                            ))
                        })
                    };
                    let parent = endpoint(parent_column.as_str())?;
                    let child = endpoint(child_column.as_str())?;
                    let kind = kind_column
                        .as_deref()
                        .and_then(|column| row.value(column).as_text())
                        .map(str::to_string);
                    out.push((EdgeId(id.0), parent, child, kind));
                }
            }
        }
        Ok(out)
    }
}
