//! Filter tree: an ordered forest of filter nodes with stable ids,
//! engine-owned output caches and cache-stripped deep cloning.

use crate::filter::Filter;
use crate::foundation::core::NodeId;
use crate::foundation::error::{PointflowError, PointflowResult};
use crate::stream::arena::StreamHandle;
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

pub(crate) struct Node {
    pub(crate) filter: Box<dyn Filter>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    /// Engine-owned output cache: handles of payloads this node produced
    /// on its last refresh. `None` means no valid cache. Only ever
    /// populated on the live tree; clones are always stripped.
    pub(crate) cache: Option<Vec<StreamHandle>>,
}

struct Entry {
    r#gen: u32,
    node: Option<Node>,
}

/// Ordered forest of filters.
///
/// Depth-first pre-order over the roots (in insertion order) is the
/// canonical order for display and execution. Node ids are stable
/// across [`clone_uncached`](FilterTree::clone_uncached), so undo/redo
/// snapshots keep addressing the same logical nodes.
#[derive(Default)]
pub struct FilterTree {
    entries: Vec<Entry>,
    free: Vec<u32>,
    roots: Vec<NodeId>,
}

impl FilterTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.node.is_some()).count()
    }

    /// Whether the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.node.is_none())
    }

    /// Whether `id` addresses a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Root ids in order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        let entry = self.entries.get(id.idx as usize)?;
        if entry.r#gen != id.r#gen {
            return None;
        }
        entry.node.as_ref()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let entry = self.entries.get_mut(id.idx as usize)?;
        if entry.r#gen != id.r#gen {
            return None;
        }
        entry.node.as_mut()
    }

    /// Shared access to a node's filter.
    pub fn filter(&self, id: NodeId) -> Option<&dyn Filter> {
        self.node(id).map(|n| n.filter.as_ref())
    }

    /// Mutable access to a node's filter.
    pub fn filter_mut(&mut self, id: NodeId) -> Option<&mut Box<dyn Filter>> {
        self.node_mut(id).map(|n| &mut n.filter)
    }

    /// A node's parent, or `None` for roots and dead ids.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// A node's children, in order. Empty for dead ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Whether `id` has no children.
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.children(id).is_empty()
    }

    fn alloc_node(&mut self, node: Node) -> NodeId {
        if let Some(idx) = self.free.pop() {
            let entry = &mut self.entries[idx as usize];
            debug_assert!(entry.node.is_none());
            entry.node = Some(node);
            NodeId {
                idx,
                r#gen: entry.r#gen,
            }
        } else {
            let idx = self.entries.len() as u32;
            self.entries.push(Entry {
                r#gen: 0,
                node: Some(node),
            });
            NodeId { idx, r#gen: 0 }
        }
    }

    /// Attach `filter` as the last child of `parent`, or as a new root.
    pub fn insert(
        &mut self,
        filter: Box<dyn Filter>,
        parent: Option<NodeId>,
    ) -> PointflowResult<NodeId> {
        if let Some(p) = parent
            && !self.contains(p)
        {
            return Err(PointflowError::tree(format!("no such parent node {p}")));
        }
        let id = self.alloc_node(Node {
            filter,
            parent,
            children: SmallVec::new(),
            cache: None,
        });
        match parent {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        Ok(id)
    }

    fn detach(&mut self, id: NodeId) {
        match self.parent(id) {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
    }

    /// Remove `id` and its whole subtree. Returns the evicted cache
    /// handles so the caller can free the payloads.
    pub fn remove_subtree(&mut self, id: NodeId) -> PointflowResult<Vec<StreamHandle>> {
        if !self.contains(id) {
            return Err(PointflowError::tree(format!("no such node {id}")));
        }
        self.detach(id);
        let doomed: Vec<NodeId> = self.subtree(id).map(|(n, _)| n).collect();
        let mut evicted = Vec::new();
        for n in doomed {
            let entry = &mut self.entries[n.idx as usize];
            if let Some(node) = entry.node.take() {
                if let Some(cache) = node.cache {
                    evicted.extend(cache);
                }
                entry.r#gen = entry.r#gen.wrapping_add(1);
                self.free.push(n.idx);
            }
        }
        Ok(evicted)
    }

    /// Whether `descendant` lies strictly below `ancestor`.
    pub fn is_descendant(&self, descendant: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = self.parent(descendant);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.parent(id);
        }
        false
    }

    /// Move `id` (with its subtree) to become the last child of
    /// `new_parent`. Rejected when the destination is the node itself or
    /// one of its descendants; nothing changes on rejection. On success
    /// the whole moved subtree's caches are cleared (topology change
    /// invalidates the ancestor context they were computed under) and
    /// the evicted handles are returned.
    pub fn reparent(
        &mut self,
        id: NodeId,
        new_parent: NodeId,
    ) -> PointflowResult<Vec<StreamHandle>> {
        if !self.contains(id) || !self.contains(new_parent) {
            return Err(PointflowError::tree("no such node"));
        }
        if id == new_parent {
            return Err(PointflowError::tree("cannot reparent a node onto itself"));
        }
        if self.is_descendant(new_parent, id) {
            return Err(PointflowError::tree(
                "cannot reparent a node into its own subtree",
            ));
        }
        self.detach(id);
        if let Some(node) = self.node_mut(new_parent) {
            node.children.push(id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = Some(new_parent);
        }
        Ok(self.clear_subtree_caches(id, true))
    }

    /// Deep-copy the subtree at `src` (caches stripped) as the last
    /// child of `dest`, or as a new root when `dest` is `None`. Rejected
    /// when the destination lies inside the copied subtree.
    pub fn copy_subtree(
        &mut self,
        src: NodeId,
        dest: Option<NodeId>,
    ) -> PointflowResult<NodeId> {
        if !self.contains(src) {
            return Err(PointflowError::tree(format!("no such node {src}")));
        }
        if let Some(d) = dest {
            if !self.contains(d) {
                return Err(PointflowError::tree(format!("no such node {d}")));
            }
            if d == src || self.is_descendant(d, src) {
                return Err(PointflowError::tree(
                    "cannot copy a subtree into itself",
                ));
            }
        }
        let order: Vec<(NodeId, usize)> = self.subtree(src).collect();
        let mut clone_of: Vec<(NodeId, NodeId)> = Vec::with_capacity(order.len());
        for (orig, _) in order {
            let filter = self
                .node(orig)
                .map(|n| n.filter.clone_uncached())
                .ok_or_else(|| PointflowError::tree("subtree changed during copy"))?;
            let target_parent = if orig == src {
                dest
            } else {
                let p = self.parent(orig).and_then(|p| {
                    clone_of
                        .iter()
                        .find(|(o, _)| *o == p)
                        .map(|(_, c)| *c)
                });
                debug_assert!(p.is_some(), "pre-order clone must see parents first");
                p
            };
            let id = self.insert(filter, target_parent)?;
            clone_of.push((orig, id));
        }
        Ok(clone_of[0].1)
    }

    /// Clone the subtree at `src` into a new single-root tree, caches
    /// stripped. Basis of the stash operation.
    pub fn clone_subtree(&self, src: NodeId) -> PointflowResult<FilterTree> {
        if !self.contains(src) {
            return Err(PointflowError::tree(format!("no such node {src}")));
        }
        let mut out = FilterTree::new();
        let mut clone_of: Vec<(NodeId, NodeId)> = Vec::new();
        for (orig, _) in self.subtree(src) {
            let filter = self
                .node(orig)
                .map(|n| n.filter.clone_uncached())
                .ok_or_else(|| PointflowError::tree("subtree changed during clone"))?;
            let parent = if orig == src {
                None
            } else {
                self.parent(orig).and_then(|p| {
                    clone_of
                        .iter()
                        .find(|(o, _)| *o == p)
                        .map(|(_, c)| *c)
                })
            };
            let id = out.insert(filter, parent)?;
            clone_of.push((orig, id));
        }
        Ok(out)
    }

    /// Splice a cache-stripped clone of `sub` (all of its roots, in
    /// order) under `parent` (or as new roots). Returns the ids of the
    /// spliced-in roots. `sub` itself is never consumed or mutated.
    pub fn splice_clone(
        &mut self,
        sub: &FilterTree,
        parent: Option<NodeId>,
    ) -> PointflowResult<Vec<NodeId>> {
        if let Some(p) = parent
            && !self.contains(p)
        {
            return Err(PointflowError::tree(format!("no such parent node {p}")));
        }
        let mut new_roots = Vec::new();
        for &sub_root in sub.roots() {
            let mut clone_of: Vec<(NodeId, NodeId)> = Vec::new();
            for (orig, _) in sub.subtree(sub_root) {
                let filter = sub
                    .node(orig)
                    .map(|n| n.filter.clone_uncached())
                    .ok_or_else(|| PointflowError::tree("stash tree inconsistent"))?;
                let target_parent = if orig == sub_root {
                    parent
                } else {
                    sub.parent(orig).and_then(|p| {
                        clone_of
                            .iter()
                            .find(|(o, _)| *o == p)
                            .map(|(_, c)| *c)
                    })
                };
                let id = self.insert(filter, target_parent)?;
                clone_of.push((orig, id));
            }
            if let Some((_, root)) = clone_of.first() {
                new_roots.push(*root);
            }
        }
        Ok(new_roots)
    }

    /// Deep clone of the whole tree with every cache stripped and the
    /// slab layout (hence every `NodeId`) preserved. This is the undo
    /// snapshot operation.
    pub fn clone_uncached(&self) -> FilterTree {
        FilterTree {
            entries: self
                .entries
                .iter()
                .map(|e| Entry {
                    r#gen: e.r#gen,
                    node: e.node.as_ref().map(|n| Node {
                        filter: n.filter.clone_uncached(),
                        parent: n.parent,
                        children: n.children.clone(),
                        cache: None,
                    }),
                })
                .collect(),
            free: self.free.clone(),
            roots: self.roots.clone(),
        }
    }

    /// Pre-order traversal of the whole forest as `(id, depth)`.
    pub fn pre_order(&self) -> PreOrder<'_> {
        let stack: Vec<(NodeId, usize)> =
            self.roots.iter().rev().map(|r| (*r, 0)).collect();
        PreOrder { tree: self, stack }
    }

    /// Pre-order traversal of the subtree rooted at `id`, relative
    /// depths starting at zero.
    pub fn subtree(&self, id: NodeId) -> PreOrder<'_> {
        let stack = if self.contains(id) {
            vec![(id, 0)]
        } else {
            Vec::new()
        };
        PreOrder { tree: self, stack }
    }

    /// Ids of every node whose filter is of the given kind.
    pub fn by_kind(&self, kind: crate::filter::FilterKind) -> Vec<NodeId> {
        self.pre_order()
            .filter(|(id, _)| self.filter(*id).is_some_and(|f| f.kind() == kind))
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether the node's cache is valid.
    pub fn cache_valid(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.cache.is_some())
    }

    /// Clear the caches in the subtree at `id`; with `include_self`
    /// unset the node's own cache survives. Returns evicted handles.
    pub(crate) fn clear_subtree_caches(
        &mut self,
        id: NodeId,
        include_self: bool,
    ) -> Vec<StreamHandle> {
        let targets: Vec<NodeId> = self
            .subtree(id)
            .filter(|(_, depth)| include_self || *depth > 0)
            .map(|(n, _)| n)
            .collect();
        let mut evicted = Vec::new();
        for n in targets {
            if let Some(node) = self.node_mut(n)
                && let Some(cache) = node.cache.take()
            {
                evicted.extend(cache);
            }
        }
        evicted
    }

    /// Clear every cache in the tree. Returns evicted handles.
    pub(crate) fn clear_all_caches(&mut self) -> Vec<StreamHandle> {
        let targets: Vec<NodeId> = self.pre_order().map(|(n, _)| n).collect();
        let mut evicted = Vec::new();
        for n in targets {
            if let Some(node) = self.node_mut(n)
                && let Some(cache) = node.cache.take()
            {
                evicted.extend(cache);
            }
        }
        evicted
    }

    /// Whether any filter in the tree reports itself hazardous.
    pub fn has_hazardous(&self) -> bool {
        self.pre_order()
            .any(|(id, _)| self.filter(id).is_some_and(|f| f.hazardous()))
    }

    /// Remove every hazardous filter together with its whole subtree.
    /// Returns `(nodes_removed, evicted_cache_handles)`.
    pub fn strip_hazardous(&mut self) -> (usize, Vec<StreamHandle>) {
        let mut removed = 0;
        let mut evicted = Vec::new();
        loop {
            let target = self
                .pre_order()
                .find(|(id, _)| self.filter(*id).is_some_and(|f| f.hazardous()))
                .map(|(id, _)| id);
            let Some(id) = target else { break };
            let count = self.subtree(id).count();
            if let Ok(handles) = self.remove_subtree(id) {
                evicted.extend(handles);
                removed += count;
            }
        }
        (removed, evicted)
    }

    /// Content fingerprint: structure plus every node's serialized
    /// state and label, ignoring caches. Two trees with equal
    /// fingerprints are structurally and property-wise identical.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh3::new();
        for (id, depth) in self.pre_order() {
            hasher.update(&(depth as u64).to_le_bytes());
            if let Some(filter) = self.filter(id) {
                let state = filter.state();
                if let Ok(bytes) = serde_json::to_vec(&state) {
                    hasher.update(&bytes);
                }
            }
        }
        hasher.digest()
    }
}

/// Pre-order iterator over `(NodeId, depth)`.
pub struct PreOrder<'a> {
    tree: &'a FilterTree,
    stack: Vec<(NodeId, usize)>,
}

impl Iterator for PreOrder<'_> {
    type Item = (NodeId, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        let children = self.tree.children(id);
        for &c in children.iter().rev() {
            self.stack.push((c, depth + 1));
        }
        Some((id, depth))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tree/mod.rs"]
mod tests;
