use crate::engine::progress::{CancelToken, ProgressData, UpdateQueue};
use crate::engine::seed::SeedStrategy;
use crate::engine::walk::{
    CacheStrategy, LeafOutput, RefreshSink, WalkParams, dry_run_topology, run_walk,
};
use crate::filter::{Filter, PropertyOutcome, PropertyValue};
use crate::foundation::core::{MAX_UNDO_DEPTH, NodeId, StashId, StreamMask};
use crate::foundation::error::{PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle, StreamOwner};
use crate::stream::data::StreamData;
use crate::tree::FilterTree;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Options controlling caching and undo behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOpts {
    /// Seed selection strategy for refresh walks.
    pub seed_strategy: SeedStrategy,
    /// Cache retention strategy.
    pub cache_strategy: CacheStrategy,
    /// Byte budget shared by all filter caches.
    pub cache_budget_bytes: u64,
    /// Maximum undo/redo snapshot count.
    pub undo_depth: usize,
}

impl Default for SessionOpts {
    fn default() -> Self {
        Self {
            seed_strategy: SeedStrategy::default(),
            cache_strategy: CacheStrategy::default(),
            cache_budget_bytes: 512 * 1024 * 1024,
            undo_depth: MAX_UNDO_DEPTH,
        }
    }
}

/// Walk state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WalkState {
    /// No walk has run yet.
    #[default]
    Idle,
    /// A walk is executing on the call stack.
    Running,
    /// The last walk delivered outputs.
    Complete,
    /// The last walk was cancelled.
    Aborted,
    /// The last walk failed with a filter error.
    Error,
}

struct StashEntry {
    id: StashId,
    name: String,
    tree: FilterTree,
}

/// The engine facade: owns the live filter tree, the payload arena, the
/// undo/redo stacks, named stashes and pending external updates.
///
/// All tree mutation flows through this type so undo snapshots, cache
/// eviction and topology notification stay consistent. Mutations must
/// not be invoked while [`refresh`](AnalysisSession::refresh) is
/// running; the hosting layer is responsible for that exclusion.
pub struct AnalysisSession {
    tree: FilterTree,
    arena: StreamArena,
    undo: VecDeque<FilterTree>,
    redo: VecDeque<FilterTree>,
    stashes: Vec<StashEntry>,
    next_stash_id: u64,
    opts: SessionOpts,
    progress: ProgressData,
    cancel: CancelToken,
    updates: UpdateQueue,
    state: WalkState,
    collaborator: Option<serde_json::Value>,
}

impl Default for AnalysisSession {
    fn default() -> Self {
        Self::new(SessionOpts::default())
    }
}

impl AnalysisSession {
    /// Empty session with the given options.
    pub fn new(opts: SessionOpts) -> Self {
        Self {
            tree: FilterTree::new(),
            arena: StreamArena::new(),
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            stashes: Vec::new(),
            next_stash_id: 1,
            opts,
            progress: ProgressData::default(),
            cancel: CancelToken::new(),
            updates: UpdateQueue::new(),
            state: WalkState::Idle,
            collaborator: None,
        }
    }

    /// The live tree, read-only. Mutate through session operations.
    pub fn tree(&self) -> &FilterTree {
        &self.tree
    }

    /// Resolve a delivered payload handle.
    pub fn stream(&self, h: StreamHandle) -> Option<&StreamData> {
        self.arena.get(h)
    }

    /// Payload arena, read-only (diagnostics, ownership audits).
    pub fn arena(&self) -> &StreamArena {
        &self.arena
    }

    /// Cancellation token; clone it into the UI layer.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// External update queue; clone it into the scene layer.
    pub fn update_queue(&self) -> UpdateQueue {
        self.updates.clone()
    }

    /// Snapshot of current walk progress.
    pub fn progress(&self) -> ProgressData {
        self.progress.clone()
    }

    /// Current walk state.
    pub fn walk_state(&self) -> WalkState {
        self.state
    }

    /// Undo stack depth.
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Redo stack depth.
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    fn free_handles(&mut self, handles: Vec<StreamHandle>) {
        for h in handles {
            self.arena.free(h);
        }
    }

    fn push_undo(&mut self) {
        if self.undo.len() >= self.opts.undo_depth {
            self.undo.pop_front();
        }
        self.undo.push_back(self.tree.clone_uncached());
        self.redo.clear();
    }

    fn notify_topology(&mut self) {
        dry_run_topology(&mut self.tree);
    }

    // ------------------------------------------------------------------
    // Tree mutation

    /// Attach a filter as the last child of `parent` (or as a new
    /// root). Undoable.
    pub fn add_filter(
        &mut self,
        filter: Box<dyn Filter>,
        parent: Option<NodeId>,
    ) -> PointflowResult<NodeId> {
        if let Some(p) = parent
            && !self.tree.contains(p)
        {
            return Err(PointflowError::tree(format!("no such parent node {p}")));
        }
        self.push_undo();
        let id = self.tree.insert(filter, parent)?;
        self.notify_topology();
        Ok(id)
    }

    /// Remove a node and its whole subtree. Undoable.
    pub fn remove_subtree(&mut self, id: NodeId) -> PointflowResult<()> {
        if !self.tree.contains(id) {
            return Err(PointflowError::tree(format!("no such node {id}")));
        }
        self.push_undo();
        let evicted = self.tree.remove_subtree(id)?;
        self.free_handles(evicted);
        self.notify_topology();
        Ok(())
    }

    /// Move a subtree under a new parent. Rejected (tree unchanged, no
    /// undo entry) when the destination is the moved node or one of its
    /// descendants. Undoable.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> PointflowResult<()> {
        if !self.tree.contains(id) || !self.tree.contains(new_parent) {
            return Err(PointflowError::tree("no such node"));
        }
        if id == new_parent || self.tree.is_descendant(new_parent, id) {
            return Err(PointflowError::tree(
                "cannot reparent a node into its own subtree",
            ));
        }
        self.push_undo();
        let evicted = self.tree.reparent(id, new_parent)?;
        self.free_handles(evicted);
        self.notify_topology();
        Ok(())
    }

    /// Deep-copy a subtree (caches stripped) under `dest`, or as a new
    /// root. Undoable.
    pub fn copy_subtree(
        &mut self,
        src: NodeId,
        dest: Option<NodeId>,
    ) -> PointflowResult<NodeId> {
        if !self.tree.contains(src) {
            return Err(PointflowError::tree(format!("no such node {src}")));
        }
        if let Some(d) = dest {
            if !self.tree.contains(d) {
                return Err(PointflowError::tree(format!("no such node {d}")));
            }
            if d == src || self.tree.is_descendant(d, src) {
                return Err(PointflowError::tree("cannot copy a subtree into itself"));
            }
        }
        self.push_undo();
        let id = self.tree.copy_subtree(src, dest)?;
        self.notify_topology();
        Ok(id)
    }

    /// Apply a property change to a node's filter. On success, caches
    /// are invalidated per the filter's reported outcome (descendants
    /// when `needs_refresh`, the node's own when it says so). A
    /// rejected change leaves the tree — and the undo stacks — exactly
    /// as they were. Undoable.
    pub fn set_property(
        &mut self,
        id: NodeId,
        key: &str,
        value: &PropertyValue,
    ) -> PointflowResult<PropertyOutcome> {
        if !self.tree.contains(id) {
            return Err(PointflowError::tree(format!("no such node {id}")));
        }
        self.push_undo();
        let result = self
            .tree
            .filter_mut(id)
            .ok_or_else(|| PointflowError::tree(format!("no such node {id}")))
            .and_then(|f| f.set_property(key, value));
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // Discard the snapshot without restoring it: restoring
                // would destroy still-valid caches.
                self.undo.pop_back();
                return Err(e);
            }
        };
        if outcome.needs_refresh {
            let evicted = self.tree.clear_subtree_caches(id, false);
            self.free_handles(evicted);
        }
        if outcome.invalidates_own_cache
            && let Some(node) = self.tree.node_mut(id)
            && let Some(cache) = node.cache.take()
        {
            self.free_handles(cache);
        }
        self.notify_topology();
        Ok(outcome)
    }

    /// Set or clear a node's user label. Clears the node's own cache
    /// (labels are stamped onto emitted payloads). Undoable.
    pub fn set_label(&mut self, id: NodeId, label: Option<String>) -> PointflowResult<()> {
        if !self.tree.contains(id) {
            return Err(PointflowError::tree(format!("no such node {id}")));
        }
        self.push_undo();
        if let Some(f) = self.tree.filter_mut(id) {
            f.set_label(label);
        }
        if let Some(node) = self.tree.node_mut(id)
            && let Some(cache) = node.cache.take()
        {
            self.free_handles(cache);
        }
        self.notify_topology();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Undo / redo

    /// Restore the most recent undo snapshot. The current tree moves to
    /// the redo stack; its caches are freed (snapshots carry none).
    pub fn undo(&mut self) -> PointflowResult<()> {
        let snapshot = self
            .undo
            .pop_back()
            .ok_or_else(|| PointflowError::validation("nothing to undo"))?;
        if self.redo.len() >= self.opts.undo_depth {
            self.redo.pop_front();
        }
        self.redo.push_back(self.tree.clone_uncached());
        self.install_tree(snapshot);
        Ok(())
    }

    /// Mirror of [`undo`](AnalysisSession::undo).
    pub fn redo(&mut self) -> PointflowResult<()> {
        let snapshot = self
            .redo
            .pop_back()
            .ok_or_else(|| PointflowError::validation("nothing to redo"))?;
        if self.undo.len() >= self.opts.undo_depth {
            self.undo.pop_front();
        }
        self.undo.push_back(self.tree.clone_uncached());
        self.install_tree(snapshot);
        Ok(())
    }

    fn install_tree(&mut self, tree: FilterTree) {
        // The incoming tree has no caches, so every cache-owned payload
        // belonged to the outgoing tree.
        self.arena.free_all_cached();
        self.tree = tree;
        self.notify_topology();
    }

    // ------------------------------------------------------------------
    // Stash

    /// Clone the subtree at `node` (caches stripped) into a named stash
    /// slot. Duplicate names are rejected.
    pub fn stash(&mut self, node: NodeId, name: &str) -> PointflowResult<StashId> {
        if self.stashes.iter().any(|s| s.name == name) {
            return Err(PointflowError::tree(format!(
                "stash '{name}' already exists"
            )));
        }
        let sub = self.tree.clone_subtree(node)?;
        let id = StashId(self.next_stash_id);
        self.next_stash_id += 1;
        self.stashes.push(StashEntry {
            id,
            name: name.to_owned(),
            tree: sub,
        });
        Ok(id)
    }

    /// Splice a clone of a stash under `parent` (or as a new root).
    /// The stash slot itself is never consumed. Undoable.
    pub fn unstash(
        &mut self,
        stash: StashId,
        parent: Option<NodeId>,
    ) -> PointflowResult<Vec<NodeId>> {
        let idx = self
            .stashes
            .iter()
            .position(|s| s.id == stash)
            .ok_or_else(|| PointflowError::tree(format!("no such stash {stash:?}")))?;
        if let Some(p) = parent
            && !self.tree.contains(p)
        {
            return Err(PointflowError::tree(format!("no such parent node {p}")));
        }
        self.push_undo();
        let roots = self.tree.splice_clone(&self.stashes[idx].tree, parent)?;
        self.notify_topology();
        Ok(roots)
    }

    /// Delete a stash slot. Later stash ids are unaffected.
    pub fn delete_stash(&mut self, stash: StashId) -> PointflowResult<()> {
        let idx = self
            .stashes
            .iter()
            .position(|s| s.id == stash)
            .ok_or_else(|| PointflowError::tree(format!("no such stash {stash:?}")))?;
        self.stashes.remove(idx);
        Ok(())
    }

    /// `(id, name)` of every stash, in creation order.
    pub fn stash_list(&self) -> Vec<(StashId, &str)> {
        self.stashes
            .iter()
            .map(|s| (s.id, s.name.as_str()))
            .collect()
    }

    /// Read-only view of a stashed tree.
    pub fn stash_tree(&self, stash: StashId) -> Option<&FilterTree> {
        self.stashes
            .iter()
            .find(|s| s.id == stash)
            .map(|s| &s.tree)
    }

    pub(crate) fn stash_states(&self) -> impl Iterator<Item = (&str, &FilterTree)> {
        self.stashes.iter().map(|s| (s.name.as_str(), &s.tree))
    }

    pub(crate) fn replace_all(
        &mut self,
        tree: FilterTree,
        stashes: Vec<(String, FilterTree)>,
        collaborator: Option<serde_json::Value>,
    ) {
        self.arena.free_all_cached();
        self.arena.free_transient();
        self.tree = tree;
        self.stashes = stashes
            .into_iter()
            .map(|(name, tree)| {
                let id = StashId(self.next_stash_id);
                self.next_stash_id += 1;
                StashEntry { id, name, tree }
            })
            .collect();
        self.collaborator = collaborator;
        self.undo.clear();
        self.redo.clear();
        self.state = WalkState::Idle;
        self.progress.reset();
        self.notify_topology();
    }

    /// Opaque collaborator blob (camera/effect state) carried through
    /// persistence.
    pub fn collaborator_state(&self) -> Option<&serde_json::Value> {
        self.collaborator.as_ref()
    }

    /// Replace the collaborator blob.
    pub fn set_collaborator_state(&mut self, value: Option<serde_json::Value>) {
        self.collaborator = value;
    }

    // ------------------------------------------------------------------
    // Cache control

    /// Drop every filter cache.
    pub fn purge_caches(&mut self) {
        let evicted = self.tree.clear_all_caches();
        self.free_handles(evicted);
    }

    /// Change the cache byte budget. Takes effect from the next walk;
    /// existing caches are kept.
    pub fn set_cache_budget(&mut self, bytes: u64) {
        self.opts.cache_budget_bytes = bytes;
    }

    // ------------------------------------------------------------------
    // Hazard handling

    /// Whether the live tree or any stash contains a hazardous filter.
    pub fn has_hazardous_contents(&self) -> bool {
        self.tree.has_hazardous() || self.stashes.iter().any(|s| s.tree.has_hazardous())
    }

    /// Remove every hazardous filter (with its subtree) from the live
    /// tree and all stashes. Returns the number of nodes removed.
    pub fn make_safe(&mut self) -> usize {
        let (mut removed, evicted) = self.tree.strip_hazardous();
        self.free_handles(evicted);
        for s in &mut self.stashes {
            let (n, _) = s.tree.strip_hazardous();
            removed += n;
        }
        if removed > 0 {
            self.notify_topology();
        }
        removed
    }

    // ------------------------------------------------------------------
    // Refresh

    fn apply_pending_updates(&mut self) -> PointflowResult<()> {
        let updates = self.updates.drain();
        if updates.is_empty() {
            return Ok(());
        }
        self.push_undo();
        for u in updates {
            if !self.tree.contains(u.node) {
                debug_assert!(false, "binding update references a dead node");
                tracing::warn!(node = %u.node, "dropping binding update for dead node");
                continue;
            }
            let evicted = self.tree.clear_subtree_caches(u.node, true);
            self.free_handles(evicted);
            if let Some(f) = self.tree.filter_mut(u.node) {
                f.apply_binding(&u.binding)?;
            }
        }
        self.notify_topology();
        Ok(())
    }

    fn invalidate_monitored(&mut self) {
        let dirty: Vec<NodeId> = self
            .tree
            .pre_order()
            .filter(|(id, _)| {
                self.tree
                    .filter(*id)
                    .is_some_and(|f| f.monitor_needs_refresh())
            })
            .map(|(id, _)| id)
            .collect();
        for id in dirty {
            let evicted = self.tree.clear_subtree_caches(id, true);
            self.free_handles(evicted);
        }
    }

    /// Run refresh walks until no external updates remain, delivering
    /// console text and bindings to `sink` as they appear and invoking
    /// `pump` between filters.
    ///
    /// Returns the per-leaf outputs in walk order; resolve their
    /// handles with [`stream`](AnalysisSession::stream) and release
    /// them with [`release_outputs`](AnalysisSession::release_outputs).
    /// Starting a new refresh frees anything a previous delivery left
    /// unreleased. On error or abort no outputs are delivered and no
    /// payloads leak.
    pub fn refresh(
        &mut self,
        sink: &mut dyn RefreshSink,
        mut pump: impl FnMut(&ProgressData) -> bool,
    ) -> PointflowResult<Vec<LeafOutput>> {
        debug_assert!(
            self.state != WalkState::Running,
            "refresh re-entered while running"
        );
        self.state = WalkState::Running;
        self.cancel.clear();
        // Any outputs from the previous walk are superseded now.
        self.arena.free_transient();

        let params = WalkParams {
            seed_strategy: self.opts.seed_strategy,
            cache_strategy: self.opts.cache_strategy,
            cache_budget_bytes: self.opts.cache_budget_bytes,
        };

        loop {
            if self.updates.has_pending()
                && let Err(e) = self.apply_pending_updates()
            {
                self.state = WalkState::Error;
                return Err(e);
            }
            self.invalidate_monitored();

            let result = run_walk(
                &mut self.tree,
                &mut self.arena,
                &params,
                &self.cancel,
                &mut self.progress,
                &mut pump,
                sink,
            );
            match result {
                Ok(outputs) => {
                    if self.updates.has_pending() {
                        tracing::debug!("external updates arrived mid-walk; restarting");
                        self.arena.free_transient();
                        continue;
                    }
                    self.state = WalkState::Complete;
                    return Ok(outputs);
                }
                Err(e) => {
                    self.state = if e.is_abort() {
                        WalkState::Aborted
                    } else {
                        WalkState::Error
                    };
                    return Err(e);
                }
            }
        }
    }

    /// Headless refresh: no sink, no pump.
    pub fn refresh_headless(&mut self) -> PointflowResult<Vec<LeafOutput>> {
        let mut sink = crate::engine::walk::CollectSink::default();
        self.refresh(&mut sink, |_| true)
    }

    /// Release delivered outputs: frees every payload the output list
    /// owns whose kind is not in `keep`, removing released entries from
    /// the list. Kept entries remain live and listed. Cache-owned
    /// payloads are dropped from the list but stay cached.
    pub fn release_outputs(&mut self, outputs: &mut Vec<LeafOutput>, keep: StreamMask) {
        for leaf in outputs.iter_mut() {
            let arena = &mut self.arena;
            leaf.streams.retain(|&h| {
                let Some(data) = arena.get(h) else {
                    return false;
                };
                if keep.contains(data.kind()) {
                    return true;
                }
                if matches!(arena.owner(h), Some(StreamOwner::Output)) {
                    arena.free(h);
                }
                false
            });
        }
        outputs.retain(|leaf| !leaf.streams.is_empty());
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/analysis_session.rs"]
mod tests;
