use crate::filter::SelectionBinding;
use crate::foundation::core::NodeId;
use crate::foundation::error::FilterError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared cancellation flag.
///
/// The engine polls it only at cooperative yield points; a host UI may
/// set it from an input-handling context at any time. One walk, one
/// token state: the session clears it when a refresh begins.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current walk.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Snapshot of refresh progress, updated before and after every node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressData {
    /// Node currently (or last) being refreshed.
    pub current: Option<NodeId>,
    /// Label of the current node, for display.
    pub current_label: String,
    /// Filters fully processed in this walk.
    pub filters_done: u32,
    /// Total filters in the current seed set's subtrees.
    pub filters_total: u32,
    /// Sub-step of the current filter, where it reports steps.
    pub step: u32,
    /// Total sub-steps of the current filter.
    pub max_step: u32,
    /// 0–100 completion of the current filter.
    pub percent: u32,
}

impl ProgressData {
    /// Reset to the idle state.
    pub fn reset(&mut self) {
        *self = ProgressData::default();
    }

    pub(crate) fn begin_node(&mut self, node: NodeId, label: String) {
        self.current = Some(node);
        self.current_label = label;
        self.step = 0;
        self.max_step = 0;
        self.percent = 0;
    }
}

/// A property change pushed back from the viewer through a selection
/// binding, outside the property-grid path.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingUpdate {
    /// Node owning the binding. Must be live.
    pub node: NodeId,
    /// The modified binding.
    pub binding: SelectionBinding,
}

/// Shared queue of pending external updates.
///
/// The scene collaborator holds a clone and pushes modified bindings as
/// the user drags; the engine drains it before each walk iteration. A
/// non-empty queue is the "pending updates" condition of the refresh
/// loop. Pushes are allowed at any time, including from inside the
/// yield pump while a walk is running.
#[derive(Clone, Debug, Default)]
pub struct UpdateQueue(Arc<Mutex<Vec<BindingUpdate>>>);

impl UpdateQueue {
    /// Fresh, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one modified binding.
    pub fn push(&self, update: BindingUpdate) {
        self.0.lock().expect("update queue poisoned").push(update);
    }

    /// Whether updates are waiting.
    pub fn has_pending(&self) -> bool {
        !self.0.lock().expect("update queue poisoned").is_empty()
    }

    pub(crate) fn drain(&self) -> Vec<BindingUpdate> {
        std::mem::take(&mut *self.0.lock().expect("update queue poisoned"))
    }
}

/// Per-node execution context handed to [`Filter::refresh`].
///
/// Carries the walking node's identity (payload attribution), the
/// cancellation token, the shared progress record and the host yield
/// pump — the explicit replacement for process-global abort state. The
/// pump is invoked at every [`tick`](RefreshContext::tick); returning
/// `false` from it requests a stop, equivalent to cancelling the token.
///
/// [`Filter::refresh`]: crate::filter::Filter::refresh
pub struct RefreshContext<'a> {
    node: NodeId,
    cancel: &'a CancelToken,
    progress: &'a mut ProgressData,
    pump: &'a mut (dyn FnMut(&ProgressData) -> bool + 'a),
}

impl<'a> RefreshContext<'a> {
    pub(crate) fn new(
        node: NodeId,
        cancel: &'a CancelToken,
        progress: &'a mut ProgressData,
        pump: &'a mut (impl FnMut(&ProgressData) -> bool),
    ) -> Self {
        Self {
            node,
            cancel,
            progress,
            pump,
        }
    }

    /// The node currently being refreshed; producer for arena
    /// allocations made by the filter.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Report sub-step progress for the current filter.
    pub fn set_steps(&mut self, step: u32, max_step: u32) {
        self.progress.step = step;
        self.progress.max_step = max_step;
    }

    /// Report 0–100 completion for the current filter.
    pub fn set_percent(&mut self, percent: u32) {
        self.progress.percent = percent.min(100);
    }

    /// Cooperative checkpoint: pump the host event loop and check for
    /// cancellation. Filters are contracted to call this frequently
    /// inside long loops and to return the error unchanged.
    pub fn tick(&mut self) -> Result<(), FilterError> {
        let keep_going = (self.pump)(self.progress);
        if !keep_going || self.cancel.is_cancelled() {
            return Err(FilterError::Aborted);
        }
        Ok(())
    }
}
