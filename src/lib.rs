//! Pointflow is the execution engine of an interactive point-cloud
//! analysis application: a tree of processing filters over 3D point
//! data, recomputed incrementally as the user edits the pipeline.
//!
//! The public API is session-oriented:
//!
//! - Build a pipeline in an [`AnalysisSession`] (insert/reparent/copy
//!   filters, set properties — every mutation is undoable)
//! - Call [`AnalysisSession::refresh`] to run the minimal set of
//!   recomputation, with cooperative cancellation and progress
//! - Resolve the delivered [`LeafOutput`] handles against the session
//!   and hand the payloads to scene/plot/grid consumers
//!
//! The engine is single-threaded and cooperative: long computations
//! yield through a host pump so a UI event loop stays responsive, and
//! a shared [`CancelToken`] aborts a walk at the next yield point.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub(crate) mod engine;
/// The filter contract and the built-in filter set.
pub mod filter;
mod foundation;
/// Session facade: the live tree, undo/redo, stashes and refresh.
pub mod session;
/// Document persistence.
pub mod state;
/// Payload types and the ownership arena.
pub mod stream;
/// The filter tree.
pub mod tree;

pub use crate::engine::progress::{
    BindingUpdate, CancelToken, ProgressData, RefreshContext, UpdateQueue,
};
pub use crate::engine::seed::SeedStrategy;
pub use crate::engine::walk::{CacheStrategy, CollectSink, LeafOutput, RefreshSink};
pub use crate::filter::{Filter, FilterKind, PropertyOutcome, PropertyValue, SelectionBinding};
pub use crate::foundation::core::{
    BoundingBox, MAX_UNDO_DEPTH, NodeId, Point3, StashId, StreamKind, StreamMask,
};
pub use crate::foundation::error::{FilterError, PointflowError, PointflowResult};
pub use crate::session::{AnalysisSession, SessionOpts, WalkState};
pub use crate::stream::arena::{StreamArena, StreamHandle, StreamOwner};
pub use crate::stream::data::StreamData;
pub use crate::tree::FilterTree;
