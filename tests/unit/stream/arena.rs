use super::*;
use crate::foundation::core::NodeId;
use crate::stream::data::{PointStream, StreamData};

fn node(idx: u32) -> NodeId {
    NodeId { idx, r#gen: 0 }
}

fn points() -> StreamData {
    StreamData::Points(PointStream::new())
}

#[test]
fn alloc_starts_pending_and_untracked() {
    let mut arena = StreamArena::new();
    let h = arena.alloc(node(0), points());
    assert_eq!(arena.owner(h), Some(StreamOwner::Pending { tracked: false }));
    assert_eq!(arena.producer(h), Some(node(0)));
    assert_eq!(arena.live_count(), 1);
}

#[test]
fn free_is_exactly_once() {
    let mut arena = StreamArena::new();
    let h = arena.alloc(node(0), points());
    assert!(arena.free(h));
    assert!(!arena.free(h), "second free through the same handle is a no-op");
    assert_eq!(arena.live_count(), 0);
}

#[test]
fn stale_handle_never_aliases_reused_slot() {
    let mut arena = StreamArena::new();
    let h1 = arena.alloc(node(0), points());
    arena.free(h1);
    let h2 = arena.alloc(node(1), points());
    // Slot was reused but the generation moved on.
    assert!(arena.get(h1).is_none());
    assert!(!arena.free(h1));
    assert_eq!(arena.producer(h2), Some(node(1)));
    assert_eq!(arena.live_count(), 1);
}

#[test]
fn tracking_registers_once() {
    let mut arena = StreamArena::new();
    let h = arena.alloc(node(0), points());
    assert!(arena.mark_tracked(h));
    assert!(!arena.mark_tracked(h), "already tracked");
    arena.mark_output(h);
    assert_eq!(arena.owner(h), Some(StreamOwner::Output));
    assert!(!arena.mark_tracked(h), "outputs are not pending");
}

#[test]
fn cached_payloads_survive_transient_sweeps() {
    let mut arena = StreamArena::new();
    let cached = arena.alloc(node(3), points());
    arena.mark_cached(cached, node(3));
    let pending = arena.alloc(node(3), points());
    let output = arena.alloc(node(3), points());
    arena.mark_output(output);

    assert_eq!(arena.free_transient(), 2);
    assert_eq!(arena.owner(cached), Some(StreamOwner::Cached(node(3))));
    assert!(arena.get(pending).is_none());
    assert!(arena.get(output).is_none());

    assert_eq!(arena.free_cached_by(node(3)), 1);
    assert_eq!(arena.live_count(), 0);
}

#[test]
fn cached_bytes_counts_only_cache_owned() {
    let mut arena = StreamArena::new();
    let mut stream = PointStream::new();
    stream.points.push(crate::stream::data::PointHit {
        pos: crate::foundation::core::Point3::default(),
        mass: 1.0,
    });
    let cached = arena.alloc(node(0), StreamData::Points(stream));
    let pending = arena.alloc(node(0), points());
    arena.mark_cached(cached, node(0));

    let bytes = arena.cached_bytes();
    assert!(bytes > 0);
    arena.free(pending);
    assert_eq!(arena.cached_bytes(), bytes);
}

#[test]
fn mark_output_leaves_cached_alone() {
    let mut arena = StreamArena::new();
    let h = arena.alloc(node(0), points());
    arena.mark_cached(h, node(0));
    arena.mark_output(h);
    assert_eq!(arena.owner(h), Some(StreamOwner::Cached(node(0))));
}
