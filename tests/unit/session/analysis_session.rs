use super::*;
use crate::engine::progress::BindingUpdate;
use crate::filter::SelectionBinding;
use crate::filter::clip::{BINDING_CENTRE, ClipBox};
use crate::filter::downsample::Downsample;
use crate::filter::source::PointSource;
use crate::foundation::core::Point3;

fn chain_session() -> (AnalysisSession, NodeId, NodeId) {
    let mut s = AnalysisSession::default();
    let load = s
        .add_filter(Box::new(PointSource::with_count(1000, 4)), None)
        .unwrap();
    let down = s
        .add_filter(Box::new(Downsample::with_fraction(0.1)), Some(load))
        .unwrap();
    (s, load, down)
}

#[test]
fn undo_round_trips_structure_and_properties() {
    let (mut s, _load, down) = chain_session();
    let before = s.tree().fingerprint();

    s.set_property(down, "fraction", &PropertyValue::F64(0.5))
        .unwrap();
    let after = s.tree().fingerprint();
    assert_ne!(before, after);

    s.undo().unwrap();
    assert_eq!(s.tree().fingerprint(), before, "undo restores pre-mutation tree");

    s.redo().unwrap();
    assert_eq!(s.tree().fingerprint(), after, "redo restores post-mutation tree");
}

#[test]
fn undo_survives_node_removal() {
    let (mut s, _load, down) = chain_session();
    let before = s.tree().fingerprint();

    s.remove_subtree(down).unwrap();
    assert_eq!(s.tree().len(), 1);

    s.undo().unwrap();
    assert_eq!(s.tree().len(), 2);
    assert_eq!(s.tree().fingerprint(), before);
    assert!(s.tree().contains(down), "snapshot preserves node ids");
}

#[test]
fn undo_stack_is_capped_discarding_oldest() {
    let (mut s, _load, down) = chain_session();
    // Two snapshots exist already (the two inserts). Saturate the rest.
    for i in 0..20 {
        s.set_property(down, "limit", &PropertyValue::U64(i + 1))
            .unwrap();
    }
    assert_eq!(s.undo_len(), MAX_UNDO_DEPTH);

    // The newest snapshot is the state just before the last mutation.
    let last_pre = s.undo_len();
    s.undo().unwrap();
    assert_eq!(s.undo_len(), last_pre - 1);
    let limit = match s
        .tree()
        .filter(down)
        .unwrap()
        .properties()[0]
        .props
        .iter()
        .find(|p| p.key == "limit")
        .map(|p| p.value.clone())
    {
        Some(PropertyValue::U64(v)) => v,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(limit, 19);
}

#[test]
fn rejected_property_set_leaves_no_undo_entry() {
    let (mut s, _load, down) = chain_session();
    let depth = s.undo_len();
    let fp = s.tree().fingerprint();

    let err = s.set_property(down, "fraction", &PropertyValue::F64(7.0));
    assert!(err.is_err());
    assert_eq!(s.undo_len(), depth, "no snapshot for a rejected change");
    assert_eq!(s.tree().fingerprint(), fp);
}

#[test]
fn reparent_cycle_rejection_changes_nothing() {
    let (mut s, load, down) = chain_session();
    let depth = s.undo_len();
    assert!(s.reparent(load, down).is_err());
    assert_eq!(s.undo_len(), depth);
    assert_eq!(s.tree().parent(down), Some(load));
}

#[test]
fn property_outcome_drives_cache_invalidation() {
    let (mut s, load, down) = chain_session();
    s.refresh_headless().unwrap();
    assert!(s.tree().cache_valid(load));
    assert!(s.tree().cache_valid(down));

    // A full-refresh property on the root clears both its own cache and
    // its descendants'.
    s.set_property(load, "count", &PropertyValue::U64(500))
        .unwrap();
    assert!(!s.tree().cache_valid(load));
    assert!(!s.tree().cache_valid(down));
}

#[test]
fn stash_round_trip_is_isolated_from_later_edits() {
    let (mut s, load, down) = chain_session();
    let stash = s.stash(down, "sampler").unwrap();
    let stashed_fp = s.stash_tree(stash).unwrap().fingerprint();

    // Mutate the original after stashing.
    s.set_property(down, "fraction", &PropertyValue::F64(0.9))
        .unwrap();

    let roots = s.unstash(stash, Some(load)).unwrap();
    assert_eq!(roots.len(), 1);

    // The spliced subtree matches the stash at stashing time, not the
    // edited original.
    let spliced = s.tree().clone_subtree(roots[0]).unwrap().fingerprint();
    assert_eq!(spliced, stashed_fp);

    // The stash slot itself is still there and unchanged.
    assert_eq!(s.stash_tree(stash).unwrap().fingerprint(), stashed_fp);
}

#[test]
fn stash_names_are_unique_and_ids_stable_across_deletion() {
    let (mut s, _load, down) = chain_session();
    let first = s.stash(down, "one").unwrap();
    let second = s.stash(down, "two").unwrap();
    assert!(s.stash(down, "one").is_err(), "duplicate name");

    s.delete_stash(first).unwrap();
    assert!(s.stash_tree(second).is_some(), "later id survives deletion");
    assert!(s.delete_stash(first).is_err());
}

#[test]
fn binding_updates_invalidate_and_apply_before_walk() {
    let mut s = AnalysisSession::default();
    let load = s
        .add_filter(Box::new(PointSource::with_count(100, 9)), None)
        .unwrap();
    let clip = s
        .add_filter(Box::new(ClipBox::default()), Some(load))
        .unwrap();
    s.refresh_headless().unwrap();
    assert!(s.tree().cache_valid(clip));

    let queue = s.update_queue();
    queue.push(BindingUpdate {
        node: clip,
        binding: SelectionBinding {
            binding: BINDING_CENTRE,
            value: PropertyValue::Point(Point3::new(1.0, 2.0, 3.0)),
        },
    });

    let undo_before = s.undo_len();
    s.refresh_headless().unwrap();
    assert!(!queue.has_pending());
    assert_eq!(s.undo_len(), undo_before + 1, "update pass pushes one undo");

    let centre = s
        .tree()
        .filter(clip)
        .unwrap()
        .selection_bindings()
        .remove(0);
    assert_eq!(
        centre.value,
        PropertyValue::Point(Point3::new(1.0, 2.0, 3.0))
    );
}

#[test]
fn release_outputs_honours_keep_mask() {
    let mut s = AnalysisSession::new(SessionOpts {
        cache_strategy: crate::engine::walk::CacheStrategy::Never,
        ..SessionOpts::default()
    });
    let load = s
        .add_filter(Box::new(PointSource::with_count(50, 2)), None)
        .unwrap();
    let _spec = s
        .add_filter(Box::new(crate::filter::spectrum::Spectrum::default()), Some(load))
        .unwrap();

    let mut outputs = s.refresh_headless().unwrap();
    let kinds: Vec<_> = outputs[0]
        .streams
        .iter()
        .filter_map(|h| s.stream(*h))
        .map(|d| d.kind())
        .collect();
    assert!(kinds.contains(&crate::foundation::core::StreamKind::Plot));

    s.release_outputs(&mut outputs, StreamMask::only(crate::foundation::core::StreamKind::Plot));
    let remaining: Vec<_> = outputs
        .iter()
        .flat_map(|l| l.streams.iter())
        .filter_map(|h| s.stream(*h))
        .map(|d| d.kind())
        .collect();
    assert_eq!(remaining, vec![crate::foundation::core::StreamKind::Plot]);

    s.release_outputs(&mut outputs, StreamMask::EMPTY);
    assert!(outputs.is_empty());
    assert_eq!(s.arena().live_count(), 0);
}

#[test]
fn monitored_filter_invalidates_its_subtree_every_walk() {
    use crate::filter::external::ExternalProgram;

    let mut s = AnalysisSession::default();
    let load = s
        .add_filter(Box::new(PointSource::with_count(100, 6)), None)
        .unwrap();
    let ext = s
        .add_filter(Box::new(ExternalProgram::default()), Some(load))
        .unwrap();
    let down = s
        .add_filter(Box::new(Downsample::with_fraction(0.5)), Some(ext))
        .unwrap();
    s.set_property(ext, "monitor", &PropertyValue::Bool(true))
        .unwrap();

    s.refresh_headless().unwrap();
    let first = s.tree().node(down).unwrap().cache.clone().unwrap();

    s.refresh_headless().unwrap();
    let second = s.tree().node(down).unwrap().cache.clone().unwrap();
    assert_ne!(
        first, second,
        "a monitored ancestor must force downstream recomputation"
    );

    // Without the monitor flag the cache is replayed verbatim.
    s.set_property(ext, "monitor", &PropertyValue::Bool(false))
        .unwrap();
    s.refresh_headless().unwrap();
    let third = s.tree().node(down).unwrap().cache.clone().unwrap();
    s.refresh_headless().unwrap();
    let fourth = s.tree().node(down).unwrap().cache.clone().unwrap();
    assert_eq!(third, fourth);
}

#[test]
fn purge_caches_frees_payloads() {
    let (mut s, _load, _down) = chain_session();
    s.refresh_headless().unwrap();
    assert!(s.arena().live_count() > 0);
    s.purge_caches();
    assert_eq!(s.arena().live_count(), 0);
}
