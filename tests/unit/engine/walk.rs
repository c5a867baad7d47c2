use super::*;
use crate::engine::seed::SeedStrategy;
use crate::filter::downsample::Downsample;
use crate::filter::source::PointSource;
use crate::filter::spectrum::Spectrum;
use crate::stream::data::StreamData;

fn params() -> WalkParams {
    WalkParams {
        seed_strategy: SeedStrategy::MaskPropagation,
        cache_strategy: CacheStrategy::DepthFirst,
        cache_budget_bytes: 64 * 1024 * 1024,
    }
}

fn walk(
    tree: &mut FilterTree,
    arena: &mut StreamArena,
    p: &WalkParams,
) -> PointflowResult<Vec<LeafOutput>> {
    let cancel = CancelToken::new();
    let mut progress = ProgressData::default();
    let mut pump = |_: &ProgressData| true;
    let mut sink = CollectSink::default();
    run_walk(tree, arena, p, &cancel, &mut progress, &mut pump, &mut sink)
}

#[test]
fn chain_delivers_one_leaf_and_caches_both_nodes() {
    let mut tree = FilterTree::new();
    let load = tree
        .insert(Box::new(PointSource::with_count(1000, 11)), None)
        .unwrap();
    let down = tree
        .insert(Box::new(Downsample::with_fraction(0.1)), Some(load))
        .unwrap();

    let mut arena = StreamArena::new();
    let outputs = walk(&mut tree, &mut arena, &params()).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].node, down);
    assert_eq!(outputs[0].streams.len(), 1);
    match arena.get(outputs[0].streams[0]) {
        Some(StreamData::Points(p)) => assert_eq!(p.points.len(), 100),
        other => panic!("expected points, got {other:?}"),
    }

    assert!(tree.cache_valid(load));
    assert!(tree.cache_valid(down));
    // Everything alive is owned by a cache (the leaf's delivered stream
    // is its own cached output).
    for (_, owner) in arena.live() {
        assert!(matches!(owner, StreamOwner::Cached(_)), "owner {owner:?}");
    }
}

#[test]
fn second_walk_replays_caches_without_pending_leaks() {
    let mut tree = FilterTree::new();
    let load = tree
        .insert(Box::new(PointSource::with_count(500, 3)), None)
        .unwrap();
    let _down = tree
        .insert(Box::new(Downsample::with_fraction(0.2)), Some(load))
        .unwrap();

    let mut arena = StreamArena::new();
    let first = walk(&mut tree, &mut arena, &params()).unwrap();
    let live_after_first = arena.live_count();

    let second = walk(&mut tree, &mut arena, &params()).unwrap();
    assert_eq!(second.len(), first.len());
    assert_eq!(
        arena.live_count(),
        live_after_first,
        "cache replay must not grow the arena"
    );
}

#[test]
fn never_strategy_leaves_no_caches_and_no_leaks() {
    let mut tree = FilterTree::new();
    let load = tree
        .insert(Box::new(PointSource::with_count(200, 5)), None)
        .unwrap();
    let down = tree
        .insert(Box::new(Downsample::with_fraction(0.5)), Some(load))
        .unwrap();

    let mut arena = StreamArena::new();
    let p = WalkParams {
        cache_strategy: CacheStrategy::Never,
        ..params()
    };
    let outputs = walk(&mut tree, &mut arena, &p).unwrap();

    assert!(!tree.cache_valid(load));
    assert!(!tree.cache_valid(down));
    // The source's points were consumed by the downsampler and freed on
    // the level pop; only the delivered output remains.
    assert_eq!(arena.live_count(), 1);
    assert_eq!(
        arena.owner(outputs[0].streams[0]),
        Some(StreamOwner::Output)
    );
}

#[test]
fn pump_stop_aborts_with_no_transient_payloads() {
    let mut tree = FilterTree::new();
    let load = tree
        .insert(Box::new(PointSource::with_count(100_000, 5)), None)
        .unwrap();
    let _down = tree
        .insert(Box::new(Downsample::with_fraction(0.5)), Some(load))
        .unwrap();

    let mut arena = StreamArena::new();
    let cancel = CancelToken::new();
    let mut progress = ProgressData::default();
    let mut calls = 0u32;
    let mut pump = |_: &ProgressData| {
        calls += 1;
        calls < 2
    };
    let mut sink = CollectSink::default();
    let err = run_walk(
        &mut tree,
        &mut arena,
        &params(),
        &cancel,
        &mut progress,
        &mut pump,
        &mut sink,
    )
    .unwrap_err();

    assert!(err.is_abort());
    for (_, owner) in arena.live() {
        assert!(
            matches!(owner, StreamOwner::Cached(_)),
            "abort left transient payload with owner {owner:?}"
        );
    }
}

#[test]
fn shared_payload_is_delivered_once_across_leaves() {
    let mut tree = FilterTree::new();
    let load = tree
        .insert(Box::new(PointSource::with_count(64, 2)), None)
        .unwrap();
    let _plot_a = tree
        .insert(Box::new(Spectrum::default()), Some(load))
        .unwrap();
    let _plot_b = tree
        .insert(Box::new(Spectrum::default()), Some(load))
        .unwrap();

    let mut arena = StreamArena::new();
    let outputs = walk(&mut tree, &mut arena, &params()).unwrap();
    assert_eq!(outputs.len(), 2);

    let mut seen = std::collections::HashSet::new();
    for leaf in &outputs {
        for &h in &leaf.streams {
            assert!(seen.insert(h), "payload handle delivered twice");
        }
    }
    // Both spectra forward the same cached source points; only the
    // first leaf keeps them after the scrub.
    let total: usize = outputs.iter().map(|l| l.streams.len()).sum();
    assert_eq!(total, 3, "points once, one plot per leaf");
}

#[test]
fn console_and_progress_reach_the_sink() {
    let mut tree = FilterTree::new();
    let load = tree
        .insert(Box::new(PointSource::with_count(10, 1)), None)
        .unwrap();
    let _ = load;

    let mut arena = StreamArena::new();
    let cancel = CancelToken::new();
    let mut progress = ProgressData::default();
    let mut pump = |_: &ProgressData| true;
    let mut sink = CollectSink::default();
    run_walk(
        &mut tree,
        &mut arena,
        &params(),
        &cancel,
        &mut progress,
        &mut pump,
        &mut sink,
    )
    .unwrap();

    assert_eq!(progress.filters_total, 1);
    assert_eq!(progress.filters_done, 1);
    assert!(
        sink.console
            .iter()
            .any(|(label, msg)| label == "point source" && msg.contains("generated")),
        "console: {:?}",
        sink.console
    );
}
