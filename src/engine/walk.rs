//! The refresh walk: depth-first execution of the seed set with
//! ownership tracking, cache admission, progress and cooperative abort.

use crate::engine::progress::{CancelToken, ProgressData, RefreshContext};
use crate::engine::seed::{SeedStrategy, compute_seeds};
use crate::foundation::core::NodeId;
use crate::foundation::error::{PointflowError, PointflowResult};
use crate::stream::arena::{StreamArena, StreamHandle, StreamOwner};
use crate::tree::FilterTree;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashSet;

/// Cache retention strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Admit caches in walk order while the budget lasts.
    #[default]
    DepthFirst,
    /// Never retain outputs.
    Never,
}

/// Output of one leaf filter, in walk order.
#[derive(Clone, Debug)]
pub struct LeafOutput {
    /// The leaf that produced (or replayed) these payloads.
    pub node: NodeId,
    /// Payload handles, resolvable against the session's arena.
    pub streams: Vec<StreamHandle>,
}

/// External consumer of walk side-channels: console text and viewer
/// selection bindings, relayed as each node finishes.
pub trait RefreshSink {
    /// One console line from the labelled filter.
    fn console(&mut self, filter_label: &str, message: &str);

    /// The selection bindings a node currently exposes.
    fn bindings(&mut self, node: NodeId, bindings: &[crate::filter::SelectionBinding]);
}

/// Sink that records everything. Default for tests and headless runs.
#[derive(Debug, Default)]
pub struct CollectSink {
    /// `(filter label, message)` pairs, in relay order.
    pub console: Vec<(String, String)>,
    /// `(node, binding)` pairs, in relay order.
    pub bindings: Vec<(NodeId, crate::filter::SelectionBinding)>,
}

impl RefreshSink for CollectSink {
    fn console(&mut self, filter_label: &str, message: &str) {
        self.console
            .push((filter_label.to_owned(), message.to_owned()));
    }

    fn bindings(&mut self, node: NodeId, bindings: &[crate::filter::SelectionBinding]) {
        for b in bindings {
            self.bindings.push((node, b.clone()));
        }
    }
}

pub(crate) struct WalkParams {
    pub(crate) seed_strategy: SeedStrategy,
    pub(crate) cache_strategy: CacheStrategy,
    pub(crate) cache_budget_bytes: u64,
}

/// One level of the ownership stack: the outputs a node at `depth`
/// handed to its children, plus the subset of payloads first produced
/// there (the pending-free tracking for this level).
struct Level {
    depth: usize,
    outputs: Vec<StreamHandle>,
    fresh: SmallVec<[StreamHandle; 8]>,
}

fn pop_levels(levels: &mut Vec<Level>, to_depth: usize, arena: &mut StreamArena) {
    while let Some(top) = levels.pop_if(|top| top.depth >= to_depth) {
        for h in top.fresh {
            if matches!(arena.owner(h), Some(StreamOwner::Pending { .. })) {
                arena.free(h);
            }
        }
    }
}

#[cfg(debug_assertions)]
fn check_refresh_validity(
    tree: &FilterTree,
    arena: &StreamArena,
    node: NodeId,
    inputs: &[StreamHandle],
    outputs: &[StreamHandle],
) {
    let filter = tree.filter(node).expect("walked node is live");
    let emit = filter.emit_mask();
    let block = filter.block_mask();
    for &h in outputs {
        let Some(data) = arena.get(h) else {
            panic!("filter '{}' returned a dead payload handle", filter.label());
        };
        if arena.producer(h) == Some(node) {
            assert!(
                emit.contains(data.kind()),
                "filter '{}' produced a {:?} payload outside its emit mask",
                filter.label(),
                data.kind()
            );
        }
    }
    for &h in inputs {
        if let Some(data) = arena.get(h)
            && block.contains(data.kind())
        {
            assert!(
                !outputs.contains(&h),
                "filter '{}' forwarded a {:?} payload it declares blocked",
                filter.label(),
                data.kind()
            );
        }
    }
    let mut seen = HashSet::new();
    for &h in outputs {
        assert!(
            seen.insert(h),
            "filter '{}' listed the same payload twice",
            filter.label()
        );
    }
}

/// Run one full walk over the current seed set.
///
/// On success the returned leaf outputs (and any cached payloads they
/// reference) are alive in the arena; everything transient has been
/// freed. On failure — filter error or abort — every payload the walk
/// produced is freed and the error carries the offending node.
#[tracing::instrument(skip_all, fields(nodes = tree.len()))]
pub(crate) fn run_walk<F: FnMut(&ProgressData) -> bool>(
    tree: &mut FilterTree,
    arena: &mut StreamArena,
    params: &WalkParams,
    cancel: &CancelToken,
    progress: &mut ProgressData,
    pump: &mut F,
    sink: &mut dyn RefreshSink,
) -> PointflowResult<Vec<LeafOutput>> {
    let seeds = compute_seeds(tree, params.seed_strategy);

    progress.reset();
    progress.filters_total = seeds
        .iter()
        .map(|s| tree.subtree(*s).count())
        .sum::<usize>() as u32;

    let mut results: Vec<LeafOutput> = Vec::new();

    for &seed in &seeds {
        let mut levels: Vec<Level> = Vec::new();
        let order: Vec<(NodeId, usize)> = tree.subtree(seed).collect();

        for (node, depth) in order {
            pop_levels(&mut levels, depth, arena);
            let inputs: Vec<StreamHandle> = levels
                .last()
                .map(|l| l.outputs.clone())
                .unwrap_or_default();

            let label = tree
                .filter(node)
                .map(|f| f.label())
                .unwrap_or_default();
            progress.begin_node(node, label.clone());

            let is_leaf = tree.is_leaf(node);
            let cached = tree.node(node).and_then(|n| n.cache.clone());

            let outputs = match cached {
                Some(cache) => {
                    // Cache hit: pass through everything not blocked,
                    // then replay the cached self-produced payloads.
                    let block = tree
                        .filter(node)
                        .map(|f| f.block_mask())
                        .unwrap_or_default();
                    let mut outs: Vec<StreamHandle> = inputs
                        .iter()
                        .filter(|h| {
                            arena
                                .get(**h)
                                .is_some_and(|d| !block.contains(d.kind()))
                        })
                        .copied()
                        .collect();
                    outs.extend(cache);
                    outs
                }
                None => {
                    let n_objects: u64 = inputs
                        .iter()
                        .filter_map(|h| arena.get(*h))
                        .map(|d| d.n_objects())
                        .sum();
                    let estimate = tree
                        .filter(node)
                        .and_then(|f| f.cache_bytes(n_objects));
                    let cache_enabled = match params.cache_strategy {
                        CacheStrategy::Never => false,
                        CacheStrategy::DepthFirst => estimate.is_some_and(|bytes| {
                            arena.cached_bytes().saturating_add(bytes)
                                <= params.cache_budget_bytes
                        }),
                    };

                    let refreshed = {
                        let mut ctx = RefreshContext::new(node, cancel, progress, pump);
                        let Some(filter) = tree.filter_mut(node) else {
                            debug_assert!(false, "walked node vanished");
                            continue;
                        };
                        filter.refresh(&inputs, arena, &mut ctx)
                    };
                    let outs = match refreshed {
                        Ok(outs) => outs,
                        Err(source) => {
                            arena.free_transient();
                            return Err(PointflowError::Filter {
                                node,
                                label,
                                source,
                            });
                        }
                    };

                    #[cfg(debug_assertions)]
                    check_refresh_validity(tree, arena, node, &inputs, &outs);

                    if cache_enabled {
                        let own: Vec<StreamHandle> = outs
                            .iter()
                            .filter(|h| {
                                arena.producer(**h) == Some(node)
                                    && matches!(
                                        arena.owner(**h),
                                        Some(StreamOwner::Pending { .. })
                                    )
                            })
                            .copied()
                            .collect();
                        for &h in &own {
                            arena.mark_cached(h, node);
                        }
                        if let Some(n) = tree.node_mut(node) {
                            n.cache = Some(own);
                        }
                    }
                    outs
                }
            };

            // Yield to the host between filters; a stop here unwinds
            // exactly like a filter-reported abort.
            {
                let mut ctx = RefreshContext::new(node, cancel, progress, pump);
                if let Err(source) = ctx.tick() {
                    arena.free_transient();
                    return Err(PointflowError::Filter {
                        node,
                        label,
                        source,
                    });
                }
            }

            if let Some(filter) = tree.filter_mut(node) {
                for message in filter.console_messages() {
                    sink.console(&label, &message);
                }
                let bindings = filter.selection_bindings();
                if !bindings.is_empty() {
                    sink.bindings(node, &bindings);
                }
            }

            if is_leaf {
                // Ownership of non-cached payloads transfers to the
                // output collection; pops must no longer free them.
                for &h in &outputs {
                    arena.mark_output(h);
                }
                results.push(LeafOutput {
                    node,
                    streams: outputs,
                });
            } else {
                let mut fresh = SmallVec::new();
                for &h in &outputs {
                    if arena.mark_tracked(h) {
                        fresh.push(h);
                    }
                }
                levels.push(Level {
                    depth,
                    outputs,
                    fresh,
                });
            }

            progress.filters_done += 1;
        }

        pop_levels(&mut levels, 0, arena);
    }

    // Anything still pending was produced but neither forwarded, cached
    // nor delivered — a filter contract violation.
    let stray = arena.free_pending();
    debug_assert_eq!(stray, 0, "filter leaked {stray} untracked payloads");

    scrub_duplicates(&mut results);
    progress.current = None;
    Ok(results)
}

/// Topology notification: a no-output dry run of the payload flow from
/// the true roots (never seed-optimized), threading stream summaries so
/// filters with topology-dependent state can resynchronize. All results
/// are discarded.
pub(crate) fn dry_run_topology(tree: &mut FilterTree) {
    use crate::filter::StreamSummary;

    let order: Vec<(NodeId, usize)> = tree.pre_order().collect();
    let mut stack: Vec<(usize, Vec<StreamSummary>)> = Vec::new();
    for (node, depth) in order {
        while stack.last().is_some_and(|(d, _)| *d >= depth) {
            stack.pop();
        }
        let inputs = stack.last().map(|(_, v)| v.clone()).unwrap_or_default();
        let Some(filter) = tree.filter_mut(node) else {
            continue;
        };
        let outputs = filter.init_topology(&inputs);
        if !tree.is_leaf(node) {
            stack.push((depth, outputs));
        }
    }
}

/// Defensive de-duplication before handing outputs to sinks: a payload
/// reaching several leaves (a cached ancestor stream fanning out) is
/// kept in the first leaf's list only.
fn scrub_duplicates(results: &mut [LeafOutput]) {
    let mut seen: HashSet<StreamHandle> = HashSet::new();
    for leaf in results.iter_mut() {
        leaf.streams.retain(|h| seen.insert(*h));
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/walk.rs"]
mod tests;
