//! Refresh seed computation: which subtree roots must the walk start
//! from, given cache validity, emit/block masks and tree topology.

use crate::foundation::core::{NodeId, StreamMask};
use crate::tree::FilterTree;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Seed selection strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// Always reseed at the tree roots. Correct, maximally expensive.
    Naive,
    /// Propagate emit/block masks against cache validity and start only
    /// where something new could still reach an output. Conservative:
    /// may over-select, never under-selects.
    #[default]
    MaskPropagation,
}

/// Compute the seed set for the current tree state.
///
/// The result never contains an ancestor/descendant pair, and every
/// leaf of the forest lies inside exactly one seed's subtree.
pub(crate) fn compute_seeds(tree: &FilterTree, strategy: SeedStrategy) -> Vec<NodeId> {
    let seeds = match strategy {
        SeedStrategy::Naive => tree.roots().to_vec(),
        SeedStrategy::MaskPropagation => mask_propagation_seeds(tree),
    };
    tracing::debug!(
        strategy = ?strategy,
        seeds = seeds.len(),
        nodes = tree.len(),
        "computed refresh seeds"
    );
    seeds
}

/// Per-node contribution of a node's children to its accumulated block
/// mask: the intersection of the children's accumulated block masks,
/// gated on every child holding a valid cache. Childless nodes and
/// nodes with any uncached child contribute nothing — the conservative
/// boundary reading (prefers over-computation).
fn child_contribution(
    tree: &FilterTree,
    node: NodeId,
    acc_block: &HashMap<NodeId, StreamMask>,
) -> StreamMask {
    let children = tree.children(node);
    if children.is_empty() {
        return StreamMask::EMPTY;
    }
    if !children.iter().all(|c| tree.cache_valid(*c)) {
        return StreamMask::EMPTY;
    }
    let mut mask = StreamMask::ALL;
    for c in children {
        mask = mask.intersect(acc_block.get(c).copied().unwrap_or(StreamMask::EMPTY));
    }
    mask
}

fn mask_propagation_seeds(tree: &FilterTree) -> Vec<NodeId> {
    // Breadth-first order, preserving sibling order within a depth.
    let mut bfs: Vec<(NodeId, usize)> = tree.pre_order().collect();
    bfs.sort_by_key(|(_, depth)| *depth);

    // Accumulated emit, top-down: what can still arrive at (and leave)
    // each node from above, plus its own emissions.
    let mut acc_emit: HashMap<NodeId, StreamMask> = HashMap::with_capacity(bfs.len());
    for (id, _) in &bfs {
        let Some(filter) = tree.filter(*id) else { continue };
        let inherited = tree
            .parent(*id)
            .and_then(|p| acc_emit.get(&p).copied())
            .unwrap_or(StreamMask::EMPTY);
        let mask = inherited.minus(filter.block_mask()).union(filter.emit_mask());
        acc_emit.insert(*id, mask);
    }

    // Accumulated block, deepest first.
    let mut acc_block: HashMap<NodeId, StreamMask> = HashMap::with_capacity(bfs.len());
    for (id, _) in bfs.iter().rev() {
        let Some(filter) = tree.filter(*id) else { continue };
        let mask = filter
            .block_mask()
            .union(child_contribution(tree, *id, &acc_block));
        acc_block.insert(*id, mask);
    }

    // Seed selection, breadth-first: a node under an already chosen
    // seed is covered and never itself chosen.
    let mut chosen = Vec::new();
    let mut in_seed_subtree: HashSet<NodeId> = HashSet::new();
    for (id, _) in &bfs {
        if let Some(p) = tree.parent(*id)
            && in_seed_subtree.contains(&p)
        {
            in_seed_subtree.insert(*id);
            continue;
        }
        let is_seed = if tree.is_leaf(*id) {
            // Leaves always execute: they produce the final outputs.
            true
        } else {
            let emit = acc_emit.get(id).copied().unwrap_or(StreamMask::EMPTY);
            let below = child_contribution(tree, *id, &acc_block);
            !emit.intersect(below.complement()).is_empty()
        };
        if is_seed {
            chosen.push(*id);
            in_seed_subtree.insert(*id);
        }
    }
    chosen
}

#[cfg(test)]
#[path = "../../tests/unit/engine/seed.rs"]
mod tests;
