//! Whole-document persistence: the live tree, the stashes and an
//! opaque collaborator blob, as one pretty-printed JSON document.
//!
//! Loading is all-or-nothing: the document is parsed and a complete
//! replacement tree/stash set is built aside first; only when every
//! filter deserializes does it swap into the session. Failures leave
//! the session untouched and report human-readable messages through
//! the error stream.

use crate::filter::{FilterState, build_filter};
use crate::foundation::core::NodeId;
use crate::foundation::error::{PointflowError, PointflowResult};
use crate::session::AnalysisSession;
use crate::tree::FilterTree;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Current document format version.
pub const STATE_VERSION: u32 = 1;

/// One serialized filter node with its nested children.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeState {
    /// The filter block.
    #[serde(flatten)]
    pub filter: FilterState,
    /// Child subtrees, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeState>,
}

/// One serialized stash slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StashState {
    /// Stash name, unique within the document.
    pub name: String,
    /// The stashed subtree's roots.
    pub tree: Vec<NodeState>,
}

/// The persisted document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateDocument {
    /// Format version.
    pub version: u32,
    /// Live tree roots.
    pub tree: Vec<NodeState>,
    /// Stash slots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stashes: Vec<StashState>,
    /// Camera/effect state owned by collaborators, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collaborator: Option<serde_json::Value>,
}

fn node_state(tree: &FilterTree, id: NodeId) -> Option<NodeState> {
    let filter = tree.filter(id)?.state();
    let children = tree
        .children(id)
        .iter()
        .filter_map(|c| node_state(tree, *c))
        .collect();
    Some(NodeState { filter, children })
}

pub(crate) fn tree_to_states(tree: &FilterTree) -> Vec<NodeState> {
    tree.roots()
        .iter()
        .filter_map(|r| node_state(tree, *r))
        .collect()
}

fn add_state(
    tree: &mut FilterTree,
    state: &NodeState,
    parent: Option<NodeId>,
    errors: &mut Vec<String>,
) -> PointflowResult<()> {
    let filter = build_filter(&state.filter).inspect_err(|e| {
        errors.push(format!(
            "cannot restore '{}' filter: {e}",
            state.filter.kind
        ));
    })?;
    let id = tree.insert(filter, parent)?;
    for child in &state.children {
        add_state(tree, child, Some(id), errors)?;
    }
    Ok(())
}

pub(crate) fn tree_from_states(
    states: &[NodeState],
    errors: &mut Vec<String>,
) -> PointflowResult<FilterTree> {
    let mut tree = FilterTree::new();
    for root in states {
        add_state(&mut tree, root, None, errors)?;
    }
    Ok(tree)
}

impl AnalysisSession {
    /// Capture the current document.
    pub fn state_document(&self) -> StateDocument {
        StateDocument {
            version: STATE_VERSION,
            tree: tree_to_states(self.tree()),
            stashes: self
                .stash_states()
                .map(|(name, tree)| StashState {
                    name: name.to_owned(),
                    tree: tree_to_states(tree),
                })
                .collect(),
            collaborator: self.collaborator_state().cloned(),
        }
    }

    /// Serialize the whole session state as pretty JSON.
    pub fn save_state<W: Write>(&self, writer: W) -> PointflowResult<()> {
        serde_json::to_writer_pretty(writer, &self.state_document())
            .map_err(|e| PointflowError::state(format!("cannot write state: {e}")))
    }

    /// Load a state document, replacing the live tree, stashes and
    /// collaborator blob — but only if the entire document restores.
    ///
    /// On failure the session is completely unchanged and `errors`
    /// holds at least one message. With `strip_hazardous` set, any
    /// hazardous filter (and its subtree) is removed from the restored
    /// tree and stashes before they are installed.
    pub fn load_state<R: Read>(
        &mut self,
        reader: R,
        errors: &mut Vec<String>,
        strip_hazardous: bool,
    ) -> PointflowResult<()> {
        let doc: StateDocument = match serde_json::from_reader(reader) {
            Ok(doc) => doc,
            Err(e) => {
                errors.push(format!("cannot parse state document: {e}"));
                return Err(PointflowError::state("unparseable state document"));
            }
        };
        if doc.version > STATE_VERSION {
            errors.push(format!(
                "state document version {} is newer than supported {}",
                doc.version, STATE_VERSION
            ));
            return Err(PointflowError::state("unsupported state version"));
        }

        let mut tree = tree_from_states(&doc.tree, errors)?;

        let mut stashes: Vec<(String, FilterTree)> = Vec::with_capacity(doc.stashes.len());
        for stash in &doc.stashes {
            if stashes.iter().any(|(name, _)| *name == stash.name) {
                errors.push(format!("duplicate stash name '{}'", stash.name));
                return Err(PointflowError::state("duplicate stash name"));
            }
            let sub = tree_from_states(&stash.tree, errors)?;
            stashes.push((stash.name.clone(), sub));
        }

        if strip_hazardous {
            let (removed, _) = tree.strip_hazardous();
            let mut stripped = removed;
            for (_, sub) in &mut stashes {
                let (n, _) = sub.strip_hazardous();
                stripped += n;
            }
            if stripped > 0 {
                tracing::info!(nodes = stripped, "stripped hazardous filters on load");
            }
        }

        self.replace_all(tree, stashes, doc.collaborator);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/state.rs"]
mod tests;
