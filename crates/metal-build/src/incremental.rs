//! Incremental build planning
//!
//! Compares current fingerprints with the stored ones and decides which nodes
//! have to run again.

use crate::fingerprint::{FingerprintStore, Fingerprints};
use crate::graph::{Graph, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::{debug, instrument};

/// Why a node has to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RecompileReason {
    /// No stored fingerprint
    FirstBuild,
    /// The node's own inputs changed
    InputsChanged,
    /// Only something the node depends on changed
    DependenciesChanged,
    /// An expected output file is missing
    OutputMissing,
    /// A node it depends on is being rebuilt
    DependencyChanged { dependency: String },
    /// Rebuild requested
    Forced,
}

impl fmt::Display for RecompileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstBuild => f.write_str("first build"),
            Self::InputsChanged => f.write_str("inputs changed"),
            Self::DependenciesChanged => f.write_str("dependencies changed"),
            Self::OutputMissing => f.write_str("output missing"),
            Self::DependencyChanged { dependency } => write!(f, "{} changed", dependency),
            Self::Forced => f.write_str("forced"),
        }
    }
}

/// Nodes that must run, each with its reason
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    reasons: BTreeMap<NodeId, RecompileReason>,
}

impl DirtySet {
    /// Every node of the graph, for the same reason
    pub fn all(graph: &Graph, reason: RecompileReason) -> Self {
        Self {
            reasons: graph.node_ids().map(|id| (id, reason.clone())).collect(),
        }
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.reasons.contains_key(&id)
    }

    pub fn reason(&self, id: NodeId) -> Option<&RecompileReason> {
        self.reasons.get(&id)
    }

    /// Dirty nodes in id order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &RecompileReason)> {
        self.reasons.iter().map(|(id, reason)| (*id, reason))
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }
}

/// Compute the dirty set
///
/// A node is dirty when it has no stored entry, its fingerprint changed, one
/// of its expected outputs is missing, or anything it relates to through
/// header, ordering or membership relations is dirty.
#[instrument(skip_all, fields(nodes = graph.len()))]
pub fn dirty_set(
    graph: &Graph,
    fingerprints: &Fingerprints,
    previous: &FingerprintStore,
) -> DirtySet {
    let mut reasons = BTreeMap::new();

    for id in graph.node_ids() {
        let reason = match previous.get(&graph.key(id)) {
            None => Some(RecompileReason::FirstBuild),
            Some(entry) if entry.own != *fingerprints.own(id) => {
                Some(RecompileReason::InputsChanged)
            }
            Some(entry) if entry.fingerprint != *fingerprints.full(id) => {
                Some(RecompileReason::DependenciesChanged)
            }
            Some(_) if graph.expected_outputs(id).iter().any(|p| !p.exists()) => {
                Some(RecompileReason::OutputMissing)
            }
            Some(_) => None,
        };
        if let Some(reason) = reason {
            reasons.insert(id, reason);
        }
    }

    // Propagate forward to everything relating to a dirty node
    let mut queue: VecDeque<NodeId> = reasons.keys().copied().collect();
    while let Some(id) = queue.pop_front() {
        for dependent in graph.dependents(id) {
            if !reasons.contains_key(dependent) {
                reasons.insert(
                    *dependent,
                    RecompileReason::DependencyChanged {
                        dependency: graph.label(id),
                    },
                );
                queue.push_back(*dependent);
            }
        }
    }

    debug!(dirty = reasons.len(), total = graph.len(), "dirty set computed");
    DirtySet { reasons }
}
