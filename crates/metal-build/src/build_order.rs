//! Build order computation using topological sort
//!
//! Orders the graph over ordering edges (module and project) plus composite
//! membership. Header edges never delay a node.
use crate::error::BuildError;
use crate::graph::{Graph, NodeId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;
use tracing::{debug, instrument};

/// A cycle among ordering edges, as node labels with the first repeated last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub cycle: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Circular module dependency detected: {}", self.cycle.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

impl From<CycleError> for BuildError {
    fn from(err: CycleError) -> Self {
        BuildError::Cycle { cycle: err.cycle }
    }
}

/// Topological order of a graph together with its scheduling relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedPlan {
    order: Vec<NodeId>,
    predecessors: Vec<Vec<NodeId>>,
    successors: Vec<Vec<NodeId>>,
}

impl OrderedPlan {
    /// Nodes in dispatch order
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Nodes that must be terminal before `id` runs
    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        &self.predecessors[id.index()]
    }

    /// Nodes waiting on `id`
    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        &self.successors[id.index()]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Find nodes that can run in parallel
    /// Returns waves where each wave only depends on earlier waves
    pub fn parallel_groups(&self) -> Vec<Vec<NodeId>> {
        let mut level = vec![0usize; self.predecessors.len()];
        let mut groups: Vec<Vec<NodeId>> = Vec::new();

        for id in &self.order {
            let wave = self.predecessors[id.index()]
                .iter()
                .map(|p| level[p.index()] + 1)
                .max()
                .unwrap_or(0);
            level[id.index()] = wave;
            if groups.len() <= wave {
                groups.resize_with(wave + 1, Vec::new);
            }
            groups[wave].push(*id);
        }

        // Sort groups for deterministic output
        for group in &mut groups {
            group.sort();
        }
        groups
    }
}

/// Compute the build order using Kahn's algorithm
///
/// Among ready nodes the lowest id (earliest declared) goes first, so the same
/// graph always yields the same plan.
#[instrument(skip_all, fields(nodes = graph.len()))]
pub fn order(graph: &Graph) -> Result<OrderedPlan, CycleError> {
    let len = graph.len();
    let mut predecessors = Vec::with_capacity(len);
    let mut successors = vec![Vec::new(); len];

    for id in graph.node_ids() {
        let preds = graph.ordering_predecessors(id);
        for pred in &preds {
            successors[pred.index()].push(id);
        }
        predecessors.push(preds);
    }

    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<NodeId>> = graph
        .node_ids()
        .filter(|id| in_degree[id.index()] == 0)
        .map(Reverse)
        .collect();
    let mut result = Vec::with_capacity(len);

    while let Some(Reverse(id)) = ready.pop() {
        result.push(id);
        for succ in &successors[id.index()] {
            let degree = &mut in_degree[succ.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(*succ));
            }
        }
    }

    // Check for cycles
    if result.len() != len {
        let cycle = find_cycle(graph, &predecessors, &in_degree);
        return Err(CycleError { cycle });
    }

    debug!(nodes = len, "build order computed");
    Ok(OrderedPlan {
        order: result,
        predecessors,
        successors,
    })
}

/// Find a cycle among the nodes Kahn's algorithm could not release
///
/// Every leftover node has a leftover predecessor, so walking predecessors
/// from any of them must revisit a node.
fn find_cycle(graph: &Graph, predecessors: &[Vec<NodeId>], in_degree: &[usize]) -> Vec<String> {
    let stuck = |id: &NodeId| in_degree[id.index()] > 0;
    let Some(start) = graph.node_ids().find(|id| stuck(id)) else {
        return vec!["unknown cycle".to_string()];
    };

    let mut path: Vec<NodeId> = Vec::new();
    let mut position: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut current = start;

    loop {
        if let Some(&pos) = position.get(&current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|id| graph.label(*id)).collect();
            cycle.push(graph.label(current));
            return cycle;
        }
        position.insert(current, path.len());
        path.push(current);

        match predecessors[current.index()].iter().find(|p| stuck(p)) {
            Some(next) => current = *next,
            None => return path.iter().map(|id| graph.label(*id)).collect(),
        }
    }
}
