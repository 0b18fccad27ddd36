use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{CompileError, Result};
use crate::graph::{ExecutionGraph, NodeId};

/// Nodes of the execution graph owned by a single party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGraph {
    pub party: String,
    /// Node ids in ascending order.
    pub nodes: Vec<NodeId>,
}

impl SubGraph {
    pub fn new(party: impl Into<String>) -> Self {
        SubGraph {
            party: party.into(),
            nodes: Vec::new(),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Splits a checked execution graph into per-party sub-graphs.
pub trait PartitionStrategy {
    /// Partition the graph.
    ///
    /// Every participant gets an entry, even when it owns no nodes.
    fn partition(&self, graph: &ExecutionGraph) -> Result<BTreeMap<String, SubGraph>>;
}

/// Assign every node to the party it was tagged with during translation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaivePartition;

impl PartitionStrategy for NaivePartition {
    fn partition(&self, graph: &ExecutionGraph) -> Result<BTreeMap<String, SubGraph>> {
        let mut subs: BTreeMap<_, _> = graph
            .parties
            .iter()
            .map(|party| (party.clone(), SubGraph::new(party.clone())))
            .collect();

        for node in &graph.nodes {
            let sub = subs.get_mut(&node.party).ok_or_else(|| {
                CompileError::Partition(format!(
                    "node {} ({}) belongs to unknown party {}",
                    node.id,
                    node.kind.name(),
                    node.party
                ))
            })?;
            sub.nodes.push(node.id);
        }

        for sub in subs.values_mut() {
            sub.nodes.sort_unstable();
        }

        debug!(
            sizes = ?subs.iter().map(|(p, s)| (p.as_str(), s.len())).collect::<Vec<_>>(),
            "partitioned graph"
        );

        Ok(subs)
    }
}

/// Check that a partition covers the graph.
///
/// Every participant has exactly one slot, and every node sits in exactly
/// one slot, the one of the party it was placed on.
pub fn check_partition(graph: &ExecutionGraph, subs: &BTreeMap<String, SubGraph>) -> Result<()> {
    if !subs.keys().eq(graph.parties.iter()) {
        return Err(CompileError::Partition(format!(
            "sub-graphs for {:?} but participants are {:?}",
            subs.keys().collect::<Vec<_>>(),
            graph.parties
        )));
    }

    let mut assigned = vec![false; graph.nodes.len()];
    for (party, sub) in subs {
        if &sub.party != party {
            return Err(CompileError::Partition(format!(
                "sub-graph for {} stored under {party}",
                sub.party
            )));
        }
        if !sub.nodes.is_sorted() {
            return Err(CompileError::Partition(format!(
                "nodes of {party} not in ascending order"
            )));
        }

        for &id in &sub.nodes {
            let node = graph
                .node(id)
                .ok_or_else(|| CompileError::Partition(format!("unknown node {id} in {party}")))?;
            if &node.party != party {
                return Err(CompileError::Partition(format!(
                    "node {id} runs on {} but was assigned to {party}",
                    node.party
                )));
            }
            if std::mem::replace(&mut assigned[id.0], true) {
                return Err(CompileError::Partition(format!(
                    "node {id} assigned more than once"
                )));
            }
        }
    }

    if let Some(missing) = assigned.iter().position(|a| !a) {
        return Err(CompileError::Partition(format!(
            "node {} not assigned to any party",
            NodeId(missing)
        )));
    }

    Ok(())
}
