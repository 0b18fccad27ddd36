use std::collections::VecDeque;

use tracing::debug;

use super::{ExecutionGraph, ExecutionNode, OperatorKind};
use crate::errors::{CompileError, GraphRule, Result};

/// Validates structural and locality invariants of a translated graph.
///
/// This is the only place structural defects are caught, later stages assume
/// a graph that passed.
#[derive(Debug, Default)]
pub struct GraphChecker;

impl GraphChecker {
    pub fn new() -> Self {
        GraphChecker
    }

    pub fn check(&self, graph: &ExecutionGraph) -> Result<()> {
        check_parties(graph)?;
        for (idx, node) in graph.nodes.iter().enumerate() {
            check_node(graph, idx, node)?;
        }
        check_acyclic(graph)?;
        check_transfers(graph)?;
        check_outputs(graph)?;

        debug!(nodes = graph.nodes.len(), "graph check passed");

        Ok(())
    }
}

fn invalid(rule: GraphRule, detail: String) -> CompileError {
    CompileError::InvalidGraph { rule, detail }
}

fn is_participant(graph: &ExecutionGraph, party: &str) -> bool {
    graph
        .parties
        .binary_search_by(|p| p.as_str().cmp(party))
        .is_ok()
}

fn check_parties(graph: &ExecutionGraph) -> Result<()> {
    if !graph.parties.windows(2).all(|w| w[0] < w[1]) {
        return Err(invalid(
            GraphRule::UnsortedParties,
            format!("parties: {:?}", graph.parties),
        ));
    }
    Ok(())
}

fn check_node(graph: &ExecutionGraph, idx: usize, node: &ExecutionNode) -> Result<()> {
    if node.id.0 != idx {
        return Err(invalid(
            GraphRule::NodeId,
            format!("node at index {idx} has id {}", node.id),
        ));
    }

    if !is_participant(graph, &node.party) {
        return Err(invalid(
            GraphRule::UnknownParty,
            format!("node {} ({}) party {}", node.id, node.kind.name(), node.party),
        ));
    }

    for input in &node.inputs {
        if input.0 >= graph.nodes.len() {
            return Err(invalid(
                GraphRule::DanglingInput,
                format!("node {} party {} reads missing node {input}", node.id, node.party),
            ));
        }
    }

    match &node.kind {
        OperatorKind::Send { to } => {
            if to == &node.party || !is_participant(graph, to) {
                return Err(invalid(
                    GraphRule::TransferPeer,
                    format!("send node {} party {} targets {to}", node.id, node.party),
                ));
            }
            if node.inputs.len() != 1 {
                return Err(invalid(
                    GraphRule::TransferPeer,
                    format!("send node {} has {} inputs", node.id, node.inputs.len()),
                ));
            }
        }
        OperatorKind::Receive { from } => {
            if from == &node.party || !is_participant(graph, from) {
                return Err(invalid(
                    GraphRule::TransferPeer,
                    format!("receive node {} party {} from {from}", node.id, node.party),
                ));
            }
            if node.inputs.len() != 1 {
                return Err(invalid(
                    GraphRule::TransferPeer,
                    format!("receive node {} has {} inputs", node.id, node.inputs.len()),
                ));
            }
        }
        _ => (),
    }

    Ok(())
}

fn check_acyclic(graph: &ExecutionGraph) -> Result<()> {
    let succ = graph.successors();
    let mut in_degree: Vec<_> = graph.nodes.iter().map(|n| n.inputs.len()).collect();
    let mut queue: VecDeque<_> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut visited = 0;
    while let Some(idx) = queue.pop_front() {
        visited += 1;
        for next in &succ[idx] {
            in_degree[next.0] -= 1;
            if in_degree[next.0] == 0 {
                queue.push_back(next.0);
            }
        }
    }

    if visited != graph.nodes.len() {
        let stuck: Vec<_> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(idx, _)| idx)
            .collect();
        return Err(invalid(
            GraphRule::Cycle,
            format!("nodes on or behind a cycle: {stuck:?}"),
        ));
    }

    Ok(())
}

/// Every edge between different parties must go from a `Send` to its
/// matching `Receive`, and a `Send` only feeds receives on its target.
fn check_transfers(graph: &ExecutionGraph) -> Result<()> {
    for node in &graph.nodes {
        for input in &node.inputs {
            let src = &graph.nodes[input.0];
            let cross = src.party != node.party;

            let valid = match (&src.kind, &node.kind) {
                (OperatorKind::Send { to }, OperatorKind::Receive { from }) => {
                    cross && to == &node.party && from == &src.party
                }
                (OperatorKind::Send { .. }, _) | (_, OperatorKind::Receive { .. }) => false,
                _ => !cross,
            };

            if !valid {
                let rule = if cross {
                    GraphRule::CrossPartyEdge
                } else {
                    GraphRule::TransferPeer
                };
                return Err(invalid(
                    rule,
                    format!(
                        "edge {} ({}, {}) -> {} ({}, {})",
                        src.id,
                        src.kind.name(),
                        src.party,
                        node.id,
                        node.kind.name(),
                        node.party
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn check_outputs(graph: &ExecutionGraph) -> Result<()> {
    for output in &graph.outputs {
        let node = graph.node(output.node).ok_or_else(|| {
            invalid(
                GraphRule::Output,
                format!("output {} refers to missing node {}", output.name, output.node),
            )
        })?;
        if !node.outputs.iter().any(|f| f.name == output.name) {
            return Err(invalid(
                GraphRule::Output,
                format!(
                    "output {} not produced by node {} party {}",
                    output.name, node.id, node.party
                ),
            ));
        }
    }
    Ok(())
}
