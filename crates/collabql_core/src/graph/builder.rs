use std::collections::HashMap;

use super::{ExecutionGraph, ExecutionNode, NodeId, OperatorKind, OutputColumn};
use crate::catalog::Field;
use crate::errors::{Result, internal};

/// Incrementally builds an execution graph.
///
/// Nodes get sequential ids, so inputs always have lower ids than the nodes
/// reading them.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<ExecutionNode>,
    /// (source node, receiving party) -> receive node
    transfers: HashMap<(NodeId, String), NodeId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        party: impl Into<String>,
        kind: OperatorKind,
        inputs: Vec<NodeId>,
        outputs: Vec<Field>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ExecutionNode {
            id,
            party: party.into(),
            kind,
            inputs,
            outputs,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&ExecutionNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| internal!("Missing node for id: {id}"))
    }

    /// Make the output of `source` available on `to`.
    ///
    /// Returns `source` if it already runs on `to`, otherwise the receiving
    /// half of a transfer. Transfers are reused when the same output moves to
    /// the same party more than once.
    pub fn transfer(&mut self, source: NodeId, to: &str) -> Result<NodeId> {
        let node = self.node(source)?;
        if node.party == to {
            return Ok(source);
        }
        if let Some(id) = self.transfers.get(&(source, to.to_string())) {
            return Ok(*id);
        }

        let from = node.party.clone();
        let outputs = node.outputs.clone();

        let send = self.add_node(
            from.clone(),
            OperatorKind::Send { to: to.to_string() },
            vec![source],
            outputs.clone(),
        );
        let recv = self.add_node(to, OperatorKind::Receive { from }, vec![send], outputs);
        self.transfers.insert((source, to.to_string()), recv);

        Ok(recv)
    }

    /// Finish the graph, declaring every output column of `root` as a result.
    pub fn build(self, root: NodeId, parties: Vec<String>) -> Result<ExecutionGraph> {
        let outputs = self
            .node(root)?
            .outputs
            .iter()
            .map(|f| OutputColumn {
                name: f.name.clone(),
                node: root,
            })
            .collect();

        Ok(ExecutionGraph {
            nodes: self.nodes,
            outputs,
            parties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit() -> OperatorKind {
        OperatorKind::Limit {
            limit: 1,
            offset: 0,
        }
    }

    #[test]
    fn transfer_reused() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node("alice", limit(), Vec::new(), vec![Field::new("x", None)]);

        assert_eq!(a, builder.transfer(a, "alice").unwrap());

        let r1 = builder.transfer(a, "bob").unwrap();
        let r2 = builder.transfer(a, "bob").unwrap();
        assert_eq!(r1, r2);

        let recv = builder.node(r1).unwrap();
        assert_eq!("bob", recv.party);
        assert_eq!(vec![Field::new("x", None)], recv.outputs);

        let send = builder.node(recv.inputs[0]).unwrap();
        assert_eq!("alice", send.party);
        assert_eq!(vec![a], send.inputs);

        let graph = builder
            .build(r1, vec!["alice".to_string(), "bob".to_string()])
            .unwrap();
        assert_eq!(3, graph.nodes.len());
        assert_eq!(vec!["x"], graph.output_names().collect::<Vec<_>>());
    }
}
