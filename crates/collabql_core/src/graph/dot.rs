use std::fmt;

use super::{ExecutionGraph, OperatorKind};

impl ExecutionGraph {
    /// Render the graph in graphviz dot format, one cluster per party.
    ///
    /// Output is deterministic for a given graph.
    pub fn dump_graphviz(&self) -> String {
        Graphviz(self).to_string()
    }
}

struct Graphviz<'a>(&'a ExecutionGraph);

impl fmt::Display for Graphviz<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.0;
        writeln!(f, "digraph G {{")?;

        for party in &graph.parties {
            writeln!(f, "  subgraph \"cluster_{}\" {{", escape(party))?;
            writeln!(f, "    label=\"{}\";", escape(party))?;
            for node in graph.nodes.iter().filter(|n| &n.party == party) {
                writeln!(
                    f,
                    "    n{} [label=\"{}\"];",
                    node.id,
                    escape(&node_label(node.id.0, &node.kind))
                )?;
            }
            writeln!(f, "  }}")?;
        }

        for node in &graph.nodes {
            let style = if matches!(node.kind, OperatorKind::Receive { .. }) {
                " [style=dashed]"
            } else {
                ""
            };
            for input in &node.inputs {
                writeln!(f, "  n{} -> n{}{};", input, node.id, style)?;
            }
        }

        for output in &graph.outputs {
            writeln!(
                f,
                "  n{} -> \"out:{}\" [style=dotted];",
                output.node,
                escape(&output.name)
            )?;
        }

        writeln!(f, "}}")
    }
}

fn node_label(id: usize, kind: &OperatorKind) -> String {
    match kind {
        OperatorKind::RunSql { sql, .. } => format!("{id}:RunSQL:{sql}"),
        OperatorKind::Send { to } => format!("{id}:Send:to={to}"),
        OperatorKind::Receive { from } => format!("{id}:Receive:from={from}"),
        OperatorKind::Aggregate {
            group_threshold: Some(threshold),
            ..
        } => format!("{id}:Aggregate:threshold={threshold}"),
        other => format!("{id}:{}", other.name()),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
