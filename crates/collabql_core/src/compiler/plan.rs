use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::DataType;
use crate::errors::{Result, internal};
use crate::graph::{ExecutionGraph, ExecutionNode};
use crate::optimizer::mapper::{ExecutionPlan, SchedulingPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DataType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSchema {
    pub columns: Vec<ResultColumn>,
}

/// The fragment of a compiled plan a single party executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubGraphPlan {
    /// Nodes keyed by their id.
    pub nodes: BTreeMap<String, ExecutionNode>,
    pub policy: SchedulingPolicy,
    /// Hex md5 over the nodes and policy, letting peers confirm they hold
    /// matching fragments.
    pub graph_checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainInfo {
    pub exe_graph_dot: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub may_affected_by_group_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPlan {
    pub schema: ResultSchema,
    /// Participant party codes, sorted.
    pub parties: Vec<String>,
    pub sub_graphs: BTreeMap<String, SubGraphPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain: Option<ExplainInfo>,
    #[serde(default)]
    pub warning: Warning,
}

/// Assemble the compiled plan from a graph and the schedule of every party.
///
/// Explain output and warnings are left empty.
pub fn build_compiled_plan(
    graph: &ExecutionGraph,
    exec_plans: &BTreeMap<String, ExecutionPlan>,
) -> Result<CompiledPlan> {
    let mut columns = Vec::with_capacity(graph.outputs.len());
    for output in &graph.outputs {
        let node = graph
            .node(output.node)
            .ok_or_else(|| internal!("Missing output node {}", output.node))?;
        let dtype = node
            .outputs
            .iter()
            .find(|f| f.name == output.name)
            .and_then(|f| f.datatype);
        columns.push(ResultColumn {
            name: output.name.clone(),
            dtype,
        });
    }

    let mut sub_graphs = BTreeMap::new();
    for (party, exec_plan) in exec_plans {
        let mut nodes = BTreeMap::new();
        for id in &exec_plan.nodes {
            let node = graph
                .node(*id)
                .ok_or_else(|| internal!("Missing node {id} for party {party}"))?;
            nodes.insert(id.to_string(), node.clone());
        }

        let graph_checksum = graph_checksum(&nodes, &exec_plan.policy)?;
        sub_graphs.insert(
            party.clone(),
            SubGraphPlan {
                nodes,
                policy: exec_plan.policy.clone(),
                graph_checksum,
            },
        );
    }

    Ok(CompiledPlan {
        schema: ResultSchema { columns },
        parties: graph.parties.clone(),
        sub_graphs,
        explain: None,
        warning: Warning::default(),
    })
}

fn graph_checksum(
    nodes: &BTreeMap<String, ExecutionNode>,
    policy: &SchedulingPolicy,
) -> Result<String> {
    let buf = serde_json::to_vec(&(nodes, policy))?;
    Ok(format!("{:x}", md5::compute(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Field;
    use crate::graph::builder::GraphBuilder;
    use crate::graph::{NodeId, OperatorKind};
    use crate::optimizer::mapper::GraphMapper;
    use crate::optimizer::partitioner::{NaivePartition, PartitionStrategy};

    fn graph() -> ExecutionGraph {
        let mut builder = GraphBuilder::new();
        let b = builder.add_node(
            "bob",
            OperatorKind::Limit {
                limit: 10,
                offset: 0,
            },
            Vec::new(),
            vec![
                Field::new("x", Some(DataType::Int64)),
                Field::new("y", None),
            ],
        );
        let r = builder.transfer(b, "alice").unwrap();
        builder
            .build(r, vec!["alice".to_string(), "bob".to_string()])
            .unwrap()
    }

    fn compiled(graph: &ExecutionGraph) -> CompiledPlan {
        let subs = NaivePartition.partition(graph).unwrap();
        let plans = GraphMapper::default().map_all(graph, &subs).unwrap();
        build_compiled_plan(graph, &plans).unwrap()
    }

    #[test]
    fn assemble() {
        let graph = graph();
        let plan = compiled(&graph);

        assert_eq!(
            vec![
                ResultColumn {
                    name: "x".to_string(),
                    dtype: Some(DataType::Int64),
                },
                ResultColumn {
                    name: "y".to_string(),
                    dtype: None,
                },
            ],
            plan.schema.columns
        );
        assert_eq!(vec!["alice", "bob"], plan.parties);
        assert!(plan.explain.is_none());
        assert!(!plan.warning.may_affected_by_group_threshold);

        let bob = &plan.sub_graphs["bob"];
        assert_eq!(vec!["0", "1"], bob.nodes.keys().collect::<Vec<_>>());
        assert_eq!(NodeId(1), bob.nodes["1"].id);
        assert_eq!(32, bob.graph_checksum.len());

        let alice = &plan.sub_graphs["alice"];
        assert_eq!(vec!["2"], alice.nodes.keys().collect::<Vec<_>>());
        assert_ne!(alice.graph_checksum, bob.graph_checksum);
    }

    #[test]
    fn checksum_stable() {
        let graph = graph();
        let first = compiled(&graph);
        let second = compiled(&graph);
        assert_eq!(first, second);

        let mut changed = graph.clone();
        changed.nodes[0].kind = OperatorKind::Limit {
            limit: 11,
            offset: 0,
        };
        let third = compiled(&changed);
        assert_ne!(
            first.sub_graphs["bob"].graph_checksum,
            third.sub_graphs["bob"].graph_checksum
        );
        assert_eq!(
            first.sub_graphs["alice"].graph_checksum,
            third.sub_graphs["alice"].graph_checksum
        );
    }
}
