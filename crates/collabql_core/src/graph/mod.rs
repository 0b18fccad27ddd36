//! Cross-party execution graph.
//!
//! A DAG of operators where every node is tagged with the party that executes
//! it. Data only crosses parties through a `Send`/`Receive` pair.

pub mod builder;
pub mod checker;
pub mod dot;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{DbTable, DbType, Field};
use crate::logical::expr::{AggregateExpr, Expression};
use crate::logical::operator::{JoinCondition, JoinType, NamedExpr, OrderByExpr};

/// ID of a node in the execution graph.
///
/// Unique within a graph, and equal to the node's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperatorKind {
    /// Query pushed down to the party's own database.
    RunSql {
        sql: String,
        db_type: DbType,
        tables: Vec<DbTable>,
    },
    Filter {
        predicate: Expression,
    },
    Project {
        projections: Vec<NamedExpr>,
    },
    Aggregate {
        group_by: Vec<String>,
        aggregates: Vec<AggregateExpr>,
        /// Groups smaller than this must not be revealed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_threshold: Option<u64>,
        #[serde(default)]
        reveal_group_mark: bool,
    },
    Join {
        join_type: JoinType,
        conditions: Vec<JoinCondition>,
    },
    Union {
        all: bool,
    },
    Sort {
        exprs: Vec<OrderByExpr>,
    },
    Limit {
        limit: u64,
        offset: u64,
    },
    /// Sending half of a transfer.
    Send {
        to: String,
    },
    /// Receiving half of a transfer. Its single input is the matching `Send`.
    Receive {
        from: String,
    },
}

impl OperatorKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RunSql { .. } => "RunSQL",
            Self::Filter { .. } => "Filter",
            Self::Project { .. } => "Project",
            Self::Aggregate { .. } => "Aggregate",
            Self::Join { .. } => "Join",
            Self::Union { .. } => "Union",
            Self::Sort { .. } => "Sort",
            Self::Limit { .. } => "Limit",
            Self::Send { .. } => "Send",
            Self::Receive { .. } => "Receive",
        }
    }

    pub const fn is_transfer(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Receive { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionNode {
    pub id: NodeId,
    /// Party executing this node.
    pub party: String,
    #[serde(flatten)]
    pub kind: OperatorKind,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<Field>,
}

/// A result column and the node producing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub nodes: Vec<ExecutionNode>,
    pub outputs: Vec<OutputColumn>,
    /// Sorted participant party codes.
    pub parties: Vec<String>,
}

impl ExecutionGraph {
    pub fn node(&self, id: NodeId) -> Option<&ExecutionNode> {
        self.nodes.get(id.0)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }

    /// Consumers of each node, indexed by node id.
    pub fn successors(&self) -> Vec<Vec<NodeId>> {
        let mut succ = vec![Vec::new(); self.nodes.len()];
        for node in &self.nodes {
            for input in &node.inputs {
                if let Some(list) = succ.get_mut(input.0) {
                    list.push(node.id);
                }
            }
        }
        succ
    }
}
