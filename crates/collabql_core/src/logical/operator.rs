use serde::{Deserialize, Serialize};

use super::expr::{AggregateExpr, Expression};
use crate::catalog::{DataType, Field};
use crate::errors::{Result, internal};

/// Wrapper around nodes in the logical plan holding the node's inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node<N> {
    /// Node specific logic.
    #[serde(flatten)]
    pub node: N,
    /// Inputs to this node.
    #[serde(default)]
    pub children: Vec<LogicalOperator>,
}

impl<N> Node<N> {
    pub fn new(node: N, children: Vec<LogicalOperator>) -> Self {
        Node { node, children }
    }

    pub fn get_one_child_exact(&self) -> Result<&LogicalOperator> {
        if self.children.len() != 1 {
            return Err(internal!(
                "Expected 1 child to operator, have {}",
                self.children.len()
            ));
        }
        Ok(&self.children[0])
    }

    pub fn get_two_children_exact(&self) -> Result<[&LogicalOperator; 2]> {
        if self.children.len() != 2 {
            return Err(internal!(
                "Expected 2 children to operator, have {}",
                self.children.len()
            ));
        }
        Ok([&self.children[0], &self.children[1]])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanColumn {
    /// Column name in the table.
    pub name: String,
    /// Plan-unique output name.
    pub alias: String,
    #[serde(default)]
    pub datatype: Option<DataType>,
}

/// Read from a table.
///
/// Only childless scans are data sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalScan {
    /// Database name, defaults to the session's database when empty.
    #[serde(default)]
    pub db_name: String,
    pub table_name: String,
    pub columns: Vec<ScanColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalFilter {
    pub predicate: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedExpr {
    pub expr: Expression,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalProject {
    pub projections: Vec<NamedExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalAggregate {
    /// Grouping columns, passed through to the output.
    #[serde(default)]
    pub group_by: Vec<String>,
    pub aggregates: Vec<AggregateExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL OUTER JOIN",
        }
    }
}

/// Equality between a column from the left input and one from the right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalJoin {
    pub join_type: JoinType,
    pub conditions: Vec<JoinCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalUnion {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByExpr {
    pub column: String,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalOrder {
    pub exprs: Vec<OrderByExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalLimit {
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalWindow {
    pub function: String,
    #[serde(default)]
    pub partition_by: Vec<String>,
    pub name: String,
}

/// Correlated subquery that the optimizer failed to decorrelate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalApply {
    pub join_type: JoinType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    Scan(Node<LogicalScan>),
    Filter(Node<LogicalFilter>),
    Project(Node<LogicalProject>),
    Aggregate(Node<LogicalAggregate>),
    Join(Node<LogicalJoin>),
    Union(Node<LogicalUnion>),
    Order(Node<LogicalOrder>),
    Limit(Node<LogicalLimit>),
    Window(Node<LogicalWindow>),
    Apply(Node<LogicalApply>),
}

impl LogicalOperator {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "Scan",
            Self::Filter(_) => "Filter",
            Self::Project(_) => "Project",
            Self::Aggregate(_) => "Aggregate",
            Self::Join(_) => "Join",
            Self::Union(_) => "Union",
            Self::Order(_) => "Order",
            Self::Limit(_) => "Limit",
            Self::Window(_) => "Window",
            Self::Apply(_) => "Apply",
        }
    }

    pub fn children(&self) -> &[LogicalOperator] {
        match self {
            Self::Scan(n) => &n.children,
            Self::Filter(n) => &n.children,
            Self::Project(n) => &n.children,
            Self::Aggregate(n) => &n.children,
            Self::Join(n) => &n.children,
            Self::Union(n) => &n.children,
            Self::Order(n) => &n.children,
            Self::Limit(n) => &n.children,
            Self::Window(n) => &n.children,
            Self::Apply(n) => &n.children,
        }
    }

    /// Walk the plan depth first, calling `pre` on the way down.
    pub fn walk_pre<'a, F>(&'a self, pre: &mut F) -> Result<()>
    where
        F: FnMut(&'a LogicalOperator) -> Result<()>,
    {
        pre(self)?;
        for child in self.children() {
            child.walk_pre(pre)?;
        }
        Ok(())
    }

    /// Output columns of this operator.
    pub fn output_schema(&self) -> Result<Vec<Field>> {
        Ok(match self {
            Self::Scan(n) => n
                .node
                .columns
                .iter()
                .map(|c| Field::new(c.alias.clone(), c.datatype))
                .collect(),
            Self::Filter(n) => n.get_one_child_exact()?.output_schema()?,
            Self::Order(n) => n.get_one_child_exact()?.output_schema()?,
            Self::Limit(n) => n.get_one_child_exact()?.output_schema()?,
            Self::Project(n) => {
                let input = n.get_one_child_exact()?.output_schema()?;
                n.node
                    .projections
                    .iter()
                    .map(|p| Field::new(p.name.clone(), p.expr.datatype(&input)))
                    .collect()
            }
            Self::Aggregate(n) => {
                let input = n.get_one_child_exact()?.output_schema()?;
                let mut fields =
                    Vec::with_capacity(n.node.group_by.len() + n.node.aggregates.len());
                for group in &n.node.group_by {
                    let datatype = input
                        .iter()
                        .find(|f| &f.name == group)
                        .and_then(|f| f.datatype);
                    fields.push(Field::new(group.clone(), datatype));
                }
                for agg in &n.node.aggregates {
                    fields.push(Field::new(agg.name.clone(), agg.datatype(&input)));
                }
                fields
            }
            Self::Join(n) => {
                let [left, right] = n.get_two_children_exact()?;
                let mut fields = left.output_schema()?;
                fields.extend(right.output_schema()?);
                fields
            }
            Self::Apply(n) => {
                let [left, right] = n.get_two_children_exact()?;
                let mut fields = left.output_schema()?;
                fields.extend(right.output_schema()?);
                fields
            }
            Self::Union(n) => match n.children.first() {
                Some(first) => first.output_schema()?,
                None => return Err(internal!("Union without inputs")),
            },
            Self::Window(n) => {
                let mut fields = n.get_one_child_exact()?.output_schema()?;
                fields.push(Field::new(n.node.name.clone(), None));
                fields
            }
        })
    }
}

/// Destination of a `SELECT ... INTO` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntoOpt {
    pub party_code: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Optimized logical plan for a single statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalPlan {
    pub root: LogicalOperator,
    #[serde(default)]
    pub into: Option<IntoOpt>,
}

impl LogicalPlan {
    pub fn new(root: LogicalOperator) -> Self {
        LogicalPlan { root, into: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::expr::AggregateFunction;

    fn scan(table: &str, cols: &[(&str, DataType)]) -> LogicalOperator {
        LogicalOperator::Scan(Node::new(
            LogicalScan {
                db_name: String::new(),
                table_name: table.to_string(),
                columns: cols
                    .iter()
                    .map(|(name, dt)| ScanColumn {
                        name: name.to_string(),
                        alias: format!("{table}.{name}"),
                        datatype: Some(*dt),
                    })
                    .collect(),
            },
            Vec::new(),
        ))
    }

    #[test]
    fn aggregate_schema() {
        let plan = LogicalOperator::Aggregate(Node::new(
            LogicalAggregate {
                group_by: vec!["ta.k".to_string()],
                aggregates: vec![AggregateExpr {
                    func: AggregateFunction::Sum,
                    arg: Some(Expression::column("ta.v")),
                    distinct: false,
                    name: "sum_v".to_string(),
                }],
            },
            vec![scan("ta", &[("k", DataType::String), ("v", DataType::Int64)])],
        ));

        let schema = plan.output_schema().unwrap();
        assert_eq!(
            vec![
                Field::new("ta.k", Some(DataType::String)),
                Field::new("sum_v", Some(DataType::Int64)),
            ],
            schema
        );
    }

    #[test]
    fn wrong_arity() {
        let plan = LogicalOperator::Filter(Node::new(
            LogicalFilter {
                predicate: Expression::column("x"),
            },
            Vec::new(),
        ));
        assert!(plan.output_schema().is_err());
    }

    #[test]
    fn deserialize_plan() {
        let json = r#"{
            "root": {
                "limit": {
                    "limit": 10,
                    "children": [{
                        "scan": {
                            "table_name": "ta",
                            "columns": [{"name": "id", "alias": "ta.id"}]
                        }
                    }]
                }
            }
        }"#;
        let plan: LogicalPlan = serde_json::from_str(json).unwrap();
        assert_eq!("Limit", plan.root.name());
        assert_eq!("Scan", plan.root.children()[0].name());
        assert!(plan.into.is_none());
    }
}
