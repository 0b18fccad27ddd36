//! Render single-party subtrees as SQL for the owning party's database.
//!
//! Each operator wraps its input as a derived table, so the generated text is
//! verbose but uniform across dialects. Scans read the physical reference
//! table and alias every column to its plan-unique name, which lets outer
//! operators refer to columns without qualification.
//!
//! Derived tables don't keep their row order, so a sort directly below a
//! projection or limit is rendered on the same SELECT as that operator.

use crate::catalog::{DbTable, DbType};
use crate::errors::{CompileError, Result, internal};
use crate::logical::expr::{AggregateExpr, Expression, UnaryOperator, is_identifier};
use crate::logical::operator::{JoinType, LogicalOperator, LogicalOrder};
use crate::resolver::EnginesInfo;

#[derive(Debug, Clone, PartialEq)]
pub struct PushdownQuery {
    pub sql: String,
    /// Reference tables read by the query, in first-use order.
    pub tables: Vec<DbTable>,
    /// Whether a group size threshold was rendered into the query.
    pub applied_group_threshold: bool,
}

#[derive(Debug)]
pub struct SqlRenderer<'a> {
    engines: &'a EnginesInfo,
    db_type: DbType,
    group_threshold: Option<u64>,
    tables: Vec<DbTable>,
    next_alias: usize,
    applied_group_threshold: bool,
}

impl<'a> SqlRenderer<'a> {
    pub fn new(engines: &'a EnginesInfo, db_type: DbType, group_threshold: Option<u64>) -> Self {
        SqlRenderer {
            engines,
            db_type,
            group_threshold,
            tables: Vec::new(),
            next_alias: 0,
            applied_group_threshold: false,
        }
    }

    pub fn render(mut self, op: &LogicalOperator) -> Result<PushdownQuery> {
        let sql = self.select(op)?;
        Ok(PushdownQuery {
            sql,
            tables: self.tables,
            applied_group_threshold: self.applied_group_threshold,
        })
    }

    fn quote(&self, ident: &str) -> String {
        self.db_type.quote_ident(ident)
    }

    fn subquery(&mut self, op: &LogicalOperator) -> Result<String> {
        let alias = self.next_alias;
        self.next_alias += 1;
        Ok(format!("({}) AS t{alias}", self.select(op)?))
    }

    fn select(&mut self, op: &LogicalOperator) -> Result<String> {
        Ok(match op {
            LogicalOperator::Scan(n) => {
                if !n.children.is_empty() {
                    return Err(internal!("Scan with inputs cannot be pushed down"));
                }
                let table = self.engines.scan_table(&n.node);
                let ref_table = self
                    .engines
                    .ref_table(&table)
                    .ok_or_else(|| CompileError::TableNotFound(table.to_string()))?;
                if !self.tables.contains(&ref_table.table) {
                    self.tables.push(ref_table.table.clone());
                }

                let columns = if n.node.columns.is_empty() {
                    "*".to_string()
                } else {
                    n.node
                        .columns
                        .iter()
                        .map(|c| format!("{} AS {}", self.quote(&c.name), self.quote(&c.alias)))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("SELECT {columns} FROM {}", ref_table.table.quoted(self.db_type))
            }
            LogicalOperator::Filter(n) => {
                let from = self.subquery(n.get_one_child_exact()?)?;
                format!(
                    "SELECT * FROM {from} WHERE {}",
                    self.expr(&n.node.predicate)?
                )
            }
            LogicalOperator::Project(n) => {
                let (from, order_by) = self.ordered_from(n.get_one_child_exact()?)?;
                let mut items = Vec::with_capacity(n.node.projections.len());
                for p in &n.node.projections {
                    items.push(format!("{} AS {}", self.expr(&p.expr)?, self.quote(&p.name)));
                }
                format!("SELECT {} FROM {from}{order_by}", items.join(", "))
            }
            LogicalOperator::Aggregate(n) => {
                let from = self.subquery(n.get_one_child_exact()?)?;
                let groups: Vec<_> = n.node.group_by.iter().map(|g| self.quote(g)).collect();
                let mut items = groups.clone();
                for agg in &n.node.aggregates {
                    items.push(self.aggregate(agg)?);
                }

                let mut sql = format!("SELECT {} FROM {from}", items.join(", "));
                if !groups.is_empty() {
                    sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
                    if let Some(threshold) = self.group_threshold {
                        sql.push_str(&format!(" HAVING COUNT(*) >= {threshold}"));
                        self.applied_group_threshold = true;
                    }
                }
                sql
            }
            LogicalOperator::Join(n) => {
                if n.node.join_type == JoinType::Full && !self.db_type.supports_full_outer_join() {
                    return Err(CompileError::UnsupportedOperator(format!(
                        "FULL OUTER JOIN on {}",
                        self.db_type
                    )));
                }
                let [left, right] = n.get_two_children_exact()?;
                let left = self.subquery(left)?;
                let right = self.subquery(right)?;
                let on = if n.node.conditions.is_empty() {
                    "1 = 1".to_string()
                } else {
                    n.node
                        .conditions
                        .iter()
                        .map(|c| format!("{} = {}", self.quote(&c.left), self.quote(&c.right)))
                        .collect::<Vec<_>>()
                        .join(" AND ")
                };
                format!(
                    "SELECT * FROM {left} {} {right} ON {on}",
                    n.node.join_type.as_sql()
                )
            }
            LogicalOperator::Union(n) => {
                if n.children.is_empty() {
                    return Err(internal!("Union without inputs"));
                }
                let sep = if n.node.all { " UNION ALL " } else { " UNION " };
                let mut branches = Vec::with_capacity(n.children.len());
                for child in &n.children {
                    branches.push(format!("SELECT * FROM {}", self.subquery(child)?));
                }
                branches.join(sep)
            }
            LogicalOperator::Order(n) => {
                let from = self.subquery(n.get_one_child_exact()?)?;
                format!("SELECT * FROM {from}{}", self.order_by(&n.node))
            }
            LogicalOperator::Limit(n) => {
                let child = n.get_one_child_exact()?;
                let mut sql = match child {
                    // Both render as a single SELECT ending in any ORDER BY.
                    LogicalOperator::Order(_) | LogicalOperator::Project(_) => self.select(child)?,
                    _ => format!("SELECT * FROM {}", self.subquery(child)?),
                };
                sql.push_str(&format!(" LIMIT {}", n.node.limit));
                if n.node.offset > 0 {
                    sql.push_str(&format!(" OFFSET {}", n.node.offset));
                }
                sql
            }
            LogicalOperator::Window(_) | LogicalOperator::Apply(_) => {
                return Err(CompileError::UnsupportedOperator(op.name().to_string()));
            }
        })
    }

    /// FROM clause for `child`, with the ORDER BY of a sort input lifted
    /// out for the enclosing SELECT.
    fn ordered_from(&mut self, child: &LogicalOperator) -> Result<(String, String)> {
        match child {
            LogicalOperator::Order(n) => {
                let from = self.subquery(n.get_one_child_exact()?)?;
                Ok((from, self.order_by(&n.node)))
            }
            _ => Ok((self.subquery(child)?, String::new())),
        }
    }

    fn order_by(&self, order: &LogicalOrder) -> String {
        let keys = order
            .exprs
            .iter()
            .map(|e| {
                let dir = if e.desc { " DESC" } else { "" };
                format!("{}{dir}", self.quote(&e.column))
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(" ORDER BY {keys}")
    }

    fn aggregate(&self, agg: &AggregateExpr) -> Result<String> {
        let distinct = if agg.distinct { "DISTINCT " } else { "" };
        let arg = match &agg.arg {
            Some(arg) => self.expr(arg)?,
            None => "*".to_string(),
        };
        Ok(format!(
            "{}({distinct}{arg}) AS {}",
            agg.func.as_sql(),
            self.quote(&agg.name)
        ))
    }

    fn expr(&self, expr: &Expression) -> Result<String> {
        Ok(match expr {
            Expression::Column(name) => self.quote(name),
            Expression::Literal(v) => v.to_string(),
            Expression::Binary { op, left, right } => {
                format!("({} {} {})", self.expr(left)?, op.as_sql(), self.expr(right)?)
            }
            Expression::Unary { op, expr } => {
                let inner = self.expr(expr)?;
                match op {
                    UnaryOperator::Not => format!("(NOT {inner})"),
                    UnaryOperator::Negate => format!("(-{inner})"),
                    UnaryOperator::IsNull => format!("({inner} IS NULL)"),
                    UnaryOperator::IsNotNull => format!("({inner} IS NOT NULL)"),
                }
            }
            Expression::Function { name, args } => {
                if !is_identifier(name) {
                    return Err(CompileError::InvalidFunctionName(name.clone()));
                }
                let mut rendered = Vec::with_capacity(args.len());
                for arg in args {
                    rendered.push(self.expr(arg)?);
                }
                format!("{name}({})", rendered.join(", "))
            }
        })
    }
}
