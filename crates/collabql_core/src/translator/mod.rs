//! Translate a logical plan into a cross-party execution graph.
//!
//! Subtrees that read from a single party (and a single storage backend) are
//! pushed down as one `RunSql` node. Operators combining inputs from
//! different parties become graph nodes, with transfers inserted for every
//! input that lives elsewhere.

pub mod pushdown;

use std::collections::BTreeSet;

use tracing::debug;

use self::pushdown::SqlRenderer;
use crate::catalog::DbType;
use crate::config::SecurityConfig;
use crate::errors::{CompileError, Result, internal};
use crate::graph::builder::GraphBuilder;
use crate::graph::{ExecutionGraph, NodeId, OperatorKind};
use crate::logical::operator::{JoinType, LogicalOperator, LogicalPlan};
use crate::resolver::{EnginesInfo, collect_data_sources};

/// Check the plan's `SELECT ... INTO` target against the issuer.
///
/// Returns true if the plan selects into the issuer, false if there's no
/// `INTO` clause.
pub fn select_into_issuer(plan: &LogicalPlan, issuer: &str) -> Result<bool> {
    match &plan.into {
        None => Ok(false),
        Some(into) if into.party_code == issuer => Ok(true),
        Some(into) => Err(CompileError::IssuerMismatch {
            expected: issuer.to_string(),
            got: into.party_code.clone(),
        }),
    }
}

fn check_supported(root: &LogicalOperator) -> Result<()> {
    root.walk_pre(&mut |op| match op {
        LogicalOperator::Window(_) | LogicalOperator::Apply(_) => {
            Err(CompileError::UnsupportedOperator(op.name().to_string()))
        }
        LogicalOperator::Scan(n) if !n.children.is_empty() => Err(
            CompileError::UnsupportedOperator("Scan with inputs".to_string()),
        ),
        LogicalOperator::Filter(n) => n.node.predicate.check_function_names(),
        LogicalOperator::Project(n) => n
            .node
            .projections
            .iter()
            .try_for_each(|p| p.expr.check_function_names()),
        LogicalOperator::Aggregate(n) => n
            .node
            .aggregates
            .iter()
            .filter_map(|agg| agg.arg.as_ref())
            .try_for_each(|arg| arg.check_function_names()),
        _ => Ok(()),
    })
}

/// Whether the storage backend can run every operator under `op`.
fn runs_on(op: &LogicalOperator, db_type: DbType) -> bool {
    let supported = match op {
        LogicalOperator::Join(n) => {
            n.node.join_type != JoinType::Full || db_type.supports_full_outer_join()
        }
        _ => true,
    };
    supported && op.children().iter().all(|child| runs_on(child, db_type))
}

#[derive(Debug)]
pub struct Translator<'a> {
    engines: &'a EnginesInfo,
    security: SecurityConfig,
    issuer: String,
    affected_by_group_threshold: bool,
}

impl<'a> Translator<'a> {
    pub fn new(
        engines: &'a EnginesInfo,
        security: SecurityConfig,
        issuer: impl Into<String>,
    ) -> Self {
        Translator {
            engines,
            security,
            issuer: issuer.into(),
            affected_by_group_threshold: false,
        }
    }

    /// Whether any grouped aggregate in the translated plans had small
    /// groups hidden.
    pub fn affected_by_group_threshold(&self) -> bool {
        self.affected_by_group_threshold
    }

    pub fn translate(&mut self, plan: &LogicalPlan) -> Result<ExecutionGraph> {
        select_into_issuer(plan, &self.issuer)?;
        check_supported(&plan.root)?;

        let mut builder = GraphBuilder::new();
        let mut root = self.translate_operator(&mut builder, &plan.root)?;

        // Reveal the result to the issuer.
        if self.engines.party_info().contains(&self.issuer) {
            root = builder.transfer(root, &self.issuer)?;
        }

        let parties = self
            .engines
            .party_info()
            .party_codes()
            .map(|p| p.to_string())
            .collect();
        let graph = builder.build(root, parties)?;

        debug!(
            nodes = graph.nodes.len(),
            parties = ?graph.parties,
            root = %root,
            "translated plan"
        );

        Ok(graph)
    }

    fn translate_operator(
        &mut self,
        builder: &mut GraphBuilder,
        op: &LogicalOperator,
    ) -> Result<NodeId> {
        if let Some((party, db_type)) = self.pushdown_target(op)? {
            return self.push_down(builder, op, party, db_type);
        }

        match op {
            LogicalOperator::Filter(n) => {
                let kind = OperatorKind::Filter {
                    predicate: n.node.predicate.clone(),
                };
                self.translate_unary(builder, op, n.get_one_child_exact()?, kind)
            }
            LogicalOperator::Project(n) => {
                let kind = OperatorKind::Project {
                    projections: n.node.projections.clone(),
                };
                self.translate_unary(builder, op, n.get_one_child_exact()?, kind)
            }
            LogicalOperator::Aggregate(n) => {
                let group_threshold = if n.node.group_by.is_empty() {
                    None
                } else {
                    self.security.effective_group_threshold()
                };
                if group_threshold.is_some() {
                    self.affected_by_group_threshold = true;
                }
                let kind = OperatorKind::Aggregate {
                    group_by: n.node.group_by.clone(),
                    aggregates: n.node.aggregates.clone(),
                    group_threshold,
                    reveal_group_mark: self.security.reveal_group_mark,
                };
                self.translate_unary(builder, op, n.get_one_child_exact()?, kind)
            }
            LogicalOperator::Order(n) => {
                let kind = OperatorKind::Sort {
                    exprs: n.node.exprs.clone(),
                };
                self.translate_unary(builder, op, n.get_one_child_exact()?, kind)
            }
            LogicalOperator::Limit(n) => {
                let kind = OperatorKind::Limit {
                    limit: n.node.limit,
                    offset: n.node.offset,
                };
                self.translate_unary(builder, op, n.get_one_child_exact()?, kind)
            }
            LogicalOperator::Join(n) => {
                let kind = OperatorKind::Join {
                    join_type: n.node.join_type,
                    conditions: n.node.conditions.clone(),
                };
                self.translate_combine(builder, op, &n.children, kind)
            }
            LogicalOperator::Union(n) => {
                let kind = OperatorKind::Union { all: n.node.all };
                self.translate_combine(builder, op, &n.children, kind)
            }
            LogicalOperator::Scan(_) => Err(internal!(
                "Scan did not resolve to a single party and storage"
            )),
            LogicalOperator::Window(_) | LogicalOperator::Apply(_) => {
                Err(CompileError::UnsupportedOperator(op.name().to_string()))
            }
        }
    }

    /// Party and storage backend of every source under `op`, if they're all
    /// the same and the backend supports the whole subtree.
    fn pushdown_target(&self, op: &LogicalOperator) -> Result<Option<(String, DbType)>> {
        let mut target: Option<(&str, DbType)> = None;
        for scan in collect_data_sources(op) {
            let table = self.engines.scan_table(scan);
            let owner = self
                .engines
                .owner_of(&table)
                .ok_or_else(|| CompileError::TableNotFound(table.to_string()))?;
            let ref_table = self
                .engines
                .ref_table(&table)
                .ok_or_else(|| CompileError::TableNotFound(table.to_string()))?;

            match target {
                None => target = Some((owner, ref_table.db_type)),
                Some(t) if t == (owner, ref_table.db_type) => (),
                Some(_) => return Ok(None),
            }
        }

        match target {
            Some((party, db_type)) if runs_on(op, db_type) => {
                Ok(Some((party.to_string(), db_type)))
            }
            Some(_) => Ok(None),
            None => Err(internal!("Operator {} reads no data source", op.name())),
        }
    }

    fn push_down(
        &mut self,
        builder: &mut GraphBuilder,
        op: &LogicalOperator,
        party: String,
        db_type: DbType,
    ) -> Result<NodeId> {
        let query = SqlRenderer::new(
            self.engines,
            db_type,
            self.security.effective_group_threshold(),
        )
        .render(op)?;
        if query.applied_group_threshold {
            self.affected_by_group_threshold = true;
        }

        let outputs = op.output_schema()?;
        Ok(builder.add_node(
            party,
            OperatorKind::RunSql {
                sql: query.sql,
                db_type,
                tables: query.tables,
            },
            Vec::new(),
            outputs,
        ))
    }

    /// Single input operators run wherever their input ended up.
    fn translate_unary(
        &mut self,
        builder: &mut GraphBuilder,
        op: &LogicalOperator,
        child: &LogicalOperator,
        kind: OperatorKind,
    ) -> Result<NodeId> {
        let input = self.translate_operator(builder, child)?;
        let party = builder.node(input)?.party.clone();
        let outputs = op.output_schema()?;
        Ok(builder.add_node(party, kind, vec![input], outputs))
    }

    fn translate_combine(
        &mut self,
        builder: &mut GraphBuilder,
        op: &LogicalOperator,
        children: &[LogicalOperator],
        kind: OperatorKind,
    ) -> Result<NodeId> {
        let mut inputs = Vec::with_capacity(children.len());
        for child in children {
            inputs.push(self.translate_operator(builder, child)?);
        }

        let party = self.choose_party(builder, &inputs)?;
        for input in inputs.iter_mut() {
            *input = builder.transfer(*input, &party)?;
        }

        let outputs = op.output_schema()?;
        Ok(builder.add_node(party, kind, inputs, outputs))
    }

    /// Pick the party to combine inputs on. The issuer if it holds one of the
    /// inputs, otherwise the smallest party code among them.
    fn choose_party(&self, builder: &GraphBuilder, inputs: &[NodeId]) -> Result<String> {
        let mut parties = BTreeSet::new();
        for input in inputs {
            parties.insert(builder.node(*input)?.party.clone());
        }
        if parties.contains(&self.issuer) {
            return Ok(self.issuer.clone());
        }
        parties
            .into_iter()
            .next()
            .ok_or_else(|| internal!("Operator without inputs"))
    }
}
