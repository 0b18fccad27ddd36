//! Compile a query into per-party execution plans.

pub mod frontend;
pub mod plan;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use self::frontend::QueryFrontend;
use self::plan::{CompiledPlan, ExplainInfo, Warning, build_compiled_plan};
use crate::catalog::Catalog;
use crate::config::CompileOptions;
use crate::errors::{CompileError, Result};
use crate::graph::checker::GraphChecker;
use crate::logical::operator::LogicalPlan;
use crate::optimizer::mapper::GraphMapper;
use crate::optimizer::partitioner::{NaivePartition, PartitionStrategy, check_partition};
use crate::resolver::build_engines_info;
use crate::translator::{Translator, select_into_issuer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub query: String,
    /// Database unqualified table names resolve against.
    #[serde(default)]
    pub db_name: String,
    /// Party code of the party issuing the query.
    pub issuer: String,
    /// Include the issuer as a participant even if it owns none of the
    /// tables.
    #[serde(default)]
    pub issuer_as_participant: bool,
    pub catalog: Catalog,
}

pub struct Compiler {
    options: CompileOptions,
    partitioner: Box<dyn PartitionStrategy + Send + Sync>,
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Compiler {
            options,
            partitioner: Box::new(NaivePartition),
        }
    }

    pub fn with_partition_strategy(
        mut self,
        strategy: impl PartitionStrategy + Send + Sync + 'static,
    ) -> Self {
        self.partitioner = Box::new(strategy);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Parse, plan and compile the request's query.
    pub fn compile<F>(&self, frontend: &F, request: &CompileRequest) -> Result<CompiledPlan>
    where
        F: QueryFrontend,
    {
        let stmts = frontend.parse(&request.query)?;
        if stmts.len() != 1 {
            return Err(CompileError::ParseArity(stmts.len()));
        }

        let plan = frontend.build_logical_plan(&stmts[0], &request.catalog, &request.db_name)?;
        self.compile_plan(&plan, request)
    }

    /// Compile an already optimized logical plan.
    pub fn compile_plan(
        &self,
        plan: &LogicalPlan,
        request: &CompileRequest,
    ) -> Result<CompiledPlan> {
        request.catalog.validate()?;

        let into_issuer = select_into_issuer(plan, &request.issuer)?;

        let engines = build_engines_info(
            plan,
            &request.catalog,
            &request.db_name,
            &request.issuer,
            request.issuer_as_participant || into_issuer,
        )?;

        let mut translator =
            Translator::new(&engines, self.options.security.clone(), request.issuer.clone());
        let graph = translator.translate(plan)?;

        GraphChecker::new().check(&graph)?;

        let sub_graphs = self.partitioner.partition(&graph)?;
        check_partition(&graph, &sub_graphs)?;
        let exec_plans = GraphMapper::new(self.options.max_workers).map_all(&graph, &sub_graphs)?;

        let mut compiled = build_compiled_plan(&graph, &exec_plans)?;
        if self.options.dump_exe_graph {
            compiled.explain = Some(ExplainInfo {
                exe_graph_dot: graph.dump_graphviz(),
            });
        }
        compiled.warning = Warning {
            may_affected_by_group_threshold: translator.affected_by_group_threshold(),
        };

        debug!(
            issuer = %request.issuer,
            parties = ?compiled.parties,
            nodes = graph.nodes.len(),
            "compiled query"
        );

        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::catalog::TableEntry;
    use crate::compiler::frontend::JsonPlanFrontend;
    use crate::graph::ExecutionGraph;
    use crate::optimizer::partitioner::SubGraph;

    fn request(query: &str) -> CompileRequest {
        CompileRequest {
            query: query.to_string(),
            db_name: "db".to_string(),
            issuer: "alice".to_string(),
            issuer_as_participant: false,
            catalog: Catalog::new([TableEntry {
                table_name: "db.ta".to_string(),
                columns: Vec::new(),
                owner: "alice".to_string(),
                ref_table: String::new(),
                db_type: String::new(),
            }]),
        }
    }

    const PLAN: &str =
        r#"{"root": {"scan": {"table_name": "ta", "columns": [{"name": "id", "alias": "ta.id"}]}}}"#;

    #[test]
    fn parse_arity() {
        let compiler = Compiler::new(CompileOptions::default());
        let err = compiler
            .compile(&JsonPlanFrontend, &request(&format!("{PLAN}{PLAN}")))
            .unwrap_err();
        assert!(matches!(err, CompileError::ParseArity(2)));

        let err = compiler
            .compile(&JsonPlanFrontend, &request(""))
            .unwrap_err();
        assert!(matches!(err, CompileError::ParseArity(0)));
    }

    #[test]
    fn explain_attached_on_request() {
        let plain = Compiler::new(CompileOptions::default())
            .compile(&JsonPlanFrontend, &request(PLAN))
            .unwrap();
        assert!(plain.explain.is_none());

        let options = CompileOptions {
            dump_exe_graph: true,
            ..Default::default()
        };
        let explained = Compiler::new(options)
            .compile(&JsonPlanFrontend, &request(PLAN))
            .unwrap();
        let dot = explained.explain.unwrap().exe_graph_dot;
        assert!(dot.contains("cluster_alice"));
        assert!(dot.contains("RunSQL"));
    }

    /// Puts every node on the first participant.
    struct FirstParty;

    impl PartitionStrategy for FirstParty {
        fn partition(&self, graph: &ExecutionGraph) -> Result<BTreeMap<String, SubGraph>> {
            let party = graph.parties[0].clone();
            let sub = SubGraph {
                party: party.clone(),
                nodes: graph.nodes.iter().map(|n| n.id).collect(),
            };
            Ok(BTreeMap::from([(party, sub)]))
        }
    }

    #[test]
    fn pluggable_partition_strategy() {
        let compiler = Compiler::new(CompileOptions::default()).with_partition_strategy(FirstParty);
        let plan = compiler
            .compile(&JsonPlanFrontend, &request(PLAN))
            .unwrap();
        assert_eq!(vec!["alice"], plan.sub_graphs.keys().collect::<Vec<_>>());
    }

    /// Loses every node.
    struct DropsNodes;

    impl PartitionStrategy for DropsNodes {
        fn partition(&self, graph: &ExecutionGraph) -> Result<BTreeMap<String, SubGraph>> {
            Ok(graph
                .parties
                .iter()
                .map(|p| (p.clone(), SubGraph::new(p.clone())))
                .collect())
        }
    }

    #[test]
    fn incomplete_partition_rejected() {
        let compiler = Compiler::new(CompileOptions::default()).with_partition_strategy(DropsNodes);
        let err = compiler
            .compile(&JsonPlanFrontend, &request(PLAN))
            .unwrap_err();
        assert!(matches!(err, CompileError::Partition(_)));

        let compiler =
            Compiler::new(CompileOptions::default()).with_partition_strategy(FirstParty);
        let mut req = request(PLAN);
        req.issuer_as_participant = true;
        req.issuer = "bob".to_string();
        // bob is a participant but gets no slot.
        let err = compiler
            .compile(&JsonPlanFrontend, &req)
            .unwrap_err();
        assert!(matches!(err, CompileError::Partition(_)));
    }

    #[test]
    fn catalog_validated_for_planned_queries() {
        let mut req = request(PLAN);
        req.catalog.tables[0].table_name = "ta".to_string();
        let plan: LogicalPlan = serde_json::from_str(PLAN).unwrap();

        let err = Compiler::new(CompileOptions::default())
            .compile_plan(&plan, &req)
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidTableName(name) if name == "ta"));
    }
}
