use crate::catalog::Catalog;
use crate::errors::{CompileError, Result};
use crate::logical::operator::LogicalPlan;

/// Parser and logical planner the compiler drives.
///
/// Parsing and building an optimized logical plan happen outside this crate.
/// Implementations adapt whichever SQL frontend the deployment uses.
pub trait QueryFrontend {
    type Statement;

    /// Parse query text into statements.
    fn parse(&self, query: &str) -> Result<Vec<Self::Statement>>;

    /// Build an optimized logical plan for a single statement.
    fn build_logical_plan(
        &self,
        statement: &Self::Statement,
        catalog: &Catalog,
        current_db: &str,
    ) -> Result<LogicalPlan>;
}

/// Frontend accepting logical plans already serialized as JSON.
///
/// Every JSON document in the query text is one statement, so a query holding
/// several documents is rejected the same way a multi-statement SQL query
/// would be.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPlanFrontend;

impl QueryFrontend for JsonPlanFrontend {
    type Statement = LogicalPlan;

    fn parse(&self, query: &str) -> Result<Vec<LogicalPlan>> {
        serde_json::Deserializer::from_str(query)
            .into_iter::<LogicalPlan>()
            .map(|plan| plan.map_err(|e| CompileError::Frontend(e.to_string())))
            .collect()
    }

    fn build_logical_plan(
        &self,
        statement: &LogicalPlan,
        _catalog: &Catalog,
        _current_db: &str,
    ) -> Result<LogicalPlan> {
        Ok(statement.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"{"root": {"scan": {"table_name": "ta", "columns": []}}}"#;

    #[test]
    fn one_statement_per_document() {
        let frontend = JsonPlanFrontend;
        assert_eq!(1, frontend.parse(PLAN).unwrap().len());
        assert_eq!(2, frontend.parse(&format!("{PLAN}\n{PLAN}")).unwrap().len());
        assert!(frontend.parse("").unwrap().is_empty());

        let err = frontend.parse("{\"root\": 1}").unwrap_err();
        assert!(matches!(err, CompileError::Frontend(_)));
    }
}
