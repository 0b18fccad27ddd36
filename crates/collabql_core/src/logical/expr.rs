use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{DataType, Field};
use crate::errors::{CompileError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DataType::Bool),
            Self::Int64(_) => Some(DataType::Int64),
            Self::Float64(_) => Some(DataType::Float64),
            Self::Utf8(_) => Some(DataType::String),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Utf8(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOperator {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
        }
    }

    const fn is_arith(&self) -> bool {
        matches!(
            self,
            Self::Plus | Self::Minus | Self::Multiply | Self::Divide | Self::Modulo
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

/// Scalar expression over the output columns of an operator's children.
///
/// Columns are referenced by their plan-unique output name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Column(String),
    Literal(ScalarValue),
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    Function {
        name: String,
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(name.into())
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Reject function names that aren't plain identifiers
    /// (`[A-Za-z_][A-Za-z0-9_]*`). Names are rendered verbatim into SQL run
    /// by other parties.
    pub fn check_function_names(&self) -> Result<()> {
        match self {
            Self::Column(_) | Self::Literal(_) => Ok(()),
            Self::Binary { left, right, .. } => {
                left.check_function_names()?;
                right.check_function_names()
            }
            Self::Unary { expr, .. } => expr.check_function_names(),
            Self::Function { name, args } => {
                if !is_identifier(name) {
                    return Err(CompileError::InvalidFunctionName(name.clone()));
                }
                args.iter().try_for_each(|a| a.check_function_names())
            }
        }
    }

    /// Best effort type inference. `None` when the type can't be determined
    /// without function resolution.
    pub fn datatype(&self, input: &[Field]) -> Option<DataType> {
        match self {
            Self::Column(name) => input
                .iter()
                .find(|f| &f.name == name)
                .and_then(|f| f.datatype),
            Self::Literal(v) => v.datatype(),
            Self::Binary { op, left, right } if op.is_arith() => {
                match (left.datatype(input), right.datatype(input)) {
                    (Some(DataType::Int64), Some(DataType::Int64))
                        if *op != BinaryOperator::Divide =>
                    {
                        Some(DataType::Int64)
                    }
                    (
                        Some(DataType::Int64 | DataType::Float64),
                        Some(DataType::Int64 | DataType::Float64),
                    ) => Some(DataType::Float64),
                    _ => None,
                }
            }
            Self::Binary { .. } => Some(DataType::Bool),
            Self::Unary { op, expr } => match op {
                UnaryOperator::Negate => expr.datatype(input),
                _ => Some(DataType::Bool),
            },
            Self::Function { .. } => None,
        }
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateExpr {
    pub func: AggregateFunction,
    /// `None` only for `COUNT(*)`.
    #[serde(default)]
    pub arg: Option<Expression>,
    #[serde(default)]
    pub distinct: bool,
    /// Output column name.
    pub name: String,
}

impl AggregateExpr {
    pub fn datatype(&self, input: &[Field]) -> Option<DataType> {
        match self.func {
            AggregateFunction::Count => Some(DataType::Int64),
            AggregateFunction::Avg => Some(DataType::Float64),
            AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => {
                self.arg.as_ref().and_then(|arg| arg.datatype(input))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_types() {
        let input = [
            Field::new("a", Some(DataType::Int64)),
            Field::new("b", Some(DataType::Float64)),
        ];

        let expr = Expression::binary(
            BinaryOperator::Plus,
            Expression::column("a"),
            Expression::Literal(ScalarValue::Int64(1)),
        );
        assert_eq!(Some(DataType::Int64), expr.datatype(&input));

        let expr = Expression::binary(
            BinaryOperator::Multiply,
            Expression::column("a"),
            Expression::column("b"),
        );
        assert_eq!(Some(DataType::Float64), expr.datatype(&input));

        let expr = Expression::binary(
            BinaryOperator::Gt,
            Expression::column("a"),
            Expression::column("b"),
        );
        assert_eq!(Some(DataType::Bool), expr.datatype(&input));

        assert_eq!(None, Expression::column("missing").datatype(&input));
    }

    #[test]
    fn literal_escaping() {
        assert_eq!("'it''s'", ScalarValue::Utf8("it's".to_string()).to_string());
        assert_eq!("1.0", ScalarValue::Float64(1.0).to_string());
    }

    #[test]
    fn function_names() {
        let call = |name: &str| Expression::Function {
            name: name.to_string(),
            args: vec![Expression::column("a")],
        };

        call("upper").check_function_names().unwrap();
        call("_date_add2").check_function_names().unwrap();

        for bad in ["", "2x", "a.b", "f()", "1=1; DROP TABLE secrets; --"] {
            let nested = Expression::binary(
                BinaryOperator::And,
                Expression::column("b"),
                Expression::Function {
                    name: "coalesce".to_string(),
                    args: vec![call(bad)],
                },
            );
            let err = nested.check_function_names().unwrap_err();
            assert!(matches!(err, CompileError::InvalidFunctionName(name) if name == bad));
        }
    }
}
