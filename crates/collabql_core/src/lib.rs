//! Multi-party query compilation.
pub mod catalog;
pub mod checksum;
pub mod compiler;
pub mod config;
pub mod errors;
pub mod graph;
pub mod logical;
pub mod optimizer;
pub mod resolver;
pub mod translator;

pub use compiler::plan::CompiledPlan;
pub use compiler::{CompileRequest, Compiler};
