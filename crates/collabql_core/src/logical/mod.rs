//! Logical plans as produced by the external plan builder and optimizer.

pub mod expr;
pub mod operator;
