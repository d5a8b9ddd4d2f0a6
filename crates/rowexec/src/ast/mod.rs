//! Statement trees consumed by the evaluators.
//!
//! Trees are produced upstream by the parser and resolver, and are never
//! mutated during evaluation.

pub mod build;
pub mod expr;
pub mod schema;
pub mod statement;

pub use expr::*;
pub use schema::*;
pub use statement::*;
