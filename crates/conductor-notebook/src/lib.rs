//! Notebook evaluator: named expression cells recomputed incrementally in
//! dependency order.

pub mod expr;
pub mod notebook;

pub use expr::{Ast, Expr, ParseError, MAX_DEPTH};
pub use notebook::{CellId, CellResult, CellView, Notebook};
