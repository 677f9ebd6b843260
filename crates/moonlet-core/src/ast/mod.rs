//! Abstract syntax tree for the Moonlet language
//!
//! This module provides:
//! - `Expr` / `Stmt` / `Block`: the tree produced by the parser
//! - `OperatorChain`: precedence resolution for binary operator sequences
//! - `evaluate`: interpreted evaluation used by dynamic expressions

mod chain;
mod eval;
mod expr;
mod stmt;

pub use chain::{create_power_expression, OperatorChain};
pub use eval::{
    arithmetic, bitwise, evaluate, floored_mod, less_equal, less_than, DynamicExpressionError,
    EvalScope,
};
pub use expr::{BinOp, Expr, ExprKind, FunctionBody, TableField, UnaryOp};
pub use stmt::{Block, Stmt, StmtKind};
