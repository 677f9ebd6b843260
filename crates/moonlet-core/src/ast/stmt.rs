//! Statement AST nodes for the Moonlet language

use crate::lexer::Span;

use super::{Expr, FunctionBody};

/// A statement node
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// The kind of statement
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `local a, b = x, y`
    Local { names: Vec<String>, values: Vec<Expr> },

    /// `a, t.b = x, y`
    Assign { targets: Vec<Expr>, values: Vec<Expr> },

    /// A call used as a statement
    Call(Expr),

    /// `do ... end`
    Do(Block),

    /// `while cond do ... end`
    While { condition: Expr, body: Block },

    /// `repeat ... until cond`
    Repeat { body: Block, condition: Expr },

    /// `if/elseif/else`
    If {
        branches: Vec<(Expr, Block)>,
        else_block: Option<Block>,
    },

    /// `for var = start, limit[, step] do ... end`
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },

    /// `for a, b in exprs do ... end`
    GenericFor {
        names: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },

    /// `function a.b:c() ... end`
    Function {
        /// Dotted path; the first element is the variable
        path: Vec<String>,
        /// Method name after `:`
        method: Option<String>,
        body: FunctionBody,
    },

    /// `local function f() ... end`
    LocalFunction { name: String, body: FunctionBody },

    /// `return exprs`
    Return(Vec<Expr>),

    /// `break`
    Break,
}

/// A sequence of statements
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    /// Position of the block's closing keyword
    pub end_span: Span,
}

impl Block {
    #[must_use]
    pub fn new(stmts: Vec<Stmt>, end_span: Span) -> Self {
        Self { stmts, end_span }
    }
}
