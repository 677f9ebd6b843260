//! Expression AST nodes for the Moonlet language

use crate::lexer::{Span, TokenKind};

use super::Block;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    // Logical
    /// Short-circuit or (`or`)
    Or,
    /// Short-circuit and (`and`)
    And,

    // Comparison
    /// Less than (<)
    Lt,
    /// Greater than (>)
    Gt,
    /// Less than or equal (<=)
    Le,
    /// Greater than or equal (>=)
    Ge,
    /// Equal (==)
    Eq,
    /// Not equal (~=)
    Ne,

    // Bitwise
    /// Bitwise or (|)
    BitOr,
    /// Bitwise xor (~)
    BitXor,
    /// Bitwise and (&)
    BitAnd,
    /// Left shift (<<)
    Shl,
    /// Right shift (>>)
    Shr,

    /// String concatenation (..)
    Concat,

    // Arithmetic
    /// Addition (+)
    Add,
    /// Subtraction (-)
    Sub,
    /// Multiplication (*)
    Mul,
    /// Division (/)
    Div,
    /// Floor division (//)
    FloorDiv,
    /// Floored modulo (%)
    Mod,
    /// Exponentiation (^)
    Pow,
}

impl BinOp {
    /// Maps a token to the operator it denotes inside an operator chain
    #[must_use]
    pub const fn from_token(kind: TokenKind) -> Option<BinOp> {
        Some(match kind {
            TokenKind::Or => BinOp::Or,
            TokenKind::And => BinOp::And,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::LtEq => BinOp::Le,
            TokenKind::GtEq => BinOp::Ge,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::NotEq => BinOp::Ne,
            TokenKind::Pipe => BinOp::BitOr,
            TokenKind::Tilde => BinOp::BitXor,
            TokenKind::Ampersand => BinOp::BitAnd,
            TokenKind::ShiftLeft => BinOp::Shl,
            TokenKind::ShiftRight => BinOp::Shr,
            TokenKind::DotDot => BinOp::Concat,
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::DoubleSlash => BinOp::FloorDiv,
            TokenKind::Percent => BinOp::Mod,
            TokenKind::Caret => BinOp::Pow,
            _ => return None,
        })
    }

    /// Returns the precedence of the operator (higher = binds tighter)
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne => 3,
            BinOp::BitOr => 4,
            BinOp::BitXor => 5,
            BinOp::BitAnd => 6,
            BinOp::Shl | BinOp::Shr => 7,
            BinOp::Concat => 8,
            BinOp::Add | BinOp::Sub => 9,
            BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => 10,
            // Unary operators sit at 11
            BinOp::Pow => 12,
        }
    }

    /// Returns true if the operator groups right-to-left
    #[must_use]
    pub const fn is_right_associative(self) -> bool {
        matches!(self, BinOp::Pow | BinOp::Concat)
    }

    /// Returns true for `and`/`or`
    #[must_use]
    pub const fn is_short_circuit(self) -> bool {
        matches!(self, BinOp::Or | BinOp::And)
    }

    /// Returns true for the ordering and equality operators
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    /// Returns true for the integer operators
    #[must_use]
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOp::BitOr | BinOp::BitXor | BinOp::BitAnd | BinOp::Shl | BinOp::Shr
        )
    }

    /// Returns the source symbol
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "or",
            BinOp::And => "and",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::BitOr => "|",
            BinOp::BitXor => "~",
            BinOp::BitAnd => "&",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Concat => "..",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
        }
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation (-)
    Neg,
    /// Logical not (`not`)
    Not,
    /// Length (#)
    Len,
    /// Bitwise not (~)
    BitNot,
}

impl UnaryOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not ",
            UnaryOp::Len => "#",
            UnaryOp::BitNot => "~",
        }
    }
}

/// An expression node
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Binary node spanning both operands
    #[must_use]
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        let span = left.span.to(right.span);
        if op == BinOp::Pow {
            return Self::power(left, right);
        }
        Self::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    /// Power node (`base ^ exponent`)
    #[must_use]
    pub fn power(base: Expr, exponent: Expr) -> Self {
        let span = base.span.to(exponent.span);
        Self::new(
            ExprKind::Power {
                base: Box::new(base),
                exponent: Box::new(exponent),
            },
            span,
        )
    }

    /// True if the expression can produce several values
    #[must_use]
    pub fn is_multi_value(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::Vararg
        )
    }
}

/// The kind of expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Nil,
    True,
    False,
    Number(f64),
    String(String),
    /// `...`
    Vararg,
    /// Function literal
    Function(Box<FunctionBody>),
    /// Table constructor
    Table(Vec<TableField>),
    /// Variable reference
    Name(String),
    /// `object[key]` or `object.name`
    Index { object: Box<Expr>, key: Box<Expr> },
    /// `callee(args)`
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `object:method(args)`
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// Parenthesized expression (truncates to one value)
    Paren(Box<Expr>),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Right-associative exponentiation
    Power { base: Box<Expr>, exponent: Box<Expr> },
}

/// A field in a table constructor
#[derive(Debug, Clone, PartialEq)]
pub enum TableField {
    /// `value`
    Positional(Expr),
    /// `name = value`
    Named(String, Expr),
    /// `[key] = value`
    Keyed(Expr, Expr),
}

/// Parameters and body of a function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_ordering() {
        assert!(BinOp::Pow.precedence() > BinOp::Mul.precedence());
        assert!(BinOp::Mul.precedence() > BinOp::Add.precedence());
        assert!(BinOp::Add.precedence() > BinOp::Concat.precedence());
        assert!(BinOp::Concat.precedence() > BinOp::Shl.precedence());
        assert!(BinOp::BitAnd.precedence() > BinOp::BitXor.precedence());
        assert!(BinOp::BitOr.precedence() > BinOp::Eq.precedence());
        assert!(BinOp::Eq.precedence() > BinOp::And.precedence());
        assert!(BinOp::And.precedence() > BinOp::Or.precedence());
    }

    #[test]
    fn comma_is_not_an_operator() {
        assert_eq!(BinOp::from_token(TokenKind::Comma), None);
        assert_eq!(BinOp::from_token(TokenKind::Tilde), Some(BinOp::BitXor));
    }
}
