//! Parser error types for the Moonlet language

use crate::bytecode::CompileError;
use crate::lexer::{LexError, Span, TokenKind};
use thiserror::Error;

/// A parser error with location information
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// The kind of error
    pub kind: ParseErrorKind,
    /// Source location where the error occurred
    pub span: Span,
    /// Optional hint for fixing the error
    pub hint: Option<String>,
}

impl ParseError {
    /// Create a new parse error
    #[must_use]
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            hint: None,
        }
    }

    /// Add a hint to this error
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// True if the error reports a broken operator-chain contract
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ParseErrorKind::Internal(_))
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind, self.span)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        let span = err.span();
        ParseError::new(ParseErrorKind::Lex(err), span)
    }
}

impl From<CompileError> for ParseError {
    fn from(err: CompileError) -> Self {
        let span = err.span;
        ParseError::new(ParseErrorKind::Internal(err.to_string()), span)
    }
}

/// The kind of parse error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("unexpected token: found {found}, expected {expected}")]
    UnexpectedToken { found: TokenKind, expected: String },

    #[error("unexpected symbol near {0}")]
    UnexpectedSymbol(TokenKind),

    #[error("expected expression")]
    ExpectedExpression,

    #[error("expected name")]
    ExpectedName,

    #[error("syntax error: statement is not a call or an assignment")]
    ExpectedStatement,

    #[error("cannot assign to this expression")]
    InvalidAssignmentTarget,

    #[error("'return' must be the last statement of a block")]
    ReturnNotLast,

    #[error("invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(String),

    #[error("{0}")]
    Lex(LexError),

    #[error("{0}")]
    Internal(String),
}
