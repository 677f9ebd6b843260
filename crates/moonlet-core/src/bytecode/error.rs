//! Compiler and dump error types

use crate::lexer::Span;
use std::fmt;
use thiserror::Error;

/// A compilation error
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    /// The kind of error
    pub kind: CompileErrorKind,

    /// Source location
    pub span: Span,

    /// Optional hint for fixing the error
    pub hint: Option<String>,
}

impl CompileError {
    /// Create a new compile error
    #[must_use]
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            hint: None,
        }
    }

    /// Internal contract violation at `span`
    #[must_use]
    pub fn internal(message: impl Into<String>, span: Span) -> Self {
        Self::new(CompileErrorKind::Internal(message.into()), span)
    }

    /// Add a hint to the error
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// True for violations of the compiler's own calling contract
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self.kind, CompileErrorKind::Internal(_))
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// The kind of compilation error
#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    /// Too many local variable slots in one function
    TooManyLocals,

    /// Too many captured variables in one closure
    TooManyUpvalues,

    /// `break` outside of a loop
    BreakOutsideLoop,

    /// `...` used in a function not declared vararg
    VarargOutsideVarargFunction,

    /// Assignment to something that is not a variable or field
    InvalidAssignmentTarget,

    /// Internal compiler error (caller contract violation)
    Internal(String),
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileErrorKind::TooManyLocals => {
                write!(f, "too many local variables in one function (max 65535)")
            }
            CompileErrorKind::TooManyUpvalues => {
                write!(f, "too many captured variables in one closure (max 65535)")
            }
            CompileErrorKind::BreakOutsideLoop => {
                write!(f, "'break' can only be used inside a loop")
            }
            CompileErrorKind::VarargOutsideVarargFunction => {
                write!(f, "cannot use '...' outside a vararg function")
            }
            CompileErrorKind::InvalidAssignmentTarget => {
                write!(f, "cannot assign to this expression")
            }
            CompileErrorKind::Internal(msg) => {
                write!(f, "internal compiler error: {msg}")
            }
        }
    }
}

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors from dumping or undumping compiled functions
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("function '{name}' captures {count} upvalue(s) and cannot be dumped")]
    HasUpvalues { name: String, count: usize },

    #[error("only script functions can be dumped, got a {0} value")]
    NotAFunction(&'static str),

    #[error("dump target is not writable: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed dump: {0}")]
    Format(#[from] serde_json::Error),

    #[error("not a moonlet dump (magic {found:?})")]
    BadMagic { found: String },

    #[error("unsupported dump version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Result type for dump operations
pub type DumpResult<T> = Result<T, DumpError>;
