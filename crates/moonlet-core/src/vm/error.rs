//! Runtime errors for the Moonlet virtual machine

use std::fmt;
use std::sync::Arc;

use crate::ast::DynamicExpressionError;
use crate::bytecode::Value;

/// Result type for VM operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A runtime error that occurred during VM execution
#[derive(Debug, Clone)]
pub struct RuntimeError {
    /// The kind of error
    pub kind: RuntimeErrorKind,

    /// `source:line` prefix added when the error crosses a script frame
    pub location: Option<String>,

    /// False once decorated, or when raised with `error(msg, 0)`
    pub decorate: bool,

    /// Stack trace at the point of error
    pub stack_trace: Vec<StackFrame>,
}

impl RuntimeError {
    /// Create a new runtime error
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            location: None,
            decorate: true,
            stack_trace: Vec::new(),
        }
    }

    /// Error raised by script code through `error(value)`
    pub fn script(value: Value) -> Self {
        Self::new(RuntimeErrorKind::ScriptError(value))
    }

    /// Internal inconsistency; never caught by `pcall` or `resume`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Internal(message.into()))
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::InvalidOperation(message.into()))
    }

    pub fn bad_argument(position: usize, function: &str, message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::BadArgument {
            position,
            function: function.to_string(),
            message: message.into(),
        })
    }

    /// Suppress position decoration
    #[must_use]
    pub fn undecorated(mut self) -> Self {
        self.decorate = false;
        self
    }

    /// Add stack trace frames
    #[must_use]
    pub fn with_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.stack_trace = trace;
        self
    }

    /// Attach a `source:line` location, once
    pub(crate) fn decorate_with(&mut self, location: String) {
        if self.decorate {
            self.location = Some(location);
            self.decorate = false;
        }
    }

    /// Returns false for errors that must never be turned into `(false, msg)`
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.kind,
            RuntimeErrorKind::Internal(_) | RuntimeErrorKind::Reentrancy(_)
        )
    }

    /// The decorated message
    #[must_use]
    pub fn message(&self) -> String {
        match &self.location {
            Some(location) if self.has_string_payload() => format!("{location}: {}", self.kind),
            _ => self.kind.to_string(),
        }
    }

    /// The error as seen by script code (`pcall`, `resume`)
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.kind {
            RuntimeErrorKind::ScriptError(value) if !value.is_string() => value.clone(),
            _ => Value::String(Arc::from(self.message())),
        }
    }

    fn has_string_payload(&self) -> bool {
        match &self.kind {
            RuntimeErrorKind::ScriptError(value) => value.is_string(),
            _ => true,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())?;
        if !self.stack_trace.is_empty() {
            write!(f, "\nstack traceback:")?;
            for frame in &self.stack_trace {
                write!(f, "\n  {frame}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<DynamicExpressionError> for RuntimeError {
    fn from(err: DynamicExpressionError) -> Self {
        Self::new(RuntimeErrorKind::Dynamic(err))
    }
}

/// A stack frame in a stack trace
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    /// The function name
    pub function_name: String,

    /// The source line number, when the call site carries a source ref
    pub line: Option<u32>,

    /// The chunk name
    pub source: Option<String>,
}

impl StackFrame {
    /// Create a new stack frame
    pub fn new(function_name: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            function_name: function_name.into(),
            line,
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source, self.line) {
            (Some(source), Some(line)) => write!(f, "{source}:{line}: in {}", self.function_name),
            (Some(source), None) => write!(f, "{source}: in {}", self.function_name),
            (None, _) => write!(f, "in {}", self.function_name),
        }
    }
}

/// The kind of runtime error
#[derive(Debug, Clone)]
pub enum RuntimeErrorKind {
    /// Arithmetic on a non-number
    Arithmetic { type_name: &'static str },

    /// Concatenation of a non-string, non-number
    Concatenate { type_name: &'static str },

    /// Ordering comparison between incompatible values
    Compare {
        left: &'static str,
        right: &'static str,
    },

    /// Bitwise operation on a non-number
    Bitwise { type_name: &'static str },

    /// Bitwise operation on a number without an exact integer value
    NoIntegerRepresentation,

    /// Indexing a value that is not a table
    IndexValue { type_name: &'static str },

    /// Calling a value that is not callable
    CallValue { type_name: &'static str },

    /// Length of a value without length
    Length { type_name: &'static str },

    /// Table key is nil
    IndexIsNil,

    /// Table key is NaN
    IndexIsNaN,

    /// Assignment into a read-only table
    ReadOnlyAssignment,

    /// Numeric for loop control value is not a number
    ForLoop(&'static str),

    /// Invalid argument to a native function
    BadArgument {
        position: usize,
        function: String,
        message: String,
    },

    /// Value raised by `error`
    ScriptError(Value),

    /// Interpreted expression failure
    Dynamic(DynamicExpressionError),

    /// `resume`/`status`/`close` on something that is not a coroutine
    NotACoroutine,

    /// Resume of a dead coroutine
    CannotResumeDead,

    /// Resume of a running or normal coroutine
    CannotResumeNonSuspended,

    /// Resume of a force-suspended coroutine with arguments
    ForcedResumeWithArguments,

    /// Yield through a native-call boundary
    CannotYield,

    /// Yield outside of any coroutine
    CannotYieldMain,

    /// Close of a running or normal coroutine
    CannotClose(&'static str),

    /// Entry from a second native thread
    Reentrancy(String),

    /// Call depth exceeded
    StackOverflow,

    /// Invalid operation requested by the host
    InvalidOperation(String),

    /// Internal VM error
    Internal(String),
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::Arithmetic { type_name } => {
                write!(f, "attempt to perform arithmetic on a {type_name} value")
            }
            RuntimeErrorKind::Concatenate { type_name } => {
                write!(f, "attempt to concatenate a {type_name} value")
            }
            RuntimeErrorKind::Compare { left, right } => {
                write!(f, "attempt to compare {left} with {right}")
            }
            RuntimeErrorKind::Bitwise { type_name } => {
                write!(f, "attempt to perform bitwise operation on a {type_name} value")
            }
            RuntimeErrorKind::NoIntegerRepresentation => {
                write!(f, "number has no integer representation")
            }
            RuntimeErrorKind::IndexValue { type_name } => {
                write!(f, "attempt to index a {type_name} value")
            }
            RuntimeErrorKind::CallValue { type_name } => {
                write!(f, "attempt to call a {type_name} value")
            }
            RuntimeErrorKind::Length { type_name } => {
                write!(f, "attempt to get length of a {type_name} value")
            }
            RuntimeErrorKind::IndexIsNil => write!(f, "table index is nil"),
            RuntimeErrorKind::IndexIsNaN => write!(f, "table index is NaN"),
            RuntimeErrorKind::ReadOnlyAssignment => {
                write!(f, "attempt to modify a read-only table")
            }
            RuntimeErrorKind::ForLoop(what) => write!(f, "'for' {what} must be a number"),
            RuntimeErrorKind::BadArgument {
                position,
                function,
                message,
            } => write!(f, "bad argument #{position} to '{function}' ({message})"),
            RuntimeErrorKind::ScriptError(value) => {
                if value.is_string() || value.is_number() {
                    write!(f, "{value}")
                } else {
                    write!(f, "(error object is a {} value)", value.type_name())
                }
            }
            RuntimeErrorKind::Dynamic(err) => write!(f, "{err}"),
            RuntimeErrorKind::NotACoroutine => write!(f, "coroutine expected"),
            RuntimeErrorKind::CannotResumeDead => write!(f, "cannot resume dead coroutine"),
            RuntimeErrorKind::CannotResumeNonSuspended => {
                write!(f, "cannot resume non-suspended coroutine")
            }
            RuntimeErrorKind::ForcedResumeWithArguments => write!(
                f,
                "cannot resume a forcefully suspended coroutine with arguments"
            ),
            RuntimeErrorKind::CannotYield => {
                write!(f, "attempt to yield across a CLR-call boundary")
            }
            RuntimeErrorKind::CannotYieldMain => {
                write!(f, "attempt to yield from outside a coroutine")
            }
            RuntimeErrorKind::CannotClose(state) => {
                write!(f, "cannot close a {state} coroutine")
            }
            RuntimeErrorKind::Reentrancy(detail) => write!(
                f,
                "cannot enter the same processor from two different threads: {detail}"
            ),
            RuntimeErrorKind::StackOverflow => write!(f, "stack overflow"),
            RuntimeErrorKind::InvalidOperation(msg) => write!(f, "invalid operation: {msg}"),
            RuntimeErrorKind::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoration_applies_once() {
        let mut err = RuntimeError::new(RuntimeErrorKind::IndexIsNil);
        err.decorate_with("chunk:3".to_string());
        err.decorate_with("chunk:9".to_string());
        assert_eq!(err.message(), "chunk:3: table index is nil");
    }

    #[test]
    fn undecorated_errors_keep_plain_message() {
        let mut err = RuntimeError::script(Value::from("boom")).undecorated();
        err.decorate_with("chunk:1".to_string());
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn non_string_error_values_pass_through() {
        let mut err = RuntimeError::script(Value::Number(42.0));
        err.decorate_with("chunk:1".to_string());
        assert!(matches!(err.to_value(), Value::Number(n) if n == 42.0));
        assert_eq!(err.message(), "42");
    }

    #[test]
    fn internal_and_reentrancy_are_not_recoverable() {
        assert!(!RuntimeError::internal("broken").is_recoverable());
        assert!(!RuntimeError::new(RuntimeErrorKind::Reentrancy("t2".into())).is_recoverable());
        assert!(RuntimeError::new(RuntimeErrorKind::CannotResumeDead).is_recoverable());
    }
}
