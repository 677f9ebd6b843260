//! Test utilities for Moonlet
//!
//! This module provides common helpers for testing Moonlet code,
//! including expression evaluation, chunk execution, bytecode listings and a
//! scripted debugger.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bytecode::{disassemble_function, op_names, Compiler, SourceCode, SourceRef, Value};
use crate::parser::Parser;
use crate::script::{Script, ScriptError};
use crate::vm::{Debugger, DebuggerAction, DebuggerActionKind, WatchItem, WatchKind};

/// Result type for test helpers
pub type TestResult<T> = Result<T, String>;

fn describe(err: &ScriptError) -> String {
    match err {
        ScriptError::Syntax(e) => format!("Parse error: {e}"),
        ScriptError::Compile(_) => format!("Compile error: {err}"),
        ScriptError::Runtime(e) => format!("Runtime error: {}", e.message()),
        ScriptError::Dump(e) => format!("Dump error: {e}"),
    }
}

/// Run `source` as an expression if it parses as one, else as a chunk
fn execute(script: &Script, source: &str) -> Result<Value, ScriptError> {
    if Parser::parse_expression(source).is_ok() {
        script.do_string(&format!("return {source}"))
    } else {
        script.do_string(source)
    }
}

/// Run a complete chunk on a fresh interpreter
///
/// # Errors
/// Returns error if parsing, compilation, or execution fails
pub fn run_script(source: &str) -> TestResult<Value> {
    Script::new().do_string(source).map_err(|e| describe(&e))
}

/// Evaluate an expression (or a chunk that returns a value)
///
/// # Errors
/// Returns error if parsing, compilation, or execution fails
pub fn eval_expr(source: &str) -> TestResult<Value> {
    execute(&Script::new(), source)
        .map(Value::to_scalar)
        .map_err(|e| describe(&e))
}

/// Evaluate and expect a number
///
/// # Errors
/// Returns error if evaluation fails or result is not a number
pub fn eval_number(source: &str) -> TestResult<f64> {
    match eval_expr(source)? {
        Value::Number(n) => Ok(n),
        other => Err(format!("Expected number, got {}", other.type_name())),
    }
}

/// Evaluate and expect a boolean
///
/// # Errors
/// Returns error if evaluation fails or result is not a boolean
pub fn eval_bool(source: &str) -> TestResult<bool> {
    match eval_expr(source)? {
        Value::Boolean(b) => Ok(b),
        other => Err(format!("Expected boolean, got {}", other.type_name())),
    }
}

/// Evaluate and expect a string
///
/// # Errors
/// Returns error if evaluation fails or result is not a string
pub fn eval_string(source: &str) -> TestResult<String> {
    match eval_expr(source)? {
        Value::String(s) => Ok(s.to_string()),
        other => Err(format!("Expected string, got {}", other.type_name())),
    }
}

/// Check that code fails at runtime and return the error message
///
/// # Errors
/// Returns error if the code succeeds or fails before running
pub fn expect_runtime_error(source: &str) -> TestResult<String> {
    match execute(&Script::new(), source) {
        Ok(value) => Err(format!("Expected runtime error, but got value: {value}")),
        Err(ScriptError::Runtime(e)) => Ok(e.message()),
        Err(other) => Err(describe(&other)),
    }
}

/// Disassembly of a compiled chunk, nested functions included
///
/// # Errors
/// Returns error if parsing or compilation fails
pub fn compile_listing(source: &str) -> TestResult<String> {
    let block = Parser::parse_chunk(source).map_err(|e| format!("Parse error: {e}"))?;
    let code = SourceCode::new(0, "test", source);
    let compiled = Compiler::new(&code)
        .with_debug_instructions(false)
        .compile_chunk(&block)
        .map_err(|e| format!("Compile error: {e:?}"))?;
    Ok(disassemble_function(&compiled.proto))
}

/// Operation names of an expression compiled as `return <expr>`
///
/// # Errors
/// Returns error if parsing or compilation fails
pub fn expression_ops(source: &str) -> TestResult<String> {
    let expr = Parser::parse_expression(source).map_err(|e| format!("Parse error: {e}"))?;
    let code = SourceCode::new(0, "test", source);
    let compiled = Compiler::new(&code)
        .compile_expression(&expr)
        .map_err(|e| format!("Compile error: {e:?}"))?;
    Ok(op_names(&compiled.proto.chunk))
}

// ============================================================================
// Recording Debugger
// ============================================================================

/// What a [`RecordingDebugger`] observed
#[derive(Debug, Default)]
pub struct DebuggerLog {
    /// `(ip, line)` of every `get_action` call
    pub pauses: Vec<(usize, Option<u32>)>,
    /// Watch kinds in the order they were updated
    pub updates: Vec<WatchKind>,
    /// Latest items per watch kind
    pub call_stack: Vec<WatchItem>,
    pub watches: Vec<WatchItem>,
    pub locals: Vec<WatchItem>,
    pub vstack: Vec<WatchItem>,
    pub threads: Vec<WatchItem>,
    /// Breakpoint refs seen on hard refreshes
    pub breakpoint_refreshes: Vec<Vec<Arc<SourceRef>>>,
    pub execution_ended: usize,
}

/// A debugger that replays queued actions and records every callback
///
/// When the queue runs dry it answers `Run`. Clones share their state, so a
/// test can keep one handle while the interpreter owns the other.
#[derive(Clone, Default)]
pub struct RecordingDebugger {
    actions: Arc<Mutex<VecDeque<DebuggerAction>>>,
    log: Arc<Mutex<DebuggerLog>>,
    watch_expressions: Arc<Mutex<Vec<String>>>,
    pause_requested: Arc<Mutex<bool>>,
}

impl RecordingDebugger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue actions answered in order
    pub fn queue(&self, actions: impl IntoIterator<Item = DebuggerAction>) {
        self.actions.lock().extend(actions);
    }

    /// Queue `count` copies of one action kind
    pub fn queue_kind(&self, kind: DebuggerActionKind, count: usize) {
        self.queue((0..count).map(|_| DebuggerAction::new(kind)));
    }

    pub fn set_watch_expressions(&self, expressions: &[&str]) {
        *self.watch_expressions.lock() = expressions.iter().map(ToString::to_string).collect();
    }

    pub fn request_pause(&self, requested: bool) {
        *self.pause_requested.lock() = requested;
    }

    /// Lines of every pause, in order
    #[must_use]
    pub fn paused_lines(&self) -> Vec<Option<u32>> {
        self.log.lock().pauses.iter().map(|(_, line)| *line).collect()
    }

    /// Run `f` against the recorded log
    pub fn with_log<R>(&self, f: impl FnOnce(&DebuggerLog) -> R) -> R {
        f(&self.log.lock())
    }
}

impl Debugger for RecordingDebugger {
    fn is_pause_requested(&self) -> bool {
        *self.pause_requested.lock()
    }

    fn get_action(&mut self, ip: usize, source_ref: Option<&Arc<SourceRef>>) -> DebuggerAction {
        self.log
            .lock()
            .pauses
            .push((ip, source_ref.map(|r| r.from_line)));
        *self.pause_requested.lock() = false;
        self.actions
            .lock()
            .pop_front()
            .unwrap_or_else(|| DebuggerAction::new(DebuggerActionKind::Run))
    }

    fn update(&mut self, kind: WatchKind, items: &[WatchItem]) {
        let mut log = self.log.lock();
        log.updates.push(kind);
        let slot = match kind {
            WatchKind::CallStack => &mut log.call_stack,
            WatchKind::Watches => &mut log.watches,
            WatchKind::VStack => &mut log.vstack,
            WatchKind::Locals => &mut log.locals,
            WatchKind::Threads => &mut log.threads,
        };
        *slot = items.to_vec();
    }

    fn refresh_breakpoints(&mut self, refs: &[Arc<SourceRef>]) {
        self.log.lock().breakpoint_refreshes.push(refs.to_vec());
    }

    fn watch_expressions(&self) -> Vec<String> {
        self.watch_expressions.lock().clone()
    }

    fn signal_execution_ended(&mut self) {
        self.log.lock().execution_ended += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_expr_basic() {
        assert_eq!(eval_number("1 + 2").unwrap(), 3.0);
        assert!(!eval_bool("true and false").unwrap());
        assert_eq!(eval_string(r#""hello""#).unwrap(), "hello");
    }

    #[test]
    fn test_eval_chunk() {
        assert_eq!(eval_number("local x = 10 return x * 2").unwrap(), 20.0);
    }

    #[test]
    fn test_error_helpers() {
        assert_eq!(
            expect_runtime_error("nil + 1").unwrap(),
            "chunk:1: attempt to perform arithmetic on a nil value"
        );
        assert!(expect_runtime_error("1").is_err());
        assert!(run_script("local = 1").unwrap_err().starts_with("Parse error"));
    }

    #[test]
    fn test_listing() {
        let listing = compile_listing("local function f(a) return a end").unwrap();
        assert!(listing.starts_with("== main chunk (0 params, vararg"));
        assert!(listing.contains("== f (1 params"));
        assert_eq!(expression_ops("a or b").unwrap(), "GETGLOBAL JTORPOP GETGLOBAL RET");
    }
}
