//! Host-facing interpreter instance
//!
//! A [`Script`] owns the globals, the source registry, the main coroutine and
//! the attached debugger. Handles are cheap to clone and can be sent to other
//! threads, but only one native thread may execute inside an instance at a
//! time: a second thread entering while the first is inside fails with a
//! reentrancy error instead of waiting.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::ast::{evaluate, EvalScope, Expr};
use crate::bytecode::{
    dump, undump, Closure, CompileError, Compiler, DumpError, SourceCode, SourceRef, Table,
    Value,
};
use crate::diagnostics::Logger;
use crate::options::ScriptOptions;
use crate::parser::{ParseError, Parser};
use crate::vm::{
    register_builtins, Coroutine, DebugSession, Debugger, Env, ExecOutcome, ExecutionContext,
    Processor, RuntimeError, RuntimeErrorKind, RuntimeResult, WatchItem,
};

/// Errors surfaced at the host boundary
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    #[error("compile error: {}", join_errors(.0))]
    Compile(Vec<CompileError>),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Dump(#[from] DumpError),
}

fn join_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug, Default)]
struct EntryState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Held while a native thread executes inside an interpreter
pub(crate) struct EntryGuard<'a> {
    script: &'a ScriptShared,
    outermost: bool,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        let mut entry = self.script.entry.lock();
        entry.depth = entry.depth.saturating_sub(1);
        if entry.depth == 0 {
            entry.owner = None;
        }
    }
}

/// State shared by every handle and coroutine of one interpreter
pub(crate) struct ScriptShared {
    pub(crate) options: ScriptOptions,
    pub(crate) logger: Logger,
    pub(crate) globals: Arc<Table>,
    pub(crate) debugger: Mutex<Option<DebugSession>>,
    /// Bumped under the `debugger` lock on every attach and detach
    pub(crate) debugger_epoch: AtomicU64,
    /// Coroutines currently resumed, innermost last
    pub(crate) coroutine_stack: Mutex<Vec<Arc<Coroutine>>>,
    main: Arc<Coroutine>,
    coroutines: Mutex<Vec<Weak<Coroutine>>>,
    next_coroutine_id: AtomicUsize,
    sources: RwLock<Vec<Arc<SourceCode>>>,
    entry: Mutex<EntryState>,
    self_ref: Weak<ScriptShared>,
}

impl ScriptShared {
    fn new(options: ScriptOptions) -> Arc<Self> {
        let shared = Arc::new_cyclic(|weak: &Weak<ScriptShared>| ScriptShared {
            logger: Logger::new(options.log_level, options.log_sink),
            options,
            globals: Arc::new(Table::new()),
            debugger: Mutex::new(None),
            debugger_epoch: AtomicU64::new(0),
            coroutine_stack: Mutex::new(Vec::new()),
            main: Arc::new(Coroutine::main(weak.clone())),
            coroutines: Mutex::new(Vec::new()),
            next_coroutine_id: AtomicUsize::new(1),
            sources: RwLock::new(Vec::new()),
            entry: Mutex::new(EntryState::default()),
            self_ref: weak.clone(),
        });
        if let Err(err) = register_builtins(&shared.globals) {
            shared
                .logger
                .error("failed to register built-ins", &[("error", err.message())]);
        }
        shared
    }

    /// Claim the interpreter for the calling thread
    pub(crate) fn enter(&self) -> RuntimeResult<EntryGuard<'_>> {
        let me = thread::current().id();
        let mut entry = self.entry.lock();
        if let Some(owner) = entry.owner {
            if owner != me {
                self.logger.warn(
                    "rejected entry from a second thread",
                    &[
                        ("owner", format!("{owner:?}")),
                        ("thread", format!("{me:?}")),
                    ],
                );
                return Err(RuntimeErrorKind::Reentrancy(format!(
                    "{me:?} tried to enter while {owner:?} is executing"
                ))
                .into());
            }
        }
        entry.owner = Some(me);
        entry.depth += 1;
        Ok(EntryGuard {
            script: self,
            outermost: entry.depth == 1,
        })
    }

    /// The coroutine executing now (main when none is resumed)
    pub(crate) fn current_coroutine(&self) -> Arc<Coroutine> {
        self.coroutine_stack
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.main))
    }

    pub(crate) fn new_coroutine(&self, entry: Value) -> Arc<Coroutine> {
        let id = self.next_coroutine_id.fetch_add(1, Ordering::Relaxed);
        let coroutine = Arc::new(Coroutine::new(
            id,
            entry,
            self.self_ref.clone(),
            self.options.default_auto_yield_counter,
        ));
        let mut coroutines = self.coroutines.lock();
        coroutines.retain(|c| c.strong_count() > 0);
        coroutines.push(Arc::downgrade(&coroutine));
        coroutine
    }

    pub(crate) fn source(&self, id: usize) -> Option<Arc<SourceCode>> {
        self.sources.read().get(id).cloned()
    }

    /// Every ref holding a breakpoint, across all sources
    pub(crate) fn breakpoints(&self) -> Vec<Arc<SourceRef>> {
        self.sources
            .read()
            .iter()
            .flat_map(|s| s.breakpoints())
            .collect()
    }

    /// One entry per live coroutine, main first
    pub(crate) fn thread_watch_items(&self) -> Vec<WatchItem> {
        let mut coroutines = vec![Arc::clone(&self.main)];
        coroutines.extend(self.coroutines.lock().iter().filter_map(Weak::upgrade));
        coroutines
            .iter()
            .map(|c| {
                let mut item = WatchItem::new(
                    format!("coroutine {}", c.id()),
                    Some(Value::from(c.state().as_str())),
                );
                item.address = Some(c.id());
                item
            })
            .collect()
    }

    fn compile(&self, code: &str, name: &str) -> Result<Value, ScriptError> {
        let block = Parser::parse_chunk(code)?;
        let mut sources = self.sources.write();
        let mut source = SourceCode::new(sources.len(), name, code);
        let compiled = Compiler::new(&source)
            .with_debug_instructions(self.options.emit_debug_instructions)
            .compile_chunk(&block)
            .map_err(ScriptError::Compile)?;
        source.refs = compiled.refs;
        sources.push(Arc::new(source));
        Ok(Value::Function(Arc::new(Closure::new(compiled.proto, Vec::new()))))
    }

    fn call(self: &Arc<Self>, function: Value, args: Vec<Value>) -> RuntimeResult<Value> {
        let guard = self.enter()?;
        let coroutine = self.current_coroutine();

        // A host call made from inside a native finds the processor busy
        // and runs on a scratch one.
        let mut scratch;
        let mut locked = coroutine.try_lock_processor();
        let processor: &mut Processor = match locked.as_deref_mut() {
            Some(processor) => processor,
            None => {
                scratch = Processor::new();
                &mut scratch
            }
        };
        let env = Env {
            script: self,
            coroutine: &coroutine,
        };
        let result = match processor.call(env, function, args, false) {
            Ok(ExecOutcome::Returned(value)) => Ok(value),
            Ok(ExecOutcome::Yielded(_)) => Err(RuntimeError::internal(
                "a host call returned a yield",
            )),
            Err(err) => Err(err),
        };
        drop(locked);

        if guard.outermost {
            if let Err(err) = &result {
                self.logger.error("script error", &[("error", err.message())]);
            }
            if let Some(session) = self.debugger.lock().as_mut() {
                session.debugger.signal_execution_ended();
            }
        }
        result
    }
}

// ============================================================================
// Script
// ============================================================================

/// An interpreter instance
#[derive(Clone)]
pub struct Script {
    shared: Arc<ScriptShared>,
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

impl Script {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ScriptOptions::default())
    }

    #[must_use]
    pub fn with_options(options: ScriptOptions) -> Self {
        Self {
            shared: ScriptShared::new(options),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ScriptOptions {
        &self.shared.options
    }

    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.shared.logger
    }

    // ===== Globals =====

    #[must_use]
    pub fn globals(&self) -> Arc<Table> {
        Arc::clone(&self.shared.globals)
    }

    #[must_use]
    pub fn get_global(&self, name: &str) -> Value {
        self.shared.globals.get_str(name)
    }

    pub fn set_global(&self, name: &str, value: Value) -> RuntimeResult<()> {
        self.shared.globals.set_str(name, value)
    }

    /// Expose a host function as a global
    pub fn register_native<F>(&self, name: &str, func: F) -> RuntimeResult<()>
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        self.set_global(name, Value::native(name, func))
    }

    // ===== Loading and Running =====

    /// Compile a chunk into a function without running it
    pub fn load_string(&self, code: &str, name: &str) -> Result<Value, ScriptError> {
        self.shared.compile(code, name)
    }

    /// Compile and run a chunk named `chunk`
    pub fn do_string(&self, code: &str) -> Result<Value, ScriptError> {
        let function = self.load_string(code, "chunk")?;
        Ok(self.call(function, Vec::new())?)
    }

    /// Call a function on the main coroutine and return its results
    pub fn call(&self, function: Value, args: Vec<Value>) -> RuntimeResult<Value> {
        self.shared.call(function, args)
    }

    // ===== Coroutines =====

    #[must_use]
    pub fn main_coroutine(&self) -> Arc<Coroutine> {
        Arc::clone(&self.shared.main)
    }

    /// Wrap a function into a new, not yet started coroutine
    pub fn create_coroutine(&self, function: Value) -> RuntimeResult<Arc<Coroutine>> {
        if !function.is_callable() {
            return Err(RuntimeError::invalid_operation(format!(
                "cannot create a coroutine from a {} value",
                function.type_name()
            )));
        }
        Ok(self.shared.new_coroutine(function))
    }

    #[must_use]
    pub fn coroutine_from_value(&self, value: &Value) -> Option<Arc<Coroutine>> {
        value.as_coroutine().cloned()
    }

    // ===== Debugging =====

    /// Attach a debugger; it pauses at the next hook point
    pub fn attach_debugger(&self, debugger: Box<dyn Debugger>) {
        let session = DebugSession::new(debugger, self.shared.options.line_based_breakpoints);
        let mut slot = self.shared.debugger.lock();
        *slot = Some(session);
        self.shared.debugger_epoch.fetch_add(1, Ordering::SeqCst);
        drop(slot);
        self.shared.logger.debug("debugger attached", &[]);
    }

    /// Detach the current debugger without waiting for a pause to end
    ///
    /// A debugger that is paused on another thread is checked out of the
    /// instance, so this returns `None` for it; it is dropped once its
    /// pending `get_action` returns and is never consulted again.
    pub fn detach_debugger(&self) -> Option<Box<dyn Debugger>> {
        let mut slot = self.shared.debugger.lock();
        self.shared.debugger_epoch.fetch_add(1, Ordering::SeqCst);
        let session = slot.take();
        drop(slot);
        session.map(|s| s.debugger)
    }

    /// Every source loaded so far, in load order
    #[must_use]
    pub fn sources(&self) -> Vec<Arc<SourceCode>> {
        self.shared.sources.read().clone()
    }

    #[must_use]
    pub fn source(&self, id: usize) -> Option<Arc<SourceCode>> {
        self.shared.source(id)
    }

    // ===== Dump / Undump =====

    /// Write a script function to `writer`
    pub fn dump<W: Write>(&self, function: &Value, writer: W) -> Result<(), ScriptError> {
        match function {
            Value::Function(closure) => {
                if !closure.upvalues.is_empty() {
                    return Err(DumpError::HasUpvalues {
                        name: closure.proto.name.clone(),
                        count: closure.upvalues.len(),
                    }
                    .into());
                }
                Ok(dump(&closure.proto, writer)?)
            }
            other => Err(DumpError::NotAFunction(other.type_name()).into()),
        }
    }

    /// Read a function written by [`Script::dump`]
    pub fn undump<R: Read>(&self, reader: R) -> Result<Value, ScriptError> {
        let proto = undump(reader)?;
        Ok(Value::Function(Arc::new(Closure::new(Arc::new(proto), Vec::new()))))
    }

    // ===== Dynamic Expressions =====

    /// Parse an expression evaluated without compiling, against the globals
    pub fn create_dynamic_expression(&self, code: &str) -> Result<DynamicExpression, ScriptError> {
        DynamicExpression::parse(code, Arc::clone(&self.shared.globals))
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("options", &self.shared.options)
            .field("sources", &self.shared.sources.read().len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Dynamic Expressions
// ============================================================================

/// An expression evaluated by walking its tree
///
/// Evaluation never calls functions, so it is safe while the interpreter is
/// paused in the debugger.
#[derive(Debug)]
pub struct DynamicExpression {
    code: String,
    expr: Expr,
    globals: Arc<Table>,
}

struct Scope<'a> {
    locals: &'a [(String, Value)],
    globals: &'a Table,
}

impl EvalScope for Scope<'_> {
    fn lookup(&self, name: &str) -> Value {
        self.locals
            .iter()
            .rev()
            .find(|(local, _)| local == name)
            .map_or_else(|| self.globals.get_str(name), |(_, value)| value.clone())
    }
}

impl DynamicExpression {
    pub(crate) fn parse(code: &str, globals: Arc<Table>) -> Result<Self, ScriptError> {
        let expr = Parser::parse_expression(code)?;
        Ok(Self {
            code: code.to_string(),
            expr,
            globals,
        })
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn evaluate(&self) -> RuntimeResult<Value> {
        self.evaluate_with_locals(&[])
    }

    /// Evaluate with `locals` shadowing globals; later entries win
    pub fn evaluate_with_locals(&self, locals: &[(String, Value)]) -> RuntimeResult<Value> {
        let scope = Scope {
            locals,
            globals: &self.globals,
        };
        Ok(evaluate(&self.expr, &scope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{LogLevel, LogSink};

    #[test]
    fn test_do_string_returns_values() {
        let script = Script::new();
        let result = script.do_string("return 1, 'two'").unwrap();
        let values = result.into_values();
        assert!(values[0].raw_equals(&Value::from(1)));
        assert!(values[1].raw_equals(&Value::from("two")));
    }

    #[test]
    fn test_globals_and_natives() {
        let script = Script::new();
        script.set_global("base", Value::from(40)).unwrap();
        script
            .register_native("add2", |_, args| {
                let n = args.first().and_then(Value::as_number).unwrap_or(0.0);
                Ok(Value::Number(n + 2.0))
            })
            .unwrap();
        script.do_string("answer = add2(base)").unwrap();
        assert!(script.get_global("answer").raw_equals(&Value::from(42)));
    }

    #[test]
    fn test_native_can_call_back_into_script() {
        let script = Script::new();
        script
            .register_native("twice", |ctx, mut args| {
                let f = args.remove(0);
                let a = ctx.call(f.clone(), vec![Value::from(1)])?.to_scalar();
                let b = ctx.call(f, vec![a])?.to_scalar();
                Ok(b)
            })
            .unwrap();
        let result = script
            .do_string("return twice(function(x) return x * 10 end)")
            .unwrap();
        assert!(result.raw_equals(&Value::from(100)));
    }

    #[test]
    fn test_syntax_errors() {
        let script = Script::new();
        let err = script.do_string("local = 1").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)));
    }

    #[test]
    fn test_runtime_errors_are_logged() {
        let options = ScriptOptions::default().with_logging(LogLevel::Error, LogSink::Capture);
        let script = Script::with_options(options);
        let err = script.do_string("local t = nil\nreturn t.x").unwrap_err();
        assert_eq!(err.to_string().lines().next(), Some("chunk:2: attempt to index a nil value"));
        let lines = script.logger().captured();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("attempt to index a nil value"));
    }

    #[test]
    fn test_stack_overflow() {
        let script = Script::with_options(ScriptOptions::default().with_max_call_depth(50));
        let err = script
            .do_string("local function f() return 1 + f() end return f()")
            .unwrap_err();
        assert!(err.to_string().contains("stack overflow"));
    }

    #[test]
    fn test_sources_are_registered() {
        let script = Script::new();
        script.load_string("return 1", "first").unwrap();
        script.load_string("return 2", "second").unwrap();
        let sources = script.sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].id, 1);
        assert_eq!(script.source(0).unwrap().name, "first");
        assert!(!sources[0].refs.is_empty());
    }

    #[test]
    fn test_dynamic_expression_reads_globals() {
        let script = Script::new();
        script.do_string("x = 4 t = { y = 5 }").unwrap();
        let expr = script.create_dynamic_expression("x * t.y + 1").unwrap();
        assert!(expr.evaluate().unwrap().raw_equals(&Value::from(21)));

        let locals = vec![("x".to_string(), Value::from(1))];
        assert!(expr
            .evaluate_with_locals(&locals)
            .unwrap()
            .raw_equals(&Value::from(6)));
    }

    #[test]
    fn test_dynamic_expression_refuses_calls() {
        let script = Script::new();
        let expr = script.create_dynamic_expression("print(1)").unwrap();
        let err = expr.evaluate().unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::Dynamic(_)));
    }

    #[test]
    fn test_entry_guard_nests_on_one_thread() {
        let script = Script::new();
        let outer = script.shared.enter().unwrap();
        let inner = script.shared.enter().unwrap();
        assert!(outer.outermost);
        assert!(!inner.outermost);
        drop(inner);
        drop(outer);
        assert_eq!(script.shared.entry.lock().depth, 0);
    }
}
