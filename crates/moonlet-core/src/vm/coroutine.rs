//! Coroutine scheduler
//!
//! Every coroutine owns a [`Processor`] holding its frames and evaluation
//! stack between resumes. Resuming swaps that processor in on the calling
//! native thread; a yield leaves the frames in place and hands control back
//! to the resumer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::bytecode::Value;
use crate::script::ScriptShared;

use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
use super::processor::{Env, ExecOutcome, Processor};

/// Scheduling state of a coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Created, never resumed
    NotStarted,
    /// Suspended by `yield`
    Suspended,
    /// Suspended by the auto-yield counter
    ForceSuspended,
    Running,
    /// Waiting on a coroutine it resumed
    Normal,
    /// The implicit coroutine of an interpreter; never dies
    Main,
    Dead,
}

impl CoroutineState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CoroutineState::NotStarted => "not started",
            CoroutineState::Suspended => "suspended",
            CoroutineState::ForceSuspended => "force suspended",
            CoroutineState::Running => "running",
            CoroutineState::Normal => "normal",
            CoroutineState::Main => "main",
            CoroutineState::Dead => "dead",
        }
    }
}

impl fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cooperatively scheduled execution with its own call stack
pub struct Coroutine {
    id: usize,
    state: Mutex<CoroutineState>,
    processor: Mutex<Processor>,
    /// Instructions per resume before a forced yield (0 = never)
    auto_yield_counter: AtomicU64,
    script: Weak<ScriptShared>,
    is_main: bool,
}

impl Coroutine {
    pub(crate) fn new(
        id: usize,
        entry: Value,
        script: Weak<ScriptShared>,
        auto_yield_counter: u64,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(CoroutineState::NotStarted),
            processor: Mutex::new(Processor::with_entry(entry)),
            auto_yield_counter: AtomicU64::new(auto_yield_counter),
            script,
            is_main: false,
        }
    }

    pub(crate) fn main(script: Weak<ScriptShared>) -> Self {
        Self {
            id: 0,
            state: Mutex::new(CoroutineState::Main),
            processor: Mutex::new(Processor::new()),
            auto_yield_counter: AtomicU64::new(0),
            script,
            is_main: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> CoroutineState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_main(&self) -> bool {
        self.is_main
    }

    #[must_use]
    pub fn auto_yield_counter(&self) -> u64 {
        self.auto_yield_counter.load(Ordering::Relaxed)
    }

    /// Set the number of instructions a resume may run before a forced yield
    pub fn set_auto_yield_counter(&self, counter: u64) {
        self.auto_yield_counter.store(counter, Ordering::Relaxed);
    }

    /// Resume from the host
    ///
    /// Returns `(true, values...)` as a tuple on a yield or return. Script
    /// errors are returned as `Err`; they also kill the coroutine.
    pub fn resume(self: &Arc<Self>, args: Vec<Value>) -> RuntimeResult<Value> {
        let script = self
            .script
            .upgrade()
            .ok_or_else(|| RuntimeError::invalid_operation("the interpreter was dropped"))?;
        let _guard = script.enter()?;
        let result = self.resume_from(&script, args);
        if let Err(err) = &result {
            script.logger.error(
                "coroutine failed",
                &[("coroutine", self.id.to_string()), ("error", err.message())],
            );
        }
        result
    }

    /// Resume on behalf of the running interpreter
    pub(crate) fn resume_from(
        self: &Arc<Self>,
        script: &Arc<ScriptShared>,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            match previous {
                CoroutineState::Dead => return Err(RuntimeErrorKind::CannotResumeDead.into()),
                CoroutineState::Running | CoroutineState::Normal | CoroutineState::Main => {
                    return Err(RuntimeErrorKind::CannotResumeNonSuspended.into())
                }
                CoroutineState::ForceSuspended if !args.is_empty() => {
                    return Err(RuntimeErrorKind::ForcedResumeWithArguments.into())
                }
                CoroutineState::NotStarted
                | CoroutineState::Suspended
                | CoroutineState::ForceSuspended => {}
            }
            *state = CoroutineState::Running;
            previous
        };
        self.log_transition(script, previous, CoroutineState::Running);

        let resumer = script.current_coroutine();
        let resumer_waits = {
            let mut state = resumer.state.lock();
            if *state == CoroutineState::Running {
                *state = CoroutineState::Normal;
                true
            } else {
                false
            }
        };
        script.coroutine_stack.lock().push(Arc::clone(self));

        let outcome = {
            let mut processor = self.processor.lock();
            processor.executed = 0;
            let env = Env {
                script,
                coroutine: self,
            };
            match previous {
                CoroutineState::NotStarted => match processor.entry.take() {
                    Some(entry) => processor.call(env, entry, args, true),
                    None => Err(RuntimeError::internal("coroutine has no entry function")),
                },
                CoroutineState::ForceSuspended => processor.resume_forced(env),
                _ => processor.resume_yielded(env, args),
            }
        };

        script.coroutine_stack.lock().pop();
        if resumer_waits {
            *resumer.state.lock() = CoroutineState::Running;
        }

        let next = match &outcome {
            Ok(ExecOutcome::Yielded(data)) if data.forced => CoroutineState::ForceSuspended,
            Ok(ExecOutcome::Yielded(_)) => CoroutineState::Suspended,
            Ok(ExecOutcome::Returned(_)) | Err(_) => CoroutineState::Dead,
        };
        *self.state.lock() = next;
        self.log_transition(script, CoroutineState::Running, next);
        if next == CoroutineState::Dead {
            self.processor.lock().reset();
        }

        let mut values = vec![Value::Boolean(true)];
        match outcome? {
            ExecOutcome::Returned(value) => {
                for v in value.into_values() {
                    match v {
                        Value::Tuple(inner) => values.extend(inner),
                        other => values.push(other),
                    }
                }
            }
            ExecOutcome::Yielded(data) => values.extend(data.values),
        }
        Ok(Value::Tuple(values))
    }

    /// `coroutine.status` as seen from `current`
    pub(crate) fn status(self: &Arc<Self>, current: &Arc<Coroutine>) -> &'static str {
        if Arc::ptr_eq(self, current) {
            return "running";
        }
        match self.state() {
            CoroutineState::Main | CoroutineState::Running | CoroutineState::Normal => "normal",
            CoroutineState::NotStarted
            | CoroutineState::Suspended
            | CoroutineState::ForceSuspended => "suspended",
            CoroutineState::Dead => "dead",
        }
    }

    /// Kill a suspended coroutine from the host
    pub fn close(self: &Arc<Self>) -> RuntimeResult<()> {
        let script = self
            .script
            .upgrade()
            .ok_or_else(|| RuntimeError::invalid_operation("the interpreter was dropped"))?;
        let _guard = script.enter()?;
        self.close_inner(&script)
    }

    pub(crate) fn close_inner(&self, script: &ScriptShared) -> RuntimeResult<()> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            match previous {
                CoroutineState::Running => return Err(RuntimeErrorKind::CannotClose("running").into()),
                CoroutineState::Normal => return Err(RuntimeErrorKind::CannotClose("normal").into()),
                CoroutineState::Main => return Err(RuntimeErrorKind::CannotClose("main").into()),
                CoroutineState::Dead => return Ok(()),
                CoroutineState::NotStarted
                | CoroutineState::Suspended
                | CoroutineState::ForceSuspended => {}
            }
            *state = CoroutineState::Dead;
            previous
        };
        self.processor.lock().reset();
        self.log_transition(script, previous, CoroutineState::Dead);
        Ok(())
    }

    /// The processor of this coroutine, unless it is executing
    pub(crate) fn try_lock_processor(&self) -> Option<MutexGuard<'_, Processor>> {
        self.processor.try_lock()
    }

    fn log_transition(&self, script: &ScriptShared, from: CoroutineState, to: CoroutineState) {
        script.logger.trace(
            "coroutine state changed",
            &[
                ("coroutine", self.id.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ],
        );
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("is_main", &self.is_main)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Script;

    fn coroutine(script: &Script, code: &str) -> Arc<Coroutine> {
        let function = script.load_string(code, "co").unwrap();
        script.create_coroutine(function).unwrap()
    }

    #[test]
    fn test_state_machine() {
        let script = Script::new();
        let co = coroutine(&script, "coroutine.yield(1) return 2");
        assert_eq!(co.state(), CoroutineState::NotStarted);

        co.resume(vec![]).unwrap();
        assert_eq!(co.state(), CoroutineState::Suspended);

        co.resume(vec![]).unwrap();
        assert_eq!(co.state(), CoroutineState::Dead);

        let err = co.resume(vec![]).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::CannotResumeDead));
    }

    #[test]
    fn test_error_kills_coroutine() {
        let script = Script::new();
        let co = coroutine(&script, "error('boom')");
        let err = co.resume(vec![]).unwrap_err();
        assert_eq!(err.message(), "co:1: boom");
        assert_eq!(co.state(), CoroutineState::Dead);
    }

    #[test]
    fn test_resume_arguments_and_yield_results() {
        let script = Script::new();
        let co = coroutine(
            &script,
            "local a, b = ... local c = coroutine.yield(a + b) return c * 2",
        );
        let first = co.resume(vec![Value::from(1), Value::from(2)]).unwrap();
        let first = first.into_values();
        assert!(first[1].raw_equals(&Value::from(3)));

        let second = co.resume(vec![Value::from(5)]).unwrap().into_values();
        assert_eq!(second.len(), 2);
        assert!(second[1].raw_equals(&Value::from(10)));
    }

    #[test]
    fn test_forced_yield() {
        let script = Script::new();
        let co = coroutine(&script, "local n = 0 for i = 1, 100 do n = n + i end return n");
        co.set_auto_yield_counter(5);
        co.resume(vec![]).unwrap();
        assert_eq!(co.state(), CoroutineState::ForceSuspended);

        let err = co.resume(vec![Value::from(1)]).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::ForcedResumeWithArguments));
        assert_eq!(co.state(), CoroutineState::ForceSuspended);

        co.set_auto_yield_counter(0);
        let done = co.resume(vec![]).unwrap().into_values();
        assert!(done[1].raw_equals(&Value::from(5050)));
    }

    #[test]
    fn test_close() {
        let script = Script::new();
        let co = coroutine(&script, "coroutine.yield()");
        co.resume(vec![]).unwrap();
        co.close().unwrap();
        assert_eq!(co.state(), CoroutineState::Dead);
        co.close().unwrap();
    }

    #[test]
    fn test_main_cannot_be_resumed() {
        let script = Script::new();
        let main = script.main_coroutine();
        let err = main.resume(vec![]).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::CannotResumeNonSuspended));
        assert_eq!(main.state(), CoroutineState::Main);
    }
}
