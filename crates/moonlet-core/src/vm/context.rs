//! Context handed to native functions

use std::sync::Arc;

use crate::bytecode::{SourceRef, Table, Value};
use crate::script::ScriptShared;

use super::coroutine::Coroutine;
use super::error::{RuntimeError, RuntimeResult, StackFrame};
use super::processor::{Env, ExecOutcome, Processor};

/// The view a native function gets of the running interpreter
///
/// Calls made through [`ExecutionContext::call`] run in a nested loop that
/// cannot yield: a native boundary sits between them and the coroutine.
pub struct ExecutionContext<'a> {
    processor: &'a mut Processor,
    env: Env<'a>,
    yieldable: bool,
    calling_ref: Option<Arc<SourceRef>>,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        processor: &'a mut Processor,
        env: Env<'a>,
        yieldable: bool,
        calling_ref: Option<Arc<SourceRef>>,
    ) -> Self {
        Self {
            processor,
            env,
            yieldable,
            calling_ref,
        }
    }

    /// Call a script or native function and return its results
    pub fn call(&mut self, function: Value, args: Vec<Value>) -> RuntimeResult<Value> {
        match self.processor.call(self.env, function, args, false)? {
            ExecOutcome::Returned(value) => Ok(value),
            ExecOutcome::Yielded(_) => Err(RuntimeError::internal(
                "a non-yieldable call returned a yield",
            )),
        }
    }

    /// True if a yield request returned now would suspend a coroutine
    #[must_use]
    pub fn is_yieldable(&self) -> bool {
        self.yieldable && !self.env.coroutine.is_main()
    }

    /// The interpreter's globals table
    #[must_use]
    pub fn globals(&self) -> &Arc<Table> {
        &self.env.script.globals
    }

    /// The coroutine this native runs in
    #[must_use]
    pub fn current_coroutine(&self) -> &Arc<Coroutine> {
        self.env.coroutine
    }

    #[must_use]
    pub fn is_main(&self) -> bool {
        self.env.coroutine.is_main()
    }

    /// Script frames of the running coroutine, innermost first
    #[must_use]
    pub fn call_stack(&self) -> Vec<StackFrame> {
        self.processor.stack_trace()
    }

    /// Source ref of the call instruction that invoked this native
    #[must_use]
    pub fn calling_ref(&self) -> Option<&Arc<SourceRef>> {
        self.calling_ref.as_ref()
    }

    /// `source:line` of the script frame `level` levels up (1 = the caller)
    #[must_use]
    pub fn location_at(&self, level: usize) -> Option<String> {
        self.processor.location_at(level)
    }

    pub(crate) fn script(&self) -> &Arc<ScriptShared> {
        self.env.script
    }
}
