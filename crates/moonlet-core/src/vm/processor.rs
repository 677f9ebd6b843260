//! The bytecode processor
//!
//! A processor owns one evaluation stack and one call-frame stack; every
//! coroutine has its own. Host entries and nested native calls run a loop
//! bounded by an entry depth: frames below it belong to an outer loop and are
//! never touched.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::ast::{arithmetic, bitwise, less_equal, less_than, BinOp};
use crate::bytecode::{
    number_to_integer, Closure, OpCode, SourceRef, Table, TailCallData, Value, YieldData,
};
use crate::script::ScriptShared;

use super::context::ExecutionContext;
use super::coroutine::Coroutine;
use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult, StackFrame};
use super::frame::{CallFrame, MarkerFrame, ScriptFrame, Slot};

/// How a run of the processor ended
#[derive(Debug)]
pub(crate) enum ExecOutcome {
    /// The entry function returned
    Returned(Value),
    /// The coroutine suspended; its frames stay in place
    Yielded(YieldData),
}

/// The interpreter and coroutine a processor runs for
#[derive(Clone, Copy)]
pub(crate) struct Env<'a> {
    pub script: &'a Arc<ScriptShared>,
    pub coroutine: &'a Arc<Coroutine>,
}

/// Bounds of one execution loop
#[derive(Debug, Clone, Copy)]
struct Run {
    entry_depth: usize,
    base: usize,
    yieldable: bool,
}

/// Processor state of one coroutine
#[derive(Default)]
pub(crate) struct Processor {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    /// Function run by the first resume of a coroutine
    pub(crate) entry: Option<Value>,
    /// Instructions run since the last resume, for auto-yield
    pub(crate) executed: u64,
}

type Step = RuntimeResult<Option<ExecOutcome>>;

impl Processor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Processor of a coroutine that will run `entry` when first resumed
    pub(crate) fn with_entry(entry: Value) -> Self {
        Self {
            entry: Some(entry),
            ..Self::default()
        }
    }

    /// Drop all execution state
    pub(crate) fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.entry = None;
        self.executed = 0;
    }

    // ===== Entry Points =====

    /// Call `function` and run until it returns (or yields, if `yieldable`)
    pub(crate) fn call(
        &mut self,
        env: Env<'_>,
        function: Value,
        args: Vec<Value>,
        yieldable: bool,
    ) -> RuntimeResult<ExecOutcome> {
        let run = Run {
            entry_depth: self.frames.len(),
            base: self.stack.len(),
            yieldable,
        };
        let first = self.call_value(env, run, function, args, None);
        self.drive(env, run, first)
    }

    /// Continue a coroutine suspended by `yield`; `values` become the yield's results
    pub(crate) fn resume_yielded(
        &mut self,
        env: Env<'_>,
        values: Vec<Value>,
    ) -> RuntimeResult<ExecOutcome> {
        let run = Run {
            entry_depth: 0,
            base: 0,
            yieldable: true,
        };
        let first = self.deliver(env, run, Value::Tuple(values));
        self.drive(env, run, first)
    }

    /// Continue a coroutine preempted by auto-yield
    pub(crate) fn resume_forced(&mut self, env: Env<'_>) -> RuntimeResult<ExecOutcome> {
        let run = Run {
            entry_depth: 0,
            base: 0,
            yieldable: true,
        };
        self.drive(env, run, Ok(None))
    }

    fn drive(&mut self, env: Env<'_>, run: Run, first: Step) -> RuntimeResult<ExecOutcome> {
        let mut step = first;
        loop {
            step = match step {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => self.execute(env, run),
                Err(err) => self.recover(env, run, err)?,
            };
        }
    }

    // ===== Execution Loop =====

    fn execute(&mut self, env: Env<'_>, run: Run) -> Step {
        loop {
            if let Some(outcome) = self.check_auto_yield(env, run) {
                return Ok(Some(outcome));
            }

            let frame = self.frame_mut()?;
            let Some(instr) = frame.closure.proto.chunk.get(frame.ip) else {
                return Err(RuntimeError::internal("instruction pointer out of range"));
            };
            let (op, operand) = (instr.op, instr.operand);
            let index = instr.index();
            frame.ip += 1;

            match op {
                OpCode::Nop => {}
                OpCode::Debug => self.debug_point(env)?,

                // ===== Stack Operations =====
                OpCode::Pop => {
                    let len = self.stack.len().saturating_sub(index);
                    self.stack.truncate(len);
                }
                OpCode::Copy => {
                    let value = self.peek(index)?.clone();
                    self.push(value);
                }
                OpCode::Swap => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(RuntimeError::internal("stack underflow"));
                    }
                    self.stack.swap(len - 1, len - 2);
                }
                OpCode::Literal => {
                    let value = self.constant(index)?;
                    self.push(value);
                }
                OpCode::Closure => {
                    let closure = self.make_closure(index)?;
                    self.push(Value::Function(Arc::new(closure)));
                }
                OpCode::NewTable => self.push(Value::Table(Arc::new(Table::new()))),
                OpCode::TblInitN => {
                    let value = self.pop()?.to_scalar();
                    let key = self.pop()?.to_scalar();
                    self.table_on_top()?.set(key, value)?;
                }
                OpCode::TblInitI => {
                    let value = self.pop()?;
                    let table = self.table_on_top()?;
                    match value {
                        Value::Tuple(_) | Value::Void => {
                            for (i, v) in value.into_values().into_iter().enumerate() {
                                table.set(Value::Number((index + i) as f64), v)?;
                            }
                        }
                        other => table.set(Value::Number(index as f64), other)?,
                    }
                }

                // ===== Variables =====
                OpCode::Local => {
                    let value = self.slot(index)?.get();
                    self.push(value);
                }
                OpCode::StoreLcl => {
                    let value = self.pop()?.to_scalar();
                    self.slot_mut(index)?.set(value);
                }
                OpCode::InitLcl => {
                    let value = self.pop()?.to_scalar();
                    *self.slot_mut(index)? = Slot::Plain(value);
                }
                OpCode::UpValue => {
                    let value = self.upvalue(index)?.lock().clone();
                    self.push(value);
                }
                OpCode::StoreUpv => {
                    let value = self.pop()?.to_scalar();
                    *self.upvalue(index)?.lock() = value;
                }
                OpCode::GetGlobal => {
                    let name = self.constant(index)?;
                    let value = env.script.globals.get(&name);
                    self.push(value);
                }
                OpCode::SetGlobal => {
                    let name = self.constant(index)?;
                    let value = self.pop()?.to_scalar();
                    env.script.globals.set(name, value)?;
                }
                OpCode::VarArgs => {
                    let varargs = self.frame()?.varargs.clone();
                    self.push(Value::Tuple(varargs));
                }

                // ===== Indexing =====
                OpCode::Index => {
                    let key = self.pop()?.to_scalar();
                    let object = self.pop()?.to_scalar();
                    self.push(index_value(&object, &key)?);
                }
                OpCode::IndexN => {
                    let key = self.constant(index)?;
                    let object = self.pop()?.to_scalar();
                    self.push(index_value(&object, &key)?);
                }
                OpCode::IndexSet => {
                    let key = self.pop()?.to_scalar();
                    let object = self.pop()?.to_scalar();
                    let value = self.pop()?.to_scalar();
                    set_index(&object, key, value)?;
                }
                OpCode::IndexSetN => {
                    let key = self.constant(index)?;
                    let object = self.pop()?.to_scalar();
                    let value = self.pop()?.to_scalar();
                    set_index(&object, key, value)?;
                }

                // ===== Calls =====
                OpCode::Call => {
                    let args = self.pop_values(index)?;
                    let function = self.pop()?.to_scalar();
                    let calling_ref = self.current_ref();
                    if let Some(outcome) = self.call_value(env, run, function, args, calling_ref)? {
                        return Ok(Some(outcome));
                    }
                }
                OpCode::Ret => {
                    let value = if operand == 0 { Value::Void } else { self.pop()? };
                    let Some(frame) = self.frames.pop() else {
                        return Err(RuntimeError::internal("return without a frame"));
                    };
                    self.stack.truncate(frame.stack_base());
                    if let Some(outcome) = self.deliver(env, run, value)? {
                        return Ok(Some(outcome));
                    }
                }

                // ===== Jumps =====
                OpCode::Jump => self.jump(index)?,
                OpCode::Jf => {
                    if !self.pop()?.is_truthy() {
                        self.jump(index)?;
                    }
                }
                OpCode::JNil => {
                    if self.pop()?.to_scalar().is_nil() {
                        self.jump(index)?;
                    }
                }
                OpCode::JtOrPop => {
                    if self.peek(0)?.is_truthy() {
                        self.jump(index)?;
                    } else {
                        self.pop()?;
                    }
                }
                OpCode::JfOrPop => {
                    if self.peek(0)?.is_truthy() {
                        self.pop()?;
                    } else {
                        self.jump(index)?;
                    }
                }
                OpCode::JFor => {
                    let step = self.pop_number()?;
                    let limit = self.pop_number()?;
                    let counter = self.pop_number()?;
                    let finished = if step > 0.0 {
                        counter > limit
                    } else {
                        counter < limit
                    };
                    if finished {
                        self.jump(index)?;
                    }
                }

                // ===== Binary Operators =====
                OpCode::Concat => {
                    let (l, r) = self.pop_pair()?;
                    let value = match (l.as_string(), r.as_string()) {
                        (Some(a), Some(b)) => Value::from(format!("{a}{b}")),
                        _ => {
                            let culprit = if l.as_string().is_none() { &l } else { &r };
                            return Err(RuntimeErrorKind::Concatenate {
                                type_name: culprit.type_name(),
                            }
                            .into());
                        }
                    };
                    self.push(value);
                }
                OpCode::Less | OpCode::LessEq => {
                    let (l, r) = self.pop_pair()?;
                    let result = if op == OpCode::Less {
                        less_than(&l, &r)
                    } else {
                        less_equal(&l, &r)
                    };
                    let Some(result) = result else {
                        return Err(RuntimeErrorKind::Compare {
                            left: l.type_name(),
                            right: r.type_name(),
                        }
                        .into());
                    };
                    self.push(Value::Boolean(result));
                }
                OpCode::Eq => {
                    let (l, r) = self.pop_pair()?;
                    self.push(Value::Boolean(l.raw_equals(&r)));
                }
                OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::FloorDiv
                | OpCode::Power => {
                    let (l, r) = self.pop_pair()?;
                    let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
                        let culprit = if l.as_number().is_none() { &l } else { &r };
                        return Err(RuntimeErrorKind::Arithmetic {
                            type_name: culprit.type_name(),
                        }
                        .into());
                    };
                    self.push(Value::Number(arithmetic(binary_op(op), a, b)));
                }
                OpCode::BitAnd
                | OpCode::BitOr
                | OpCode::BitXor
                | OpCode::ShiftLeft
                | OpCode::ShiftRight => {
                    let (l, r) = self.pop_pair()?;
                    let a = to_integer(&l)?;
                    let b = to_integer(&r)?;
                    self.push(Value::Number(bitwise(binary_op(op), a, b) as f64));
                }

                // ===== Unary Operators =====
                OpCode::Not | OpCode::CNot => {
                    let value = self.pop()?;
                    self.push(Value::Boolean(!value.is_truthy()));
                }
                OpCode::ToBool => {
                    let value = self.pop()?;
                    self.push(Value::Boolean(value.is_truthy()));
                }
                OpCode::Neg => {
                    let value = self.pop()?.to_scalar();
                    let Some(n) = value.as_number() else {
                        return Err(RuntimeErrorKind::Arithmetic {
                            type_name: value.type_name(),
                        }
                        .into());
                    };
                    self.push(Value::Number(-n));
                }
                OpCode::Len => {
                    let value = self.pop()?.to_scalar();
                    let len = match &value {
                        Value::String(s) => s.len(),
                        Value::Table(t) => t.len(),
                        other => {
                            return Err(RuntimeErrorKind::Length {
                                type_name: other.type_name(),
                            }
                            .into())
                        }
                    };
                    self.push(Value::Number(len as f64));
                }
                OpCode::BitNot => {
                    let value = self.pop()?.to_scalar();
                    let n = to_integer(&value)?;
                    self.push(Value::Number(!n as f64));
                }
                OpCode::ToNum => {
                    let value = self.pop()?.to_scalar();
                    let Some(n) = value.as_number() else {
                        let what = match operand {
                            0 => "initial value",
                            1 => "limit",
                            _ => "step",
                        };
                        return Err(RuntimeErrorKind::ForLoop(what).into());
                    };
                    self.push(Value::Number(n));
                }

                // ===== Tuples =====
                OpCode::MkTuple => {
                    let values = self.pop_values(index)?;
                    self.push(Value::tuple(values));
                }
                OpCode::Scalar => {
                    let value = self.pop()?.to_scalar();
                    self.push(value);
                }
                OpCode::ExpTuple => {
                    let mut values = self.pop()?.into_values();
                    values.resize(index, Value::Nil);
                    for value in values {
                        self.push(value.to_scalar());
                    }
                }
            }
        }
    }

    fn check_auto_yield(&mut self, env: Env<'_>, run: Run) -> Option<ExecOutcome> {
        let counter = env.coroutine.auto_yield_counter();
        if counter == 0 || !run.yieldable || env.coroutine.is_main() {
            return None;
        }
        if self.executed >= counter {
            self.executed = 0;
            return Some(ExecOutcome::Yielded(YieldData {
                values: Vec::new(),
                forced: true,
            }));
        }
        self.executed += 1;
        None
    }

    /// The session is checked out of the lock while paused, so hosts can
    /// detach or re-attach without waiting for the pause to end
    fn debug_point(&self, env: Env<'_>) -> RuntimeResult<()> {
        let ip = self.frame()?.ip.saturating_sub(1);
        let (mut session, epoch) = {
            let mut slot = env.script.debugger.lock();
            match slot.take() {
                Some(session) => (session, env.script.debugger_epoch.load(Ordering::SeqCst)),
                None => return Ok(()),
            }
        };

        session.on_debug_point(self, env.script, ip, self.current_ref());

        let mut slot = env.script.debugger.lock();
        if slot.is_none() && env.script.debugger_epoch.load(Ordering::SeqCst) == epoch {
            *slot = Some(session);
        }
        Ok(())
    }

    // ===== Calls =====

    /// Start a call; script functions get a frame, natives run immediately
    fn call_value(
        &mut self,
        env: Env<'_>,
        run: Run,
        function: Value,
        args: Vec<Value>,
        calling_ref: Option<Arc<SourceRef>>,
    ) -> Step {
        match function {
            Value::Function(closure) => {
                if self.frames.len() >= env.script.options.max_call_depth {
                    return Err(RuntimeErrorKind::StackOverflow.into());
                }
                let mut frame = ScriptFrame::new(closure, args, self.stack.len(), calling_ref);
                frame.entry_point = self.frames.len() == run.entry_depth;
                self.frames.push(CallFrame::Script(frame));
                Ok(None)
            }
            Value::NativeFunction(native) => {
                let result = {
                    let mut ctx =
                        ExecutionContext::new(self, env, run.yieldable, calling_ref.clone());
                    native.call(&mut ctx, args)?
                };
                self.native_result(env, run, result, calling_ref)
            }
            other => Err(RuntimeErrorKind::CallValue {
                type_name: other.type_name(),
            }
            .into()),
        }
    }

    /// Act on the value a native returned
    fn native_result(
        &mut self,
        env: Env<'_>,
        run: Run,
        result: Value,
        calling_ref: Option<Arc<SourceRef>>,
    ) -> Step {
        match result {
            Value::TailCallRequest(data) => {
                let TailCallData {
                    function,
                    args,
                    continuation,
                    error_handler,
                    handler_before_unwind,
                } = Arc::try_unwrap(data).unwrap_or_else(|shared| TailCallData {
                    function: shared.function.clone(),
                    args: shared.args.clone(),
                    continuation: shared.continuation.clone(),
                    error_handler: shared.error_handler.clone(),
                    handler_before_unwind: shared.handler_before_unwind.clone(),
                });
                if continuation.is_some() || error_handler.is_some() {
                    self.frames.push(CallFrame::Marker(MarkerFrame {
                        continuation,
                        error_handler,
                        handler_before_unwind,
                        stack_base: self.stack.len(),
                    }));
                }
                self.call_value(env, run, function, args, calling_ref)
            }
            Value::YieldRequest(data) => {
                if env.coroutine.is_main() {
                    Err(RuntimeErrorKind::CannotYieldMain.into())
                } else if !run.yieldable {
                    Err(RuntimeErrorKind::CannotYield.into())
                } else {
                    Ok(Some(ExecOutcome::Yielded((*data).clone())))
                }
            }
            other => self.deliver(env, run, other),
        }
    }

    /// Hand a return value to whoever waits for it
    fn deliver(&mut self, env: Env<'_>, run: Run, value: Value) -> Step {
        loop {
            if self.frames.len() <= run.entry_depth {
                return Ok(Some(ExecOutcome::Returned(value)));
            }
            match self.frames.last() {
                Some(CallFrame::Script(_)) => {
                    self.stack.push(value);
                    return Ok(None);
                }
                Some(CallFrame::Marker(_)) => {
                    let Some(CallFrame::Marker(marker)) = self.frames.pop() else {
                        return Err(RuntimeError::internal("marker frame vanished"));
                    };
                    self.stack.truncate(marker.stack_base);
                    if let Some(continuation) = marker.continuation {
                        let result = {
                            let mut ctx = ExecutionContext::new(self, env, run.yieldable, None);
                            continuation.call(&mut ctx, value.into_values())?
                        };
                        return self.native_result(env, run, result, None);
                    }
                }
                None => return Ok(Some(ExecOutcome::Returned(value))),
            }
        }
    }

    // ===== Error Handling =====

    /// Route an error to the nearest handler of this run
    ///
    /// The outer `Err` is final: the run is unwound and the error leaves it.
    fn recover(&mut self, env: Env<'_>, run: Run, mut err: RuntimeError) -> RuntimeResult<Step> {
        if err.decorate {
            if let Some(frame) = self.frames[run.entry_depth.min(self.frames.len())..]
                .iter()
                .rev()
                .find_map(CallFrame::as_script)
            {
                err.decorate_with(frame.location());
            }
        }
        if err.stack_trace.is_empty() {
            err.stack_trace = self.stack_trace();
        }

        let handler_index = if err.is_recoverable() {
            self.frames
                .iter()
                .enumerate()
                .skip(run.entry_depth)
                .rev()
                .find(|(_, f)| matches!(f, CallFrame::Marker(m) if m.error_handler.is_some()))
                .map(|(i, _)| i)
        } else {
            None
        };
        let Some(handler_index) = handler_index else {
            return Err(self.unwind(run, err));
        };

        let mut error_value = err.to_value();
        let before_unwind = match &self.frames[handler_index] {
            CallFrame::Marker(marker) => marker.handler_before_unwind.clone(),
            CallFrame::Script(_) => None,
        };
        if let Some(handler) = before_unwind {
            error_value = match self.call(env, handler, vec![error_value], false) {
                Ok(ExecOutcome::Returned(value)) => value.to_scalar(),
                Ok(ExecOutcome::Yielded(_)) => {
                    return Err(self.unwind(run, RuntimeError::internal("error handler yielded")))
                }
                Err(e) if !e.is_recoverable() => return Err(self.unwind(run, e)),
                Err(e) => e.to_value(),
            };
        }

        self.frames.truncate(handler_index + 1);
        let Some(CallFrame::Marker(marker)) = self.frames.pop() else {
            return Err(self.unwind(run, RuntimeError::internal("error handler frame vanished")));
        };
        self.stack.truncate(marker.stack_base);
        let Some(handler) = marker.error_handler else {
            let err = RuntimeError::internal("error handler frame without handler");
            return Err(self.unwind(run, err));
        };

        let result = {
            let mut ctx = ExecutionContext::new(self, env, run.yieldable, None);
            handler.call(&mut ctx, vec![error_value])
        };
        Ok(result.and_then(|value| self.native_result(env, run, value, None)))
    }

    /// Drop everything this run pushed; the error leaves the run
    fn unwind(&mut self, run: Run, err: RuntimeError) -> RuntimeError {
        self.frames.truncate(run.entry_depth);
        self.stack.truncate(run.base);
        err
    }

    /// Script frames, innermost first
    pub(crate) fn stack_trace(&self) -> Vec<StackFrame> {
        self.frames
            .iter()
            .rev()
            .filter_map(CallFrame::as_script)
            .map(|frame| {
                let proto = &frame.closure.proto;
                StackFrame::new(proto.name.clone(), frame.current_line())
                    .with_source(proto.source_name.clone())
            })
            .collect()
    }

    /// `source:line` of the script frame `level` levels up (1 = innermost)
    pub(crate) fn location_at(&self, level: usize) -> Option<String> {
        self.frames
            .iter()
            .rev()
            .filter_map(CallFrame::as_script)
            .nth(level.checked_sub(1)?)
            .map(ScriptFrame::location)
    }

    /// Index of the first `Debug` instruction after `ip` in the innermost frame
    pub(crate) fn next_debug_point(&self, ip: usize) -> Option<usize> {
        let frame = self.frame().ok()?;
        frame.closure.proto.chunk.debug_points().find(|&i| i > ip)
    }

    // ===== Helpers =====

    fn frame(&self) -> RuntimeResult<&ScriptFrame> {
        match self.frames.last() {
            Some(CallFrame::Script(frame)) => Ok(frame),
            _ => Err(RuntimeError::internal("no script frame")),
        }
    }

    fn frame_mut(&mut self) -> RuntimeResult<&mut ScriptFrame> {
        match self.frames.last_mut() {
            Some(CallFrame::Script(frame)) => Ok(frame),
            _ => Err(RuntimeError::internal("no script frame")),
        }
    }

    /// Ref of the instruction being executed
    fn current_ref(&self) -> Option<Arc<SourceRef>> {
        self.frame()
            .ok()?
            .current_instruction()?
            .source_ref
            .clone()
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> RuntimeResult<Value> {
        let base = self.frame().map_or(0, |f| f.stack_base);
        if self.stack.len() <= base {
            return Err(RuntimeError::internal("stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::internal("stack underflow"))
    }

    fn pop_pair(&mut self) -> RuntimeResult<(Value, Value)> {
        let r = self.pop()?.to_scalar();
        let l = self.pop()?.to_scalar();
        Ok((l, r))
    }

    fn pop_number(&mut self) -> RuntimeResult<f64> {
        self.pop()?
            .to_scalar()
            .as_number()
            .ok_or_else(|| RuntimeError::internal("numeric for state is not a number"))
    }

    /// Pop `count` values, expanding a trailing tuple
    fn pop_values(&mut self, count: usize) -> RuntimeResult<Vec<Value>> {
        let len = self.stack.len();
        if len < count {
            return Err(RuntimeError::internal("stack underflow"));
        }
        let mut raw = self.stack.split_off(len - count);
        let last = raw.pop();
        let mut values: Vec<Value> = raw.into_iter().map(Value::to_scalar).collect();
        if let Some(last) = last {
            values.extend(last.into_values());
        }
        Ok(values)
    }

    fn peek(&self, depth: usize) -> RuntimeResult<&Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or_else(|| RuntimeError::internal("stack underflow"))
    }

    fn jump(&mut self, target: usize) -> RuntimeResult<()> {
        self.frame_mut()?.ip = target;
        Ok(())
    }

    fn constant(&self, index: usize) -> RuntimeResult<Value> {
        self.frame()?
            .closure
            .proto
            .chunk
            .get_constant(index)
            .map(|c| c.to_value())
            .ok_or_else(|| RuntimeError::internal(format!("bad constant index {index}")))
    }

    fn slot(&self, index: usize) -> RuntimeResult<&Slot> {
        self.frame()?
            .locals
            .get(index)
            .ok_or_else(|| RuntimeError::internal(format!("bad local slot {index}")))
    }

    fn slot_mut(&mut self, index: usize) -> RuntimeResult<&mut Slot> {
        self.frame_mut()?
            .locals
            .get_mut(index)
            .ok_or_else(|| RuntimeError::internal(format!("bad local slot {index}")))
    }

    fn upvalue(&self, index: usize) -> RuntimeResult<&crate::bytecode::Upvalue> {
        self.frame()?
            .closure
            .upvalues
            .get(index)
            .ok_or_else(|| RuntimeError::internal(format!("bad upvalue index {index}")))
    }

    fn table_on_top(&self) -> RuntimeResult<Arc<Table>> {
        self.peek(0)?
            .as_table()
            .cloned()
            .ok_or_else(|| RuntimeError::internal("table constructor lost its table"))
    }

    fn make_closure(&mut self, index: usize) -> RuntimeResult<Closure> {
        let frame = self.frame_mut()?;
        let Some(proto) = frame.closure.proto.protos.get(index).cloned() else {
            return Err(RuntimeError::internal(format!("bad prototype index {index}")));
        };
        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for desc in &proto.upvalues {
            let cell = match *desc {
                crate::bytecode::UpvalueDesc::Local(slot) => frame
                    .locals
                    .get_mut(usize::from(slot))
                    .map(Slot::capture),
                crate::bytecode::UpvalueDesc::Upvalue(i) => {
                    frame.closure.upvalues.get(usize::from(i)).cloned()
                }
            };
            let Some(cell) = cell else {
                return Err(RuntimeError::internal("bad upvalue descriptor"));
            };
            upvalues.push(cell);
        }
        Ok(Closure::new(proto, upvalues))
    }
}

fn index_value(object: &Value, key: &Value) -> RuntimeResult<Value> {
    match object {
        Value::Table(table) => Ok(table.get(key)),
        other => Err(RuntimeErrorKind::IndexValue {
            type_name: other.type_name(),
        }
        .into()),
    }
}

fn set_index(object: &Value, key: Value, value: Value) -> RuntimeResult<()> {
    match object {
        Value::Table(table) => table.set(key, value),
        other => Err(RuntimeErrorKind::IndexValue {
            type_name: other.type_name(),
        }
        .into()),
    }
}

fn to_integer(value: &Value) -> RuntimeResult<i64> {
    let Some(n) = value.as_number() else {
        return Err(RuntimeErrorKind::Bitwise {
            type_name: value.type_name(),
        }
        .into());
    };
    number_to_integer(n).ok_or_else(|| RuntimeErrorKind::NoIntegerRepresentation.into())
}

fn binary_op(op: OpCode) -> BinOp {
    match op {
        OpCode::Add => BinOp::Add,
        OpCode::Sub => BinOp::Sub,
        OpCode::Mul => BinOp::Mul,
        OpCode::Div => BinOp::Div,
        OpCode::Mod => BinOp::Mod,
        OpCode::FloorDiv => BinOp::FloorDiv,
        OpCode::Power => BinOp::Pow,
        OpCode::BitAnd => BinOp::BitAnd,
        OpCode::BitOr => BinOp::BitOr,
        OpCode::BitXor => BinOp::BitXor,
        OpCode::ShiftLeft => BinOp::Shl,
        _ => BinOp::Shr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Chunk, Constant, FunctionProto};
    use crate::Script;

    /// Run a hand-assembled main function
    fn run_chunk(chunk: Chunk, locals: usize) -> RuntimeResult<Value> {
        let mut proto = FunctionProto::new("main chunk", "asm");
        proto.chunk = chunk;
        proto.local_names = (0..locals).map(|i| format!("l{i}")).collect();
        let function = Value::Function(Arc::new(Closure::new(Arc::new(proto), Vec::new())));
        Script::new().call(function, Vec::new())
    }

    fn number(chunk: &mut Chunk, n: f64) {
        let c = chunk.add_constant(Constant::Number(n));
        chunk.emit(OpCode::Literal, c as i32, None);
    }

    #[test]
    fn test_arithmetic() {
        let mut chunk = Chunk::new();
        number(&mut chunk, 7.0);
        number(&mut chunk, 2.0);
        chunk.emit(OpCode::FloorDiv, 0, None);
        chunk.emit(OpCode::Ret, 1, None);
        let result = run_chunk(chunk, 0).unwrap();
        assert!(result.raw_equals(&Value::from(3)));
    }

    #[test]
    fn test_greater_is_negated_less_equal() {
        for (a, b) in [(1.0, 2.0), (2.0, 2.0), (3.0, 2.0)] {
            let mut chunk = Chunk::new();
            number(&mut chunk, a);
            number(&mut chunk, b);
            chunk.emit(OpCode::LessEq, 0, None);
            chunk.emit(OpCode::CNot, 0, None);
            chunk.emit(OpCode::Ret, 1, None);
            let result = run_chunk(chunk, 0).unwrap();
            assert!(result.raw_equals(&Value::Boolean(a > b)), "{a} > {b}");
        }
    }

    #[test]
    fn test_jt_or_pop_keeps_deciding_value() {
        let mut chunk = Chunk::new();
        number(&mut chunk, 1.0);
        chunk.emit(OpCode::JtOrPop, 3, None);
        number(&mut chunk, 2.0);
        chunk.emit(OpCode::Ret, 1, None);
        let result = run_chunk(chunk, 0).unwrap();
        assert!(result.raw_equals(&Value::from(1)));
    }

    #[test]
    fn test_locals_and_tuples() {
        let mut chunk = Chunk::new();
        number(&mut chunk, 1.0);
        number(&mut chunk, 2.0);
        chunk.emit(OpCode::MkTuple, 2, None);
        chunk.emit(OpCode::ExpTuple, 3, None);
        chunk.emit(OpCode::InitLcl, 2, None);
        chunk.emit(OpCode::InitLcl, 1, None);
        chunk.emit(OpCode::InitLcl, 0, None);
        chunk.emit(OpCode::Local, 1, None);
        chunk.emit(OpCode::Local, 2, None);
        chunk.emit(OpCode::MkTuple, 2, None);
        chunk.emit(OpCode::Ret, 1, None);
        let result = run_chunk(chunk, 3).unwrap();
        let values = result.into_values();
        assert_eq!(values.len(), 2);
        assert!(values[0].raw_equals(&Value::from(2)));
        assert!(values[1].is_nil());
    }

    #[test]
    fn test_call_non_function() {
        let mut chunk = Chunk::new();
        number(&mut chunk, 1.0);
        chunk.emit(OpCode::Call, 0, None);
        chunk.emit(OpCode::Ret, 1, None);
        let err = run_chunk(chunk, 0).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::CallValue { type_name: "number" }));
        assert_eq!(err.message(), "asm:?: attempt to call a number value");
    }

    #[test]
    fn test_bitwise_needs_integers() {
        let mut chunk = Chunk::new();
        number(&mut chunk, 1.5);
        number(&mut chunk, 1.0);
        chunk.emit(OpCode::BitOr, 0, None);
        chunk.emit(OpCode::Ret, 1, None);
        let err = run_chunk(chunk, 0).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::NoIntegerRepresentation));
    }

    #[test]
    fn test_for_loop_type_error() {
        let mut chunk = Chunk::new();
        let c = chunk.add_constant(Constant::Boolean(true));
        chunk.emit(OpCode::Literal, c as i32, None);
        chunk.emit(OpCode::ToNum, 1, None);
        chunk.emit(OpCode::Ret, 1, None);
        let err = run_chunk(chunk, 0).unwrap_err();
        assert!(err.message().ends_with("'for' limit must be a number"));
    }
}
