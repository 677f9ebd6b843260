//! Call frames of the processor

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bytecode::{Closure, Instruction, NativeFunction, SourceRef, Upvalue, Value};

/// A local variable slot
///
/// Slots start plain and are boxed the first time a closure captures them,
/// so that the frame and every closure share one cell.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Plain(Value),
    Boxed(Upvalue),
}

impl Slot {
    pub(crate) fn get(&self) -> Value {
        match self {
            Slot::Plain(v) => v.clone(),
            Slot::Boxed(cell) => cell.lock().clone(),
        }
    }

    pub(crate) fn set(&mut self, value: Value) {
        match self {
            Slot::Plain(v) => *v = value,
            Slot::Boxed(cell) => *cell.lock() = value,
        }
    }

    /// Shared cell for this slot, boxing it if needed
    pub(crate) fn capture(&mut self) -> Upvalue {
        match self {
            Slot::Boxed(cell) => Arc::clone(cell),
            Slot::Plain(v) => {
                let cell = Arc::new(Mutex::new(std::mem::take(v)));
                *self = Slot::Boxed(Arc::clone(&cell));
                cell
            }
        }
    }
}

/// Activation record of a script function
pub(crate) struct ScriptFrame {
    pub closure: Arc<Closure>,

    /// Next instruction to execute
    pub ip: usize,

    /// Evaluation stack height at entry
    pub stack_base: usize,

    pub locals: Vec<Slot>,

    /// Arguments past the declared parameters (vararg functions only)
    pub varargs: Vec<Value>,

    /// Source ref of the call instruction that created this frame
    pub calling_ref: Option<Arc<SourceRef>>,

    /// First frame pushed by a host entry (call, resume)
    pub entry_point: bool,
}

impl ScriptFrame {
    pub(crate) fn new(
        closure: Arc<Closure>,
        args: Vec<Value>,
        stack_base: usize,
        calling_ref: Option<Arc<SourceRef>>,
    ) -> Self {
        let proto = &closure.proto;
        let params = usize::from(proto.param_count);
        let mut locals = vec![Slot::Plain(Value::Nil); proto.local_count().max(params)];
        let mut varargs = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < params {
                locals[i] = Slot::Plain(arg);
            } else if proto.is_vararg {
                varargs.push(arg);
            } else {
                break;
            }
        }
        Self {
            closure,
            ip: 0,
            stack_base,
            locals,
            varargs,
            calling_ref,
            entry_point: false,
        }
    }

    /// Instruction that executed last (the one that raised, for errors)
    pub(crate) fn current_instruction(&self) -> Option<&Instruction> {
        self.closure.proto.chunk.get(self.ip.checked_sub(1)?)
    }

    /// Line of the instruction that executed last
    pub(crate) fn current_line(&self) -> Option<u32> {
        self.current_instruction()
            .and_then(|i| i.source_ref.as_ref())
            .map(|r| r.from_line)
    }

    /// `source:line` position used to decorate errors
    pub(crate) fn location(&self) -> String {
        let source = &self.closure.proto.source_name;
        match self.current_line() {
            Some(line) => format!("{source}:{line}"),
            None => format!("{source}:?"),
        }
    }

    /// Visible locals (hidden loop state excluded) with their values
    pub(crate) fn named_locals(&self) -> impl Iterator<Item = (&str, Value)> + '_ {
        self.closure
            .proto
            .local_names
            .iter()
            .zip(&self.locals)
            .filter(|(name, _)| !name.starts_with('('))
            .map(|(name, slot)| (name.as_str(), slot.get()))
    }
}

/// Frame pushed for a native tail call that registered callbacks
pub(crate) struct MarkerFrame {
    /// Receives the call results
    pub continuation: Option<Arc<NativeFunction>>,

    /// Receives the error value if the call fails
    pub error_handler: Option<Arc<NativeFunction>>,

    /// Run with the error value before unwinding
    pub handler_before_unwind: Option<Value>,

    pub stack_base: usize,
}

pub(crate) enum CallFrame {
    Script(ScriptFrame),
    Marker(MarkerFrame),
}

impl CallFrame {
    pub(crate) fn stack_base(&self) -> usize {
        match self {
            CallFrame::Script(f) => f.stack_base,
            CallFrame::Marker(m) => m.stack_base,
        }
    }

    pub(crate) fn as_script(&self) -> Option<&ScriptFrame> {
        match self {
            CallFrame::Script(f) => Some(f),
            CallFrame::Marker(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::FunctionProto;

    fn closure(params: u16, vararg: bool, locals: &[&str]) -> Arc<Closure> {
        let mut proto = FunctionProto::new("f", "test");
        proto.param_count = params;
        proto.is_vararg = vararg;
        proto.local_names = locals.iter().map(ToString::to_string).collect();
        Arc::new(Closure::new(Arc::new(proto), Vec::new()))
    }

    #[test]
    fn captured_slots_share_one_cell() {
        let mut slot = Slot::Plain(Value::from(1));
        let cell = slot.capture();
        slot.set(Value::from(2));
        assert!(cell.lock().raw_equals(&Value::from(2)));
        assert!(Arc::ptr_eq(&cell, &slot.capture()));
    }

    #[test]
    fn extra_arguments_become_varargs() {
        let args = vec![Value::from(1), Value::from(2), Value::from(3)];
        let frame = ScriptFrame::new(closure(1, true, &["a"]), args, 0, None);
        assert!(frame.locals[0].get().raw_equals(&Value::from(1)));
        assert_eq!(frame.varargs.len(), 2);

        let frame = ScriptFrame::new(closure(1, false, &["a"]), vec![Value::from(1); 3], 0, None);
        assert!(frame.varargs.is_empty());
    }

    #[test]
    fn hidden_locals_are_skipped() {
        let frame = ScriptFrame::new(closure(0, false, &["(for counter)", "i"]), vec![], 0, None);
        let names: Vec<&str> = frame.named_locals().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["i"]);
    }
}
