//! Debugger protocol and the `Debug` instruction hook
//!
//! The protocol is pull-based: at every `Debug` hook point the processor
//! decides, from the pending action, whether to pause. A pause pushes fresh
//! watch state to the debugger with [`Debugger::update`] and then asks for
//! actions with [`Debugger::get_action`] until one of them resumes execution.

use std::fmt;
use std::sync::Arc;

use crate::bytecode::{SourceRef, Value};
use crate::script::{DynamicExpression, ScriptShared};

use super::frame::CallFrame;
use super::processor::Processor;

/// The views a debugger is kept up to date with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Script call frames, innermost first
    CallStack,
    /// User watch expressions
    Watches,
    /// The evaluation stack
    VStack,
    /// Locals of the innermost script frame
    Locals,
    /// Every coroutine of the interpreter
    Threads,
}

impl WatchKind {
    pub const ALL: [WatchKind; 5] = [
        WatchKind::CallStack,
        WatchKind::Watches,
        WatchKind::VStack,
        WatchKind::Locals,
        WatchKind::Threads,
    ];
}

/// One entry of a watch view
#[derive(Debug, Clone)]
pub struct WatchItem {
    pub name: String,
    pub value: Option<Value>,
    /// Source line, for call-stack entries
    pub line: Option<u32>,
    /// Instruction pointer or address, when meaningful
    pub address: Option<usize>,
    /// Set when evaluating a watch expression failed; `name` holds the message
    pub is_error: bool,
}

impl WatchItem {
    pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            name: name.into(),
            value,
            line: None,
            address: None,
            is_error: false,
        }
    }

    fn error(name: impl Into<String>, message: String) -> Self {
        Self {
            name: name.into(),
            value: Some(Value::from(message)),
            line: None,
            address: None,
            is_error: true,
        }
    }
}

/// What the debugger wants the processor to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebuggerActionKind {
    /// Keep the current pause and ask again
    #[default]
    None,
    StepIn,
    StepOver,
    StepOut,
    ByteCodeStepIn,
    ByteCodeStepOver,
    ByteCodeStepOut,
    Run,
    ToggleBreakpoint,
    SetBreakpoint,
    ClearBreakpoint,
    /// Replace the breakpoints of a source with `lines`
    ResetBreakpoints,
    /// Push the watch views again
    Refresh,
    /// Push the watch views and the breakpoint list
    HardRefresh,
}

/// An action with its breakpoint coordinates
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebuggerAction {
    pub kind: DebuggerActionKind,
    pub source_id: usize,
    pub line: u32,
    pub column: u32,
    pub lines: Vec<u32>,
}

impl DebuggerAction {
    #[must_use]
    pub fn new(kind: DebuggerActionKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// A toggle/set/clear breakpoint action at a position
    #[must_use]
    pub fn breakpoint(kind: DebuggerActionKind, source_id: usize, line: u32, column: u32) -> Self {
        Self {
            kind,
            source_id,
            line,
            column,
            lines: Vec::new(),
        }
    }

    /// Replace all breakpoints of a source
    #[must_use]
    pub fn reset_breakpoints(source_id: usize, lines: Vec<u32>) -> Self {
        Self {
            kind: DebuggerActionKind::ResetBreakpoints,
            source_id,
            line: 0,
            column: 0,
            lines,
        }
    }
}

/// A debugger attached to a [`Script`](crate::Script)
///
/// Methods are called from the thread executing the script, while it is
/// paused at a hook point. `get_action` may block until the user decides.
pub trait Debugger: Send {
    /// Breakpoints and stepping compare whole lines instead of exact refs
    fn is_line_based(&self) -> bool {
        true
    }

    /// Checked at every hook point; true pauses at the next one
    fn is_pause_requested(&self) -> bool {
        false
    }

    /// Next action while paused at `ip`
    fn get_action(&mut self, ip: usize, source_ref: Option<&Arc<SourceRef>>) -> DebuggerAction;

    /// New contents of a watch view
    fn update(&mut self, kind: WatchKind, items: &[WatchItem]);

    /// Every ref currently holding a breakpoint, after a hard refresh
    fn refresh_breakpoints(&mut self, _refs: &[Arc<SourceRef>]) {}

    /// Expressions evaluated for the `Watches` view
    fn watch_expressions(&self) -> Vec<String> {
        Vec::new()
    }

    /// The outermost host entry finished
    fn signal_execution_ended(&mut self) {}
}

/// Stepping state of an attached debugger
pub(crate) struct DebugSession {
    pub debugger: Box<dyn Debugger>,
    action: DebuggerActionKind,
    /// Instruction pointer target for `ByteCodeStepOver`, -1 otherwise
    target: i64,
    last_hl_ref: Option<Arc<SourceRef>>,
    depth: usize,
    line_based: bool,
}

impl DebugSession {
    /// A fresh session pauses at the first hook point
    pub(crate) fn new(debugger: Box<dyn Debugger>, line_based: bool) -> Self {
        let line_based = line_based && debugger.is_line_based();
        Self {
            debugger,
            action: DebuggerActionKind::None,
            target: -1,
            last_hl_ref: None,
            depth: 0,
            line_based,
        }
    }

    fn same_ref(&self, current: Option<&Arc<SourceRef>>) -> bool {
        match (current, &self.last_hl_ref) {
            (Some(current), Some(last)) if self.line_based => current.same_line(last),
            (Some(current), Some(last)) => Arc::ptr_eq(current, last),
            _ => false,
        }
    }

    /// Hook for a `Debug` instruction at `ip`
    pub(crate) fn on_debug_point(
        &mut self,
        processor: &Processor,
        script: &ScriptShared,
        ip: usize,
        source_ref: Option<Arc<SourceRef>>,
    ) {
        let depth = processor.frames.len();
        let current = source_ref.as_ref();
        let on_different_ref = !self.same_ref(current);
        let at_breakpoint = current.is_some_and(|r| r.breakpoint());

        if self.debugger.is_pause_requested() || (at_breakpoint && on_different_ref) {
            self.action = DebuggerActionKind::None;
            self.target = -1;
        }

        let keep_running = match self.action {
            DebuggerActionKind::Run => {
                if self.line_based {
                    self.last_hl_ref = source_ref;
                }
                return;
            }
            DebuggerActionKind::ByteCodeStepOver => i64::try_from(ip).ok() != Some(self.target),
            DebuggerActionKind::StepOut | DebuggerActionKind::ByteCodeStepOut => {
                depth >= self.depth
            }
            DebuggerActionKind::StepIn => {
                depth >= self.depth && (current.is_none() || !on_different_ref)
            }
            DebuggerActionKind::StepOver => {
                current.is_none() || !on_different_ref || depth > self.depth
            }
            _ => false,
        };
        if keep_running {
            return;
        }

        self.refresh(processor, script, false);

        loop {
            let action = self.debugger.get_action(ip, current);
            script.logger.debug(
                "debugger action",
                &[("action", format!("{:?}", action.kind)), ("ip", ip.to_string())],
            );

            match action.kind {
                DebuggerActionKind::StepIn
                | DebuggerActionKind::StepOver
                | DebuggerActionKind::StepOut
                | DebuggerActionKind::ByteCodeStepIn
                | DebuggerActionKind::ByteCodeStepOut
                | DebuggerActionKind::Run => {
                    self.action = action.kind;
                    self.last_hl_ref = source_ref;
                    self.depth = depth;
                    self.target = -1;
                    return;
                }
                DebuggerActionKind::ByteCodeStepOver => {
                    self.action = action.kind;
                    self.last_hl_ref = source_ref;
                    self.depth = depth;
                    self.target = processor
                        .next_debug_point(ip)
                        .and_then(|next| i64::try_from(next).ok())
                        .unwrap_or(-1);
                    return;
                }
                DebuggerActionKind::ToggleBreakpoint
                | DebuggerActionKind::SetBreakpoint
                | DebuggerActionKind::ClearBreakpoint => {
                    let state = match action.kind {
                        DebuggerActionKind::SetBreakpoint => Some(true),
                        DebuggerActionKind::ClearBreakpoint => Some(false),
                        _ => None,
                    };
                    if let Some(source) = script.source(action.source_id) {
                        source.apply_breakpoint(action.line, action.column, state);
                    }
                    self.refresh(processor, script, true);
                }
                DebuggerActionKind::ResetBreakpoints => {
                    if let Some(source) = script.source(action.source_id) {
                        source.reset_breakpoints(&action.lines);
                    }
                    self.refresh(processor, script, true);
                }
                DebuggerActionKind::Refresh => self.refresh(processor, script, false),
                DebuggerActionKind::HardRefresh => self.refresh(processor, script, true),
                DebuggerActionKind::None => {}
            }
        }
    }

    fn refresh(&mut self, processor: &Processor, script: &ScriptShared, hard: bool) {
        for kind in WatchKind::ALL {
            let items = match kind {
                WatchKind::CallStack => call_stack_items(processor),
                WatchKind::Watches => watch_items(&self.debugger.watch_expressions(), processor, script),
                WatchKind::VStack => vstack_items(processor),
                WatchKind::Locals => local_items(processor),
                WatchKind::Threads => script.thread_watch_items(),
            };
            self.debugger.update(kind, &items);
        }
        if hard {
            let refs = script.breakpoints();
            self.debugger.refresh_breakpoints(&refs);
        }
    }
}

impl fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSession")
            .field("action", &self.action)
            .field("target", &self.target)
            .field("depth", &self.depth)
            .field("line_based", &self.line_based)
            .finish_non_exhaustive()
    }
}

fn call_stack_items(processor: &Processor) -> Vec<WatchItem> {
    processor
        .frames
        .iter()
        .rev()
        .filter_map(CallFrame::as_script)
        .map(|frame| {
            let mut item = WatchItem::new(frame.closure.proto.name.clone(), None);
            item.line = frame.current_line();
            item.address = frame.ip.checked_sub(1);
            item
        })
        .collect()
}

fn vstack_items(processor: &Processor) -> Vec<WatchItem> {
    processor
        .stack
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let mut item = WatchItem::new(format!("{i}"), Some(value.clone()));
            item.address = Some(i);
            item
        })
        .collect()
}

fn frame_locals(processor: &Processor) -> Vec<(String, Value)> {
    processor
        .frames
        .iter()
        .rev()
        .find_map(CallFrame::as_script)
        .map(|frame| {
            frame
                .named_locals()
                .map(|(name, value)| (name.to_string(), value))
                .collect()
        })
        .unwrap_or_default()
}

fn local_items(processor: &Processor) -> Vec<WatchItem> {
    frame_locals(processor)
        .into_iter()
        .map(|(name, value)| WatchItem::new(name, Some(value)))
        .collect()
}

fn watch_items(codes: &[String], processor: &Processor, script: &ScriptShared) -> Vec<WatchItem> {
    if codes.is_empty() {
        return Vec::new();
    }
    let locals = frame_locals(processor);
    codes
        .iter()
        .map(|code| {
            let result = DynamicExpression::parse(code, Arc::clone(&script.globals))
                .map_err(|e| e.to_string())
                .and_then(|expr| expr.evaluate_with_locals(&locals).map_err(|e| e.to_string()));
            match result {
                Ok(value) => WatchItem::new(code.clone(), Some(value)),
                Err(message) => WatchItem::error(code.clone(), message),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Debugger for Silent {
        fn get_action(&mut self, _: usize, _: Option<&Arc<SourceRef>>) -> DebuggerAction {
            DebuggerAction::new(DebuggerActionKind::Run)
        }

        fn update(&mut self, _: WatchKind, _: &[WatchItem]) {}
    }

    #[test]
    fn new_sessions_pause_immediately() {
        let session = DebugSession::new(Box::new(Silent), true);
        assert_eq!(session.action, DebuggerActionKind::None);
        assert_eq!(session.target, -1);
    }

    #[test]
    fn line_based_refs_compare_by_line() {
        let mut session = DebugSession::new(Box::new(Silent), true);
        session.last_hl_ref = Some(Arc::new(SourceRef::new(0, 4, 1, 4, 9)));
        let same_line = Arc::new(SourceRef::new(0, 4, 12, 4, 20));
        assert!(session.same_ref(Some(&same_line)));

        session.line_based = false;
        assert!(!session.same_ref(Some(&same_line)));
        assert!(!session.same_ref(None));
    }

    #[test]
    fn action_constructors() {
        let action = DebuggerAction::breakpoint(DebuggerActionKind::SetBreakpoint, 1, 7, 0);
        assert_eq!((action.source_id, action.line), (1, 7));
        let reset = DebuggerAction::reset_breakpoints(0, vec![3, 4]);
        assert_eq!(reset.kind, DebuggerActionKind::ResetBreakpoints);
        assert_eq!(reset.lines, vec![3, 4]);
    }
}
