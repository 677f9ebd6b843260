//! Virtual machine for Moonlet bytecode
//!
//! This module provides:
//! - the processor loop that executes compiled functions
//! - call frames, including marker frames for protected calls
//! - the coroutine scheduler (resume, yield, forced yield, wrap)
//! - the pull-based debugger protocol
//! - the built-in functions and `print` output capture

mod context;
mod coroutine;
mod debug;
mod error;
mod frame;
mod natives;
mod output;
mod processor;

pub use context::ExecutionContext;
pub use coroutine::{Coroutine, CoroutineState};
pub use debug::{Debugger, DebuggerAction, DebuggerActionKind, WatchItem, WatchKind};
pub use error::{RuntimeError, RuntimeErrorKind, RuntimeResult, StackFrame};
pub use output::{with_output_capture, OutputCapture};

pub(crate) use debug::DebugSession;
pub(crate) use natives::register_builtins;
pub(crate) use processor::{Env, ExecOutcome, Processor};
