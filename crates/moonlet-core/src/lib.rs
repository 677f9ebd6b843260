//! Moonlet Core - runtime for the Moonlet embeddable scripting language
//!
//! Moonlet is a Lua-family language. This crate provides:
//! - Lexer: tokenization of source code
//! - AST: expression/statement tree, operator chains, interpreted evaluation
//! - Parser: AST construction from the token stream
//! - Bytecode: instruction set, compiler, disassembler, dump/undump
//! - VM: processor loop, coroutine scheduler, debugger protocol, built-ins
//! - Script: the host-facing interpreter instance

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lexer module - tokenization of Moonlet source code
pub mod lexer;

/// Abstract Syntax Tree - parsed representation of Moonlet source code
pub mod ast;

/// Parser module - converts tokens into AST
pub mod parser;

/// Bytecode module - instruction set and compiler
pub mod bytecode;

/// Virtual Machine module - bytecode execution and coroutines
pub mod vm;

/// Interpreter instances
pub mod script;

/// Interpreter configuration
pub mod options;

/// Leveled logging
pub mod diagnostics;

/// Test utilities - helpers for testing Moonlet code
pub mod testutil;

/// Convenience re-export of lexer
pub use lexer::Lexer;

/// Convenience re-export of parser
pub use parser::Parser;

/// Convenience re-export of bytecode compiler
pub use bytecode::{Compiler, Value};

/// Convenience re-export of the interpreter
pub use script::{DynamicExpression, Script, ScriptError};

pub use options::ScriptOptions;

/// Convenience re-export of output capture utilities
pub use vm::{with_output_capture, OutputCapture};

/// Convenience re-export of coroutine and debugger types
pub use vm::{
    Coroutine, CoroutineState, Debugger, DebuggerAction, DebuggerActionKind, ExecutionContext,
    RuntimeError, RuntimeErrorKind, RuntimeResult, WatchItem, WatchKind,
};
