//! Bytecode module for the Moonlet virtual machine
//!
//! This module provides:
//! - `OpCode` / `Instruction`: the stack-machine instruction set
//! - `Value`: runtime value representation
//! - `Chunk` / `FunctionProto`: compiled bytecode units
//! - `SourceRef` / `SourceCode`: source positions and breakpoint flags
//! - `Compiler`: AST to bytecode compilation
//! - Disassembler and dump/undump utilities

mod chunk;
mod compiler;
mod debug;
mod dump;
mod error;
mod instruction;
mod opcode;
mod source;
mod value;

pub use chunk::Chunk;
pub use compiler::{CompiledChunk, Compiler};
pub use debug::{disassemble_chunk, disassemble_function, disassemble_instruction, op_names};
pub use dump::{dump, undump, DUMP_MAGIC, DUMP_VERSION};
pub use error::{CompileError, CompileErrorKind, CompileResult, DumpError, DumpResult};
pub use instruction::{Constant, Instruction};
pub use opcode::OpCode;
pub use source::{SourceCode, SourceRef};
pub use value::{
    format_number, number_to_integer, parse_number, Closure, FunctionProto, NativeFn,
    NativeFunction, Table, TailCallData, Upvalue, UpvalueDesc, UserData, Value, YieldData,
};
