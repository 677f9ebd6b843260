//! Bytecode disassembler for debugging

use std::fmt::Write;

use super::chunk::Chunk;
use super::value::FunctionProto;

/// Disassemble a function and its nested prototypes to a string
#[must_use]
pub fn disassemble_function(proto: &FunctionProto) -> String {
    let mut output = String::new();
    write_function(proto, &mut output);
    output
}

fn write_function(proto: &FunctionProto, output: &mut String) {
    let _ = writeln!(
        output,
        "== {} ({} params{}, {} locals, {} upvalues) ==",
        proto.name,
        proto.param_count,
        if proto.is_vararg { ", vararg" } else { "" },
        proto.local_count(),
        proto.upvalues.len()
    );
    output.push_str(&disassemble_chunk(&proto.chunk));
    for nested in &proto.protos {
        output.push('\n');
        write_function(nested, output);
    }
}

/// Disassemble a chunk, one instruction per line
#[must_use]
pub fn disassemble_chunk(chunk: &Chunk) -> String {
    let mut output = String::new();
    let mut last_line = None;
    for ip in 0..chunk.len() {
        let line = chunk
            .get(ip)
            .and_then(|i| i.source_ref.as_ref())
            .map(|r| r.from_line);
        let _ = write!(output, "{ip:04} ");
        if line.is_some() && line == last_line {
            output.push_str("   | ");
        } else {
            match line {
                Some(line) => {
                    let _ = write!(output, "{line:4} ");
                }
                None => output.push_str("   - "),
            }
        }
        last_line = line;
        output.push_str(&disassemble_instruction(chunk, ip));
        output.push('\n');
    }
    output
}

/// Disassemble a single instruction (without the offset column)
#[must_use]
pub fn disassemble_instruction(chunk: &Chunk, ip: usize) -> String {
    let Some(instr) = chunk.get(ip) else {
        return "Invalid offset".to_string();
    };
    if instr.op.uses_constant() {
        let constant = chunk
            .get_constant(instr.index())
            .map_or_else(|| "<bad constant>".to_string(), ToString::to_string);
        format!("{:<10} {:4} {}", instr.op.name(), instr.operand, constant)
    } else if instr.op.is_jump() {
        format!("{:<10} -> {:04}", instr.op.name(), instr.operand)
    } else {
        instr.to_string()
    }
}

/// Operation names of a chunk, space separated (emission-shape assertions)
#[must_use]
pub fn op_names(chunk: &Chunk) -> String {
    chunk
        .code()
        .iter()
        .map(|i| i.op.name())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Constant, OpCode};

    #[test]
    fn disassemble_constants_and_jumps() {
        let mut chunk = Chunk::new();
        let c = chunk.add_constant(Constant::Number(42.0));
        chunk.emit(OpCode::Literal, c as i32, None);
        chunk.emit(OpCode::Jf, 3, None);
        chunk.emit(OpCode::Add, 0, None);

        let text = disassemble_chunk(&chunk);
        assert!(text.contains("LITERAL"));
        assert!(text.contains("42"));
        assert!(text.contains("-> 0003"));
        assert_eq!(op_names(&chunk), "LITERAL JF ADD");
    }

    #[test]
    fn invalid_offset() {
        assert_eq!(disassemble_instruction(&Chunk::new(), 9), "Invalid offset");
    }
}
