//! Bytecode chunk - an append-only instruction list with its constant pool

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::instruction::{Constant, Instruction};
use super::opcode::OpCode;
use super::source::SourceRef;

/// A chunk of bytecode
///
/// Instructions are only ever appended, except for jump operands which are
/// patched once their target is known.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    code: Vec<Instruction>,
    constants: Vec<Constant>,
}

impl Chunk {
    /// Create a new empty chunk
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[must_use]
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    #[must_use]
    pub fn get(&self, ip: usize) -> Option<&Instruction> {
        self.code.get(ip)
    }

    #[must_use]
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    #[must_use]
    pub fn get_constant(&self, index: usize) -> Option<&Constant> {
        self.constants.get(index)
    }

    /// Append an instruction, returning its index
    pub fn emit(&mut self, op: OpCode, operand: i32, source_ref: Option<Arc<SourceRef>>) -> usize {
        self.code
            .push(Instruction::new(op, operand).with_source(source_ref));
        self.code.len() - 1
    }

    /// Index the next emitted instruction will get
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.code.len()
    }

    /// Point the jump at `at` to `target`
    pub fn patch_jump(&mut self, at: usize, target: usize) {
        if let Some(instr) = self.code.get_mut(at) {
            instr.operand = target as i32;
        }
    }

    /// Add a constant to the pool (deduplicated) and return its index
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        if let Some(i) = self.constants.iter().position(|c| c.same_as(&constant)) {
            return i;
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    /// Add a string constant
    pub fn add_name(&mut self, name: &str) -> usize {
        self.add_constant(Constant::String(Arc::from(name)))
    }

    /// Indices of every `Debug` instruction, in order
    pub fn debug_points(&self) -> impl Iterator<Item = usize> + '_ {
        self.code
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op == OpCode::Debug)
            .map(|(ip, _)| ip)
    }

    /// Drops all source refs (used by undump)
    pub(crate) fn strip_source_refs(&mut self) {
        for instr in &mut self.code {
            instr.source_ref = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut chunk = Chunk::new();
        let a = chunk.add_name("print");
        let b = chunk.add_constant(Constant::Number(1.0));
        let c = chunk.add_name("print");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(chunk.constants().len(), 2);
    }

    #[test]
    fn zero_and_negative_zero_are_distinct() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Constant::Number(0.0));
        let b = chunk.add_constant(Constant::Number(-0.0));
        assert_ne!(a, b);
    }

    #[test]
    fn jumps_are_patched() {
        let mut chunk = Chunk::new();
        let j = chunk.emit(OpCode::Jf, -1, None);
        chunk.emit(OpCode::Nop, 0, None);
        let target = chunk.next_index();
        chunk.patch_jump(j, target);
        assert_eq!(chunk.get(j).map(|i| i.operand), Some(2));
    }
}
