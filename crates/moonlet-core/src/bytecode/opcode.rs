//! Bytecode instruction set for the Moonlet virtual machine

use serde::{Deserialize, Serialize};

/// Bytecode operation codes
///
/// This is a stack-based instruction set. Every instruction carries at most
/// one numeric operand (see [`Instruction`](super::Instruction)); most
/// operations pop operands from the evaluation stack and push results back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    // ===== Control / Instrumentation =====
    /// Does nothing
    Nop,

    /// Debugger hook point, emitted at the start of every statement
    Debug,

    // ===== Stack Operations =====
    /// Pop and discard N values
    /// Operand: count
    Pop,

    /// Push a copy of the value N slots below the top (0 = top)
    /// Operand: depth
    Copy,

    /// Swap the two topmost values
    Swap,

    /// Push a constant from the constant pool
    /// Operand: constant index
    Literal,

    /// Create a closure from a nested prototype, capturing its upvalues
    /// Operand: prototype index
    Closure,

    /// Push a new empty table
    NewTable,

    /// Pop value and key, store them into the table left on top
    TblInitN,

    /// Pop a value and store it at the given positional index of the table
    /// left on top; a trailing tuple is expanded into consecutive slots
    /// Operand: first positional index
    TblInitI,

    // ===== Variables =====
    /// Push a local variable
    /// Operand: local slot
    Local,

    /// Pop into an existing local variable (writes through captured cells)
    /// Operand: local slot
    StoreLcl,

    /// Pop into a fresh local variable, detaching any previous capture
    /// Operand: local slot
    InitLcl,

    /// Push an upvalue
    /// Operand: upvalue index
    UpValue,

    /// Pop into an upvalue
    /// Operand: upvalue index
    StoreUpv,

    /// Push a global by name
    /// Operand: constant index (name)
    GetGlobal,

    /// Pop into a global by name
    /// Operand: constant index (name)
    SetGlobal,

    /// Push the varargs of the current frame as a tuple
    VarArgs,

    // ===== Indexing =====
    /// Pop key and object, push object[key]
    Index,

    /// Pop object, push object[name]
    /// Operand: constant index (name)
    IndexN,

    /// Pop key, object and value (pushed in that reverse order); store object[key] = value
    IndexSet,

    /// Pop object and value; store object[name] = value
    /// Operand: constant index (name)
    IndexSetN,

    // ===== Calls =====
    /// Call the function below N arguments; a trailing tuple argument is expanded
    /// Operand: argument count
    Call,

    /// Return from the current function
    /// Operand: 0 (no values) or 1 (the value on top, possibly a tuple)
    Ret,

    // ===== Jumps =====
    /// Unconditional jump
    /// Operand: target instruction index
    Jump,

    /// Pop; jump if falsy
    /// Operand: target instruction index
    Jf,

    /// Pop; jump if nil
    /// Operand: target instruction index
    JNil,

    /// Peek; if truthy jump keeping the value, otherwise pop and fall through
    /// Operand: target instruction index
    JtOrPop,

    /// Peek; if falsy jump keeping the value, otherwise pop and fall through
    /// Operand: target instruction index
    JfOrPop,

    /// Numeric for-loop test: pop step, limit and counter
    /// Operand: target instruction index taken when the loop is finished
    JFor,

    // ===== Binary Operators =====
    /// String concatenation
    Concat,
    /// Less than or equal
    LessEq,
    /// Less than
    Less,
    /// Raw equality
    Eq,
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Float division
    Div,
    /// Floored modulo
    Mod,
    /// Floor division
    FloorDiv,
    /// Exponentiation
    Power,
    /// Bitwise and
    BitAnd,
    /// Bitwise or
    BitOr,
    /// Bitwise xor
    BitXor,
    /// Left shift
    ShiftLeft,
    /// Right shift (logical)
    ShiftRight,

    // ===== Unary Operators =====
    /// Logical not of any value
    Not,
    /// Negate a boolean produced by a comparison
    CNot,
    /// Arithmetic negation
    Neg,
    /// Length operator (#)
    Len,
    /// Bitwise not
    BitNot,
    /// Normalize the top of stack into a boolean
    ToBool,
    /// Coerce the top of stack into a number (for-loop prologue)
    ToNum,

    // ===== Tuples =====
    /// Pop N values into a tuple; a trailing tuple is expanded
    /// Operand: count
    MkTuple,

    /// Reduce the top of stack to a single value
    Scalar,

    /// Expand the top of stack into exactly N values
    /// Operand: count
    ExpTuple,
}

impl OpCode {
    /// Returns the name of the opcode for disassembly
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::Nop => "NOP",
            OpCode::Debug => "DEBUG",
            OpCode::Pop => "POP",
            OpCode::Copy => "COPY",
            OpCode::Swap => "SWAP",
            OpCode::Literal => "LITERAL",
            OpCode::Closure => "CLOSURE",
            OpCode::NewTable => "NEWTABLE",
            OpCode::TblInitN => "TBLINITN",
            OpCode::TblInitI => "TBLINITI",
            OpCode::Local => "LOCAL",
            OpCode::StoreLcl => "STORELCL",
            OpCode::InitLcl => "INITLCL",
            OpCode::UpValue => "UPVALUE",
            OpCode::StoreUpv => "STOREUPV",
            OpCode::GetGlobal => "GETGLOBAL",
            OpCode::SetGlobal => "SETGLOBAL",
            OpCode::VarArgs => "VARARGS",
            OpCode::Index => "INDEX",
            OpCode::IndexN => "INDEXN",
            OpCode::IndexSet => "INDEXSET",
            OpCode::IndexSetN => "INDEXSETN",
            OpCode::Call => "CALL",
            OpCode::Ret => "RET",
            OpCode::Jump => "JUMP",
            OpCode::Jf => "JF",
            OpCode::JNil => "JNIL",
            OpCode::JtOrPop => "JTORPOP",
            OpCode::JfOrPop => "JFORPOP",
            OpCode::JFor => "JFOR",
            OpCode::Concat => "CONCAT",
            OpCode::LessEq => "LESSEQ",
            OpCode::Less => "LESS",
            OpCode::Eq => "EQ",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::FloorDiv => "FLOORDIV",
            OpCode::Power => "POWER",
            OpCode::BitAnd => "BITAND",
            OpCode::BitOr => "BITOR",
            OpCode::BitXor => "BITXOR",
            OpCode::ShiftLeft => "SHL",
            OpCode::ShiftRight => "SHR",
            OpCode::Not => "NOT",
            OpCode::CNot => "CNOT",
            OpCode::Neg => "NEG",
            OpCode::Len => "LEN",
            OpCode::BitNot => "BITNOT",
            OpCode::ToBool => "TOBOOL",
            OpCode::ToNum => "TONUM",
            OpCode::MkTuple => "MKTUPLE",
            OpCode::Scalar => "SCALAR",
            OpCode::ExpTuple => "EXPTUPLE",
        }
    }

    /// Returns true if the operand is an instruction index
    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            OpCode::Jump
                | OpCode::Jf
                | OpCode::JNil
                | OpCode::JtOrPop
                | OpCode::JfOrPop
                | OpCode::JFor
        )
    }

    /// Returns true if the operand indexes the constant pool
    #[must_use]
    pub const fn uses_constant(self) -> bool {
        matches!(
            self,
            OpCode::Literal
                | OpCode::GetGlobal
                | OpCode::SetGlobal
                | OpCode::IndexN
                | OpCode::IndexSetN
        )
    }

    /// Returns true if the instruction ignores its operand
    #[must_use]
    pub const fn has_no_operand(self) -> bool {
        matches!(
            self,
            OpCode::Nop
                | OpCode::Debug
                | OpCode::Swap
                | OpCode::NewTable
                | OpCode::VarArgs
                | OpCode::TblInitN
                | OpCode::Index
                | OpCode::IndexSet
                | OpCode::Concat
                | OpCode::LessEq
                | OpCode::Less
                | OpCode::Eq
                | OpCode::Add
                | OpCode::Sub
                | OpCode::Mul
                | OpCode::Div
                | OpCode::Mod
                | OpCode::FloorDiv
                | OpCode::Power
                | OpCode::BitAnd
                | OpCode::BitOr
                | OpCode::BitXor
                | OpCode::ShiftLeft
                | OpCode::ShiftRight
                | OpCode::Not
                | OpCode::CNot
                | OpCode::Neg
                | OpCode::Len
                | OpCode::BitNot
                | OpCode::ToBool
                | OpCode::ToNum
                | OpCode::Scalar
        )
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_names() {
        assert_eq!(OpCode::JtOrPop.name(), "JTORPOP");
        assert_eq!(OpCode::LessEq.name(), "LESSEQ");
        assert_eq!(OpCode::CNot.to_string(), "CNOT");
    }

    #[test]
    fn operand_classes_are_disjoint() {
        for op in [OpCode::Jump, OpCode::JFor, OpCode::JfOrPop] {
            assert!(op.is_jump());
            assert!(!op.uses_constant());
            assert!(!op.has_no_operand());
        }
        for op in [OpCode::Literal, OpCode::IndexN, OpCode::SetGlobal] {
            assert!(op.uses_constant());
            assert!(!op.is_jump());
        }
        assert!(OpCode::Add.has_no_operand());
        assert!(!OpCode::Call.has_no_operand());
    }
}
