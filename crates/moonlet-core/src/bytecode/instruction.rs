//! Instructions and constant-pool entries

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::opcode::OpCode;
use super::source::SourceRef;
use super::value::Value;

/// A single VM instruction
///
/// Source refs are runtime metadata only; they are not serialized and
/// undumped code runs without them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: i32,
    #[serde(skip)]
    pub source_ref: Option<Arc<SourceRef>>,
}

impl Instruction {
    #[must_use]
    pub fn new(op: OpCode, operand: i32) -> Self {
        Self {
            op,
            operand,
            source_ref: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source_ref: Option<Arc<SourceRef>>) -> Self {
        self.source_ref = source_ref;
        self
    }

    /// Operand interpreted as an index (jump target, slot, constant)
    #[must_use]
    pub fn index(&self) -> usize {
        usize::try_from(self.operand).unwrap_or(0)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.has_no_operand() {
            write!(f, "{}", self.op)
        } else {
            write!(f, "{:<10} {}", self.op.name(), self.operand)
        }
    }
}

/// A compile-time constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(Arc<str>),
}

impl Constant {
    /// Runtime value of the constant
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Number(n) => Value::Number(*n),
            Constant::String(s) => Value::String(Arc::clone(s)),
        }
    }

    /// Identity used for pool deduplication (NaN and -0.0 stay distinct)
    pub(crate) fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{}", other.to_value()),
        }
    }
}
