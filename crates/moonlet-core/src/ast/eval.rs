//! Interpreted evaluation of expression trees
//!
//! Used by dynamic expressions (host-side `evaluate` and debugger watches).
//! Evaluation never calls functions, so it cannot re-enter the VM. The numeric
//! kernels here are shared with the bytecode processor.

use thiserror::Error;

use crate::bytecode::{number_to_integer, Value};

use super::{BinOp, Expr, ExprKind, UnaryOp};

/// Failure of an interpreted expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DynamicExpressionError {
    #[error("Attempt to perform arithmetic on non-numbers.")]
    Arithmetic,
    #[error("Attempt to perform concatenation on non-strings.")]
    Concatenation,
    #[error("Attempt to compare non-numbers, non-strings.")]
    Compare,
    #[error("Attempt to perform bitwise operation on non-integers.")]
    Bitwise,
    #[error("Attempt to get length of a {0} value.")]
    Length(&'static str),
    #[error("Attempt to index a {0} value.")]
    Index(&'static str),
    #[error("Dynamic expressions cannot {0}.")]
    Unsupported(&'static str),
}

/// Variable lookup for interpreted evaluation
pub trait EvalScope {
    /// Value of a variable; unknown names are nil
    fn lookup(&self, name: &str) -> Value;
}

/// Evaluate an expression tree to a single value
pub fn evaluate(expr: &Expr, scope: &dyn EvalScope) -> Result<Value, DynamicExpressionError> {
    let value = match &expr.kind {
        ExprKind::Nil => Value::Nil,
        ExprKind::True => Value::Boolean(true),
        ExprKind::False => Value::Boolean(false),
        ExprKind::Number(n) => Value::Number(*n),
        ExprKind::String(s) => Value::from(s.as_str()),
        ExprKind::Name(name) => scope.lookup(name),
        ExprKind::Paren(inner) => evaluate(inner, scope)?,
        ExprKind::Index { object, key } => {
            let object = evaluate(object, scope)?;
            let key = evaluate(key, scope)?;
            match object.as_table() {
                Some(table) => table.get(&key),
                None => return Err(DynamicExpressionError::Index(object.type_name())),
            }
        }
        ExprKind::Unary { op, operand } => eval_unary(*op, evaluate(operand, scope)?)?,
        ExprKind::Power { base, exponent } => {
            let base = evaluate(base, scope)?;
            let exponent = evaluate(exponent, scope)?;
            match (base.as_number(), exponent.as_number()) {
                (Some(a), Some(b)) => Value::Number(a.powf(b)),
                _ => return Err(DynamicExpressionError::Arithmetic),
            }
        }
        ExprKind::Binary { op, left, right } => eval_binary(*op, left, right, scope)?,
        ExprKind::Vararg => return Err(DynamicExpressionError::Unsupported("access varargs")),
        ExprKind::Function(_) => return Err(DynamicExpressionError::Unsupported("define functions")),
        ExprKind::Table(_) => return Err(DynamicExpressionError::Unsupported("construct tables")),
        ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
            return Err(DynamicExpressionError::Unsupported("call functions"))
        }
    };
    Ok(value.to_scalar())
}

fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    scope: &dyn EvalScope,
) -> Result<Value, DynamicExpressionError> {
    let l = evaluate(left, scope)?;

    match op {
        BinOp::Or if l.is_truthy() => return Ok(l),
        BinOp::And if !l.is_truthy() => return Ok(l),
        BinOp::Or | BinOp::And => return evaluate(right, scope),
        _ => {}
    }

    let r = evaluate(right, scope)?;

    if op.is_comparison() {
        return compare(op, &l, &r).map(Value::Boolean);
    }

    match op {
        BinOp::Concat => match (l.as_string(), r.as_string()) {
            (Some(a), Some(b)) => Ok(Value::from(format!("{a}{b}"))),
            _ => Err(DynamicExpressionError::Concatenation),
        },
        _ if op.is_bitwise() => {
            let (Some(a), Some(b)) = (to_integer(&l), to_integer(&r)) else {
                return Err(DynamicExpressionError::Bitwise);
            };
            Ok(Value::Number(bitwise(op, a, b) as f64))
        }
        _ => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => Ok(Value::Number(arithmetic(op, a, b))),
            _ => Err(DynamicExpressionError::Arithmetic),
        },
    }
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value, DynamicExpressionError> {
    match op {
        UnaryOp::Not => Ok(Value::Boolean(!v.is_truthy())),
        UnaryOp::Neg => v
            .as_number()
            .map(|n| Value::Number(-n))
            .ok_or(DynamicExpressionError::Arithmetic),
        UnaryOp::Len => match &v {
            Value::String(s) => Ok(Value::Number(s.len() as f64)),
            Value::Table(t) => Ok(Value::Number(t.len() as f64)),
            other => Err(DynamicExpressionError::Length(other.type_name())),
        },
        UnaryOp::BitNot => to_integer(&v)
            .map(|n| Value::Number(!n as f64))
            .ok_or(DynamicExpressionError::Bitwise),
    }
}

fn to_integer(v: &Value) -> Option<i64> {
    v.as_number().and_then(number_to_integer)
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<bool, DynamicExpressionError> {
    match op {
        BinOp::Eq => Ok(l.raw_equals(r)),
        BinOp::Ne => Ok(!l.raw_equals(r)),
        BinOp::Lt => less_than(l, r).ok_or(DynamicExpressionError::Compare),
        BinOp::Le => less_equal(l, r).ok_or(DynamicExpressionError::Compare),
        BinOp::Gt => less_equal(l, r).map(|b| !b).ok_or(DynamicExpressionError::Compare),
        BinOp::Ge => less_than(l, r).map(|b| !b).ok_or(DynamicExpressionError::Compare),
        _ => Err(DynamicExpressionError::Compare),
    }
}

/// `l < r` for two numbers or two strings; `None` for other pairs
#[must_use]
pub fn less_than(l: &Value, r: &Value) -> Option<bool> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Some(a < b),
        (Value::String(a), Value::String(b)) => Some(a < b),
        _ => None,
    }
}

/// `l <= r` for two numbers or two strings; `None` for other pairs
#[must_use]
pub fn less_equal(l: &Value, r: &Value) -> Option<bool> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Some(a <= b),
        (Value::String(a), Value::String(b)) => Some(a <= b),
        _ => None,
    }
}

/// Numeric kernel for the arithmetic operators
#[must_use]
pub fn arithmetic(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => floored_mod(a, b),
        BinOp::Pow => a.powf(b),
        _ => f64::NAN,
    }
}

/// Modulo whose result takes the sign of the divisor
#[must_use]
pub fn floored_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m != 0.0 && (m < 0.0) != (b < 0.0) {
        m + b
    } else {
        m
    }
}

/// Integer kernel for the bitwise operators
#[must_use]
pub fn bitwise(op: BinOp, a: i64, b: i64) -> i64 {
    match op {
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Shl => shift_left(a, b),
        BinOp::Shr => shift_left(a, b.saturating_neg()),
        _ => 0,
    }
}

/// Logical shift; negative counts shift right, counts past 63 give zero
fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> (-n)) as i64
    }
}
