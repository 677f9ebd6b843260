//! Runtime values for the Moonlet virtual machine

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Chunk;
use crate::vm::{Coroutine, ExecutionContext, RuntimeError, RuntimeErrorKind, RuntimeResult};

/// A runtime value
///
/// `Void` marks an absent result and is never stored in a table or variable.
/// `TailCallRequest` and `YieldRequest` are control values returned by native
/// functions to the VM; scripts never observe them.
#[derive(Clone, Default)]
pub enum Value {
    /// Nil value
    #[default]
    Nil,

    /// Absent value (no result)
    Void,

    /// Boolean value
    Boolean(bool),

    /// Double-precision number
    Number(f64),

    /// Immutable string
    String(Arc<str>),

    /// Shared mutable table
    Table(Arc<Table>),

    /// Script function with captured upvalues
    Function(Arc<Closure>),

    /// Host function
    NativeFunction(Arc<NativeFunction>),

    /// Coroutine handle
    Coroutine(Arc<Coroutine>),

    /// Multiple values in flight (call results, varargs)
    Tuple(Vec<Value>),

    /// Opaque host object
    UserData(Arc<UserData>),

    /// Request for the VM to call a function in place of the native's return
    TailCallRequest(Arc<TailCallData>),

    /// Request for the VM to suspend the running coroutine
    YieldRequest(Arc<YieldData>),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    /// Create a tuple, collapsing the single-value case
    #[must_use]
    pub fn tuple(mut values: Vec<Value>) -> Self {
        if values.len() == 1 {
            values.pop().unwrap_or_default()
        } else {
            Value::Tuple(values)
        }
    }

    /// Create a new table value from positional values
    #[must_use]
    pub fn table_from(values: Vec<Value>) -> Self {
        Value::Table(Arc::new(Table::from_array(values)))
    }

    /// Wrap a host closure
    pub fn native<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Value::NativeFunction(Arc::new(NativeFunction::new(name, func)))
    }

    /// Returns the Lua type name of this value
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil | Value::Void => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::NativeFunction(_) => "function",
            Value::Coroutine(_) => "thread",
            Value::Tuple(_) => "tuple",
            Value::UserData(_) => "userdata",
            Value::TailCallRequest(_) | Value::YieldRequest(_) => "request",
        }
    }

    /// Nil and false are falsy, everything else is truthy
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil | Value::Void | Value::Boolean(false) => false,
            Value::Tuple(values) => values.first().is_some_and(Value::is_truthy),
            _ => true,
        }
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Value::Nil | Value::Void)
    }

    #[must_use]
    pub const fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[must_use]
    pub const fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    #[must_use]
    pub const fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::NativeFunction(_))
    }

    /// Reduce a tuple to its first value; absent values become nil
    #[must_use]
    pub fn to_scalar(self) -> Value {
        match self {
            Value::Tuple(mut values) => {
                if values.is_empty() {
                    Value::Nil
                } else {
                    values.swap_remove(0).to_scalar()
                }
            }
            Value::Void => Value::Nil,
            other => other,
        }
    }

    /// Expand into a list of values (tuples spread, `Void` is empty)
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Value::Tuple(values) => values,
            Value::Void => Vec::new(),
            other => vec![other],
        }
    }

    /// Number value, converting numeric strings
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => parse_number(s),
            _ => None,
        }
    }

    /// String value, converting numbers
    #[must_use]
    pub fn as_string(&self) -> Option<Arc<str>> {
        match self {
            Value::String(s) => Some(Arc::clone(s)),
            Value::Number(n) => Some(Arc::from(format_number(*n))),
            _ => None,
        }
    }

    /// Borrow the string payload without conversion
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_table(&self) -> Option<&Arc<Table>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_coroutine(&self) -> Option<&Arc<Coroutine>> {
        match self {
            Value::Coroutine(c) => Some(c),
            _ => None,
        }
    }

    /// Raw equality: `Nil` equals `Void`, reference types compare by identity
    #[must_use]
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nil() && b.is_nil() => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::NativeFunction(a), Value::NativeFunction(b)) => Arc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => Arc::ptr_eq(a, b),
            (Value::UserData(a), Value::UserData(b)) => Arc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.raw_equals(y))
            }
            _ => false,
        }
    }

    /// Address used for `tostring` of reference values
    fn address(&self) -> usize {
        match self {
            Value::Table(t) => Arc::as_ptr(t) as usize,
            Value::Function(c) => Arc::as_ptr(c) as usize,
            Value::NativeFunction(n) => Arc::as_ptr(n) as usize,
            Value::Coroutine(c) => Arc::as_ptr(c) as usize,
            Value::UserData(u) => Arc::as_ptr(u) as usize,
            _ => 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil | Value::Void => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Table(_) => write!(f, "table: 0x{:08x}", self.address()),
            Value::Function(_) | Value::NativeFunction(_) => {
                write!(f, "function: 0x{:08x}", self.address())
            }
            Value::Coroutine(_) => write!(f, "thread: 0x{:08x}", self.address()),
            Value::UserData(u) => write!(f, "{}: 0x{:08x}", u.type_name, self.address()),
            Value::Tuple(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, "\t")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
            Value::TailCallRequest(_) => write!(f, "(tail call request)"),
            Value::YieldRequest(_) => write!(f, "(yield request)"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "Void"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Tuple(values) => f.debug_tuple("Tuple").field(values).finish(),
            Value::YieldRequest(y) => write!(f, "YieldRequest(forced: {})", y.forced),
            other => write!(f, "{other}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

/// Lua number formatting: integral values print without a fraction
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        String::from(if n.is_sign_negative() { "-nan" } else { "nan" })
    } else if n.is_infinite() {
        String::from(if n > 0.0 { "inf" } else { "-inf" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else if n.abs() >= 1e15 || n.abs() < 1e-4 {
        format!("{n:e}")
    } else {
        format!("{n}")
    }
}

/// Parse a numeric string the way the lexer reads number literals
#[must_use]
pub fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        hex.bytes().fold(0.0, |acc, b| {
            acc * 16.0 + f64::from(char::from(b).to_digit(16).unwrap_or(0))
        })
    } else {
        let valid = !body.is_empty()
            && body.bytes().any(|b| b.is_ascii_digit())
            && body
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
        if !valid {
            return None;
        }
        body.parse::<f64>().ok()?
    };
    Some(if negative { -value } else { value })
}

/// Exact integer value of a number, for bitwise operators and table keys
#[must_use]
pub fn number_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= -(2f64.powi(63)) && n < 2f64.powi(63) {
        Some(n as i64)
    } else {
        None
    }
}

/// A table key with Lua's key identity rules
#[derive(Debug, Clone)]
enum TableKey {
    Boolean(bool),
    Number(u64),
    String(Arc<str>),
    Reference(usize),
}

impl TableKey {
    fn from_value(key: &Value) -> RuntimeResult<TableKey> {
        match key {
            Value::Nil | Value::Void => Err(RuntimeErrorKind::IndexIsNil.into()),
            Value::Number(n) if n.is_nan() => Err(RuntimeErrorKind::IndexIsNaN.into()),
            Value::Number(n) => {
                // 0.0 and -0.0 are the same key
                let n = if *n == 0.0 { 0.0 } else { *n };
                Ok(TableKey::Number(n.to_bits()))
            }
            Value::Boolean(b) => Ok(TableKey::Boolean(*b)),
            Value::String(s) => Ok(TableKey::String(Arc::clone(s))),
            Value::Tuple(_) => Self::from_value(&key.clone().to_scalar()),
            other => Ok(TableKey::Reference(other.address())),
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TableKey::Boolean(a), TableKey::Boolean(b)) => a == b,
            (TableKey::Number(a), TableKey::Number(b)) => a == b,
            (TableKey::String(a), TableKey::String(b)) => a == b,
            (TableKey::Reference(a), TableKey::Reference(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            TableKey::Boolean(b) => b.hash(state),
            TableKey::Number(n) => n.hash(state),
            TableKey::String(s) => s.hash(state),
            TableKey::Reference(p) => p.hash(state),
        }
    }
}

#[derive(Default)]
struct TableData {
    /// Insertion-ordered entries; removed entries keep their slot with a nil value
    entries: Vec<(Value, Value)>,
    index: HashMap<TableKey, usize>,
    removed: usize,
}

impl TableData {
    fn compact(&mut self) {
        self.entries.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (i, (k, _)) in self.entries.iter().enumerate() {
            if let Ok(key) = TableKey::from_value(k) {
                self.index.insert(key, i);
            }
        }
        self.removed = 0;
    }
}

/// A Lua table
///
/// Iteration order is insertion order. Tables compare by identity.
#[derive(Default)]
pub struct Table {
    data: Mutex<TableData>,
    read_only: AtomicBool,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `values` at keys 1..=n
    #[must_use]
    pub fn from_array(values: Vec<Value>) -> Self {
        let table = Self::new();
        {
            let mut data = table.data.lock();
            for (i, value) in values.into_iter().enumerate() {
                let value = value.to_scalar();
                if value.is_nil() {
                    continue;
                }
                let key = Value::Number((i + 1) as f64);
                if let Ok(k) = TableKey::from_value(&key) {
                    let slot = data.entries.len();
                    data.index.insert(k, slot);
                    data.entries.push((key, value));
                }
            }
        }
        table
    }

    /// Raw get; invalid keys read as nil
    #[must_use]
    pub fn get(&self, key: &Value) -> Value {
        let Ok(key) = TableKey::from_value(key) else {
            return Value::Nil;
        };
        let data = self.data.lock();
        data.index
            .get(&key)
            .and_then(|&i| data.entries.get(i))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.get(&Value::from(key))
    }

    /// Raw set; assigning nil removes the key
    pub fn set(&self, key: Value, value: Value) -> RuntimeResult<()> {
        if self.is_read_only() {
            return Err(RuntimeErrorKind::ReadOnlyAssignment.into());
        }
        let key = key.to_scalar();
        let table_key = TableKey::from_value(&key)?;
        let value = value.to_scalar();
        let mut data = self.data.lock();

        if let Some(&i) = data.index.get(&table_key) {
            let was_nil = data.entries[i].1.is_nil();
            let is_nil = value.is_nil();
            data.entries[i].1 = value;
            match (was_nil, is_nil) {
                (false, true) => data.removed += 1,
                (true, false) => data.removed -= 1,
                _ => {}
            }
            return Ok(());
        }
        if value.is_nil() {
            return Ok(());
        }
        if data.removed > 16 && data.removed * 2 > data.entries.len() {
            data.compact();
        }
        let slot = data.entries.len();
        data.entries.push((key, value));
        data.index.insert(table_key, slot);
        Ok(())
    }

    pub fn set_str(&self, key: &str, value: Value) -> RuntimeResult<()> {
        self.set(Value::from(key), value)
    }

    /// Border length (`#t`): largest n with t[1..=n] all non-nil
    #[must_use]
    pub fn len(&self) -> usize {
        let data = self.data.lock();
        let mut n = 0usize;
        loop {
            let key = TableKey::Number(((n + 1) as f64).to_bits());
            match data.index.get(&key).and_then(|&i| data.entries.get(i)) {
                Some((_, v)) if !v.is_nil() => n += 1,
                _ => return n,
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().entries.iter().all(|(_, v)| v.is_nil())
    }

    /// Entry after `key` in iteration order (nil starts the traversal)
    pub fn next(&self, key: &Value) -> RuntimeResult<Option<(Value, Value)>> {
        let data = self.data.lock();
        let start = if key.is_nil() {
            0
        } else {
            let table_key = TableKey::from_value(key)?;
            match data.index.get(&table_key) {
                Some(&i) => i + 1,
                None => {
                    return Err(RuntimeError::bad_argument(1, "next", "invalid key to 'next'"))
                }
            }
        };
        Ok(data.entries[start.min(data.entries.len())..]
            .iter()
            .find(|(_, v)| !v.is_nil())
            .cloned())
    }

    /// Snapshot of all live entries
    #[must_use]
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.data
            .lock()
            .entries
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .cloned()
            .collect()
    }

    /// Make the table immutable
    pub fn freeze(&self) {
        self.read_only.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

/// How a nested function reaches a captured variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpvalueDesc {
    /// A local slot of the enclosing function
    Local(u16),
    /// An upvalue of the enclosing function
    Upvalue(u16),
}

/// A compiled function: the bytecode unit plus its metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionProto {
    /// Function name for tracebacks
    pub name: String,

    /// Declared parameter count
    pub param_count: u16,

    /// True if declared with `...`
    pub is_vararg: bool,

    /// Bytecode
    pub chunk: Chunk,

    /// Captures, in upvalue-index order
    pub upvalues: Vec<UpvalueDesc>,

    /// Nested function prototypes
    pub protos: Vec<Arc<FunctionProto>>,

    /// Local slot names, indexed by slot
    pub local_names: Vec<String>,

    /// Chunk name used in error positions
    pub source_name: String,
}

impl FunctionProto {
    #[must_use]
    pub fn new(name: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_name: source_name.into(),
            ..Self::default()
        }
    }

    /// Number of local slots a frame needs
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.local_names.len()
    }

    /// Recursively drops source refs from this prototype and its children
    pub(crate) fn strip_source_refs(&mut self) {
        self.chunk.strip_source_refs();
        for proto in &mut self.protos {
            Arc::make_mut(proto).strip_source_refs();
        }
    }
}

/// A captured variable cell
pub type Upvalue = Arc<Mutex<Value>>;

/// A closure (function prototype + captured variables)
pub struct Closure {
    pub proto: Arc<FunctionProto>,
    pub upvalues: Vec<Upvalue>,
}

impl Closure {
    #[must_use]
    pub fn new(proto: Arc<FunctionProto>, upvalues: Vec<Upvalue>) -> Self {
        Self { proto, upvalues }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("function", &self.proto.name)
            .field("upvalue_count", &self.upvalues.len())
            .finish()
    }
}

/// Signature of host functions
pub type NativeFn =
    dyn Fn(&mut ExecutionContext<'_>, Vec<Value>) -> RuntimeResult<Value> + Send + Sync;

/// A native/host function
pub struct NativeFunction {
    pub name: String,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Invoke the function
    pub fn call(&self, ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish()
    }
}

/// An opaque host object with a type descriptor
pub struct UserData {
    pub type_name: String,
    pub object: Box<dyn Any + Send + Sync>,
}

impl UserData {
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, object: T) -> Self {
        Self {
            type_name: type_name.into(),
            object: Box::new(object),
        }
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref()
    }
}

/// Payload of a tail-call request
pub struct TailCallData {
    /// Function to call
    pub function: Value,
    pub args: Vec<Value>,
    /// Receives the call's result values; its return value replaces them
    pub continuation: Option<Arc<NativeFunction>>,
    /// Receives the error value if the call fails; its return value is the result
    pub error_handler: Option<Arc<NativeFunction>>,
    /// Called with the error value before the stack unwinds (`xpcall` handler)
    pub handler_before_unwind: Option<Value>,
}

impl TailCallData {
    pub fn new(function: Value, args: Vec<Value>) -> Self {
        Self {
            function,
            args,
            continuation: None,
            error_handler: None,
            handler_before_unwind: None,
        }
    }

    /// True if the request needs a marker frame to run its callbacks
    #[must_use]
    pub fn has_callbacks(&self) -> bool {
        self.continuation.is_some() || self.error_handler.is_some()
    }
}

/// Payload of a yield request
#[derive(Debug, Clone)]
pub struct YieldData {
    pub values: Vec<Value>,
    /// True when the scheduler preempted the coroutine
    pub forced: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_equals_void() {
        assert!(Value::Nil.raw_equals(&Value::Void));
        assert!(!Value::Number(1.0).raw_equals(&Value::Number(2.0)));
    }

    #[test]
    fn tables_compare_by_identity() {
        let a = Value::table_from(vec![Value::from(1)]);
        let b = Value::table_from(vec![Value::from(1)]);
        assert!(!a.raw_equals(&b));
        assert!(a.raw_equals(&a.clone()));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(512.0), "512");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn numeric_strings_convert() {
        assert_eq!(parse_number(" 0x10 "), Some(16.0));
        assert_eq!(parse_number("1e2"), Some(100.0));
        assert_eq!(parse_number("-2.5"), Some(-2.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn table_border_and_next() {
        let t = Table::from_array(vec![Value::from(10), Value::from(20), Value::from(30)]);
        assert_eq!(t.len(), 3);
        t.set(Value::from(2), Value::Nil).unwrap();
        assert_eq!(t.len(), 1);

        let (k, _) = t.next(&Value::Nil).unwrap().unwrap();
        assert!(k.raw_equals(&Value::from(1)));
        let (k, _) = t.next(&k).unwrap().unwrap();
        assert!(k.raw_equals(&Value::from(3)));
        assert!(t.next(&k).unwrap().is_none());
    }

    #[test]
    fn array_holes_can_be_filled() {
        let t = Table::from_array(vec![Value::Nil, Value::from(2), Value::Nil]);
        assert_eq!(t.len(), 0);
        assert!(t.next(&Value::Nil).unwrap().unwrap().0.raw_equals(&Value::from(2)));

        t.set(Value::from(1), Value::from(5)).unwrap();
        t.set(Value::from(3), Value::from(7)).unwrap();
        assert_eq!(t.len(), 3);
        assert!(t.get(&Value::from(1)).raw_equals(&Value::from(5)));
        assert!(t.get(&Value::from(3)).raw_equals(&Value::from(7)));
    }

    #[test]
    fn frozen_tables_reject_writes() {
        let t = Table::new();
        t.set_str("a", Value::from(1)).unwrap();
        t.freeze();
        let err = t.set_str("a", Value::from(2)).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::ReadOnlyAssignment));
        assert!(t.get_str("a").raw_equals(&Value::from(1)));
    }

    #[test]
    fn nil_and_nan_keys_are_rejected() {
        let t = Table::new();
        assert!(matches!(
            t.set(Value::Nil, Value::from(1)).unwrap_err().kind,
            RuntimeErrorKind::IndexIsNil
        ));
        assert!(matches!(
            t.set(Value::Number(f64::NAN), Value::from(1)).unwrap_err().kind,
            RuntimeErrorKind::IndexIsNaN
        ));
    }

    #[test]
    fn scalar_of_empty_tuple_is_nil() {
        assert!(matches!(Value::Tuple(vec![]).to_scalar(), Value::Nil));
        assert!(matches!(Value::Void.to_scalar(), Value::Nil));
    }
}
