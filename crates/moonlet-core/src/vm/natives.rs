//! Built-in functions registered in every interpreter's globals
//!
//! Base library: print, type, tostring, tonumber, error, assert, pcall,
//! xpcall, select, next, pairs, ipairs, unpack, rawequal, rawget, rawset, _G.
//! Coroutine library: create, resume, yield, status, running, isyieldable,
//! wrap, close.

use std::sync::Arc;

use crate::bytecode::{
    parse_number, NativeFunction, Table, TailCallData, Value, YieldData,
};

use super::context::ExecutionContext;
use super::coroutine::Coroutine;
use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
use super::output::capture_output;

/// Install the built-ins into `globals`
pub(crate) fn register_builtins(globals: &Arc<Table>) -> RuntimeResult<()> {
    let next = Value::native("next", base_next);
    let pairs_next = next.clone();

    let base: [(&str, Value); 16] = [
        ("print", Value::native("print", base_print)),
        ("type", Value::native("type", base_type)),
        ("tostring", Value::native("tostring", base_tostring)),
        ("tonumber", Value::native("tonumber", base_tonumber)),
        ("error", Value::native("error", base_error)),
        ("assert", Value::native("assert", base_assert)),
        ("pcall", Value::native("pcall", base_pcall)),
        ("xpcall", Value::native("xpcall", base_xpcall)),
        ("select", Value::native("select", base_select)),
        ("next", next),
        (
            "pairs",
            Value::native("pairs", move |_: &mut ExecutionContext<'_>, args: Vec<Value>| {
                let table = check_table(&args, 1, "pairs")?;
                Ok(Value::Tuple(vec![
                    pairs_next.clone(),
                    Value::Table(table),
                    Value::Nil,
                ]))
            }),
        ),
        ("ipairs", Value::native("ipairs", base_ipairs)),
        ("unpack", Value::native("unpack", base_unpack)),
        ("rawequal", Value::native("rawequal", base_rawequal)),
        ("rawget", Value::native("rawget", base_rawget)),
        ("rawset", Value::native("rawset", base_rawset)),
    ];
    for (name, value) in base {
        globals.set_str(name, value)?;
    }
    globals.set_str("_G", Value::Table(Arc::clone(globals)))?;

    let coroutine = Table::new();
    coroutine.set_str("create", Value::native("create", co_create))?;
    coroutine.set_str("resume", Value::native("resume", co_resume))?;
    coroutine.set_str("yield", Value::native("yield", co_yield))?;
    coroutine.set_str("status", Value::native("status", co_status))?;
    coroutine.set_str("running", Value::native("running", co_running))?;
    coroutine.set_str("isyieldable", Value::native("isyieldable", co_isyieldable))?;
    coroutine.set_str("wrap", Value::native("wrap", co_wrap))?;
    coroutine.set_str("close", Value::native("close", co_close))?;
    globals.set_str("coroutine", Value::Table(Arc::new(coroutine)))?;
    Ok(())
}

// ============================================================================
// Argument Helpers
// ============================================================================

/// Argument at 1-based `position`, nil if absent
fn arg(args: &[Value], position: usize) -> Value {
    args.get(position - 1).cloned().unwrap_or_default()
}

fn check_table(args: &[Value], position: usize, function: &str) -> RuntimeResult<Arc<Table>> {
    match args.get(position - 1) {
        Some(Value::Table(table)) => Ok(Arc::clone(table)),
        other => Err(RuntimeError::bad_argument(
            position,
            function,
            format!("table expected, got {}", type_of(other)),
        )),
    }
}

fn check_integer(args: &[Value], position: usize, function: &str) -> RuntimeResult<i64> {
    let value = args.get(position - 1);
    let Some(n) = value.and_then(Value::as_number) else {
        return Err(RuntimeError::bad_argument(
            position,
            function,
            format!("number expected, got {}", type_of(value)),
        ));
    };
    crate::bytecode::number_to_integer(n).ok_or_else(|| {
        RuntimeError::bad_argument(position, function, "number has no integer representation")
    })
}

fn opt_integer(
    args: &[Value],
    position: usize,
    function: &str,
    default: i64,
) -> RuntimeResult<i64> {
    match args.get(position - 1) {
        None | Some(Value::Nil) => Ok(default),
        Some(_) => check_integer(args, position, function),
    }
}

fn check_coroutine(args: &[Value]) -> RuntimeResult<Arc<Coroutine>> {
    args.first()
        .and_then(Value::as_coroutine)
        .cloned()
        .ok_or_else(|| RuntimeErrorKind::NotACoroutine.into())
}

fn type_of(value: Option<&Value>) -> &'static str {
    value.map_or("no value", Value::type_name)
}

// ============================================================================
// Base Library
// ============================================================================

fn base_print(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\t");
    if !capture_output(&line) {
        println!("{line}");
    }
    Ok(Value::Void)
}

fn base_type(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    match args.first() {
        Some(value) => Ok(Value::from(value.type_name())),
        None => Err(RuntimeError::bad_argument(1, "type", "value expected")),
    }
}

fn base_tostring(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    match args.first() {
        Some(value) => Ok(Value::from(value.to_string())),
        None => Err(RuntimeError::bad_argument(1, "tostring", "value expected")),
    }
}

fn base_tonumber(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let value = arg(&args, 1);
    if args.len() < 2 || args[1].is_nil() {
        return Ok(match &value {
            Value::Number(_) => value,
            Value::String(s) => parse_number(s).map_or(Value::Nil, Value::Number),
            _ => Value::Nil,
        });
    }

    let base = check_integer(&args, 2, "tonumber")?;
    if !(2..=36).contains(&base) {
        return Err(RuntimeError::bad_argument(2, "tonumber", "base out of range"));
    }
    let Some(text) = value.as_str() else {
        return Err(RuntimeError::bad_argument(
            1,
            "tonumber",
            format!("string expected, got {}", value.type_name()),
        ));
    };
    let text = text.trim().to_ascii_lowercase();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.as_str()),
    };
    let parsed = i64::from_str_radix(digits, base as u32).ok();
    Ok(match parsed {
        Some(n) if !digits.starts_with(['+', '-']) => {
            Value::Number(if negative { -(n as f64) } else { n as f64 })
        }
        _ => Value::Nil,
    })
}

fn base_error(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let value = arg(&args, 1);
    let level = opt_integer(&args, 2, "error", 1)?;
    let mut err = RuntimeError::script(value);
    match level {
        1 => {}
        l if l <= 0 => err = err.undecorated(),
        l => match usize::try_from(l).ok().and_then(|l| ctx.location_at(l)) {
            Some(location) => err.decorate_with(location),
            None => err = err.undecorated(),
        },
    }
    Err(err)
}

fn base_assert(_: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> RuntimeResult<Value> {
    if args.first().is_some_and(Value::is_truthy) {
        return Ok(Value::Tuple(args));
    }
    if args.is_empty() {
        return Err(RuntimeError::bad_argument(1, "assert", "value expected"));
    }
    let message = if args.len() > 1 {
        args.swap_remove(1)
    } else {
        Value::from("assertion failed!")
    };
    Err(RuntimeError::script(message).undecorated())
}

/// Continuation of a protected call: prepend the success flag
fn protected_success() -> Arc<NativeFunction> {
    Arc::new(NativeFunction::new(
        "pcall continuation",
        |_: &mut ExecutionContext<'_>, values: Vec<Value>| {
            let mut result = Vec::with_capacity(values.len() + 1);
            result.push(Value::Boolean(true));
            result.extend(values);
            Ok(Value::Tuple(result))
        },
    ))
}

/// Error handler of a protected call: `false, error value`
fn protected_failure() -> Arc<NativeFunction> {
    Arc::new(NativeFunction::new(
        "pcall error handler",
        |_: &mut ExecutionContext<'_>, values: Vec<Value>| {
            let error = values.into_iter().next().unwrap_or_default();
            Ok(Value::Tuple(vec![Value::Boolean(false), error]))
        },
    ))
}

fn base_pcall(_: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> RuntimeResult<Value> {
    if args.is_empty() {
        return Err(RuntimeError::bad_argument(1, "pcall", "value expected"));
    }
    let function = args.remove(0);
    let mut data = TailCallData::new(function, args);
    data.continuation = Some(protected_success());
    data.error_handler = Some(protected_failure());
    Ok(Value::TailCallRequest(Arc::new(data)))
}

fn base_xpcall(_: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> RuntimeResult<Value> {
    if args.len() < 2 {
        return Err(RuntimeError::bad_argument(2, "xpcall", "value expected"));
    }
    let function = args.remove(0);
    let handler = args.remove(0);
    let mut data = TailCallData::new(function, args);
    data.continuation = Some(protected_success());
    data.error_handler = Some(protected_failure());
    data.handler_before_unwind = Some(handler);
    Ok(Value::TailCallRequest(Arc::new(data)))
}

fn base_select(_: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> RuntimeResult<Value> {
    if args.first().and_then(Value::as_str) == Some("#") {
        return Ok(Value::Number((args.len() - 1) as f64));
    }
    let n = check_integer(&args, 1, "select")?;
    let count = (args.len() - 1) as i64;
    let start = if n < 0 { count + n + 1 } else { n };
    if n == 0 || start < 1 {
        return Err(RuntimeError::bad_argument(1, "select", "index out of range"));
    }
    let start = (start as usize).min(args.len());
    Ok(Value::tuple(args.split_off(start)))
}

fn base_next(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let table = check_table(&args, 1, "next")?;
    match table.next(&arg(&args, 2))? {
        Some((key, value)) => Ok(Value::Tuple(vec![key, value])),
        None => Ok(Value::Nil),
    }
}

fn ipairs_step(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let table = check_table(&args, 1, "ipairs")?;
    let index = check_integer(&args, 2, "ipairs")? + 1;
    let value = table.get(&Value::Number(index as f64));
    if value.is_nil() {
        Ok(Value::Nil)
    } else {
        Ok(Value::Tuple(vec![Value::Number(index as f64), value]))
    }
}

fn base_ipairs(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let table = check_table(&args, 1, "ipairs")?;
    Ok(Value::Tuple(vec![
        Value::native("ipairs_step", ipairs_step),
        Value::Table(table),
        Value::Number(0.0),
    ]))
}

fn base_unpack(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let table = check_table(&args, 1, "unpack")?;
    let first = opt_integer(&args, 2, "unpack", 1)?;
    let last = opt_integer(&args, 3, "unpack", table.len() as i64)?;
    if last < first {
        return Ok(Value::Tuple(Vec::new()));
    }
    if last - first >= 1 << 20 {
        return Err(RuntimeError::bad_argument(1, "unpack", "too many results to unpack"));
    }
    let values = (first..=last)
        .map(|i| table.get(&Value::Number(i as f64)))
        .collect();
    Ok(Value::Tuple(values))
}

fn base_rawequal(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(arg(&args, 1).raw_equals(&arg(&args, 2))))
}

fn base_rawget(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let table = check_table(&args, 1, "rawget")?;
    Ok(table.get(&arg(&args, 2)))
}

fn base_rawset(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let table = check_table(&args, 1, "rawset")?;
    table.set(arg(&args, 2), arg(&args, 3))?;
    Ok(Value::Table(table))
}

// ============================================================================
// Coroutine Library
// ============================================================================

fn check_function(args: &[Value], function: &str) -> RuntimeResult<Value> {
    match args.first() {
        Some(f @ (Value::Function(_) | Value::NativeFunction(_))) => Ok(f.clone()),
        other => Err(RuntimeError::bad_argument(
            1,
            function,
            format!("function expected, got {}", type_of(other)),
        )),
    }
}

fn co_create(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let function = check_function(&args, "create")?;
    Ok(Value::Coroutine(ctx.script().new_coroutine(function)))
}

fn co_resume(ctx: &mut ExecutionContext<'_>, mut args: Vec<Value>) -> RuntimeResult<Value> {
    let coroutine = check_coroutine(&args)?;
    args.remove(0);
    match coroutine.resume_from(ctx.script(), args) {
        Ok(values) => Ok(values),
        Err(err)
            if !err.is_recoverable()
                || matches!(err.kind, RuntimeErrorKind::ForcedResumeWithArguments) =>
        {
            Err(err)
        }
        Err(err) => Ok(Value::Tuple(vec![Value::Boolean(false), err.to_value()])),
    }
}

fn co_yield(_: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    Ok(Value::YieldRequest(Arc::new(YieldData {
        values: args,
        forced: false,
    })))
}

fn co_status(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let coroutine = check_coroutine(&args)?;
    Ok(Value::from(coroutine.status(ctx.current_coroutine())))
}

fn co_running(ctx: &mut ExecutionContext<'_>, _: Vec<Value>) -> RuntimeResult<Value> {
    Ok(Value::Tuple(vec![
        Value::Coroutine(Arc::clone(ctx.current_coroutine())),
        Value::Boolean(ctx.is_main()),
    ]))
}

fn co_isyieldable(ctx: &mut ExecutionContext<'_>, _: Vec<Value>) -> RuntimeResult<Value> {
    Ok(Value::Boolean(ctx.is_yieldable()))
}

fn co_wrap(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let function = check_function(&args, "wrap")?;
    let coroutine = ctx.script().new_coroutine(function);
    Ok(Value::native(
        "wrap",
        move |ctx: &mut ExecutionContext<'_>, args: Vec<Value>| {
            let values = coroutine.resume_from(ctx.script(), args)?;
            Ok(Value::tuple(values.into_values().into_iter().skip(1).collect()))
        },
    ))
}

fn co_close(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> RuntimeResult<Value> {
    let coroutine = check_coroutine(&args)?;
    if Arc::ptr_eq(&coroutine, ctx.current_coroutine()) {
        return Err(RuntimeErrorKind::CannotClose("running").into());
    }
    coroutine.close_inner(ctx.script())?;
    Ok(Value::Boolean(true))
}

#[cfg(test)]
mod tests {
    use crate::testutil::{eval_bool, eval_number, eval_string, expect_runtime_error, run_script};
    use crate::vm::with_output_capture;

    #[test]
    fn test_print_is_captured() {
        let (result, output) = with_output_capture(|| run_script("print('a', 1, nil, true)"));
        result.unwrap();
        assert_eq!(output.stdout, vec!["a\t1\tnil\ttrue"]);
    }

    #[test]
    fn test_type_and_tostring() {
        assert_eq!(eval_string("type(coroutine.create(print))").unwrap(), "thread");
        assert_eq!(eval_string("type(nil)").unwrap(), "nil");
        assert_eq!(eval_string("tostring(1.5)").unwrap(), "1.5");
    }

    #[test]
    fn test_tonumber() {
        assert_eq!(eval_number("tonumber('0x10')").unwrap(), 16.0);
        assert_eq!(eval_number("tonumber('ff', 16)").unwrap(), 255.0);
        assert_eq!(eval_number("tonumber('-101', 2)").unwrap(), -5.0);
        assert!(eval_bool("tonumber('nope') == nil").unwrap());
    }

    #[test]
    fn test_select() {
        assert_eq!(eval_number("select('#', 1, nil, 3)").unwrap(), 3.0);
        assert_eq!(eval_number("select(2, 'a', 5, 6)").unwrap(), 5.0);
        assert_eq!(eval_number("select(-1, 'a', 5, 6)").unwrap(), 6.0);
    }

    #[test]
    fn test_pcall_results() {
        assert!(eval_bool("(pcall(function() return 1 end))").unwrap());
        assert_eq!(
            eval_string("select(2, pcall(error, 'x', 0))").unwrap(),
            "x"
        );
        assert_eq!(
            eval_string("select(2, pcall(function() error('bad') end))").unwrap(),
            "chunk:1: bad"
        );
    }

    #[test]
    fn test_error_levels() {
        let source = "local function f() error('deep', 2) end\nlocal ok, e = pcall(function()\n f()\nend)\nreturn e";
        assert_eq!(eval_string(source).unwrap(), "chunk:3: deep");
    }

    #[test]
    fn test_error_with_table_value() {
        assert!(eval_bool("local t = {} local ok, e = pcall(error, t) return e == t").unwrap());
    }

    #[test]
    fn test_xpcall_handler_sees_error() {
        let source = "local ok, e = xpcall(function() error('x', 0) end, function(m) return 'handled ' .. m end) return e";
        assert_eq!(eval_string(source).unwrap(), "handled x");
    }

    #[test]
    fn test_assert() {
        let err = expect_runtime_error("assert(false, 'nope')").unwrap();
        assert_eq!(err, "nope");
        let err = expect_runtime_error("assert(nil)").unwrap();
        assert_eq!(err, "assertion failed!");
        assert_eq!(eval_number("return (assert(3, 'unused'))").unwrap(), 3.0);
    }

    #[test]
    fn test_pairs_and_ipairs() {
        let source = "local t = {10, 20, 30, x = 1} local s = 0 for _, v in ipairs(t) do s = s + v end for k, v in pairs(t) do if k == 'x' then s = s + v end end return s";
        assert_eq!(eval_number(source).unwrap(), 61.0);
    }

    #[test]
    fn test_unpack_and_raw_access() {
        assert_eq!(eval_number("local a, b, c = unpack({1, 2, 3}) return c").unwrap(), 3.0);
        assert_eq!(eval_number("local t = rawset({}, 'k', 4) return rawget(t, 'k')").unwrap(), 4.0);
        assert!(eval_bool("rawequal(_G, _G) and _G.print == print").unwrap());
    }
}
