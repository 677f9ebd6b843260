//! Coroutine scheduling seen from scripts and from the host

use std::sync::{Arc, Barrier};
use std::thread;

use moonlet_core::{CoroutineState, RuntimeErrorKind, Script, ScriptError, ScriptOptions, Value};

fn values(value: Value) -> Vec<Value> {
    value.into_values()
}

fn assert_values(actual: Value, expected: &[Value]) {
    let actual = values(actual);
    assert_eq!(actual.len(), expected.len(), "{actual:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.raw_equals(e), "expected {e}, got {a}");
    }
}

#[test]
fn test_resume_yield_round_trip() {
    let script = Script::new();
    script
        .do_string(
            "co = coroutine.create(function(a)
               local b = coroutine.yield(a + 1, 'v')
               return b
             end)",
        )
        .unwrap();

    let first = script.do_string("return coroutine.resume(co, 6)").unwrap();
    assert_values(first, &[Value::Boolean(true), Value::from(7), Value::from("v")]);

    let second = script.do_string("return coroutine.resume(co, 99)").unwrap();
    assert_values(second, &[Value::Boolean(true), Value::from(99)]);

    let status = script.do_string("return coroutine.status(co)").unwrap();
    assert_values(status, &[Value::from("dead")]);

    let third = script.do_string("return coroutine.resume(co)").unwrap();
    assert_values(
        third,
        &[Value::Boolean(false), Value::from("cannot resume dead coroutine")],
    );
}

#[test]
fn test_errors_inside_coroutines_are_caught_at_resume() {
    let script = Script::new();
    let result = script
        .do_string(
            "local co = coroutine.create(function() error('broken') end)
             local ok, msg = coroutine.resume(co)
             return ok, msg, coroutine.status(co)",
        )
        .unwrap();
    assert_values(
        result,
        &[Value::Boolean(false), Value::from("chunk:1: broken"), Value::from("dead")],
    );
}

#[test]
fn test_nested_resume_results_flatten_once() {
    let script = Script::new();
    let result = script
        .do_string(
            "local inner = coroutine.create(function() return 'deep', 'value' end)
             local outer = coroutine.create(function()
               return 'top', coroutine.resume(inner)
             end)
             return coroutine.resume(outer)",
        )
        .unwrap();
    assert_values(
        result,
        &[
            Value::Boolean(true),
            Value::from("top"),
            Value::Boolean(true),
            Value::from("deep"),
            Value::from("value"),
        ],
    );
}

#[test]
fn test_deeply_nested_resume_results_flatten_per_level() {
    let script = Script::new();
    let result = script
        .do_string(
            "local deepest = coroutine.create(function() return 'deep', 'value' end)
             local middle = coroutine.create(function()
               return coroutine.resume(deepest)
             end)
             local top = coroutine.create(function()
               return 'top', coroutine.resume(middle)
             end)
             return coroutine.resume(top)",
        )
        .unwrap();
    assert_values(
        result,
        &[
            Value::Boolean(true),
            Value::from("top"),
            Value::Boolean(true),
            Value::Boolean(true),
            Value::from("deep"),
            Value::from("value"),
        ],
    );
}

#[test]
fn test_status_from_inside() {
    let script = Script::new();
    let result = script
        .do_string(
            "local outer
             local inner = coroutine.create(function()
               return coroutine.status(outer)
             end)
             outer = coroutine.create(function()
               local _, seen = coroutine.resume(inner)
               return seen, coroutine.status(outer)
             end)
             local s0 = coroutine.status(outer)
             local _, a, b = coroutine.resume(outer)
             return s0, a, b",
        )
        .unwrap();
    assert_values(
        result,
        &[Value::from("suspended"), Value::from("normal"), Value::from("running")],
    );
}

#[test]
fn test_running_reports_main() {
    let script = Script::new();
    let result = script
        .do_string(
            "local _, is_main = coroutine.running()
             local co = coroutine.create(function()
               local _, m = coroutine.running()
               return m
             end)
             local _, inside = coroutine.resume(co)
             return is_main, inside",
        )
        .unwrap();
    assert_values(result, &[Value::Boolean(true), Value::Boolean(false)]);
}

#[test]
fn test_wrap_skips_status_flag() {
    let script = Script::new();
    let result = script
        .do_string(
            "local gen = coroutine.wrap(function()
               for i = 1, 3 do coroutine.yield(i * 10) end
               return 'done'
             end)
             return gen(), gen(), gen(), gen()",
        )
        .unwrap();
    assert_values(
        result,
        &[Value::from(10), Value::from(20), Value::from(30), Value::from("done")],
    );

    let err = script
        .do_string(
            "local gen = coroutine.wrap(function() end)
             gen()
             gen()",
        )
        .unwrap_err();
    assert!(err.to_string().contains("cannot resume dead coroutine"), "{err}");
}

#[test]
fn test_close_kills_suspended_coroutine() {
    let script = Script::new();
    let result = script
        .do_string(
            "local co = coroutine.create(function() coroutine.yield() end)
             coroutine.resume(co)
             local closed = coroutine.close(co)
             return closed, coroutine.status(co)",
        )
        .unwrap();
    assert_values(result, &[Value::Boolean(true), Value::from("dead")]);
}

#[test]
fn test_isyieldable() {
    let script = Script::new();
    script
        .register_native("through_host", |ctx, mut args| {
            let f = args.remove(0);
            ctx.call(f, Vec::new())
        })
        .unwrap();
    let result = script
        .do_string(
            "local main = coroutine.isyieldable()
             local co = coroutine.create(function()
               local direct = coroutine.isyieldable()
               local ok, protected = pcall(coroutine.isyieldable)
               local hosted = through_host(coroutine.isyieldable)
               return direct, protected, hosted
             end)
             local _, direct, protected, hosted = coroutine.resume(co)
             return main, direct, protected, hosted",
        )
        .unwrap();
    assert_values(
        result,
        &[
            Value::Boolean(false),
            Value::Boolean(true),
            Value::Boolean(true),
            Value::Boolean(false),
        ],
    );
}

#[test]
fn test_yield_through_pcall() {
    let script = Script::new();
    let result = script
        .do_string(
            "local co = coroutine.create(function()
               local ok, v = pcall(function()
                 local got = coroutine.yield('paused')
                 return got * 2
               end)
               return ok, v
             end)
             local _, first = coroutine.resume(co)
             local _, ok, v = coroutine.resume(co, 21)
             return first, ok, v",
        )
        .unwrap();
    assert_values(
        result,
        &[Value::from("paused"), Value::Boolean(true), Value::from(42)],
    );
}

#[test]
fn test_yield_across_host_call_fails() {
    let script = Script::new();
    script
        .register_native("through_host", |ctx, mut args| {
            let f = args.remove(0);
            ctx.call(f, Vec::new())
        })
        .unwrap();
    let result = script
        .do_string(
            "local co = coroutine.create(function()
               through_host(function() coroutine.yield(1) end)
             end)
             return coroutine.resume(co)",
        )
        .unwrap();
    let values = values(result);
    assert!(values[0].raw_equals(&Value::Boolean(false)));
    let message = values[1].to_string();
    assert!(message.contains("attempt to yield across a CLR-call boundary"), "{message}");
}

#[test]
fn test_yield_from_main_fails() {
    let script = Script::new();
    let err = script.do_string("coroutine.yield(1)").unwrap_err();
    assert!(err.to_string().contains("attempt to yield from outside a coroutine"), "{err}");
}

#[test]
fn test_forced_yield_preempts_long_loops() {
    let script = Script::new();
    let function = script
        .do_string(
            "return function()
               local n = 0
               for i = 1, 100 do n = n + i end
               return n
             end",
        )
        .unwrap()
        .to_scalar();
    let co = script.create_coroutine(function).unwrap();
    co.set_auto_yield_counter(10);

    let mut preemptions = 0;
    let last = loop {
        let result = co.resume(Vec::new()).unwrap();
        if co.state() == CoroutineState::Dead {
            break result;
        }
        assert_eq!(co.state(), CoroutineState::ForceSuspended);
        assert_values(result, &[Value::Boolean(true)]);
        preemptions += 1;
    };
    assert!(preemptions > 5, "only {preemptions} forced yields");
    assert_values(last, &[Value::Boolean(true), Value::from(5050)]);
}

#[test]
fn test_forced_resume_rejects_arguments() {
    let options = ScriptOptions::default().with_auto_yield_counter(3);
    let script = Script::with_options(options);
    let function = script
        .do_string("return function() local x = 0 while true do x = x + 1 end end")
        .unwrap()
        .to_scalar();
    let co = script.create_coroutine(function).unwrap();
    assert_eq!(co.auto_yield_counter(), 3);

    co.resume(Vec::new()).unwrap();
    assert_eq!(co.state(), CoroutineState::ForceSuspended);
    let err = co.resume(vec![Value::from(1)]).unwrap_err();
    assert!(matches!(err.kind, RuntimeErrorKind::ForcedResumeWithArguments));
    assert_eq!(co.state(), CoroutineState::ForceSuspended);

    co.close().unwrap();
    assert_eq!(co.state(), CoroutineState::Dead);
}

#[test]
fn test_host_created_coroutine_needs_callable() {
    let script = Script::new();
    let err = script.create_coroutine(Value::from(3)).unwrap_err();
    assert!(matches!(err.kind, RuntimeErrorKind::InvalidOperation(_)));
}

#[test]
fn test_second_thread_is_rejected_while_first_runs() {
    let script = Script::new();
    let inside = Arc::new(Barrier::new(2));
    let checked = Arc::new(Barrier::new(2));
    {
        let inside = Arc::clone(&inside);
        let checked = Arc::clone(&checked);
        script
            .register_native("rendezvous", move |_, _| {
                inside.wait();
                checked.wait();
                Ok(Value::from("released"))
            })
            .unwrap();
    }

    let runner = {
        let script = script.clone();
        thread::spawn(move || script.do_string("return rendezvous()"))
    };

    inside.wait();
    let err = script.do_string("return 1").unwrap_err();
    checked.wait();

    match err {
        ScriptError::Runtime(e) => assert!(matches!(e.kind, RuntimeErrorKind::Reentrancy(_))),
        other => panic!("expected a reentrancy error, got {other}"),
    }
    let result = runner.join().unwrap().unwrap();
    assert!(result.raw_equals(&Value::from("released")));

    // The first thread left, so entering works again
    assert!(script.do_string("return 2").unwrap().raw_equals(&Value::from(2)));
}

#[test]
fn test_coroutine_resume_from_second_thread_is_rejected() {
    let script = Script::new();
    let inside = Arc::new(Barrier::new(2));
    let checked = Arc::new(Barrier::new(2));
    {
        let inside = Arc::clone(&inside);
        let checked = Arc::clone(&checked);
        script
            .register_native("rendezvous", move |_, _| {
                inside.wait();
                checked.wait();
                Ok(Value::Nil)
            })
            .unwrap();
    }
    let function = script
        .do_string("return function(x) return x * 2 end")
        .unwrap()
        .to_scalar();
    let co = script.create_coroutine(function).unwrap();

    let runner = {
        let script = script.clone();
        thread::spawn(move || script.do_string("rendezvous()"))
    };

    inside.wait();
    let err = co.resume(vec![Value::from(4)]).unwrap_err();
    checked.wait();

    assert!(matches!(err.kind, RuntimeErrorKind::Reentrancy(_)), "{err}");
    assert_eq!(co.state(), CoroutineState::NotStarted);
    runner.join().unwrap().unwrap();

    let result = co.resume(vec![Value::from(4)]).unwrap();
    assert_values(result, &[Value::Boolean(true), Value::from(8)]);
    assert_eq!(co.state(), CoroutineState::Dead);
}
