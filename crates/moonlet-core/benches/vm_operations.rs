//! Benchmark suite for the Moonlet VM
//!
//! Covers the hot paths of the processor loop:
//! - compiling a chunk
//! - arithmetic loops and recursive calls
//! - table construction and iteration
//! - coroutine resume/yield round trips
//! - forced yields under an auto-yield counter

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use moonlet_core::bytecode::SourceCode;
use moonlet_core::{Compiler, CoroutineState, Parser, Script, ScriptOptions, Value};

/// Compile `code` once and return the callable chunk
fn load(script: &Script, code: &str) -> Value {
    script.load_string(code, "bench").expect("Failed to compile benchmark chunk")
}

fn bench_compile(c: &mut Criterion) {
    let code = "local function fib(n)
                  if n < 2 then return n end
                  return fib(n - 1) + fib(n - 2)
                end
                local t = {}
                for i = 1, 10 do t[i] = fib(i) end
                return t";
    let source = SourceCode::new(0, "bench", code);
    c.bench_function("compile_chunk", |b| {
        b.iter(|| {
            let block = Parser::parse_chunk(black_box(code)).unwrap();
            black_box(Compiler::new(&source).compile_chunk(&block).unwrap())
        });
    });
}

fn bench_arithmetic_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("arithmetic_loop");

    for size in [1_000, 10_000, 100_000].iter() {
        let script = Script::new();
        let chunk = load(
            &script,
            &format!(
                "local sum = 0
                 for i = 1, {size} do sum = sum + i * 2 % 7 end
                 return sum"
            ),
        );

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(script.call(chunk.clone(), Vec::new()).unwrap()));
        });
    }

    group.finish();
}

fn bench_recursive_calls(c: &mut Criterion) {
    let script = Script::with_options(ScriptOptions::default().with_debug_instructions(false));
    let fib = script
        .do_string(
            "local function fib(n)
               if n < 2 then return n end
               return fib(n - 1) + fib(n - 2)
             end
             return fib",
        )
        .unwrap()
        .to_scalar();

    c.bench_function("fib_20", |b| {
        b.iter(|| black_box(script.call(fib.clone(), vec![Value::from(20)]).unwrap()));
    });
}

fn bench_tables(c: &mut Criterion) {
    let mut group = c.benchmark_group("tables");

    for size in [100, 1_000, 10_000].iter() {
        let script = Script::new();
        let chunk = load(
            &script,
            &format!(
                "local t = {{}}
                 for i = 1, {size} do t[i] = i end
                 local n = 0
                 for _, v in ipairs(t) do n = n + v end
                 for k, v in pairs(t) do n = n - v end
                 return n"
            ),
        );

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(script.call(chunk.clone(), Vec::new()).unwrap()));
        });
    }

    group.finish();
}

fn bench_coroutine_round_trips(c: &mut Criterion) {
    let mut group = c.benchmark_group("coroutine_round_trips");

    for size in [100, 1_000, 10_000].iter() {
        let script = Script::new();
        let chunk = load(
            &script,
            &format!(
                "local co = coroutine.wrap(function()
                   local i = 0
                   while true do i = i + 1 coroutine.yield(i) end
                 end)
                 local last
                 for _ = 1, {size} do last = co() end
                 return last"
            ),
        );

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(script.call(chunk.clone(), Vec::new()).unwrap()));
        });
    }

    group.finish();
}

fn bench_forced_yields(c: &mut Criterion) {
    let mut group = c.benchmark_group("forced_yields");

    for counter in [10u64, 100, 1_000].iter() {
        let script = Script::new();
        let function = script
            .do_string(
                "return function()
                   local n = 0
                   for i = 1, 10000 do n = n + i end
                   return n
                 end",
            )
            .unwrap()
            .to_scalar();

        group.bench_with_input(BenchmarkId::from_parameter(counter), counter, |b, &counter| {
            b.iter(|| {
                let co = script.create_coroutine(function.clone()).unwrap();
                co.set_auto_yield_counter(counter);
                let mut resumes = 0u32;
                while co.state() != CoroutineState::Dead {
                    co.resume(Vec::new()).unwrap();
                    resumes += 1;
                }
                black_box(resumes)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_compile,
    bench_arithmetic_loop,
    bench_recursive_calls,
    bench_tables,
    bench_coroutine_round_trips,
    bench_forced_yields,
);

criterion_main!(benches);
