//! Dumping compiled chunks and running them back

use moonlet_core::bytecode::DumpError;
use moonlet_core::{Script, ScriptError, Value};

const PROGRAM: &str = "local function fib(n)
  if n < 2 then return n end
  return fib(n - 1) + fib(n - 2)
end
local counter = 0
local function bump() counter = counter + 1 return counter end
bump() bump()
return fib(15), bump(), select('#', 1, 2, 3)
";

#[test]
fn test_undumped_chunk_matches_the_live_chunk() {
    let script = Script::new();
    let function = script.load_string(PROGRAM, "prog").unwrap();
    let expected = script.call(function.clone(), Vec::new()).unwrap().into_values();

    let mut buffer = Vec::new();
    script.dump(&function, &mut buffer).unwrap();

    // A fresh interpreter can load it
    let other = Script::new();
    let restored = other.undump(buffer.as_slice()).unwrap();
    let actual = other.call(restored, Vec::new()).unwrap().into_values();

    assert_eq!(actual.len(), 3);
    assert!(actual[0].raw_equals(&Value::from(610)));
    for (a, e) in actual.iter().zip(&expected) {
        assert!(a.raw_equals(e), "expected {e}, got {a}");
    }
}

#[test]
fn test_closures_with_upvalues_cannot_be_dumped() {
    let script = Script::new();
    let closure = script
        .do_string("local x = 1 return function() return x end")
        .unwrap()
        .to_scalar();
    let err = script.dump(&closure, Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        ScriptError::Dump(DumpError::HasUpvalues { count: 1, .. })
    ));
}

#[test]
fn test_only_script_functions_dump() {
    let script = Script::new();
    let err = script.dump(&Value::from(1), Vec::new()).unwrap_err();
    assert!(matches!(err, ScriptError::Dump(DumpError::NotAFunction("number"))));

    let print = script.get_global("print");
    let err = script.dump(&print, Vec::new()).unwrap_err();
    assert!(matches!(err, ScriptError::Dump(DumpError::NotAFunction("function"))));
}

#[test]
fn test_garbage_is_rejected() {
    let script = Script::new();
    let err = script.undump(&b"not json"[..]).unwrap_err();
    assert!(matches!(err, ScriptError::Dump(DumpError::Format(_))));

    let err = script
        .undump(&br#"{"magic":"other","version":1,"function":{}}"#[..])
        .unwrap_err();
    assert!(matches!(err, ScriptError::Dump(DumpError::BadMagic { .. })));
}
