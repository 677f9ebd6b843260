//! Operator semantics through the whole pipeline: parse, compile, execute

use moonlet_core::testutil::{eval_bool, eval_number, eval_string, expect_runtime_error};
use moonlet_core::{Script, Value};

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval_number("1 + 2 * 3").unwrap(), 7.0);
    assert_eq!(eval_number("(1 + 2) * 3").unwrap(), 9.0);
    assert_eq!(eval_number("10 - 4 - 3").unwrap(), 3.0);
    assert_eq!(eval_number("2 * -3").unwrap(), -6.0);
}

#[test]
fn test_power_is_right_associative() {
    assert_eq!(eval_number("2 ^ 3 ^ 2").unwrap(), 512.0);
    assert_eq!(eval_number("-2 ^ 2").unwrap(), -4.0);
    assert_eq!(eval_number("2 ^ -1").unwrap(), 0.5);
}

#[test]
fn test_modulo_takes_sign_of_divisor() {
    assert_eq!(eval_number("7 % 3").unwrap(), 1.0);
    assert_eq!(eval_number("-7 % 3").unwrap(), 2.0);
    assert_eq!(eval_number("7 % -3").unwrap(), -2.0);
    assert_eq!(eval_number("5.5 % 2").unwrap(), 1.5);
}

#[test]
fn test_floor_division() {
    assert_eq!(eval_number("7 // 2").unwrap(), 3.0);
    assert_eq!(eval_number("-7 // 2").unwrap(), -4.0);
    assert_eq!(eval_number("7 / 2").unwrap(), 3.5);
}

#[test]
fn test_numeric_strings_coerce() {
    assert_eq!(eval_number(r#""10" + 1"#).unwrap(), 11.0);
    assert_eq!(eval_string(r#"1 .. "x""#).unwrap(), "1x");
    assert_eq!(eval_string("1 .. 2").unwrap(), "12");
}

#[test]
fn test_bitwise_operators() {
    assert_eq!(eval_number("5 & 3").unwrap(), 1.0);
    assert_eq!(eval_number("5 | 3").unwrap(), 7.0);
    assert_eq!(eval_number("5 ~ 3").unwrap(), 6.0);
    assert_eq!(eval_number("~0").unwrap(), -1.0);
    assert_eq!(eval_number("1 << 4").unwrap(), 16.0);
    assert_eq!(eval_number("256 >> 4").unwrap(), 16.0);
    assert_eq!(eval_number("1 << 64").unwrap(), 0.0);
}

#[test]
fn test_bitwise_needs_integers() {
    let message = expect_runtime_error("1.5 & 1").unwrap();
    assert!(message.ends_with("number has no integer representation"), "{message}");
    let message = expect_runtime_error("{} | 1").unwrap();
    assert!(message.contains("bitwise operation on a table value"), "{message}");
}

#[test]
fn test_comparisons() {
    assert!(eval_bool("1 < 2").unwrap());
    assert!(eval_bool("2 <= 2").unwrap());
    assert!(eval_bool(r#""a" < "b""#).unwrap());
    assert!(!eval_bool("1 == '1'").unwrap());
    assert!(eval_bool("1 ~= 2").unwrap());
}

#[test]
fn test_greater_than_matches_negated_less_equal() {
    for (a, b) in [(1, 2), (2, 2), (3, 2)] {
        let gt = eval_bool(&format!("{a} > {b}")).unwrap();
        let ge = eval_bool(&format!("{a} >= {b}")).unwrap();
        assert_eq!(gt, a > b, "{a} > {b}");
        assert_eq!(ge, a >= b, "{a} >= {b}");
    }
}

#[test]
fn test_mixed_comparison_fails() {
    let message = expect_runtime_error("1 < 'x'").unwrap();
    assert!(message.contains("attempt to compare number with string"), "{message}");
}

#[test]
fn test_short_circuit_returns_deciding_operand() {
    assert_eq!(eval_number("nil or 5").unwrap(), 5.0);
    assert_eq!(eval_number("3 or error('unreachable')").unwrap(), 3.0);
    assert!(!eval_bool("false and error('unreachable')").unwrap());
    assert_eq!(eval_string("1 and 'yes'").unwrap(), "yes");
    assert_eq!(eval_number("false or nil or 8").unwrap(), 8.0);
}

#[test]
fn test_not_and_truthiness() {
    assert!(eval_bool("not nil").unwrap());
    assert!(!eval_bool("not 0").unwrap());
    assert!(!eval_bool("not ''").unwrap());
}

#[test]
fn test_length_operator() {
    assert_eq!(eval_number("#'abc'").unwrap(), 3.0);
    assert_eq!(eval_number("#{1, 2, 3, nil}").unwrap(), 3.0);
    let message = expect_runtime_error("#5").unwrap();
    assert!(message.contains("attempt to get length of a number value"), "{message}");
}

#[test]
fn test_length_of_host_table_with_holes() {
    let script = Script::new();
    script
        .set_global("t", Value::table_from(vec![Value::Nil, Value::from(2)]))
        .unwrap();
    let result = script.do_string("t[1] = 5 return #t, t[1]").unwrap().into_values();
    assert!(result[0].raw_equals(&Value::from(2)));
    assert!(result[1].raw_equals(&Value::from(5)));
}

#[test]
fn test_missing_results_equal_nil() {
    assert!(eval_bool("(function() end)() == nil").unwrap());
    assert!(eval_bool("local function f() end local x = f() return x == nil").unwrap());
}

#[test]
fn test_arithmetic_error_names_operand() {
    let message = expect_runtime_error("local t = {} return 1 + t").unwrap();
    assert_eq!(message, "chunk:1: attempt to perform arithmetic on a table value");
    let message = expect_runtime_error("return {} .. 'x'").unwrap();
    assert_eq!(message, "chunk:1: attempt to concatenate a table value");
}
