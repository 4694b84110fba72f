//! The error taxonomy, `try` recovery, and prelude immutability.

use jsl::{Budget, ErrorKind, Runtime, Value};
use serde_json::json;

fn run(program: serde_json::Value) -> Value {
    let rt = Runtime::new();
    let env = rt.new_env();
    let expr = Value::from_json(&program).unwrap();
    rt.evaluate(&expr, &env, Budget::unlimited())
        .unwrap()
        .into_complete()
        .expect("unlimited budget never pauses")
}

fn run_err(program: serde_json::Value) -> jsl::Error {
    let rt = Runtime::new();
    let env = rt.new_env();
    let expr = Value::from_json(&program).unwrap();
    rt.evaluate(&expr, &env, Budget::unlimited()).unwrap_err()
}

// =============================================================================
// 1. Taxonomy
// =============================================================================

#[test]
fn each_kind_has_a_trigger() {
    assert_eq!(run_err(json!("ghost")).kind(), ErrorKind::SymbolNotFound);
    assert_eq!(run_err(json!(["length", 5])).kind(), ErrorKind::TypeError);
    assert_eq!(run_err(json!(["not"])).kind(), ErrorKind::ArityError);
    assert_eq!(run_err(json!(["%", 5, 0])).kind(), ErrorKind::DivisionByZero);
    assert_eq!(run_err(json!(["sqrt", -4])).kind(), ErrorKind::DomainError);
    assert_eq!(run_err(json!(["get-path", {}, "@a"])).kind(), ErrorKind::PathError);
    assert_eq!(run_err(json!(["host", "@none"])).kind(), ErrorKind::HostError);
    assert_eq!(run_err(json!(["error", "@Oops", "@m"])).kind(), ErrorKind::UserError);
}

#[test]
fn errors_carry_messages() {
    let err = run_err(json!("ghost"));
    assert!(err.message().contains("ghost"));
    let err = run_err(json!(["cons", 1]));
    assert!(err.message().contains("cons"));
}

// =============================================================================
// 2. try and the handler record
// =============================================================================

#[test]
fn handler_receives_the_error_record() {
    let record = run(json!(["try", ["/", 1, 0], ["lambda", ["e"], "e"]]));
    let map = record.as_object().unwrap();
    assert_eq!(map.get("type"), Some(&Value::str("DivisionByZero")));
    assert!(map.get("message").unwrap().as_str().is_some());
    assert!(map.contains_key("details"));
}

#[test]
fn user_error_tag_survives_into_the_record() {
    let record = run(json!([
        "try",
        ["error", "@PaymentDeclined", "@card expired", {"@code": 51}],
        ["lambda", ["e"], "e"]
    ]));
    let map = record.as_object().unwrap();
    assert_eq!(map.get("type"), Some(&Value::str("PaymentDeclined")));
    assert_eq!(map.get("message"), Some(&Value::str("card expired")));
    let details = map.get("details").unwrap().as_object().unwrap();
    assert_eq!(details.get("code"), Some(&Value::Int(51)));
}

#[test]
fn try_returns_the_body_value_when_nothing_raises() {
    assert_eq!(run(json!(["try", 7, ["lambda", ["e"], 0]])), Value::Int(7));
}

#[test]
fn errors_unwind_through_call_frames_to_the_nearest_try() {
    let result = run(json!([
        "do",
        ["def", "inner", ["lambda", [], ["error", "@Boom", "@deep"]]],
        ["def", "outer", ["lambda", [], ["inner"]]],
        ["try", ["outer"], ["lambda", ["e"], ["get", "e", "@message"]]]
    ]));
    assert_eq!(result, Value::str("deep"));
}

#[test]
fn nested_try_catches_at_the_innermost_handler() {
    let result = run(json!([
        "try",
        ["try", ["error", "@X", "@inner"], ["lambda", ["e"], "@caught-inner"]],
        ["lambda", ["e"], "@caught-outer"]
    ]));
    assert_eq!(result, Value::str("caught-inner"));
}

#[test]
fn handler_errors_propagate_outward() {
    let err = run_err(json!(["try", ["/", 1, 0], ["lambda", ["e"], ["error", "@Again", "@h"]]]));
    assert_eq!(err.kind(), ErrorKind::UserError);
    assert_eq!(err.message(), "h");
}

#[test]
fn an_uncaught_error_surfaces_structurally() {
    let err = run_err(json!(["do", 1, ["error", "@Late", "@m", ["list", 1]]]));
    assert_eq!(err.kind(), ErrorKind::UserError);
    assert_eq!(err.details(), Some(&Value::list(vec![Value::Int(1)])));
}

// =============================================================================
// 3. Prelude immutability
// =============================================================================

#[test]
fn def_into_the_frozen_prelude_raises() {
    let rt = Runtime::new();
    let expr = Value::from_json(&json!(["def", "map", 1])).unwrap();
    let err = rt
        .evaluate(&expr, rt.prelude(), Budget::unlimited())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutablePrelude);
}

#[test]
fn shadowing_prelude_names_in_a_child_scope_is_fine() {
    // Shadowing is not mutation: the prelude binding is untouched.
    let result = run(json!(["let", [["+", ["lambda", ["a", "b"], 99]]], ["+", 1, 2]]));
    assert_eq!(result, Value::Int(99));
}

#[test]
fn prelude_is_shared_but_unchanged_across_evaluations() {
    let rt = Runtime::new();
    let env_a = rt.new_env();
    let expr = Value::from_json(&json!(["def", "map", 1])).unwrap();
    rt.evaluate(&expr, &env_a, Budget::unlimited()).unwrap();
    // A sibling environment still sees the builtin.
    let env_b = rt.new_env();
    let probe = Value::from_json(&json!(["map", ["lambda", ["x"], "x"], ["@", [1]]])).unwrap();
    let result = rt
        .evaluate(&probe, &env_b, Budget::unlimited())
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(result, Value::list(vec![Value::Int(1)]));
}

// =============================================================================
// 4. Recovery policy
// =============================================================================

#[test]
fn resource_exhaustion_is_not_catchable() {
    let rt = Runtime::new();
    let program = json!([
        "do",
        ["def", "spin", ["lambda", ["n"], ["spin", ["+", "n", 1]]]],
        ["try", ["spin", 0], ["lambda", ["e"], "@caught"]]
    ]);
    let expr = Value::from_json(&program).unwrap();
    let err = rt
        .evaluate(&expr, &rt.new_env(), Budget::unlimited().max_depth(16))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}
