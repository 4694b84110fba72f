//! Core evaluation semantics on the canonical (VM) engine.
//!
//! Dispatch rules, the sigil convention, object literals, and the special
//! forms. The parity suite separately checks that the tree oracle agrees
//! on all of these programs.

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
// 1. Self-evaluating forms and the sigil convention
// =============================================================================

#[test]
fn scalars_evaluate_to_themselves() {
    assert_eq!(run(json!(null)), Value::Null);
    assert_eq!(run(json!(true)), Value::Bool(true));
    assert_eq!(run(json!(42)), Value::Int(42));
    assert_eq!(run(json!(2.5)), Value::Float(2.5));
}

#[test]
fn at_prefix_is_a_string_literal() {
    assert_eq!(run(json!("@hello")), Value::str("hello"));
    // A double marker yields a single leading @.
    assert_eq!(run(json!("@@hello")), Value::str("@hello"));
}

#[test]
fn bare_string_is_a_variable_reference() {
    let err = run_err(json!("no-such-name"));
    assert_eq!(err.kind(), ErrorKind::SymbolNotFound);
}

#[test]
fn empty_list_evaluates_to_itself() {
    assert_eq!(run(json!([])), Value::empty_list());
}

// =============================================================================
// 2. Objects are data
// =============================================================================

#[test]
fn object_values_are_evaluated() {
    let result = run(json!({"@sum": ["+", 1, 2]}));
    let map = result.as_object().unwrap();
    assert_eq!(map.get("sum"), Some(&Value::Int(3)));
}

#[test]
fn object_keys_may_be_computed() {
    // The bare key is a variable reference that must yield a string.
    let result = run(json!(["let", [["k", "@name"]], {"k": 1}]));
    assert_eq!(result.as_object().unwrap().get("name"), Some(&Value::Int(1)));
}

#[test]
fn non_string_computed_key_is_a_type_error() {
    let err = run_err(json!(["let", [["k", 3]], {"k": 1}]));
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn objects_are_never_applications() {
    // An object whose first value is callable is still just data.
    let result = run(json!({"@f": ["lambda", ["x"], "x"]}));
    assert!(result.as_object().unwrap().get("f").unwrap().is_callable());
}

// =============================================================================
// 3. def / lambda / closures
// =============================================================================

#[test]
fn def_binds_and_returns_the_value() {
    assert_eq!(run(json!(["do", ["def", "x", 7], ["+", "x", 1]])), Value::Int(8));
    assert_eq!(run(json!(["def", "y", 3])), Value::Int(3));
}

#[test]
fn lambda_captures_its_environment() {
    let result = run(json!([
        "let", [["n", 10]],
        ["do",
            ["def", "add-n", ["lambda", ["x"], ["+", "x", "n"]]],
            ["add-n", 5]]
    ]));
    assert_eq!(result, Value::Int(15));
}

#[test]
fn closure_arity_is_checked() {
    let err = run_err(json!(["do", ["def", "f", ["lambda", ["x"], "x"]], ["f", 1, 2]]));
    assert_eq!(err.kind(), ErrorKind::ArityError);
}

#[test]
fn factorial_seed() {
    let result = run(json!([
        "let",
        [["fact", ["lambda", ["n"],
            ["if", ["<=", "n", 1], 1, ["*", "n", ["fact", ["-", "n", 1]]]]]]],
        ["fact", 5]
    ]));
    assert_eq!(result, Value::Int(120));
}

#[test]
fn applying_a_non_callable_is_a_type_error() {
    let err = run_err(json!([["+", 1, 2], 3]));
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

// =============================================================================
// 4. if / do / let / quote
// =============================================================================

#[test]
fn if_evaluates_exactly_one_branch() {
    // The dead branch would raise if evaluated.
    assert_eq!(run(json!(["if", true, 1, ["error", "@Boom", "@no"]])), Value::Int(1));
    assert_eq!(run(json!(["if", false, ["error", "@Boom", "@no"], 2])), Value::Int(2));
}

#[test]
fn truthiness_table() {
    for falsy in [json!(false), json!(null), json!(0), json!("@"), json!(["@", []]), json!({})] {
        assert_eq!(run(json!(["if", falsy, 1, 2])), Value::Int(2), "{falsy} should be falsy");
    }
    for truthy in [json!(true), json!(1), json!(-1), json!("@x"), json!(["@", [0]])] {
        assert_eq!(run(json!(["if", truthy, 1, 2])), Value::Int(1), "{truthy} should be truthy");
    }
}

#[test]
fn do_returns_the_last_result() {
    assert_eq!(run(json!(["do", 1, 2, 3])), Value::Int(3));
    assert_eq!(run(json!(["do"])), Value::Null);
}

#[test]
fn let_bindings_accumulate_left_to_right() {
    let result = run(json!(["let", [["a", 1], ["b", ["+", "a", 1]]], ["+", "a", "b"]]));
    assert_eq!(result, Value::Int(3));
}

#[test]
fn let_rejects_the_flat_binding_shape() {
    let err = run_err(json!(["let", ["a", 1], "a"]));
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn let_scope_does_not_leak() {
    let err = run_err(json!(["do", ["let", [["inner", 1]], "inner"], "inner"]));
    assert_eq!(err.kind(), ErrorKind::SymbolNotFound);
}

#[test]
fn quote_returns_the_expression_unevaluated() {
    let quoted = run(json!(["quote", ["+", 1, 2]]));
    assert_eq!(
        quoted,
        Value::list(vec![Value::str("+"), Value::Int(1), Value::Int(2)])
    );
    assert_eq!(run(json!(["@", ["+", 1, 2]])), quoted);
}

#[test]
fn shadowing_resolves_to_the_nearest_scope() {
    let result = run(json!([
        "let", [["x", 1]],
        ["let", [["x", 2]], "x"]
    ]));
    assert_eq!(result, Value::Int(2));
}

// =============================================================================
// 5. Recursive definitions stay acyclic in the parent chain
// =============================================================================

#[test]
fn def_makes_self_reference_work() {
    let result = run(json!([
        "do",
        ["def", "even?", ["lambda", ["n"], ["if", ["=", "n", 0], true, ["odd?", ["-", "n", 1]]]]],
        ["def", "odd?", ["lambda", ["n"], ["if", ["=", "n", 0], false, ["even?", ["-", "n", 1]]]]],
        ["even?", 10]
    ]));
    assert_eq!(result, Value::Bool(true));
}
