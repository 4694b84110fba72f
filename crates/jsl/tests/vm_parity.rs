//! Engine parity and compiler round-trip laws.
//!
//! Law 1: for every well-formed expression and a sufficient budget, the
//! tree oracle and the compiled VM agree. Law 2: `decompile(compile(e))`
//! is structurally `e`, up to the documented canonicalizations (`quote`
//! becomes `"@"`, `do` bodies flatten).

use jsl::{
    Budget, Runtime, Value,
    bytecode::{Code, compile, decompile},
};
use serde_json::json;

/// A corpus of programs exercising every special form and operator family.
fn corpus() -> Vec<serde_json::Value> {
    vec![
        json!(null),
        json!(true),
        json!(17),
        json!(2.5),
        json!("@literal"),
        json!([]),
        json!(["+", 1, 2, 3]),
        json!(["*", ["-", 10, 4], ["/", 9, 3]]),
        json!(["<", 1, 2, 3]),
        json!({"@k": ["+", 1, 1], "@nested": {"@x": "@y"}}),
        json!(["if", ["<", 1, 2], "@yes", "@no"]),
        json!(["do", 1, 2, ["+", 1, 2]]),
        json!(["let", [["a", 1], ["b", ["+", "a", 1]]], ["*", "a", "b"]]),
        json!(["do", ["def", "x", 5], ["+", "x", 2]]),
        json!(["@", ["+", 1, 2]]),
        json!([["lambda", ["x", "y"], ["+", "x", "y"]], 3, 4]),
        json!(["let",
            [["fact", ["lambda", ["n"],
                ["if", ["<=", "n", 1], 1, ["*", "n", ["fact", ["-", "n", 1]]]]]]],
            ["fact", 6]]),
        json!(["try", ["/", 1, 0], ["lambda", ["e"], ["get", "e", "@type"]]]),
        json!(["try", 42, ["lambda", ["e"], "@unreached"]]),
        json!(["where", ["@", [{"@n": 1}, {"@n": 5}]], [">", "n", 2]]),
        json!(["transform", ["@", [{"@a": 1, "@b": 2}]], ["pick", "@a"]]),
        json!(["map", ["lambda", ["x"], ["*", "x", 2]], ["@", [1, 2, 3]]]),
        json!(["reduce", ["lambda", ["acc", "x"], ["+", "acc", "x"]], 0, ["@", [1, 2, 3]]]),
        json!(["sort-by", ["list", {"@n": 3}, {"@n": 1}], "@n"]),
        json!(["get-path", {"@a": ["list", 1, 2]}, "@a.1"]),
        json!(["str-replace", "@a1b2", "@[0-9]", "@."]),
    ]
}

// =============================================================================
// 1. Law 1: evaluator equivalence
// =============================================================================

#[test]
fn tree_and_vm_agree_on_the_corpus() {
    for program in corpus() {
        let expr = Value::from_json(&program).unwrap();

        let rt = Runtime::new();
        let vm_result = rt
            .evaluate(&expr, &rt.new_env(), Budget::unlimited())
            .unwrap()
            .into_complete()
            .expect("unlimited budget never pauses");

        let rt = Runtime::new();
        let mut budget = Budget::unlimited();
        let tree_result = rt.eval_tree(&expr, &rt.new_env(), &mut budget).unwrap();

        assert_eq!(vm_result, tree_result, "engines disagree on {program}");
    }
}

#[test]
fn engines_agree_on_error_kinds() {
    for program in [
        json!("missing"),
        json!(["/", 1, 0]),
        json!(["sqrt", -1]),
        json!(["cons", 1]),
        json!([["lambda", ["x"], "x"], 1, 2]),
        json!(["get-path", {}, "@a.b"]),
    ] {
        let expr = Value::from_json(&program).unwrap();

        let rt = Runtime::new();
        let vm_err = rt.evaluate(&expr, &rt.new_env(), Budget::unlimited()).unwrap_err();

        let rt = Runtime::new();
        let mut budget = Budget::unlimited();
        let tree_err = rt.eval_tree(&expr, &rt.new_env(), &mut budget).unwrap_err();

        assert_eq!(vm_err.kind(), tree_err.kind(), "engines disagree on {program}");
    }
}

// =============================================================================
// 2. Law 2: compile/decompile round trip
// =============================================================================

#[test]
fn decompile_inverts_compile_on_the_corpus() {
    for program in corpus() {
        let expr = Value::from_json(&program).unwrap();
        let code = compile(&expr).unwrap();
        let back = decompile(&code).unwrap();
        assert_eq!(back, expr, "round trip changed {program}");
    }
}

#[test]
fn quote_canonicalizes_to_the_sigil_form() {
    let expr = Value::from_json(&json!(["quote", ["+", 1, 2]])).unwrap();
    let back = decompile(&compile(&expr).unwrap()).unwrap();
    assert_eq!(back, Value::from_json(&json!(["@", ["+", 1, 2]])).unwrap());
}

#[test]
fn do_bodies_flatten() {
    let expr = Value::from_json(&json!(["do", 1, ["do", 2, 3]])).unwrap();
    let back = decompile(&compile(&expr).unwrap()).unwrap();
    assert_eq!(back, Value::from_json(&json!(["do", 1, 2, 3])).unwrap());
}

// =============================================================================
// 3. Bytecode wire form
// =============================================================================

#[test]
fn code_json_round_trips_on_the_corpus() {
    for program in corpus() {
        let expr = Value::from_json(&program).unwrap();
        let code = compile(&expr).unwrap();
        let wire = code.to_json().unwrap();
        assert!(wire.is_array(), "JPN must be a flat JSON array");
        let decoded = Code::from_json(&wire).unwrap();
        assert_eq!(decoded, code, "wire round trip changed {program}");
    }
}

#[test]
fn decoded_bytecode_runs_identically() {
    // Full pipeline: compile → encode → decode → decompile → evaluate.
    let program = json!(["let",
        [["square", ["lambda", ["x"], ["*", "x", "x"]]]],
        ["map", "square", ["@", [1, 2, 3]]]]);
    let expr = Value::from_json(&program).unwrap();
    let wire = compile(&expr).unwrap().to_json().unwrap();
    let restored = decompile(&Code::from_json(&wire).unwrap()).unwrap();

    let rt = Runtime::new();
    let result = rt
        .evaluate(&restored, &rt.new_env(), Budget::unlimited())
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(
        result,
        Value::list(vec![Value::Int(1), Value::Int(4), Value::Int(9)])
    );
}

// =============================================================================
// 4. Law 9: determinism
// =============================================================================

#[test]
fn two_runs_produce_identical_results() {
    for program in corpus() {
        let expr = Value::from_json(&program).unwrap();
        let run = || {
            let rt = Runtime::new();
            rt.evaluate(&expr, &rt.new_env(), Budget::unlimited())
                .unwrap()
                .into_complete()
                .unwrap()
        };
        assert_eq!(run(), run(), "nondeterministic result for {program}");
    }
}
