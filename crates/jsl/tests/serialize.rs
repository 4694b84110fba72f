//! Content-addressable serialization: round trips, sharing, and prelude
//! re-binding.

use jsl::{Budget, Runtime, Value, serialize};
use serde_json::json;

fn run(rt: &Runtime, program: serde_json::Value) -> Value {
    let env = rt.new_env();
    let expr = Value::from_json(&program).unwrap();
    rt.evaluate(&expr, &env, Budget::unlimited())
        .unwrap()
        .into_complete()
        .expect("unlimited budget never pauses")
}

// =============================================================================
// 1. Law 3: round trips
// =============================================================================

#[test]
fn plain_values_serialize_as_direct_json() {
    let rt = Runtime::new();
    for program in [
        json!(null),
        json!(["+", 1, 2]),
        json!(["list", 1, "@two", 2.5, ["@", [true, {}]]]),
        json!({"@nested": {"@deep": ["list", 1, 2]}}),
    ] {
        let value = run(&rt, program);
        let doc = serialize(&value).unwrap();
        // No wrapper for closure-free values.
        assert!(doc.get("__cas_version__").is_none());
        let back = rt.deserialize(&doc).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn closures_serialize_through_the_cas_wrapper() {
    let rt = Runtime::new();
    let value = run(&rt, json!(["lambda", ["x"], ["+", "x", 1]]));
    let doc = serialize(&value).unwrap();
    assert_eq!(doc.get("__cas_version__").and_then(serde_json::Value::as_u64), Some(1));
    assert!(doc.get("objects").unwrap().as_object().unwrap().len() >= 2);
}

#[test]
fn recursive_closure_survives_serialization_seed() {
    // Evaluate, serialize, deserialize into a *fresh* runtime, apply.
    let rt = Runtime::new();
    let inc = run(
        &rt,
        json!(["do", ["def", "inc", ["lambda", ["x"], ["+", "x", 1]]], "inc"]),
    );
    let doc = serialize(&inc).unwrap();
    let text = serde_json::to_string(&doc).unwrap();

    let fresh = Runtime::new();
    let restored = fresh.deserialize(&serde_json::from_str(&text).unwrap()).unwrap();
    let env = fresh.new_env();
    env.define("f", restored).unwrap();
    let result = run_in(&fresh, &env, json!(["f", 41]));
    assert_eq!(result, Value::Int(42));
}

#[test]
fn self_referential_closure_round_trips() {
    // `fact` refers to itself through its captured environment: the value
    // graph has a cycle that hash references must represent.
    let rt = Runtime::new();
    let fact = run(
        &rt,
        json!(["do",
            ["def", "fact", ["lambda", ["n"],
                ["if", ["<=", "n", 1], 1, ["*", "n", ["fact", ["-", "n", 1]]]]]],
            "fact"]),
    );
    let doc = serialize(&fact).unwrap();

    let fresh = Runtime::new();
    let restored = fresh.deserialize(&doc).unwrap();
    let env = fresh.new_env();
    env.define("fact", restored).unwrap();
    assert_eq!(run_in(&fresh, &env, json!(["fact", 5])), Value::Int(120));
}

fn run_in(rt: &Runtime, env: &std::rc::Rc<jsl::Env>, program: serde_json::Value) -> Value {
    let expr = Value::from_json(&program).unwrap();
    rt.evaluate(&expr, env, Budget::unlimited())
        .unwrap()
        .into_complete()
        .unwrap()
}

#[test]
fn captured_environment_values_survive() {
    let rt = Runtime::new();
    let closure = run(
        &rt,
        json!(["let", [["base", 100]], ["lambda", ["x"], ["+", "x", "base"]]]),
    );
    let doc = serialize(&closure).unwrap();

    let fresh = Runtime::new();
    let restored = fresh.deserialize(&doc).unwrap();
    let env = fresh.new_env();
    env.define("f", restored).unwrap();
    assert_eq!(run_in(&fresh, &env, json!(["f", 1])), Value::Int(101));
}

// =============================================================================
// 2. Sharing and determinism
// =============================================================================

#[test]
fn identical_subgraphs_share_storage() {
    let rt = Runtime::new();
    // The same closure value twice in one list: one stored object.
    let value = run(
        &rt,
        json!(["let", [["f", ["lambda", ["x"], "x"]]], ["list", "f", "f"]]),
    );
    let doc = serialize(&value).unwrap();
    let objects = doc.get("objects").unwrap().as_object().unwrap();
    let closure_count = objects
        .values()
        .filter(|o| o.get("__type__").and_then(serde_json::Value::as_str) == Some("closure"))
        .count();
    assert_eq!(closure_count, 1);

    let root = doc.get("root").unwrap().as_array().unwrap();
    assert_eq!(root[0], root[1], "both elements are the same reference");
}

#[test]
fn serialization_is_deterministic() {
    let make = || {
        let rt = Runtime::new();
        let value = run(
            &rt,
            json!(["let", [["k", 7]], ["lambda", ["x"], ["+", "x", "k"]]]),
        );
        serde_json::to_string(&serialize(&value).unwrap()).unwrap()
    };
    assert_eq!(make(), make());
}

// =============================================================================
// 3. Prelude non-serialization
// =============================================================================

#[test]
fn prelude_references_are_not_emitted() {
    let rt = Runtime::new();
    let closure = run(&rt, json!(["lambda", ["x"], ["+", "x", 1]]));
    let doc = serialize(&closure).unwrap();
    let objects = doc.get("objects").unwrap().as_object().unwrap();
    // No environment record carries the prelude's dozens of bindings.
    for object in objects.values() {
        if object.get("__type__").and_then(serde_json::Value::as_str) == Some("env") {
            let bindings = object.get("bindings").unwrap().as_object().unwrap();
            assert!(bindings.len() < 10, "prelude leaked into the document");
        }
    }
}

#[test]
fn builtins_are_rebound_by_name() {
    let rt = Runtime::new();
    // A builtin bound into user data serializes as a name marker.
    let value = run(&rt, json!(["let", [["f", "map"]], ["list", "f"]]));
    let doc = serialize(&value).unwrap();
    let fresh = Runtime::new();
    let restored = fresh.deserialize(&doc).unwrap();
    let f = restored.as_list().unwrap()[0].clone();
    let env = fresh.new_env();
    env.define("m", f).unwrap();
    let result = run_in(&fresh, &env, json!(["m", ["lambda", ["x"], ["*", "x", 2]], ["@", [1, 2]]]));
    assert_eq!(result, run_in(&fresh, &fresh.new_env(), json!(["list", 2, 4])));
}

#[test]
fn unknown_cas_version_is_rejected() {
    let rt = Runtime::new();
    let doc = json!({"__cas_version__": 99, "root": null, "objects": {}});
    assert!(rt.deserialize(&doc).is_err());
}
