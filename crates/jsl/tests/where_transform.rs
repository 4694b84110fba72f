//! The data-directed forms: `where` filtering with implicit item bindings
//! and the `transform` descriptor pipeline.

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
// 1. where
// =============================================================================

#[test]
fn where_auto_binding_seed() {
    // Quoted rows: the data-directed literal convention strips the sigils.
    let result = run(json!([
        "where",
        ["@", [{"@age": 30, "@role": "@admin"}, {"@age": 20, "@role": "@user"}]],
        ["and", [">", "age", 25], ["=", "role", "@admin"]]
    ]));
    assert_eq!(result, run(json!(["list", {"@age": 30, "@role": "@admin"}])));
}

#[test]
fn where_preserves_input_order() {
    let result = run(json!([
        "where",
        ["@", [{"@n": 5}, {"@n": 1}, {"@n": 4}, {"@n": 2}]],
        [">", "n", 1]
    ]));
    assert_eq!(result, run(json!(["list", {"@n": 5}, {"@n": 4}, {"@n": 2}])));
}

#[test]
fn where_binds_it_for_non_object_items() {
    let result = run(json!(["where", ["@", [1, 5, 2, 8]], [">", "it", 3]]));
    assert_eq!(result, run(json!(["list", 5, 8])));
}

#[test]
fn where_condition_sees_enclosing_bindings() {
    let result = run(json!([
        "let", [["threshold", 3]],
        ["where", ["@", [1, 5, 2, 8]], [">", "it", "threshold"]]
    ]));
    assert_eq!(result, run(json!(["list", 5, 8])));
}

#[test]
fn where_on_non_list_is_a_type_error() {
    assert_eq!(run_err(json!(["where", 42, true])).kind(), ErrorKind::TypeError);
}

#[test]
fn where_accepts_computed_collections() {
    let result = run(json!([
        "where",
        ["map", ["lambda", ["x"], ["*", "x", "x"]], ["@", [1, 2, 3, 4]]],
        [">", "it", 5]
    ]));
    assert_eq!(result, run(json!(["list", 9, 16])));
}

// =============================================================================
// 2. transform
// =============================================================================

#[test]
fn transform_pipeline_seed() {
    let result = run(json!([
        "transform",
        ["@", [{"@name": "@a", "@price": 100}]],
        ["assign", "@discounted", ["*", "price", 0.9]],
        ["pick", "@name", "@discounted"]
    ]));
    assert_eq!(
        result,
        run(json!(["list", {"@name": "@a", "@discounted": 90.0}]))
    );
}

#[test]
fn transform_applies_once_to_a_single_object() {
    let result = run(json!([
        "transform",
        {"@a": 1, "@b": 2},
        ["omit", "@b"]
    ]));
    assert_eq!(result, run(json!({"@a": 1})));
}

#[test]
fn later_ops_see_fields_from_earlier_ops() {
    let result = run(json!([
        "transform",
        {"@n": 2},
        ["assign", "@double", ["*", "n", 2]],
        ["assign", "@quad", ["*", "double", 2]]
    ]));
    assert_eq!(result, run(json!({"@n": 2, "@double": 4, "@quad": 8})));
}

#[test]
fn rename_missing_key_is_a_no_op() {
    let result = run(json!(["transform", {"@a": 1}, ["rename", "@zz", "@b"]]));
    assert_eq!(result, run(json!({"@a": 1})));
    let renamed = run(json!(["transform", {"@a": 1}, ["rename", "@a", "@b"]]));
    assert_eq!(renamed, run(json!({"@b": 1})));
}

#[test]
fn default_sets_only_when_absent() {
    assert_eq!(
        run(json!(["transform", {"@a": 1}, ["default", "@a", 9]])),
        run(json!({"@a": 1}))
    );
    assert_eq!(
        run(json!(["transform", {"@a": 1}, ["default", "@b", 9]])),
        run(json!({"@a": 1, "@b": 9}))
    );
}

#[test]
fn update_applies_a_closure_to_the_field() {
    let result = run(json!([
        "transform",
        {"@n": 10},
        ["update", "@n", ["lambda", ["x"], ["+", "x", 1]]]
    ]));
    assert_eq!(result, run(json!({"@n": 11})));
}

#[test]
fn transform_of_non_object_item_is_an_error() {
    assert_eq!(
        run_err(json!(["transform", ["@", [1]], ["pick", "@a"]])).kind(),
        ErrorKind::TypeError
    );
    assert_eq!(
        run_err(json!(["transform", 42, ["pick", "@a"]])).kind(),
        ErrorKind::TypeError
    );
}

#[test]
fn descriptors_are_opaque_outside_transform() {
    // A descriptor is a value; only `transform` interprets it.
    let desc = run(json!(["pick", "@a"]));
    assert!(desc.is_descriptor());
    assert!(!desc.is_callable());
}

// =============================================================================
// 3. Idempotence laws
// =============================================================================

#[test]
fn pick_of_all_keys_is_identity() {
    let result = run(json!(["transform", {"@a": 1, "@b": 2}, ["pick", "@a", "@b"]]));
    assert_eq!(result, run(json!({"@a": 1, "@b": 2})));
}

#[test]
fn omit_of_nothing_is_identity() {
    let result = run(json!(["transform", {"@a": 1, "@b": 2}, ["omit"]]));
    assert_eq!(result, run(json!({"@a": 1, "@b": 2})));
}
