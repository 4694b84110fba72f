//! The reified-effect protocol: `host` forms, dispatcher routing, error
//! reification, and effect ordering.

use std::{cell::RefCell, rc::Rc};

use jsl::{Budget, ErrorKind, RunProgress, Runtime, Value, host_error};
use serde_json::json;

fn eval_with(rt: &Runtime, program: serde_json::Value) -> Result<Value, jsl::Error> {
    let env = rt.new_env();
    let expr = Value::from_json(&program).unwrap();
    rt.evaluate(&expr, &env, Budget::unlimited()).map(|progress| match progress {
        RunProgress::Complete(value) => value,
        RunProgress::Paused(_) => unreachable!("unlimited budget"),
    })
}

// =============================================================================
// 1. The reification seed
// =============================================================================

#[test]
fn host_call_reaches_the_dispatcher_exactly_once() {
    let calls: Rc<RefCell<Vec<(String, Vec<Value>)>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&calls);

    let mut rt = Runtime::new();
    rt.register_host_command("log/info", move |args| {
        seen.borrow_mut().push(("log/info".to_string(), args.to_vec()));
        Ok(Value::str("ok"))
    });

    let result = eval_with(&rt, json!(["host", "@log/info", "@hi"])).unwrap();
    assert_eq!(result, Value::str("ok"));

    let calls = calls.borrow();
    assert_eq!(calls.len(), 1, "the dispatcher runs exactly once");
    assert_eq!(calls[0].0, "log/info");
    assert_eq!(calls[0].1, vec![Value::str("hi")]);
}

#[test]
fn host_arguments_are_evaluated_before_dispatch() {
    let mut rt = Runtime::new();
    rt.register_host_command("echo", |args| Ok(args.first().cloned().unwrap_or(Value::Null)));
    let result = eval_with(&rt, json!(["host", "@echo", ["+", 20, 22]])).unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn host_command_may_be_computed() {
    let mut rt = Runtime::new();
    rt.register_host_command("time/now", |_| Ok(Value::Int(1_234)));
    let result = eval_with(
        &rt,
        json!(["let", [["cmd", "@time/now"]], ["host", "cmd"]]),
    )
    .unwrap();
    assert_eq!(result, Value::Int(1_234));
}

// =============================================================================
// 2. Error reification
// =============================================================================

#[test]
fn unknown_command_raises_host_error() {
    let rt = Runtime::new();
    let err = eval_with(&rt, json!(["host", "@fs/read", "@/etc/passwd"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostError);
}

#[test]
fn error_shaped_response_raises_host_error() {
    let mut rt = Runtime::new();
    rt.register_host_command("net/get", |_| {
        Ok(host_error("Timeout", "upstream took too long", None))
    });
    let err = eval_with(&rt, json!(["host", "@net/get", "@http://x"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostError);
    assert_eq!(err.message(), "upstream took too long");
}

#[test]
fn try_catches_host_errors() {
    let rt = Runtime::new();
    let result = eval_with(
        &rt,
        json!(["try", ["host", "@nope"], ["lambda", ["e"], ["get", "e", "@type"]]]),
    )
    .unwrap();
    assert_eq!(result, Value::str("HostError"));
}

#[test]
fn non_string_command_is_a_type_error() {
    let rt = Runtime::new();
    let err = eval_with(&rt, json!(["host", 42])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

// =============================================================================
// 3. Effect ordering
// =============================================================================

#[test]
fn effects_run_in_program_order() {
    let log: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&log);

    let mut rt = Runtime::new();
    rt.register_host_command("emit", move |args| {
        if let Some(Value::Int(n)) = args.first() {
            seen.borrow_mut().push(*n);
        }
        Ok(Value::Null)
    });

    eval_with(
        &rt,
        json!(["do",
            ["host", "@emit", 1],
            ["if", false, ["host", "@emit", 99], ["host", "@emit", 2]],
            ["+", ["do", ["host", "@emit", 3], 0], ["do", ["host", "@emit", 4], 0]]]),
    )
    .unwrap();

    assert_eq!(*log.borrow(), vec![1, 2, 3, 4]);
}

#[test]
fn both_engines_dispatch_identically() {
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&log);

    let mut rt = Runtime::new();
    rt.register_host_command("ping", move |args| {
        seen.borrow_mut().push(format!("{:?}", args.first()));
        Ok(Value::str("pong"))
    });

    let program = json!(["host", "@ping", "@a"]);
    let expr = Value::from_json(&program).unwrap();

    let vm_result = rt
        .evaluate(&expr, &rt.new_env(), Budget::unlimited())
        .unwrap()
        .into_complete()
        .unwrap();
    let mut budget = Budget::unlimited();
    let tree_result = rt.eval_tree(&expr, &rt.new_env(), &mut budget).unwrap();

    assert_eq!(vm_result, tree_result);
    assert_eq!(log.borrow().len(), 2);
}
