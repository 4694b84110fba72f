//! Gas metering, pause, resume, and paused-state transport.
//!
//! Gas and step exhaustion are not errors: the machine yields a resumable
//! snapshot, and any partition of the gas into initial and resumed slices
//! produces the same final value as a continuous run.

use jsl::{Budget, ErrorKind, RunProgress, Runtime, Value};
use serde_json::json;

/// Recursive sum 1..=n, the pause/resume seed program.
fn sum_to(n: i64) -> serde_json::Value {
    json!([
        "let",
        [["sum-to", ["lambda", ["n"],
            ["if", ["<=", "n", 0], 0, ["+", "n", ["sum-to", ["-", "n", 1]]]]]]],
        ["sum-to", n]
    ])
}

/// Drives an evaluation to completion, topping up `refill` gas at every
/// pause. Returns the value and the number of pauses taken.
fn run_with_refills(rt: &Runtime, program: &serde_json::Value, initial: i64, refill: i64) -> (Value, usize) {
    let expr = Value::from_json(program).unwrap();
    let env = rt.new_env();
    let budget = Budget::with_gas(initial).max_depth(4096);
    let mut pauses = 0;
    let mut progress = rt.evaluate(&expr, &env, budget).unwrap();
    loop {
        match progress {
            RunProgress::Complete(value) => return (value, pauses),
            RunProgress::Paused(mut paused) => {
                pauses += 1;
                assert!(pauses < 100_000, "refill loop diverged");
                paused.add_gas(refill);
                progress = paused.resume(rt).unwrap();
            }
        }
    }
}

// =============================================================================
// 1. The pause/resume seed
// =============================================================================

#[test]
fn sum_to_1000_pauses_then_completes() {
    let rt = Runtime::new();
    // Roughly half the needed gas: the machine must pause at least once.
    let (value, pauses) = run_with_refills(&rt, &sum_to(1000), 20_000, 20_000);
    assert_eq!(value, Value::Int(500_500));
    assert!(pauses >= 1, "budget was sized to force a pause");
}

#[test]
fn paused_result_matches_continuous_run() {
    let rt = Runtime::new();
    let expr = Value::from_json(&sum_to(100)).unwrap();
    let continuous = rt
        .evaluate(&expr, &rt.new_env(), Budget::unlimited())
        .unwrap()
        .into_complete()
        .unwrap();

    // Several partitions of the gas, from starvation to near-sufficiency.
    for (initial, refill) in [(10, 10), (100, 100), (500, 1000), (3000, 3000)] {
        let (value, _) = run_with_refills(&rt, &sum_to(100), initial, refill);
        assert_eq!(value, continuous, "partition ({initial}, {refill}) diverged");
    }
}

#[test]
fn gas_accounting_is_visible_on_the_paused_state() {
    let rt = Runtime::new();
    let expr = Value::from_json(&sum_to(1000)).unwrap();
    let paused = rt
        .evaluate(&expr, &rt.new_env(), Budget::with_gas(50).max_depth(4096))
        .unwrap()
        .into_paused()
        .expect("tiny budget must pause");
    assert!(paused.budget().gas_used() >= 50);
    assert!(paused.budget().steps_used() > 0);
}

#[test]
fn step_limits_also_pause() {
    let rt = Runtime::new();
    let expr = Value::from_json(&sum_to(50)).unwrap();
    let budget = Budget::unlimited().max_steps(20);
    let progress = rt.evaluate(&expr, &rt.new_env(), budget).unwrap();
    let mut paused = progress.into_paused().expect("step cap must pause");
    paused.add_steps(1_000_000);
    let value = paused.resume(&rt).unwrap().into_complete().unwrap();
    assert_eq!(value, Value::Int(1275));
}

// =============================================================================
// 2. Paused-state transport
// =============================================================================

#[test]
fn paused_state_round_trips_through_json() {
    let rt = Runtime::new();
    let expr = Value::from_json(&sum_to(200)).unwrap();
    let mut progress = rt
        .evaluate(&expr, &rt.new_env(), Budget::with_gas(500).max_depth(4096))
        .unwrap();

    // Hop the computation through its serialized form at every pause, into
    // a fresh runtime each time, as a cross-host migration would.
    let mut hops = 0;
    loop {
        match progress {
            RunProgress::Complete(value) => {
                assert_eq!(value, Value::Int(20_100));
                assert!(hops >= 1, "budget was sized to force a hop");
                return;
            }
            RunProgress::Paused(paused) => {
                hops += 1;
                assert!(hops < 10_000, "hop loop diverged");
                let doc = paused.dump().unwrap();
                // The document is self-contained JSON.
                let text = serde_json::to_string(&doc).unwrap();
                let reparsed: serde_json::Value = serde_json::from_str(&text).unwrap();

                let other_rt = Runtime::new();
                let mut restored = other_rt.load_paused(&reparsed).unwrap();
                restored.add_gas(2_000);
                progress = restored.resume(&other_rt).unwrap();
            }
        }
    }
}

#[test]
fn paused_dump_is_marked() {
    let rt = Runtime::new();
    let expr = Value::from_json(&sum_to(100)).unwrap();
    let paused = rt
        .evaluate(&expr, &rt.new_env(), Budget::with_gas(30).max_depth(4096))
        .unwrap()
        .into_paused()
        .unwrap();
    let doc = paused.dump().unwrap();
    assert_eq!(doc.get("__jsl_paused__").and_then(serde_json::Value::as_u64), Some(1));
    assert!(doc.get("machine").is_some());
    assert!(doc.get("budget").is_some());
}

// =============================================================================
// 3. Terminal limits
// =============================================================================

#[test]
fn depth_cap_is_terminal_and_uncatchable() {
    let rt = Runtime::new();
    // Unbounded recursion under a small depth cap.
    let program = json!([
        "do",
        ["def", "loop", ["lambda", ["n"], ["loop", ["+", "n", 1]]]],
        ["try", ["loop", 0], ["lambda", ["e"], "@caught"]]
    ]);
    let expr = Value::from_json(&program).unwrap();
    let err = rt
        .evaluate(&expr, &rt.new_env(), Budget::unlimited().max_depth(32))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

#[test]
fn cancellation_zeroes_gas_and_pauses() {
    let mut budget = Budget::with_gas(1_000_000);
    budget.cancel();
    assert!(budget.should_pause());
}

#[test]
fn tree_oracle_cannot_pause() {
    let rt = Runtime::new();
    let expr = Value::from_json(&sum_to(100)).unwrap();
    let mut budget = Budget::with_gas(50);
    let err = rt.eval_tree(&expr, &rt.new_env(), &mut budget).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}
