//! Comparison and logic operators.
//!
//! Comparisons are chained n-ary: `(< a b c)` is true iff every adjacent
//! pair satisfies the relation. Equality is structural; numbers compare by
//! value regardless of representation. `and`/`or` here are the eager
//! operator forms with identities `true`/`false` (they receive already
//! evaluated arguments: short-circuiting belongs to `if`).

use std::cmp::Ordering;

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::Value,
};

pub(super) fn eq(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(args.windows(2).all(|pair| pair[0] == pair[1])))
}

pub(super) fn ne(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(args.windows(2).all(|pair| pair[0] != pair[1])))
}

/// Chains `args` through a relation on the ordering of adjacent pairs.
fn chain(op: &str, args: &[Value], accept: fn(Ordering) -> bool) -> RunResult<Value> {
    for pair in args.windows(2) {
        let ordering = pair[0].partial_cmp_values(&pair[1]).ok_or_else(|| {
            Error::type_error(format!(
                "{op}: cannot compare {} with {}",
                pair[0].type_name(),
                pair[1].type_name()
            ))
        })?;
        if !accept(ordering) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub(super) fn lt(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    chain("<", args, |o| o == Ordering::Less)
}

pub(super) fn gt(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    chain(">", args, |o| o == Ordering::Greater)
}

pub(super) fn le(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    chain("<=", args, |o| o != Ordering::Greater)
}

pub(super) fn ge(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    chain(">=", args, |o| o != Ordering::Less)
}

pub(super) fn and(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(args.iter().all(Value::is_truthy)))
}

pub(super) fn or(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(args.iter().any(Value::is_truthy)))
}

pub(super) fn not(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(!args[0].is_truthy()))
}
