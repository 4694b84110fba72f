//! List operators and the higher-order quartet.
//!
//! All operators return fresh lists: input lists are never mutated. The
//! accessor family (`first`, `rest`, `nth`) is lenient, returning `null` or
//! the empty list past the ends; the strict traversal family lives in the
//! path module.

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::Value,
};

/// Extracts a list argument or raises *TypeError* naming the operator.
fn want_list<'a>(op: &str, value: &'a Value) -> RunResult<&'a [Value]> {
    value
        .as_list()
        .ok_or_else(|| Error::type_error(format!("{op}: expected list, got {}", value.type_name())))
}

fn alloc_list(ctx: &mut dyn CallCtx, items: Vec<Value>) -> Value {
    ctx.budget().charge_list_alloc(items.len());
    Value::list(items)
}

pub(super) fn list(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(alloc_list(ctx, args.to_vec()))
}

pub(super) fn cons(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let tail = want_list("cons", &args[1])?;
    let mut items = Vec::with_capacity(tail.len() + 1);
    items.push(args[0].clone());
    items.extend_from_slice(tail);
    Ok(alloc_list(ctx, items))
}

pub(super) fn first(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(want_list("first", &args[0])?.first().cloned().unwrap_or(Value::Null))
}

pub(super) fn rest(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("rest", &args[0])?;
    let tail = items.get(1..).unwrap_or(&[]).to_vec();
    Ok(alloc_list(ctx, tail))
}

pub(super) fn nth(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("nth", &args[0])?;
    let Value::Int(index) = &args[1] else {
        return Err(Error::type_error(format!(
            "nth: expected integer index, got {}",
            args[1].type_name()
        )));
    };
    let index = usize::try_from(*index).ok();
    Ok(index.and_then(|i| items.get(i)).cloned().unwrap_or(Value::Null))
}

pub(super) fn length(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let len = match &args[0] {
        Value::List(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Str(s) => s.chars().count(),
        other => {
            return Err(Error::type_error(format!(
                "length: expected list, object, or string, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

pub(super) fn append(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let head = want_list("append", &args[0])?;
    let mut items = head.to_vec();
    items.extend_from_slice(&args[1..]);
    Ok(alloc_list(ctx, items))
}

pub(super) fn prepend(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let tail = want_list("prepend", &args[0])?;
    let mut items = args[1..].to_vec();
    items.extend_from_slice(tail);
    Ok(alloc_list(ctx, items))
}

pub(super) fn concat(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let mut items = Vec::new();
    for arg in args {
        items.extend_from_slice(want_list("concat", arg)?);
    }
    Ok(alloc_list(ctx, items))
}

pub(super) fn reverse(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let mut items = want_list("reverse", &args[0])?.to_vec();
    items.reverse();
    Ok(alloc_list(ctx, items))
}

/// Resolves a possibly-negative index against `len`, clamping to bounds.
fn resolve_index(index: i64, len: usize) -> usize {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if index < 0 { len + index } else { index };
    usize::try_from(resolved.clamp(0, len)).unwrap_or(0)
}

pub(super) fn slice(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("slice", &args[0])?;
    let Value::Int(start) = &args[1] else {
        return Err(Error::type_error("slice: expected integer start"));
    };
    let end = match args.get(2) {
        None => items.len(),
        Some(Value::Int(end)) => resolve_index(*end, items.len()),
        Some(other) => {
            return Err(Error::type_error(format!(
                "slice: expected integer end, got {}",
                other.type_name()
            )));
        }
    };
    let start = resolve_index(*start, items.len());
    let out = if start < end { items[start..end].to_vec() } else { Vec::new() };
    Ok(alloc_list(ctx, out))
}

pub(super) fn contains(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("contains?", &args[0])?;
    Ok(Value::Bool(items.contains(&args[1])))
}

pub(super) fn index(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("index", &args[0])?;
    Ok(items
        .iter()
        .position(|item| *item == args[1])
        .map_or(Value::Null, |i| Value::Int(i64::try_from(i).unwrap_or(i64::MAX))))
}

pub(super) fn empty(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let empty = match &args[0] {
        Value::List(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Str(s) => s.is_empty(),
        Value::Null => true,
        other => {
            return Err(Error::type_error(format!(
                "empty?: expected list, object, or string, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Bool(empty))
}

// --- Higher-order operators ---

pub(super) fn map(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let f = &args[0];
    let items = want_list("map", &args[1])?.to_vec();
    let mut out = Vec::with_capacity(items.len());
    for item in &items {
        out.push(ctx.call_value(f, std::slice::from_ref(item))?);
    }
    Ok(alloc_list(ctx, out))
}

pub(super) fn filter(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let f = &args[0];
    let items = want_list("filter", &args[1])?.to_vec();
    let mut out = Vec::new();
    for item in items {
        if ctx.call_value(f, std::slice::from_ref(&item))?.is_truthy() {
            out.push(item);
        }
    }
    Ok(alloc_list(ctx, out))
}

/// `reduce(f, list)` folds from the first element; `reduce(f, init, list)`
/// folds from `init`. Reducing an empty list without an initial value is a
/// *TypeError*.
pub(super) fn reduce(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let f = &args[0];
    let (mut acc, items) = match args {
        [_, list_arg] => {
            let items = want_list("reduce", list_arg)?;
            let Some(head) = items.first() else {
                return Err(Error::type_error("reduce: empty list with no initial value"));
            };
            (head.clone(), items[1..].to_vec())
        }
        [_, init, list_arg] => (init.clone(), want_list("reduce", list_arg)?.to_vec()),
        _ => unreachable!("arity checked"),
    };
    for item in &items {
        acc = ctx.call_value(f, &[acc, item.clone()])?;
    }
    Ok(acc)
}

pub(super) fn apply(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let call_args = want_list("apply", &args[1])?.to_vec();
    ctx.call_value(&args[0], &call_args)
}
