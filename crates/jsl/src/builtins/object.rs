//! Object operators.
//!
//! All operators are copy-on-write: the input object is never mutated.
//! `get` is the lenient accessor (missing key yields the default or `null`);
//! the strict traversal family is in the path module.

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::{ObjectMap, Value},
};

fn want_object<'a>(op: &str, value: &'a Value) -> RunResult<&'a ObjectMap> {
    value
        .as_object()
        .ok_or_else(|| Error::type_error(format!("{op}: expected object, got {}", value.type_name())))
}

fn want_key<'a>(op: &str, value: &'a Value) -> RunResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::type_error(format!("{op}: expected string key, got {}", value.type_name())))
}

pub(super) fn get(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let map = want_object("get", &args[0])?;
    let key = want_key("get", &args[1])?;
    Ok(map
        .get(key)
        .cloned()
        .or_else(|| args.get(2).cloned())
        .unwrap_or(Value::Null))
}

pub(super) fn set(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let map = want_object("set", &args[0])?;
    let key = want_key("set", &args[1])?;
    let mut out = map.clone();
    out.insert(key.to_string(), args[2].clone());
    ctx.budget().charge_object_alloc(out.len());
    Ok(Value::object(out))
}

pub(super) fn has(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let map = want_object("has", &args[0])?;
    let key = want_key("has", &args[1])?;
    Ok(Value::Bool(map.contains_key(key)))
}

pub(super) fn keys(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let map = want_object("keys", &args[0])?;
    let out: Vec<Value> = map.keys().map(Value::str).collect();
    ctx.budget().charge_list_alloc(out.len());
    Ok(Value::list(out))
}

pub(super) fn values(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let map = want_object("values", &args[0])?;
    let out: Vec<Value> = map.values().cloned().collect();
    ctx.budget().charge_list_alloc(out.len());
    Ok(Value::list(out))
}

/// Merges objects left to right; later keys win.
pub(super) fn merge(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let mut out = ObjectMap::new();
    for arg in args {
        for (key, value) in want_object("merge", arg)? {
            out.insert(key.clone(), value.clone());
        }
    }
    ctx.budget().charge_object_alloc(out.len());
    Ok(Value::object(out))
}
