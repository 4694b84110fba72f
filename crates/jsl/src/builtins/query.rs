//! Collection query helpers.
//!
//! These operate over lists of objects (the "rows" shape produced by hosts
//! and by `where`). Grouping and indexing keys are stringified; `group-by`
//! and `sort-by` also accept a key closure instead of a field name.

use indexmap::IndexMap;

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::{ObjectMap, Value},
};

fn want_list<'a>(op: &str, value: &'a Value) -> RunResult<&'a [Value]> {
    value
        .as_list()
        .ok_or_else(|| Error::type_error(format!("{op}: expected list, got {}", value.type_name())))
}

fn want_key<'a>(op: &str, value: &'a Value) -> RunResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::type_error(format!("{op}: expected string key, got {}", value.type_name())))
}

/// Key used by `index-by`/`group-by`: the field value rendered as a map key.
fn stringify_key(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    }
}

/// Extracts the grouping key for `item`: a field lookup for string keys, a
/// call for callable keys.
fn item_key(ctx: &mut dyn CallCtx, op: &str, key: &Value, item: &Value) -> RunResult<Value> {
    if key.is_callable() {
        return ctx.call_value(key, std::slice::from_ref(item));
    }
    let field = want_key(op, key)?;
    Ok(item
        .as_object()
        .and_then(|map| map.get(field))
        .cloned()
        .unwrap_or(Value::Null))
}

pub(super) fn pluck(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("pluck", &args[0])?;
    let field = want_key("pluck", &args[1])?;
    let out: Vec<Value> = items
        .iter()
        .map(|item| {
            item.as_object()
                .and_then(|map| map.get(field))
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect();
    ctx.budget().charge_list_alloc(out.len());
    Ok(Value::list(out))
}

/// Builds an object keyed by each row's field value; later rows win.
pub(super) fn index_by(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("index-by", &args[0])?.to_vec();
    let key = args[1].clone();
    let mut out = ObjectMap::with_capacity(items.len());
    for item in &items {
        let key_value = item_key(ctx, "index-by", &key, item)?;
        out.insert(stringify_key(&key_value), item.clone());
    }
    ctx.budget().charge_object_alloc(out.len());
    Ok(Value::object(out))
}

/// Buckets rows by key, preserving first-seen group order and row order
/// within each group.
pub(super) fn group_by(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("group-by", &args[0])?.to_vec();
    let key = args[1].clone();
    let mut groups: IndexMap<String, Vec<Value>> = IndexMap::new();
    for item in &items {
        let key_value = item_key(ctx, "group-by", &key, item)?;
        groups.entry(stringify_key(&key_value)).or_default().push(item.clone());
    }
    let mut out = ObjectMap::with_capacity(groups.len());
    for (name, members) in groups {
        ctx.budget().charge_list_alloc(members.len());
        out.insert(name, Value::list(members));
    }
    ctx.budget().charge_object_alloc(out.len());
    Ok(Value::object(out))
}

/// Structural dedup preserving first occurrences.
pub(super) fn unique(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("unique", &args[0])?;
    let mut out: Vec<Value> = Vec::new();
    for item in items.iter() {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    ctx.budget().charge_list_alloc(out.len());
    Ok(Value::list(out))
}

/// Flattens one level: list elements are spliced, everything else is kept.
pub(super) fn flatten(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("flatten", &args[0])?;
    let mut out = Vec::new();
    for item in items.iter() {
        match item {
            Value::List(nested) => out.extend_from_slice(nested),
            other => out.push(other.clone()),
        }
    }
    ctx.budget().charge_list_alloc(out.len());
    Ok(Value::list(out))
}

/// Stable sort by key value. Keys must be mutually comparable (all numbers
/// or all strings) or the sort raises *TypeError*.
pub(super) fn sort_by(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = want_list("sort-by", &args[0])?.to_vec();
    let key = args[1].clone();
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let key_value = item_key(ctx, "sort-by", &key, &item)?;
        keyed.push((key_value, item));
    }
    let mut compare_err = None;
    keyed.sort_by(|(a, _), (b, _)| {
        a.partial_cmp_values(b).unwrap_or_else(|| {
            if compare_err.is_none() {
                compare_err = Some(Error::type_error(format!(
                    "sort-by: cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                )));
            }
            std::cmp::Ordering::Equal
        })
    });
    if let Some(err) = compare_err {
        return Err(err);
    }
    let out: Vec<Value> = keyed.into_iter().map(|(_, item)| item).collect();
    ctx.budget().charge_list_alloc(out.len());
    Ok(Value::list(out))
}
