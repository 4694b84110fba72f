//! Transform-operator helpers and descriptor application.
//!
//! The constructors (`pick`, `omit`, `assign`, `rename`, `default`,
//! `update`) do not transform anything themselves: they return operation
//! descriptors, opaque tagged lists of the shape
//! `["__op__", "<name>", …operands]`, which only the `transform` special
//! form interprets. [`apply_descriptor`] is that interpreter, shared by the
//! tree evaluator and the VM.

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::{OP_TAG, Value},
};

fn descriptor(name: &str, operands: &[Value]) -> Value {
    let mut items = Vec::with_capacity(operands.len() + 2);
    items.push(Value::str(OP_TAG));
    items.push(Value::str(name));
    items.extend_from_slice(operands);
    Value::list(items)
}

fn want_key<'a>(op: &str, value: &'a Value) -> RunResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::type_error(format!("{op}: expected string key, got {}", value.type_name())))
}

/// Indexes a descriptor's operand list, rejecting short descriptors built
/// by hand instead of through the constructors.
fn operand<'a>(op: &str, operands: &'a [Value], index: usize) -> RunResult<&'a Value> {
    operands
        .get(index)
        .ok_or_else(|| Error::type_error(format!("transform: malformed '{op}' descriptor")))
}

pub(super) fn pick(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    for arg in args {
        want_key("pick", arg)?;
    }
    Ok(descriptor("pick", args))
}

pub(super) fn omit(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    for arg in args {
        want_key("omit", arg)?;
    }
    Ok(descriptor("omit", args))
}

pub(super) fn assign(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    want_key("assign", &args[0])?;
    Ok(descriptor("assign", args))
}

pub(super) fn rename(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    want_key("rename", &args[0])?;
    want_key("rename", &args[1])?;
    Ok(descriptor("rename", args))
}

pub(super) fn default(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    want_key("default", &args[0])?;
    Ok(descriptor("default", args))
}

pub(super) fn update(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    want_key("update", &args[0])?;
    if !args[1].is_callable() {
        return Err(Error::type_error(format!(
            "update: expected callable, got {}",
            args[1].type_name()
        )));
    }
    Ok(descriptor("update", args))
}

/// Applies one operation descriptor to `item`, producing the updated item.
///
/// `item` must be an object: the transform pipeline is defined over object
/// rows only.
pub(crate) fn apply_descriptor(ctx: &mut dyn CallCtx, desc: &Value, item: &Value) -> RunResult<Value> {
    let Some(parts) = desc.as_list().filter(|p| desc.is_descriptor() && p.len() >= 2) else {
        return Err(Error::type_error(format!(
            "transform: expected operation descriptor, got {}",
            desc.type_name()
        )));
    };
    let op = parts[1].as_str().unwrap_or_default().to_string();
    let operands = &parts[2..];
    let map = item.as_object().ok_or_else(|| {
        Error::type_error(format!("transform: '{op}' requires an object item, got {}", item.type_name()))
    })?;

    match op.as_str() {
        "pick" => {
            let mut out = crate::value::ObjectMap::with_capacity(operands.len());
            for key in operands {
                let key = want_key("pick", key)?;
                if let Some(value) = map.get(key) {
                    out.insert(key.to_string(), value.clone());
                }
            }
            ctx.budget().charge_object_alloc(out.len());
            Ok(Value::object(out))
        }
        "omit" => {
            let mut out = map.clone();
            for key in operands {
                out.shift_remove(want_key("omit", key)?);
            }
            ctx.budget().charge_object_alloc(out.len());
            Ok(Value::object(out))
        }
        "assign" => {
            let key = want_key("assign", operand(&op, operands, 0)?)?;
            let mut out = map.clone();
            out.insert(key.to_string(), operand(&op, operands, 1)?.clone());
            ctx.budget().charge_object_alloc(out.len());
            Ok(Value::object(out))
        }
        "rename" => {
            let old = want_key("rename", operand(&op, operands, 0)?)?;
            let new = want_key("rename", operand(&op, operands, 1)?)?;
            // Missing key is a no-op; otherwise rebuild preserving position.
            if !map.contains_key(old) {
                return Ok(item.clone());
            }
            let mut out = crate::value::ObjectMap::with_capacity(map.len());
            for (key, value) in map {
                if key == old {
                    out.insert(new.to_string(), value.clone());
                } else {
                    out.insert(key.clone(), value.clone());
                }
            }
            ctx.budget().charge_object_alloc(out.len());
            Ok(Value::object(out))
        }
        "default" => {
            let key = want_key("default", operand(&op, operands, 0)?)?;
            if map.contains_key(key) {
                return Ok(item.clone());
            }
            let mut out = map.clone();
            out.insert(key.to_string(), operand(&op, operands, 1)?.clone());
            ctx.budget().charge_object_alloc(out.len());
            Ok(Value::object(out))
        }
        "update" => {
            let key = want_key("update", operand(&op, operands, 0)?)?;
            let Some(existing) = map.get(key) else {
                return Err(Error::path(format!("transform: update on missing key {key:?}")));
            };
            let updater = operand(&op, operands, 1)?.clone();
            let updated = ctx.call_value(&updater, std::slice::from_ref(existing))?;
            let mut out = map.clone();
            out.insert(key.to_string(), updated);
            ctx.budget().charge_object_alloc(out.len());
            Ok(Value::object(out))
        }
        other => Err(Error::type_error(format!("transform: unknown operation {other:?}"))),
    }
}
