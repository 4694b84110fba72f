//! Type predicates, conversions, and error creation.

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::Value,
};

pub(super) fn is_null(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Null)))
}

pub(super) fn is_bool(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
}

pub(super) fn is_number(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Int(_) | Value::Float(_))))
}

pub(super) fn is_string(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Str(_))))
}

pub(super) fn is_list(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::List(_))))
}

pub(super) fn is_dict(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Object(_))))
}

pub(super) fn is_callable(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Bool(args[0].is_callable()))
}

/// Renders a value as a string. Scalars use their literal form (strings are
/// unquoted); lists and objects render as JSON text.
pub(super) fn to_string(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let out = match &args[0] {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => ryu::Buffer::new().format(*f).to_string(),
        Value::Str(s) => s.to_string(),
        composite @ (Value::List(_) | Value::Object(_)) => {
            serde_json::to_string(&composite.to_json()?)
                .map_err(|e| Error::type_error(format!("to-string: {e}")))?
        }
        other => {
            return Err(Error::type_error(format!(
                "to-string: cannot render {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::str(out))
}

/// Parses a string into a number (integer form preferred); numbers pass
/// through unchanged.
pub(super) fn to_number(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    match &args[0] {
        n @ (Value::Int(_) | Value::Float(_)) => Ok(n.clone()),
        Value::Str(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::Int(i));
            }
            trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::domain(format!("to-number: cannot parse {trimmed:?}")))
        }
        other => Err(Error::type_error(format!(
            "to-number: expected number or string, got {}",
            other.type_name()
        ))),
    }
}

pub(super) fn type_of(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::str(args[0].type_name()))
}

/// `error(type, message, details?)`: raises immediately.
pub(super) fn raise_error(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let tag = args[0]
        .as_str()
        .ok_or_else(|| Error::type_error("error: expected string type tag"))?;
    let message = args[1]
        .as_str()
        .ok_or_else(|| Error::type_error("error: expected string message"))?;
    Err(Error::user(tag, message, args.get(2).cloned()))
}
