//! String operators.
//!
//! Index-based operators (`str-length`, `str-slice`) work in characters, not
//! bytes. The three pattern operators (`str-matches`, `str-replace`,
//! `str-find-all`) use the Rust `regex` crate's dialect: no lookaround, no
//! backreferences; an invalid pattern raises *DomainError*.

use regex::Regex;

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::Value,
};

fn want_str<'a>(op: &str, value: &'a Value) -> RunResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::type_error(format!("{op}: expected string, got {}", value.type_name())))
}

fn compile(op: &str, pattern: &str) -> RunResult<Regex> {
    Regex::new(pattern).map_err(|e| Error::domain(format!("{op}: invalid pattern: {e}")))
}

/// Concatenates strings; numbers are stringified, other categories raise
/// *TypeError*.
pub(super) fn concat(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::Str(s) => out.push_str(s),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(ryu::Buffer::new().format(*f)),
            other => {
                return Err(Error::type_error(format!(
                    "str-concat: expected string or number, got {}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::str(out))
}

pub(super) fn length(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let s = want_str("str-length", &args[0])?;
    Ok(Value::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX)))
}

pub(super) fn upper(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::str(want_str("str-upper", &args[0])?.to_uppercase()))
}

pub(super) fn lower(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::str(want_str("str-lower", &args[0])?.to_lowercase()))
}

/// Splits on a literal separator; an empty separator splits into characters.
pub(super) fn split(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let s = want_str("str-split", &args[0])?;
    let sep = want_str("str-split", &args[1])?;
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::str(c.to_string())).collect()
    } else {
        s.split(sep).map(Value::str).collect()
    };
    ctx.budget().charge_list_alloc(parts.len());
    Ok(Value::list(parts))
}

pub(super) fn join(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let items = args[0]
        .as_list()
        .ok_or_else(|| Error::type_error("str-join: expected list of strings"))?;
    let sep = want_str("str-join", &args[1])?;
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        out.push_str(want_str("str-join", item)?);
    }
    Ok(Value::str(out))
}

pub(super) fn slice(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let s = want_str("str-slice", &args[0])?;
    let Value::Int(start) = &args[1] else {
        return Err(Error::type_error("str-slice: expected integer start"));
    };
    let chars: Vec<char> = s.chars().collect();
    let resolve = |index: i64| -> usize {
        let len = i64::try_from(chars.len()).unwrap_or(i64::MAX);
        let resolved = if index < 0 { len + index } else { index };
        usize::try_from(resolved.clamp(0, len)).unwrap_or(0)
    };
    let end = match args.get(2) {
        None => chars.len(),
        Some(Value::Int(end)) => resolve(*end),
        Some(other) => {
            return Err(Error::type_error(format!(
                "str-slice: expected integer end, got {}",
                other.type_name()
            )));
        }
    };
    let start = resolve(*start);
    let out: String = if start < end { chars[start..end].iter().collect() } else { String::new() };
    Ok(Value::str(out))
}

pub(super) fn contains(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let s = want_str("str-contains", &args[0])?;
    let needle = want_str("str-contains", &args[1])?;
    Ok(Value::Bool(s.contains(needle)))
}

/// Unanchored regex search.
pub(super) fn matches(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let s = want_str("str-matches", &args[0])?;
    let pattern = want_str("str-matches", &args[1])?;
    Ok(Value::Bool(compile("str-matches", pattern)?.is_match(s)))
}

/// Replaces every match of the pattern.
pub(super) fn replace(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let s = want_str("str-replace", &args[0])?;
    let pattern = want_str("str-replace", &args[1])?;
    let replacement = want_str("str-replace", &args[2])?;
    let re = compile("str-replace", pattern)?;
    Ok(Value::str(re.replace_all(s, replacement).into_owned()))
}

/// Collects every match (whole-match text) in order.
pub(super) fn find_all(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let s = want_str("str-find-all", &args[0])?;
    let pattern = want_str("str-find-all", &args[1])?;
    let re = compile("str-find-all", pattern)?;
    let out: Vec<Value> = re.find_iter(s).map(|m| Value::str(m.as_str())).collect();
    ctx.budget().charge_list_alloc(out.len());
    Ok(Value::list(out))
}
