//! Path operators: dotted traversal into nested objects and lists.
//!
//! Path grammar: dot-separated segments. A segment of decimal digits indexes
//! a list; the literal `*` maps over every element of a list and flattens
//! the collected result by one level; the bracket form `name[i]` is
//! equivalent to `name.i`. `get-path`/`update-path` are the strict family
//! (missing intermediates raise *PathError* unless a default is supplied);
//! `get-safe` never raises on traversal.

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::{ObjectMap, Value},
};

/// One parsed path step.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Object field access.
    Key(String),
    /// List index access.
    Index(usize),
    /// Map over all elements of a list.
    Wild,
}

/// Parses the dotted path grammar, expanding bracket forms.
fn parse_path(op: &str, path: &str) -> RunResult<Vec<Segment>> {
    if path.is_empty() {
        return Err(Error::path(format!("{op}: empty path")));
    }
    let mut segments = Vec::new();
    for raw in path.split('.') {
        if raw.is_empty() {
            return Err(Error::path(format!("{op}: empty segment in path {path:?}")));
        }
        // Split off any trailing bracket indexes: name[1][2]
        let (head, mut brackets) = match raw.find('[') {
            Some(pos) => (&raw[..pos], &raw[pos..]),
            None => (raw, ""),
        };
        if !head.is_empty() {
            segments.push(classify(head));
        }
        while !brackets.is_empty() {
            let Some(end) = brackets.find(']') else {
                return Err(Error::path(format!("{op}: unclosed bracket in path {path:?}")));
            };
            let inner = &brackets[1..end];
            let index = inner
                .parse::<usize>()
                .map_err(|_| Error::path(format!("{op}: bad bracket index {inner:?} in path {path:?}")))?;
            segments.push(Segment::Index(index));
            brackets = &brackets[end + 1..];
            if !brackets.is_empty() && !brackets.starts_with('[') {
                return Err(Error::path(format!("{op}: malformed segment {raw:?} in path {path:?}")));
            }
        }
    }
    Ok(segments)
}

fn classify(segment: &str) -> Segment {
    if segment == "*" {
        Segment::Wild
    } else if let Ok(index) = segment.parse::<usize>() {
        Segment::Index(index)
    } else {
        Segment::Key(segment.to_string())
    }
}

fn want_path<'a>(op: &str, value: &'a Value) -> RunResult<Vec<Segment>> {
    let path = value
        .as_str()
        .ok_or_else(|| Error::type_error(format!("{op}: expected string path, got {}", value.type_name())))?;
    parse_path(op, path)
}

/// Strict traversal; missing intermediates raise *PathError*.
fn traverse(op: &str, value: &Value, segments: &[Segment]) -> RunResult<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(value.clone());
    };
    match segment {
        Segment::Key(key) => {
            let map = value
                .as_object()
                .ok_or_else(|| Error::path(format!("{op}: expected object at segment {key:?}")))?;
            let child = map
                .get(key)
                .ok_or_else(|| Error::path(format!("{op}: missing key {key:?}")))?;
            traverse(op, child, rest)
        }
        Segment::Index(index) => {
            let items = value
                .as_list()
                .ok_or_else(|| Error::path(format!("{op}: expected list at segment {index}")))?;
            let child = items
                .get(*index)
                .ok_or_else(|| Error::path(format!("{op}: index {index} out of range ({} elements)", items.len())))?;
            traverse(op, child, rest)
        }
        Segment::Wild => {
            let items = value
                .as_list()
                .ok_or_else(|| Error::path(format!("{op}: expected list at '*' segment")))?;
            let mut out = Vec::new();
            for item in items.iter() {
                match traverse(op, item, rest)? {
                    Value::List(nested) => out.extend_from_slice(&nested),
                    other => out.push(other),
                }
            }
            Ok(Value::list(out))
        }
    }
}

/// Immutable rebuild with the value at `segments` replaced by `build(old)`.
///
/// Missing keys are created as intermediate objects (`null` stands in as an
/// empty object); list indexes must exist.
fn rebuild(
    op: &str,
    value: &Value,
    segments: &[Segment],
    build: &mut dyn FnMut(Option<&Value>) -> RunResult<Value>,
) -> RunResult<Value> {
    let Some((segment, rest)) = segments.split_first() else {
        return build(Some(value));
    };
    match segment {
        Segment::Key(key) => {
            let mut map = match value {
                Value::Object(map) => (**map).clone(),
                Value::Null => ObjectMap::new(),
                other => {
                    return Err(Error::path(format!(
                        "{op}: expected object at segment {key:?}, got {}",
                        other.type_name()
                    )));
                }
            };
            let replacement = match map.get(key) {
                Some(child) => rebuild(op, child, rest, build)?,
                None if rest.is_empty() => build(None)?,
                None => rebuild(op, &Value::Null, rest, build)?,
            };
            map.insert(key.clone(), replacement);
            Ok(Value::object(map))
        }
        Segment::Index(index) => {
            let items = value
                .as_list()
                .ok_or_else(|| Error::path(format!("{op}: expected list at segment {index}")))?;
            if *index >= items.len() {
                return Err(Error::path(format!(
                    "{op}: index {index} out of range ({} elements)",
                    items.len()
                )));
            }
            let mut items = items.to_vec();
            items[*index] = rebuild(op, &items[*index], rest, build)?;
            Ok(Value::list(items))
        }
        Segment::Wild => {
            let items = value
                .as_list()
                .ok_or_else(|| Error::path(format!("{op}: expected list at '*' segment")))?;
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(rebuild(op, item, rest, build)?);
            }
            Ok(Value::list(out))
        }
    }
}

pub(super) fn get_path(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let segments = want_path("get-path", &args[1])?;
    match traverse("get-path", &args[0], &segments) {
        Ok(value) => Ok(value),
        Err(err) if err.kind() == crate::ErrorKind::PathError => match args.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

/// Like `get-path` but never raises on traversal; missing paths yield the
/// default (or `null`). Path-syntax errors still raise.
pub(super) fn get_safe(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let segments = want_path("get-safe", &args[1])?;
    match traverse("get-safe", &args[0], &segments) {
        Ok(value) => Ok(value),
        Err(_) => Ok(args.get(2).cloned().unwrap_or(Value::Null)),
    }
}

pub(super) fn has_path(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let segments = want_path("has-path", &args[1])?;
    Ok(Value::Bool(traverse("has-path", &args[0], &segments).is_ok()))
}

pub(super) fn set_path(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let segments = want_path("set-path", &args[1])?;
    let new_value = args[2].clone();
    let result = rebuild("set-path", &args[0], &segments, &mut |_| Ok(new_value.clone()))?;
    ctx.budget().track_alloc(result.approx_size());
    Ok(result)
}

/// Applies a callable to the existing value at the path. The value must
/// exist: a missing leaf raises *PathError*.
pub(super) fn update_path(ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let segments = want_path("update-path", &args[1])?;
    let f = args[2].clone();
    let data = args[0].clone();
    let mut apply = |old: Option<&Value>| -> RunResult<Value> {
        let Some(old) = old else {
            return Err(Error::path("update-path: missing value at path"));
        };
        ctx.call_value(&f, std::slice::from_ref(old))
    };
    let result = rebuild("update-path", &data, &segments, &mut apply)?;
    ctx.budget().track_alloc(result.approx_size());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_expands_brackets_and_wildcards() {
        let segments = parse_path("get-path", "users[0].tags.*.1").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Key("users".into()),
                Segment::Index(0),
                Segment::Key("tags".into()),
                Segment::Wild,
                Segment::Index(1),
            ]
        );
    }

    #[test]
    fn bare_numeric_segment_is_an_index() {
        assert_eq!(parse_path("get-path", "2").unwrap(), vec![Segment::Index(2)]);
    }

    #[test]
    fn malformed_paths_are_path_errors() {
        for bad in ["", "a..b", "a[", "a[x]"] {
            let err = parse_path("get-path", bad).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::PathError, "path {bad:?}");
        }
    }
}
