//! The JSL value model.
//!
//! A [`Value`] is a tagged union over the JSON data model plus the two
//! runtime-only categories: closures and builtin operators. Every variant is
//! cheap to clone: composite values share their payload through `Rc` and are
//! immutable once constructed, so sharing never needs a deep copy.

use std::{cell::OnceCell, cmp::Ordering, fmt, rc::Rc};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    builtins::BuiltinDef,
    bytecode::Code,
    env::Env,
    error::{Error, RunResult},
};

/// Tag used as the first element of operation-descriptor lists.
///
/// Descriptors are opaque tagged lists produced by the transform-operator
/// helpers (`pick`, `omit`, `assign`, `rename`, `default`, `update`) and
/// consumed only by the `transform` special form.
pub const OP_TAG: &str = "__op__";

/// Ordered string-keyed mapping used for JSL objects.
///
/// Insertion order is preserved so program output and canonical hashing are
/// deterministic.
pub type ObjectMap = IndexMap<String, Value>;

/// A JSL runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// The 64-bit integer subrange of JSL numbers.
    Int(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Immutable string.
    Str(Rc<str>),
    /// Ordered sequence of values.
    List(Rc<Vec<Value>>),
    /// String-keyed mapping. Objects are always data, never applications.
    Object(Rc<ObjectMap>),
    /// A function value packaged with its defining environment.
    Closure(Rc<Closure>),
    /// A prelude operator. Builtins are never serialized; they are re-bound
    /// from the registry by name.
    Builtin(&'static BuiltinDef),
}

/// A user function: parameter names, an unevaluated body expression, and the
/// environment captured at `lambda` evaluation time.
///
/// The capture environment is never null: a closure over no user bindings
/// still holds a child of the prelude. Recursive functions are tied by
/// `def` binding the closure into the environment it captured, which creates
/// a value-graph self-loop while the parent chain stays acyclic.
pub struct Closure {
    /// Ordered parameter names.
    pub params: SmallVec<[Rc<str>; 4]>,
    /// The body as an unevaluated S-expression.
    pub body: Value,
    /// The environment the closure was created in.
    pub env: Rc<Env>,
    /// Compiled form of `body`, populated on first VM call.
    ///
    /// Purely an execution cache: it is ignored by equality and never
    /// serialized.
    pub(crate) compiled: OnceCell<Rc<Code>>,
}

impl Closure {
    /// Creates a closure over `env`.
    ///
    /// A closure's environment reference is never the frozen prelude itself:
    /// capturing at the top level inserts an empty child scope, so the
    /// invariant that every closure environment is writable (and
    /// serializable) holds everywhere downstream.
    pub fn new(params: SmallVec<[Rc<str>; 4]>, body: Value, env: Rc<Env>) -> Self {
        let env = if env.is_frozen() { Env::child(&env) } else { env };
        Self {
            params,
            body,
            env,
            compiled: OnceCell::new(),
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl Value {
    /// Convenience constructor for string values.
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// Convenience constructor for list values.
    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(items))
    }

    /// Convenience constructor for object values.
    #[must_use]
    pub fn object(map: ObjectMap) -> Self {
        Self::Object(Rc::new(map))
    }

    /// The empty list.
    #[must_use]
    pub fn empty_list() -> Self {
        Self::List(Rc::new(Vec::new()))
    }

    /// Returns the human-readable category name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Closure(_) => "closure",
            Self::Builtin(_) => "builtin",
        }
    }

    /// JSL truthiness: `false`, `null`, `0`, `0.0`, `""`, `[]`, and `{}` are
    /// falsy; every other value is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Object(map) => !map.is_empty(),
            Self::Closure(_) | Self::Builtin(_) => true,
        }
    }

    /// Returns `true` if the value is a closure or builtin.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Closure(_) | Self::Builtin(_))
    }

    /// Returns the numeric value as `f64` if this is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string payload if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list payload if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the object payload if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns `true` if this value is an operation descriptor: a list whose
    /// head is the [`OP_TAG`] marker.
    #[must_use]
    pub fn is_descriptor(&self) -> bool {
        match self {
            Self::List(items) => matches!(items.first(), Some(Self::Str(s)) if &**s == OP_TAG),
            _ => false,
        }
    }

    /// Approximate shallow heap footprint in bytes, used by the memory
    /// budget. Composite values count their element headers; element payloads
    /// are charged when they are themselves allocated.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        const VALUE_SIZE: usize = std::mem::size_of::<Value>();
        match self {
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Builtin(_) => 0,
            Self::Str(s) => s.len(),
            Self::List(items) => items.len() * VALUE_SIZE,
            Self::Object(map) => map.iter().map(|(k, _)| k.len() + VALUE_SIZE).sum(),
            Self::Closure(_) => 64,
        }
    }

    /// Applies the quoted-data literal convention of the data-directed
    /// forms.
    ///
    /// When a quoted list reaches `where` or `transform`, strings beginning
    /// with `@` inside it are literals: the `@` is stripped before the value
    /// is used as a field name or string value. This walks the value and
    /// strips one leading `@` from every string key and string leaf;
    /// already-evaluated data (which carries no markers) passes through
    /// unchanged.
    #[must_use]
    pub fn unquote_data(&self) -> Self {
        match self {
            Self::Str(s) => match s.strip_prefix('@') {
                Some(literal) => Self::str(literal),
                None => self.clone(),
            },
            Self::List(items) => Self::list(items.iter().map(Self::unquote_data).collect()),
            Self::Object(map) => {
                let mut out = ObjectMap::with_capacity(map.len());
                for (key, value) in map.iter() {
                    let key = key.strip_prefix('@').unwrap_or(key).to_string();
                    out.insert(key, value.unquote_data());
                }
                Self::object(out)
            }
            other => other.clone(),
        }
    }

    /// Converts a `serde_json` value into a JSL value.
    ///
    /// This is the program entry path: a JSON document parsed by the host
    /// becomes the expression handed to `evaluate`.
    ///
    /// # Errors
    /// Returns `Error` of kind `Syntax` if the JSON contains a number outside
    /// the i64/f64 range (arbitrary-precision values).
    pub fn from_json(json: &serde_json::Value) -> RunResult<Self> {
        match json {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(Error::syntax(format!("unrepresentable number: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Self::str(s)),
            serde_json::Value::Array(items) => {
                let items = items.iter().map(Self::from_json).collect::<RunResult<Vec<_>>>()?;
                Ok(Self::list(items))
            }
            serde_json::Value::Object(map) => {
                let mut out = ObjectMap::with_capacity(map.len());
                for (key, value) in map {
                    if out.insert(key.clone(), Self::from_json(value)?).is_some() {
                        return Err(Error::syntax(format!("duplicate object key: {key:?}")));
                    }
                }
                Ok(Self::object(out))
            }
        }
    }

    /// Converts this value to a `serde_json` value.
    ///
    /// # Errors
    /// Returns `Error` of kind `TypeError` when the value contains a closure
    /// or builtin: those only travel through the content-addressable
    /// serializer.
    pub fn to_json(&self) -> RunResult<serde_json::Value> {
        match self {
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Self::Int(i) => Ok(serde_json::Value::from(*i)),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| Error::type_error("non-finite float has no JSON form")),
            Self::Str(s) => Ok(serde_json::Value::String(s.to_string())),
            Self::List(items) => {
                let items = items.iter().map(Self::to_json).collect::<RunResult<Vec<_>>>()?;
                Ok(serde_json::Value::Array(items))
            }
            Self::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map.iter() {
                    out.insert(key.clone(), value.to_json()?);
                }
                Ok(serde_json::Value::Object(out))
            }
            Self::Closure(_) => Err(Error::type_error("closures have no direct JSON form")),
            Self::Builtin(def) => Err(Error::type_error(format!(
                "builtin '{}' has no direct JSON form",
                def.name
            ))),
        }
    }

    /// Returns `true` if the transitive contents contain a closure.
    ///
    /// Used by the serializer to pick between the direct-JSON path and the
    /// content-addressable graph encoding. Builtins count too: they need the
    /// re-binding marker.
    #[must_use]
    pub fn needs_cas(&self) -> bool {
        match self {
            Self::Closure(_) | Self::Builtin(_) => true,
            Self::List(items) => items.iter().any(Self::needs_cas),
            Self::Object(map) => map.values().any(Self::needs_cas),
            _ => false,
        }
    }

    /// Numeric ordering between two values, when both are numbers or both
    /// are strings.
    ///
    /// Comparison operators and `sort-by` use this; mixed or non-comparable
    /// categories return `None` and the caller raises *TypeError*.
    #[must_use]
    pub fn partial_cmp_values(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.as_number()?;
                let b = other.as_number()?;
                a.partial_cmp(&b)
            }
        }
    }
}

/// Structural equality.
///
/// Numbers compare by value regardless of representation (`1 == 1.0`);
/// lists and objects compare recursively; closures and builtins compare by
/// identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(ryu::Buffer::new().format(*v)),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
            Self::Closure(c) => write!(f, "<closure/{}>", c.params.len()),
            Self::Builtin(def) => write!(f, "<builtin {}>", def.name),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_representations() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Float(2.5), Value::Float(2.5));
        assert_ne!(Value::Int(1), Value::Float(1.5));
    }

    #[test]
    fn truthiness_table() {
        for falsy in [
            Value::Null,
            Value::Bool(false),
            Value::Int(0),
            Value::Float(0.0),
            Value::str(""),
            Value::empty_list(),
            Value::object(ObjectMap::new()),
        ] {
            assert!(!falsy.is_truthy(), "{falsy} should be falsy");
        }
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::str("x").is_truthy());
    }

    #[test]
    fn object_equality_ignores_key_order() {
        let mut a = ObjectMap::new();
        a.insert("x".into(), Value::Int(1));
        a.insert("y".into(), Value::Int(2));
        let mut b = ObjectMap::new();
        b.insert("y".into(), Value::Int(2));
        b.insert("x".into(), Value::Int(1));
        assert_eq!(Value::object(a), Value::object(b));
    }
}
