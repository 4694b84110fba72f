//! Typed runtime errors.
//!
//! Every failure the core can raise carries a [`ErrorKind`] tag, a
//! human-readable message, and optional structured details. Errors unwind to
//! the nearest enclosing `try` (whose handler receives the error as a
//! `{type, message, details}` record) or out of the public API as an
//! [`Error`]. Budget exhaustion for gas/steps is *not* an error: it
//! produces a resumable paused state; only the terminal limits (memory,
//! wall time, stack depth) surface here as `ResourceExhausted`.

use std::fmt;

use strum::{Display, EnumString};

use crate::value::{ObjectMap, Value};

/// Shorthand result alias used throughout the crate.
pub type RunResult<T> = Result<T, Error>;

/// The error taxonomy.
///
/// The string form of each variant (via strum) is the `type` tag that
/// in-language handlers observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ErrorKind {
    /// Ill-formed program input (bad JSON shape, duplicate keys, malformed
    /// bytecode).
    Syntax,
    /// Variable lookup missed at the root environment.
    SymbolNotFound,
    /// Operator applied to the wrong category of value.
    TypeError,
    /// Wrong argument count for a fixed-arity operator or special form.
    ArityError,
    /// Division or modulo by zero.
    DivisionByZero,
    /// Numeric argument outside an operator's domain.
    DomainError,
    /// Missing intermediate on a path operation without a default.
    PathError,
    /// Attempt to define into the frozen prelude.
    ImmutablePrelude,
    /// A terminal resource cap (memory, wall time, stack depth) was hit.
    ResourceExhausted,
    /// Reified from a host-command response.
    HostError,
    /// Raised by the in-language `error` operator.
    UserError,
}

/// A raised JSL error: kind tag, message, optional structured details.
///
/// Errors minted by the in-language `error` operator may carry a free-form
/// tag; it takes the place of the kind string in the handler-visible record
/// so user taxonomies survive a `try` round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
    user_tag: Option<String>,
}

impl Error {
    /// Creates an error with no details payload.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            user_tag: None,
        }
    }

    /// Creates an error carrying structured details.
    pub fn with_details(kind: ErrorKind, message: impl Into<String>, details: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Some(details),
            user_tag: None,
        }
    }

    /// Creates a user-raised error with a free-form type tag.
    ///
    /// Tags that name a built-in kind collapse onto it; anything else is a
    /// `UserError` that remembers the tag.
    pub fn user(tag: &str, message: impl Into<String>, details: Option<Value>) -> Self {
        match tag.parse::<ErrorKind>() {
            Ok(kind) => Self {
                kind,
                message: message.into(),
                details,
                user_tag: None,
            },
            Err(_) => Self {
                kind: ErrorKind::UserError,
                message: message.into(),
                details,
                user_tag: Some(tag.to_string()),
            },
        }
    }

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub(crate) fn symbol_not_found(name: &str) -> Self {
        Self::new(ErrorKind::SymbolNotFound, format!("undefined symbol: {name}"))
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub(crate) fn arity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArityError, message)
    }

    pub(crate) fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "division by zero")
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DomainError, message)
    }

    pub(crate) fn path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PathError, message)
    }

    pub(crate) fn immutable_prelude(name: &str) -> Self {
        Self::new(
            ErrorKind::ImmutablePrelude,
            format!("cannot redefine '{name}' in the frozen prelude"),
        )
    }

    pub(crate) fn host(message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            kind: ErrorKind::HostError,
            message: message.into(),
            details,
            user_tag: None,
        }
    }

    /// The kind tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The structured details, if any.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Converts this error into the `{type, message, details}` record that a
    /// `try` handler receives.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let tag = self
            .user_tag
            .clone()
            .unwrap_or_else(|| self.kind.to_string());
        let mut map = ObjectMap::with_capacity(3);
        map.insert("type".into(), Value::str(tag));
        map.insert("message".into(), Value::str(&self.message));
        map.insert(
            "details".into(),
            self.details.clone().unwrap_or(Value::Null),
        );
        Value::object(map)
    }

    /// Rebuilds an error from a `{type, message, details}` record.
    ///
    /// Unknown `type` tags map to `UserError` (keeping the tag) so hosts can
    /// round-trip error records they did not mint.
    #[must_use]
    pub fn from_record(record: &ObjectMap) -> Self {
        let tag = record.get("type").and_then(Value::as_str).unwrap_or("UserError");
        let message = record
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let details = record.get("details").filter(|d| !matches!(d, Value::Null)).cloned();
        Self::user(tag, message, details)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}
