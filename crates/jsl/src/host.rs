//! The host dispatcher (JHIP).
//!
//! Effects never happen inside the core: the `host` special form reifies a
//! request `(command-id, args…)` and hands it to the registry below. Which
//! commands exist, and any policy around them (rate limits, sandboxing,
//! capability checks), belongs to the embedding host: the core only
//! marshals the request and demarshals the response.
//!
//! A handler response is either an arbitrary JSON-shaped value (success) or
//! the reserved error object `{"__jsl_host_error__": {type, message,
//! details?}}`. Error responses, handler `Err`s, and unknown command ids
//! are raised in-language as *HostError*, catchable by `try`.

use std::fmt;

use ahash::AHashMap;

use crate::{
    error::{Error, RunResult},
    value::{ObjectMap, Value},
};

/// Reserved key marking a host-error response object.
pub const HOST_ERROR_KEY: &str = "__jsl_host_error__";

/// A registered capability handler.
///
/// Handlers receive the evaluated argument list and return the response
/// value, the [`host_error`] wire object, or `Err`.
pub type HostHandler = Box<dyn Fn(&[Value]) -> RunResult<Value>>;

/// Registry of capability handlers keyed by command id.
#[derive(Default)]
pub struct HostRegistry {
    handlers: AHashMap<String, HostHandler>,
}

impl HostRegistry {
    /// Creates an empty registry. With no handlers registered the sandbox is
    /// a pure computation environment: every `host` form raises *HostError*.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `id`, replacing any previous handler.
    pub fn register(&mut self, id: impl Into<String>, handler: impl Fn(&[Value]) -> RunResult<Value> + 'static) {
        self.handlers.insert(id.into(), Box::new(handler));
    }

    /// Returns `true` if a handler is registered for `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Dispatches a reified effect request.
    ///
    /// # Errors
    /// Returns *HostError* for unknown commands, handler `Err`s, and
    /// handler responses in the host-error wire shape.
    pub fn dispatch(&self, command: &str, args: &[Value]) -> RunResult<Value> {
        let Some(handler) = self.handlers.get(command) else {
            return Err(Error::host(format!("unknown host command {command:?}"), None));
        };
        let response = handler(args).map_err(|e| match e.kind() {
            crate::ErrorKind::HostError => e,
            _ => Error::host(e.message().to_string(), e.details().cloned()),
        })?;
        match as_host_error(&response) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }
}

impl fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("HostRegistry").field("commands", &ids).finish()
    }
}

/// Builds the host-error wire object
/// `{"__jsl_host_error__": {type, message, details?}}`.
#[must_use]
pub fn host_error(error_type: &str, message: &str, details: Option<Value>) -> Value {
    let mut inner = ObjectMap::with_capacity(3);
    inner.insert("type".into(), Value::str(error_type));
    inner.insert("message".into(), Value::str(message));
    if let Some(details) = details {
        inner.insert("details".into(), details);
    }
    let mut outer = ObjectMap::with_capacity(1);
    outer.insert(HOST_ERROR_KEY.into(), Value::object(inner));
    Value::object(outer)
}

/// Recognizes a host-error response and converts it to the raised form.
///
/// The full inner record travels as the raised error's details so handlers
/// installed by `try` can inspect the host's own type tag.
#[must_use]
pub fn as_host_error(value: &Value) -> Option<Error> {
    let map = value.as_object()?;
    let inner = map.get(HOST_ERROR_KEY)?;
    let record = inner.as_object();
    let message = record
        .and_then(|r| r.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("host error");
    Some(Error::host(message, Some(inner.clone())))
}
