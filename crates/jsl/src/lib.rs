#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]

mod budget;
pub mod builtins;
mod cas;
mod env;
mod error;
mod eval;
pub mod host;
mod runtime;
pub mod tracer;
mod value;

pub mod bytecode;

pub use crate::{
    budget::{Budget, DEFAULT_MAX_DEPTH, GAS_CALL, GAS_LITERAL, GAS_LOOKUP, GAS_OP, op_cost},
    cas::{CAS_VERSION, deserialize, serialize},
    env::Env,
    error::{Error, ErrorKind, RunResult},
    host::{HOST_ERROR_KEY, HostRegistry, host_error},
    runtime::{Paused, RunProgress, Runtime},
    value::{Closure, ObjectMap, Value},
};
