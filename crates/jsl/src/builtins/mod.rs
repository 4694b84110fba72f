//! The prelude: JSL's builtin operator catalog.
//!
//! Each concern has its own submodule; this module holds the registry, the
//! arity contracts, and the context trait through which higher-order
//! operators call back into whichever engine (tree evaluator or VM) invoked
//! them. Builtins are never serialized: the content-addressable serializer
//! emits a name marker and re-binds from this registry on load.

mod arith;
mod compare;
mod convert;
mod list;
mod object;
mod path;
mod query;
mod string;
mod transform;

use std::rc::Rc;

pub(crate) use transform::apply_descriptor;

use crate::{
    budget::Budget,
    env::Env,
    error::{Error, RunResult},
    value::Value,
};

/// Argument-count contract for a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly `n` arguments.
    Exact(usize),
    /// At least `n` arguments.
    AtLeast(usize),
    /// Between `min` and `max` arguments, inclusive.
    Range(usize, usize),
    /// Any number of arguments.
    Any,
}

impl Arity {
    /// Checks `argc` against the contract.
    ///
    /// # Errors
    /// Returns *ArityError* naming the operator and the expected shape.
    pub fn check(self, name: &str, argc: usize) -> RunResult<()> {
        let ok = match self {
            Self::Exact(n) => argc == n,
            Self::AtLeast(n) => argc >= n,
            Self::Range(min, max) => argc >= min && argc <= max,
            Self::Any => true,
        };
        if ok {
            return Ok(());
        }
        let expected = match self {
            Self::Exact(n) => format!("{n}"),
            Self::AtLeast(n) => format!("at least {n}"),
            Self::Range(min, max) => format!("{min} to {max}"),
            Self::Any => unreachable!("Any accepts every arity"),
        };
        Err(Error::arity(format!(
            "{name}: expected {expected} argument(s), got {argc}"
        )))
    }
}

/// Execution context handed to every builtin.
///
/// Higher-order operators (`map`, `filter`, `reduce`, `apply`, `update`,
/// `sort-by`, `group-by`) use it to call closures; collection operators use
/// it to charge allocation costs against the shared budget.
pub trait CallCtx {
    /// Applies a callable value to `args` and returns its result.
    fn call_value(&mut self, callee: &Value, args: &[Value]) -> RunResult<Value>;

    /// The budget shared with the driving engine.
    fn budget(&mut self) -> &mut Budget;
}

/// Implementation signature shared by all builtins.
pub type BuiltinFn = fn(&mut dyn CallCtx, &[Value]) -> RunResult<Value>;

/// One entry of the builtin registry.
pub struct BuiltinDef {
    /// The prelude binding name.
    pub name: &'static str,
    /// Argument-count contract, enforced before the implementation runs.
    pub arity: Arity,
    /// The implementation.
    pub run: BuiltinFn,
}

impl BuiltinDef {
    /// Invokes this builtin after checking the arity contract.
    pub fn call(&self, ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
        self.arity.check(self.name, args.len())?;
        (self.run)(ctx, args)
    }
}

impl std::fmt::Debug for BuiltinDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

macro_rules! entry {
    ($name:literal, $arity:expr, $f:path) => {
        BuiltinDef {
            name: $name,
            arity: $arity,
            run: $f,
        }
    };
}

/// The complete operator catalog, in the order it appears in the language
/// reference.
pub static REGISTRY: &[BuiltinDef] = &[
    // Arithmetic
    entry!("+", Arity::Any, arith::add),
    entry!("-", Arity::Any, arith::sub),
    entry!("*", Arity::Any, arith::mul),
    entry!("/", Arity::Any, arith::div),
    entry!("%", Arity::Exact(2), arith::modulo),
    entry!("min", Arity::Any, arith::min),
    entry!("max", Arity::Any, arith::max),
    entry!("abs", Arity::Exact(1), arith::abs),
    entry!("round", Arity::Exact(1), arith::round),
    entry!("sqrt", Arity::Exact(1), arith::sqrt),
    entry!("pow", Arity::Exact(2), arith::pow),
    entry!("log", Arity::Exact(1), arith::log),
    entry!("exp", Arity::Exact(1), arith::exp),
    entry!("sin", Arity::Exact(1), arith::sin),
    entry!("cos", Arity::Exact(1), arith::cos),
    entry!("tan", Arity::Exact(1), arith::tan),
    // Comparison
    entry!("=", Arity::AtLeast(2), compare::eq),
    entry!("!=", Arity::AtLeast(2), compare::ne),
    entry!("<", Arity::AtLeast(2), compare::lt),
    entry!(">", Arity::AtLeast(2), compare::gt),
    entry!("<=", Arity::AtLeast(2), compare::le),
    entry!(">=", Arity::AtLeast(2), compare::ge),
    // Logic
    entry!("and", Arity::Any, compare::and),
    entry!("or", Arity::Any, compare::or),
    entry!("not", Arity::Exact(1), compare::not),
    // Lists
    entry!("list", Arity::Any, list::list),
    entry!("cons", Arity::Exact(2), list::cons),
    entry!("first", Arity::Exact(1), list::first),
    entry!("rest", Arity::Exact(1), list::rest),
    entry!("nth", Arity::Exact(2), list::nth),
    entry!("length", Arity::Exact(1), list::length),
    entry!("append", Arity::AtLeast(1), list::append),
    entry!("prepend", Arity::AtLeast(1), list::prepend),
    entry!("concat", Arity::Any, list::concat),
    entry!("reverse", Arity::Exact(1), list::reverse),
    entry!("slice", Arity::Range(2, 3), list::slice),
    entry!("contains?", Arity::Exact(2), list::contains),
    entry!("index", Arity::Exact(2), list::index),
    entry!("empty?", Arity::Exact(1), list::empty),
    // Objects
    entry!("get", Arity::Range(2, 3), object::get),
    entry!("set", Arity::Exact(3), object::set),
    entry!("has", Arity::Exact(2), object::has),
    entry!("keys", Arity::Exact(1), object::keys),
    entry!("values", Arity::Exact(1), object::values),
    entry!("merge", Arity::Any, object::merge),
    // Strings
    entry!("str-concat", Arity::Any, string::concat),
    entry!("str-length", Arity::Exact(1), string::length),
    entry!("str-upper", Arity::Exact(1), string::upper),
    entry!("str-lower", Arity::Exact(1), string::lower),
    entry!("str-split", Arity::Exact(2), string::split),
    entry!("str-join", Arity::Exact(2), string::join),
    entry!("str-slice", Arity::Range(2, 3), string::slice),
    entry!("str-contains", Arity::Exact(2), string::contains),
    entry!("str-matches", Arity::Exact(2), string::matches),
    entry!("str-replace", Arity::Exact(3), string::replace),
    entry!("str-find-all", Arity::Exact(2), string::find_all),
    // Paths
    entry!("get-path", Arity::Range(2, 3), path::get_path),
    entry!("set-path", Arity::Exact(3), path::set_path),
    entry!("has-path", Arity::Exact(2), path::has_path),
    entry!("update-path", Arity::Exact(3), path::update_path),
    entry!("get-safe", Arity::Range(2, 3), path::get_safe),
    // Higher-order
    entry!("map", Arity::Exact(2), list::map),
    entry!("filter", Arity::Exact(2), list::filter),
    entry!("reduce", Arity::Range(2, 3), list::reduce),
    entry!("apply", Arity::Exact(2), list::apply),
    // Collection queries
    entry!("pluck", Arity::Exact(2), query::pluck),
    entry!("index-by", Arity::Exact(2), query::index_by),
    entry!("group-by", Arity::Exact(2), query::group_by),
    entry!("unique", Arity::Exact(1), query::unique),
    entry!("flatten", Arity::Exact(1), query::flatten),
    entry!("sort-by", Arity::Exact(2), query::sort_by),
    // Type predicates
    entry!("null?", Arity::Exact(1), convert::is_null),
    entry!("bool?", Arity::Exact(1), convert::is_bool),
    entry!("number?", Arity::Exact(1), convert::is_number),
    entry!("string?", Arity::Exact(1), convert::is_string),
    entry!("list?", Arity::Exact(1), convert::is_list),
    entry!("dict?", Arity::Exact(1), convert::is_dict),
    entry!("callable?", Arity::Exact(1), convert::is_callable),
    // Transform operators (descriptor constructors)
    entry!("pick", Arity::AtLeast(1), transform::pick),
    entry!("omit", Arity::Any, transform::omit),
    entry!("assign", Arity::Exact(2), transform::assign),
    entry!("rename", Arity::Exact(2), transform::rename),
    entry!("default", Arity::Exact(2), transform::default),
    entry!("update", Arity::Exact(2), transform::update),
    // Conversion
    entry!("to-string", Arity::Exact(1), convert::to_string),
    entry!("to-number", Arity::Exact(1), convert::to_number),
    entry!("type-of", Arity::Exact(1), convert::type_of),
    // Error creation
    entry!("error", Arity::Range(2, 3), convert::raise_error),
];

/// Looks up a builtin by its prelude name.
#[must_use]
pub fn by_name(name: &str) -> Option<&'static BuiltinDef> {
    REGISTRY.iter().find(|def| def.name == name)
}

/// Builds the frozen prelude environment from the registry.
#[must_use]
pub(crate) fn prelude() -> Rc<Env> {
    Env::frozen_root(
        REGISTRY
            .iter()
            .map(|def| (Rc::from(def.name), Value::Builtin(def))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for def in REGISTRY {
            assert!(seen.insert(def.name), "duplicate builtin name: {}", def.name);
        }
    }

    #[test]
    fn prelude_is_frozen_and_complete() {
        let prelude = prelude();
        assert!(prelude.is_frozen());
        assert_eq!(prelude.local_len(), REGISTRY.len());
        assert!(matches!(prelude.lookup("map"), Ok(Value::Builtin(_))));
    }

    #[test]
    fn arity_messages_name_the_operator() {
        let err = Arity::Exact(2).check("cons", 3).unwrap_err();
        assert!(err.message().contains("cons"));
        assert!(Arity::Range(2, 3).check("get", 2).is_ok());
        assert!(Arity::AtLeast(2).check("=", 1).is_err());
    }
}
