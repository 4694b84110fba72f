//! Lexical environments.
//!
//! An [`Env`] is a binding table with an optional parent, forming a scope
//! chain. Environments are created by extension and are conceptually
//! immutable; the only write operation is [`Env::define`], which installs a
//! binding in the *current* table (this is how `def` works, and how a
//! recursive function sees itself). The prelude is the unique frozen
//! environment: defining into it is rejected with *ImmutablePrelude*.

use std::{cell::RefCell, fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    error::{Error, RunResult},
    value::Value,
};

/// A scope: name→value bindings plus a shared reference to the parent scope.
///
/// The parent chain is acyclic by construction: children hold an `Rc` to
/// their parent and nothing ever points back down the chain. Recursive
/// closures loop through the *value* graph (closure → env → closure), not
/// the parent pointers.
pub struct Env {
    bindings: RefCell<AHashMap<Rc<str>, Value>>,
    parent: Option<Rc<Env>>,
    /// Set only on the prelude. A frozen environment rejects `define`.
    frozen: bool,
}

impl Env {
    /// Creates a root environment with no parent.
    #[must_use]
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(AHashMap::new()),
            parent: None,
            frozen: false,
        })
    }

    /// Creates an empty child scope of `parent`.
    #[must_use]
    pub fn child(parent: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(AHashMap::new()),
            parent: Some(Rc::clone(parent)),
            frozen: false,
        })
    }

    /// Creates a child scope pre-populated with `bindings`.
    #[must_use]
    pub fn child_with(parent: &Rc<Self>, bindings: impl IntoIterator<Item = (Rc<str>, Value)>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(bindings.into_iter().collect()),
            parent: Some(Rc::clone(parent)),
            frozen: false,
        })
    }

    /// Creates the item scope used by `where` and `transform`.
    ///
    /// Object items contribute their fields as bindings; any other item is
    /// bound under the name `it`.
    #[must_use]
    pub fn item_scope(parent: &Rc<Self>, item: &Value) -> Rc<Self> {
        match item {
            Value::Object(map) => Self::child_with(
                parent,
                map.iter().map(|(k, v)| (Rc::from(k.as_str()), v.clone())),
            ),
            other => Self::child_with(parent, [(Rc::from("it"), other.clone())]),
        }
    }

    /// Creates a frozen root environment holding `bindings`.
    ///
    /// This is the prelude constructor: the returned environment rejects all
    /// further `define` calls.
    #[must_use]
    pub(crate) fn frozen_root(bindings: impl IntoIterator<Item = (Rc<str>, Value)>) -> Rc<Self> {
        Rc::new(Self {
            bindings: RefCell::new(bindings.into_iter().collect()),
            parent: None,
            frozen: true,
        })
    }

    /// Returns `true` if this is the frozen prelude environment.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Returns the parent scope, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Rc<Self>> {
        self.parent.as_ref()
    }

    /// Installs a binding in this scope.
    ///
    /// # Errors
    /// Returns *ImmutablePrelude* when this environment is the frozen
    /// prelude.
    pub fn define(&self, name: impl Into<Rc<str>>, value: Value) -> RunResult<()> {
        if self.frozen {
            let name = name.into();
            return Err(Error::immutable_prelude(&name));
        }
        self.bindings.borrow_mut().insert(name.into(), value);
        Ok(())
    }

    /// Looks `name` up in this scope only.
    #[must_use]
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.bindings.borrow().get(name).cloned()
    }

    /// Looks `name` up along the parent chain.
    ///
    /// # Errors
    /// Returns *SymbolNotFound* when the name is missing at the root.
    pub fn lookup(&self, name: &str) -> RunResult<Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match &scope.parent {
                Some(parent) => scope = parent,
                None => return Err(Error::symbol_not_found(name)),
            }
        }
    }

    /// Returns `true` if `name` resolves somewhere along the chain.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        let mut scope = self;
        loop {
            if scope.bindings.borrow().contains_key(name) {
                return true;
            }
            match &scope.parent {
                Some(parent) => scope = parent,
                None => return false,
            }
        }
    }

    /// Visits the local bindings of this scope in an unspecified order.
    ///
    /// Used by the serializer; callers must not re-enter the environment
    /// while iterating.
    pub(crate) fn for_each_local(&self, mut f: impl FnMut(&str, &Value)) {
        for (name, value) in self.bindings.borrow().iter() {
            f(name, value);
        }
    }

    /// Number of bindings in this scope alone.
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.bindings.borrow().len()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("bindings", &self.bindings.borrow().len())
            .field("frozen", &self.frozen)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
