//! The tree-walking reference evaluator.
//!
//! This is the definitive statement of JSL semantics, kept as the oracle the
//! VM is tested against. Dispatch order on an expression:
//!
//! 1. `null`, booleans, and numbers are themselves; objects evaluate each
//!    key expression (which must yield a string) and each value expression;
//! 2. strings starting with `@` are literals (prefix stripped), all others
//!    are variable references;
//! 3. the empty list is itself;
//! 4. a non-empty list is a special form when its head names one, otherwise
//!    an application: head then arguments evaluate left to right.
//!
//! The oracle charges the same gas schedule as the VM but cannot capture a
//! resumable continuation; an exhausted gas budget raises
//! *ResourceExhausted* here instead of pausing.

use std::rc::Rc;

use smallvec::SmallVec;
use strum::EnumString;

use crate::{
    budget::{self, Budget, GAS_CALL, GAS_LITERAL, GAS_LOOKUP},
    builtins::{CallCtx, apply_descriptor},
    env::Env,
    error::{Error, ErrorKind, RunResult},
    host::HostRegistry,
    value::{Closure, ObjectMap, Value},
};

/// The special forms. A list whose head names one of these dispatches to the
/// form's rule instead of ordinary application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum SpecialForm {
    Def,
    Lambda,
    If,
    Do,
    Let,
    #[strum(serialize = "quote", serialize = "@")]
    Quote,
    Try,
    Host,
    Where,
    Transform,
}

impl SpecialForm {
    /// Recognizes a head symbol. `@`-prefixed literals never name a form.
    pub(crate) fn from_head(head: &Value) -> Option<Self> {
        match head {
            Value::Str(s) if !s.starts_with('@') || &**s == "@" => s.parse().ok(),
            _ => None,
        }
    }
}

/// Evaluates `expr` in `env`, charging `budget`.
///
/// This is the crate-internal entry; the public surface goes through
/// `Runtime::eval_tree`.
pub(crate) fn eval_expr(
    host: &HostRegistry,
    budget: &mut Budget,
    expr: &Value,
    env: &Rc<Env>,
) -> RunResult<Value> {
    let mut tree = TreeEvaluator { host, budget, depth: 0 };
    tree.eval(expr, env)
}

struct TreeEvaluator<'a> {
    host: &'a HostRegistry,
    budget: &'a mut Budget,
    /// Closure-application depth, checked against the budget's cap.
    depth: usize,
}

impl CallCtx for TreeEvaluator<'_> {
    fn call_value(&mut self, callee: &Value, args: &[Value]) -> RunResult<Value> {
        self.apply(callee, args)
    }

    fn budget(&mut self) -> &mut Budget {
        self.budget
    }
}

impl TreeEvaluator<'_> {
    fn eval(&mut self, expr: &Value, env: &Rc<Env>) -> RunResult<Value> {
        self.budget.check_terminal()?;
        if self.budget.should_pause() {
            return Err(Error::new(
                ErrorKind::ResourceExhausted,
                "gas budget exhausted (the tree oracle cannot pause)",
            ));
        }
        match expr {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
                self.budget.charge(GAS_LITERAL);
                Ok(expr.clone())
            }
            Value::Str(s) => {
                if let Some(literal) = s.strip_prefix('@') {
                    self.budget.charge(GAS_LITERAL);
                    Ok(Value::str(literal))
                } else {
                    self.budget.charge(GAS_LOOKUP);
                    env.lookup(s)
                }
            }
            Value::Object(map) => self.eval_object(map, env),
            Value::List(items) => {
                let Some((head, args)) = items.split_first() else {
                    self.budget.charge(GAS_LITERAL);
                    return Ok(expr.clone());
                };
                if let Some(form) = SpecialForm::from_head(head) {
                    return self.special_form(form, args, env);
                }
                let callee = self.eval(head, env)?;
                let mut evaluated: SmallVec<[Value; 8]> = SmallVec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg, env)?);
                }
                self.budget.charge(budget::op_cost(evaluated.len()));
                self.apply(&callee, &evaluated)
            }
            // Closures and builtins only appear via quote of an evaluated
            // value; they are self-evaluating.
            other => Ok(other.clone()),
        }
    }

    /// Objects are data: each key expression must yield a string (an `@`
    /// prefix denotes a literal key), each value expression is evaluated.
    fn eval_object(&mut self, map: &ObjectMap, env: &Rc<Env>) -> RunResult<Value> {
        let mut out = ObjectMap::with_capacity(map.len());
        for (key_expr, value_expr) in map {
            let key = match key_expr.strip_prefix('@') {
                Some(literal) => literal.to_string(),
                None => {
                    self.budget.charge(GAS_LOOKUP);
                    match env.lookup(key_expr)? {
                        Value::Str(s) => s.to_string(),
                        other => {
                            return Err(Error::type_error(format!(
                                "object key expression {key_expr:?} evaluated to {}, expected string",
                                other.type_name()
                            )));
                        }
                    }
                }
            };
            let value = self.eval(value_expr, env)?;
            out.insert(key, value);
        }
        self.budget.charge_object_alloc(out.len());
        Ok(Value::object(out))
    }

    fn apply(&mut self, callee: &Value, args: &[Value]) -> RunResult<Value> {
        self.budget.check_terminal()?;
        self.budget.charge(GAS_CALL);
        match callee {
            Value::Closure(closure) => {
                self.budget.check_depth(self.depth)?;
                if closure.params.len() != args.len() {
                    return Err(Error::arity(format!(
                        "closure expected {} argument(s), got {}",
                        closure.params.len(),
                        args.len()
                    )));
                }
                let call_env = Env::child_with(
                    &closure.env,
                    closure.params.iter().cloned().zip(args.iter().cloned()),
                );
                self.depth += 1;
                let result = self.eval(&closure.body, &call_env);
                self.depth -= 1;
                result
            }
            Value::Builtin(def) => def.call(self, args),
            other => Err(Error::type_error(format!("{} is not callable", other.type_name()))),
        }
    }

    fn special_form(&mut self, form: SpecialForm, args: &[Value], env: &Rc<Env>) -> RunResult<Value> {
        match form {
            SpecialForm::Def => {
                let [name_expr, value_expr] = args else {
                    return Err(Error::arity("def: expected (def name expr)"));
                };
                let name = plain_symbol("def", name_expr)?;
                let value = self.eval(value_expr, env)?;
                env.define(name, value.clone())?;
                Ok(value)
            }
            SpecialForm::Lambda => {
                let [params_expr, body] = args else {
                    return Err(Error::arity("lambda: expected (lambda (params...) body)"));
                };
                let params = param_list(params_expr)?;
                Ok(Value::Closure(Rc::new(Closure::new(params, body.clone(), Rc::clone(env)))))
            }
            SpecialForm::If => {
                let [cond, then_branch, else_branch] = args else {
                    return Err(Error::arity("if: expected (if cond then else)"));
                };
                if self.eval(cond, env)?.is_truthy() {
                    self.eval(then_branch, env)
                } else {
                    self.eval(else_branch, env)
                }
            }
            SpecialForm::Do => {
                let mut last = Value::Null;
                for expr in args {
                    last = self.eval(expr, env)?;
                }
                Ok(last)
            }
            SpecialForm::Let => {
                let [bindings_expr, body] = args else {
                    return Err(Error::arity("let: expected (let ((name value)...) body)"));
                };
                let scope = self.let_scope(bindings_expr, env)?;
                self.eval(body, &scope)
            }
            SpecialForm::Quote => {
                let [quoted] = args else {
                    return Err(Error::arity("quote: expected one expression"));
                };
                self.budget.charge(GAS_LITERAL);
                Ok(quoted.clone())
            }
            SpecialForm::Try => {
                let [body, handler] = args else {
                    return Err(Error::arity("try: expected (try body handler)"));
                };
                match self.eval(body, env) {
                    Ok(value) => Ok(value),
                    // Terminal resource errors stay uncatchable for sandbox
                    // safety.
                    Err(err) if err.kind() == ErrorKind::ResourceExhausted => Err(err),
                    Err(err) => {
                        let handler = self.eval(handler, env)?;
                        self.budget.charge(budget::op_cost(1));
                        self.apply(&handler, &[err.to_value()])
                    }
                }
            }
            SpecialForm::Host => {
                let [cmd_expr, arg_exprs @ ..] = args else {
                    return Err(Error::arity("host: expected (host cmd args...)"));
                };
                let cmd = match self.eval(cmd_expr, env)? {
                    Value::Str(s) => s,
                    other => {
                        return Err(Error::type_error(format!(
                            "host: command must be a string, got {}",
                            other.type_name()
                        )));
                    }
                };
                let mut host_args = Vec::with_capacity(arg_exprs.len());
                for arg in arg_exprs {
                    host_args.push(self.eval(arg, env)?);
                }
                self.budget.charge(GAS_CALL);
                self.host.dispatch(&cmd, &host_args)
            }
            SpecialForm::Where => {
                let [col_expr, cond] = args else {
                    return Err(Error::arity("where: expected (where collection condition)"));
                };
                let collection = self.eval(col_expr, env)?.unquote_data();
                let Some(items) = collection.as_list() else {
                    return Err(Error::type_error(format!(
                        "where: expected list, got {}",
                        collection.type_name()
                    )));
                };
                let items = items.to_vec();
                let mut out = Vec::new();
                for item in items {
                    let scope = Env::item_scope(env, &item);
                    self.budget.charge(budget::op_cost(1));
                    if self.eval(cond, &scope)?.is_truthy() {
                        out.push(item);
                    }
                }
                self.budget.charge_list_alloc(out.len());
                Ok(Value::list(out))
            }
            SpecialForm::Transform => {
                let [data_expr, op_exprs @ ..] = args else {
                    return Err(Error::arity("transform: expected (transform data ops...)"));
                };
                let data = self.eval(data_expr, env)?.unquote_data();
                match data {
                    Value::List(items) => {
                        let items = items.to_vec();
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            out.push(self.transform_item(item, op_exprs, env)?);
                        }
                        self.budget.charge_list_alloc(out.len());
                        Ok(Value::list(out))
                    }
                    other => self.transform_item(other, op_exprs, env),
                }
            }
        }
    }

    /// Runs one item through the transform pipeline. Each op expression is
    /// evaluated in the scope of the *current* item, so later ops see the
    /// fields earlier ops produced.
    fn transform_item(&mut self, item: Value, op_exprs: &[Value], env: &Rc<Env>) -> RunResult<Value> {
        let mut acc = item;
        for op_expr in op_exprs {
            let scope = Env::item_scope(env, &acc);
            let descriptor = self.eval(op_expr, &scope)?;
            self.budget.charge(budget::op_cost(1));
            acc = apply_descriptor(self, &descriptor, &acc)?;
        }
        Ok(acc)
    }

    /// Builds the `let` scope, evaluating each binding in the accumulating
    /// environment. Only the nested-pair shape `((name value) …)` is
    /// accepted.
    fn let_scope(&mut self, bindings_expr: &Value, env: &Rc<Env>) -> RunResult<Rc<Env>> {
        let Some(bindings) = bindings_expr.as_list() else {
            return Err(Error::type_error("let: bindings must be a list of (name value) pairs"));
        };
        let scope = Env::child(env);
        for binding in bindings.to_vec() {
            let pair = binding.as_list().map(<[Value]>::to_vec);
            let Some([name_expr, value_expr]) = pair.as_deref() else {
                return Err(Error::type_error(
                    "let: each binding must be a (name value) pair: the flat shape is not accepted",
                ));
            };
            let name = plain_symbol("let", name_expr)?;
            let value = self.eval(value_expr, &scope)?;
            scope.define(name, value)?;
        }
        Ok(scope)
    }
}

/// Extracts a bare (non-`@`) symbol used as a binder name.
fn plain_symbol(form: &str, expr: &Value) -> RunResult<Rc<str>> {
    match expr {
        Value::Str(s) if !s.starts_with('@') => Ok(Rc::clone(s)),
        other => Err(Error::type_error(format!(
            "{form}: expected a symbol, got {other}"
        ))),
    }
}

/// Parses a lambda parameter list: a list of bare symbols.
pub(crate) fn param_list(expr: &Value) -> RunResult<SmallVec<[Rc<str>; 4]>> {
    let Some(items) = expr.as_list() else {
        return Err(Error::type_error("lambda: parameter list must be a list of symbols"));
    };
    items.iter().map(|p| plain_symbol("lambda", p)).collect()
}
