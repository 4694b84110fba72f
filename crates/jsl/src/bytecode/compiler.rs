//! S-expression → JPN compiler.
//!
//! Applications compile to postfix with an explicit arity: argument code,
//! then the count, then the operator word. Special forms get dedicated
//! sequences (documented per branch below); forward jumps are emitted with a
//! placeholder and patched once the landing site is known.

use std::rc::Rc;

use crate::{
    error::{Error, RunResult},
    eval::SpecialForm,
    value::Value,
};

use super::code::{Code, Instr};

/// Compiles one expression into a code block.
///
/// # Errors
/// Returns the same shape errors the tree evaluator would raise for a
/// malformed form (`ArityError` for a bad special-form shape, `TypeError`
/// for a non-symbol binder).
pub fn compile(expr: &Value) -> RunResult<Code> {
    let mut compiler = Compiler { instrs: Vec::new() };
    compiler.expr(expr)?;
    Ok(Code::new(compiler.instrs))
}

struct Compiler {
    instrs: Vec<Instr>,
}

impl Compiler {
    fn emit(&mut self, instr: Instr) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    /// Emits a jump with a placeholder target, returning its index for
    /// [`Self::patch`].
    fn emit_jump(&mut self, instr: Instr) -> usize {
        self.emit(instr)
    }

    /// Points the jump at `at` to the next emitted instruction.
    fn patch(&mut self, at: usize) {
        let target = self.instrs.len();
        match &mut self.instrs[at] {
            Instr::Jump { target: t } | Instr::JumpIfFalse { target: t } | Instr::Try { handler: t } => *t = target,
            other => unreachable!("patching non-jump {other:?}"),
        }
    }

    fn expr(&mut self, expr: &Value) -> RunResult<()> {
        match expr {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
                self.emit(Instr::Const(expr.clone()));
                Ok(())
            }
            Value::Str(s) => {
                match s.strip_prefix('@') {
                    Some(literal) => self.emit(Instr::Const(Value::str(literal))),
                    None => self.emit(Instr::Load(Rc::clone(s))),
                };
                Ok(())
            }
            Value::Object(map) => {
                for (key_expr, value_expr) in map.iter() {
                    match key_expr.strip_prefix('@') {
                        Some(literal) => {
                            self.emit(Instr::Const(Value::str(literal)));
                        }
                        None => {
                            self.emit(Instr::Load(Rc::from(key_expr.as_str())));
                        }
                    }
                    self.expr(value_expr)?;
                }
                self.emit(Instr::MakeDict { pairs: map.len() });
                Ok(())
            }
            Value::List(items) => {
                let Some((head, args)) = items.split_first() else {
                    self.emit(Instr::Const(expr.clone()));
                    return Ok(());
                };
                if let Some(form) = SpecialForm::from_head(head) {
                    return self.special_form(form, args);
                }
                self.application(head, args)
            }
            other => Err(Error::type_error(format!(
                "cannot compile a {} value",
                other.type_name()
            ))),
        }
    }

    /// `[head a…]` → `a-code…, n, head` when the head is a plain symbol,
    /// `head-code, a-code…, n, __apply__` when it is itself an expression.
    fn application(&mut self, head: &Value, args: &[Value]) -> RunResult<()> {
        match head {
            Value::Str(name) if !name.starts_with('@') => {
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Instr::CallOp {
                    argc: args.len(),
                    name: Rc::clone(name),
                });
            }
            _ => {
                self.expr(head)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Instr::Apply { argc: args.len() });
            }
        }
        Ok(())
    }

    fn special_form(&mut self, form: SpecialForm, args: &[Value]) -> RunResult<()> {
        match form {
            // value-code, @name, DEF
            SpecialForm::Def => {
                let [name_expr, value_expr] = args else {
                    return Err(Error::arity("def: expected (def name expr)"));
                };
                let name = binder("def", name_expr)?;
                self.expr(value_expr)?;
                self.emit(Instr::Const(Value::Str(name)));
                self.emit(Instr::Def);
                Ok(())
            }
            // {params}, {body}, LAMBDA: operands stay unevaluated
            SpecialForm::Lambda => {
                let [params_expr, body] = args else {
                    return Err(Error::arity("lambda: expected (lambda (params...) body)"));
                };
                crate::eval::param_list(params_expr)?;
                self.emit(Instr::Const(params_expr.clone()));
                self.emit(Instr::Const(body.clone()));
                self.emit(Instr::Lambda);
                Ok(())
            }
            // cond, JUMP_IF_FALSE Le, then, JUMP Lx, Le: else, Lx:
            SpecialForm::If => {
                let [cond, then_branch, else_branch] = args else {
                    return Err(Error::arity("if: expected (if cond then else)"));
                };
                self.expr(cond)?;
                let to_else = self.emit_jump(Instr::JumpIfFalse { target: usize::MAX });
                self.expr(then_branch)?;
                let to_end = self.emit_jump(Instr::Jump { target: usize::MAX });
                self.patch(to_else);
                self.expr(else_branch)?;
                self.patch(to_end);
                Ok(())
            }
            // e1, POP, e2, POP, …, en: empty do pushes null
            SpecialForm::Do => {
                let Some((last, init)) = args.split_last() else {
                    self.emit(Instr::Const(Value::Null));
                    return Ok(());
                };
                for expr in init {
                    self.expr(expr)?;
                    self.emit(Instr::Pop);
                }
                self.expr(last)
            }
            // ENTER, (v, @name, BIND)…, body, EXIT
            SpecialForm::Let => {
                let [bindings_expr, body] = args else {
                    return Err(Error::arity("let: expected (let ((name value)...) body)"));
                };
                let Some(bindings) = bindings_expr.as_list() else {
                    return Err(Error::type_error("let: bindings must be a list of (name value) pairs"));
                };
                self.emit(Instr::Enter);
                for binding in bindings {
                    let Some([name_expr, value_expr]) = binding.as_list() else {
                        return Err(Error::type_error(
                            "let: each binding must be a (name value) pair: the flat shape is not accepted",
                        ));
                    };
                    let name = binder("let", name_expr)?;
                    self.expr(value_expr)?;
                    self.emit(Instr::Const(Value::Str(name)));
                    self.emit(Instr::Bind);
                }
                self.expr(body)?;
                self.emit(Instr::Exit);
                Ok(())
            }
            // the quoted expression as a single constant
            SpecialForm::Quote => {
                let [quoted] = args else {
                    return Err(Error::arity("quote: expected one expression"));
                };
                self.emit(Instr::Const(quoted.clone()));
                Ok(())
            }
            // TRY Lh, body, END_TRY, JUMP Lx, Lh: handler, SWAP, 1 __apply__, Lx:
            SpecialForm::Try => {
                let [body, handler] = args else {
                    return Err(Error::arity("try: expected (try body handler)"));
                };
                let try_at = self.emit_jump(Instr::Try { handler: usize::MAX });
                self.expr(body)?;
                self.emit(Instr::EndTry);
                let to_end = self.emit_jump(Instr::Jump { target: usize::MAX });
                self.patch(try_at);
                self.expr(handler)?;
                self.emit(Instr::Swap);
                self.emit(Instr::Apply { argc: 1 });
                self.patch(to_end);
                Ok(())
            }
            // cmd, args…, n, HOST
            SpecialForm::Host => {
                let [cmd, host_args @ ..] = args else {
                    return Err(Error::arity("host: expected (host cmd args...)"));
                };
                self.expr(cmd)?;
                for arg in host_args {
                    self.expr(arg)?;
                }
                self.emit(Instr::Host { argc: host_args.len() });
                Ok(())
            }
            // collection, {cond}, WHERE: the condition stays unevaluated
            SpecialForm::Where => {
                let [collection, cond] = args else {
                    return Err(Error::arity("where: expected (where collection condition)"));
                };
                self.expr(collection)?;
                self.emit(Instr::Const(cond.clone()));
                self.emit(Instr::Where);
                Ok(())
            }
            // data, {op}…, k, TRANSFORM: the ops stay unevaluated
            SpecialForm::Transform => {
                let [data, ops @ ..] = args else {
                    return Err(Error::arity("transform: expected (transform data ops...)"));
                };
                self.expr(data)?;
                for op in ops {
                    self.emit(Instr::Const(op.clone()));
                }
                self.emit(Instr::Transform { ops: ops.len() });
                Ok(())
            }
        }
    }
}

/// Extracts a bare symbol used as a binder name.
fn binder(form: &str, expr: &Value) -> RunResult<Rc<str>> {
    match expr {
        Value::Str(s) if !s.starts_with('@') => Ok(Rc::clone(s)),
        other => Err(Error::type_error(format!("{form}: expected a symbol, got {other}"))),
    }
}
