//! JPN → S-expression decompiler.
//!
//! Reverses the compiler's canonical sequences. Round trip is exact up to
//! the documented canonicalizations: `quote` re-emerges as `"@"`, `do`
//! bodies flatten (and zero/one-expression bodies collapse), quoted string
//! scalars re-emerge in `@` prefix form, and a discarded-value group in
//! operand position floats out to statement position (the two compile to
//! the same instruction stream and are semantically identical). Streams
//! outside the compiler's shapes are rejected with `Syntax`.

use crate::{
    error::{Error, RunResult},
    value::{ObjectMap, Value},
};

use super::code::{Code, Instr};

/// Splices `part` into a flattening `do` body.
fn push_do_part(items: &mut Vec<Value>, part: Value) {
    match &part {
        Value::List(rest) if rest.first().and_then(Value::as_str) == Some("do") => {
            items.extend_from_slice(&rest[1..]);
        }
        _ => items.push(part),
    }
}

/// Decompiles a code block back to its source expression.
///
/// # Errors
/// Returns `Syntax` when the stream does not correspond to any compiler
/// output.
pub fn decompile(code: &Code) -> RunResult<Value> {
    let mut decompiler = Decompiler {
        instrs: code.instrs(),
        stack: Vec::new(),
        lets: Vec::new(),
    };
    decompiler.region(0, code.len())?;
    decompiler.finish()
}

/// One reconstructed stack entry.
#[derive(Debug, Clone)]
enum Entry {
    /// An ordinary expression.
    Expr(Value),
    /// A constant pushed by `Const`; remembers the raw value so structural
    /// consumers (`LAMBDA`, `WHERE`, `TRANSFORM`, `DEF`, `BIND`) can use it
    /// unwrapped.
    Lit(Value),
    /// An expression discarded by `POP`, awaiting absorption into a `do`.
    Discard(Value),
}

struct Decompiler<'a> {
    instrs: &'a [Instr],
    stack: Vec<Entry>,
    /// Open `let` groups: bindings collected so far, plus the stack depth at
    /// `ENTER`. Discards below that depth belong to the enclosing region.
    lets: Vec<(Vec<Value>, usize)>,
}

impl Decompiler<'_> {
    /// Converts a stack entry to its source-expression form.
    fn to_expr(entry: Entry) -> Value {
        match entry {
            Entry::Expr(e) | Entry::Discard(e) => e,
            Entry::Lit(value) => match value {
                Value::Str(s) => Value::str(format!("@{s}")),
                Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => value,
                Value::List(ref items) if items.is_empty() => value,
                other => Value::list(vec![Value::str("@"), other]),
            },
        }
    }

    /// Pops one operand without touching pending discards below it.
    fn pop_plain(&mut self, context: &str) -> RunResult<Value> {
        let entry = self
            .stack
            .pop()
            .ok_or_else(|| Error::syntax(format!("decompile: stack underflow at {context}")))?;
        if matches!(entry, Entry::Discard(_)) {
            return Err(Error::syntax(format!("decompile: dangling POP at {context}")));
        }
        Ok(Self::to_expr(entry))
    }

    /// Pops an operand and folds pending discards above `floor` into a
    /// flattened `do`. Valid only where the discards can belong to no
    /// outer statement: above another operand, inside a `let` binding or
    /// body, or at a region end.
    fn pop_absorbing(&mut self, context: &str, floor: usize) -> RunResult<Value> {
        let mut expr = self.pop_plain(context)?;
        while self.stack.len() > floor && matches!(self.stack.last(), Some(Entry::Discard(_))) {
            let Some(Entry::Discard(discarded)) = self.stack.pop() else {
                unreachable!()
            };
            let mut items = vec![Value::str("do")];
            push_do_part(&mut items, discarded);
            push_do_part(&mut items, expr);
            expr = Value::list(items);
        }
        Ok(expr)
    }

    /// Pops a raw constant pushed for a structural consumer.
    fn pop_lit(&mut self, context: &str) -> RunResult<Value> {
        match self.stack.pop() {
            Some(Entry::Lit(value)) => Ok(value),
            _ => Err(Error::syntax(format!(
                "decompile: expected a literal operand at {context}"
            ))),
        }
    }

    /// Pops `argc` operands in source order. All but the bottom-most absorb
    /// discards (those can only belong to the operand being popped); the
    /// bottom-most leaves them for the enclosing statement.
    fn pop_args(&mut self, argc: usize, context: &str) -> RunResult<Vec<Value>> {
        let mut args = Vec::with_capacity(argc);
        for i in 0..argc {
            let is_bottom = i + 1 == argc;
            args.push(if is_bottom {
                self.pop_plain(context)?
            } else {
                self.pop_absorbing(context, 0)?
            });
        }
        args.reverse();
        Ok(args)
    }

    /// Depth of the innermost open `let`, the floor for its absorptions.
    fn let_floor(&self) -> usize {
        self.lets.last().map_or(0, |(_, depth)| *depth)
    }

    /// Decompiles the half-open instruction range `[start, end)` onto the
    /// shared stack.
    fn region(&mut self, start: usize, end: usize) -> RunResult<()> {
        let mut pos = start;
        while pos < end {
            pos = self.step(pos, end)?;
        }
        if pos != end {
            return Err(Error::syntax("decompile: control flow crosses region boundary"));
        }
        Ok(())
    }

    /// Decompiles a nested region with its own stack, returning its single
    /// result expression.
    fn sub_region(&mut self, start: usize, end: usize) -> RunResult<Value> {
        let saved = std::mem::take(&mut self.stack);
        self.region(start, end)?;
        let result = self.pop_absorbing("region result", 0)?;
        if !self.stack.is_empty() {
            return Err(Error::syntax("decompile: region left residual stack entries"));
        }
        self.stack = saved;
        Ok(result)
    }

    /// Processes the instruction at `pos`, returning the next position.
    fn step(&mut self, pos: usize, end: usize) -> RunResult<usize> {
        match &self.instrs[pos] {
            Instr::Const(value) => {
                self.stack.push(Entry::Lit(value.clone()));
                Ok(pos + 1)
            }
            Instr::Load(name) => {
                self.stack.push(Entry::Expr(Value::Str(std::rc::Rc::clone(name))));
                Ok(pos + 1)
            }
            Instr::CallOp { argc, name } => {
                let mut items = self.pop_args(*argc, "operator application")?;
                items.insert(0, Value::Str(std::rc::Rc::clone(name)));
                self.stack.push(Entry::Expr(Value::list(items)));
                Ok(pos + 1)
            }
            Instr::Apply { argc } => {
                let args = self.pop_args(*argc + 1, "__apply__")?;
                self.stack.push(Entry::Expr(Value::list(args)));
                Ok(pos + 1)
            }
            Instr::MakeDict { pairs } => {
                let mut entries = Vec::with_capacity(*pairs);
                for _ in 0..*pairs {
                    let value = self.pop_absorbing("__dict__ value", 0)?;
                    let key = match self.stack.pop() {
                        Some(Entry::Lit(Value::Str(s))) => format!("@{s}"),
                        Some(Entry::Expr(Value::Str(s))) => s.to_string(),
                        _ => return Err(Error::syntax("decompile: object key must be a string token")),
                    };
                    entries.push((key, value));
                }
                entries.reverse();
                let mut map = ObjectMap::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key, value);
                }
                self.stack.push(Entry::Expr(Value::object(map)));
                Ok(pos + 1)
            }
            Instr::Def => {
                let name = self.pop_lit("DEF name")?;
                let value = self.pop_plain("DEF value")?;
                self.stack
                    .push(Entry::Expr(Value::list(vec![Value::str("def"), name, value])));
                Ok(pos + 1)
            }
            Instr::Lambda => {
                let body = self.pop_lit("LAMBDA body")?;
                let params = self.pop_lit("LAMBDA params")?;
                self.stack
                    .push(Entry::Expr(Value::list(vec![Value::str("lambda"), params, body])));
                Ok(pos + 1)
            }
            Instr::Pop => {
                let expr = self.pop_plain("POP")?;
                self.stack.push(Entry::Discard(expr));
                Ok(pos + 1)
            }
            Instr::Enter => {
                self.lets.push((Vec::new(), self.stack.len()));
                Ok(pos + 1)
            }
            Instr::Bind => {
                let name = self.pop_lit("BIND name")?;
                let floor = self.let_floor();
                let value = self.pop_absorbing("BIND value", floor)?;
                let Some((bindings, _)) = self.lets.last_mut() else {
                    return Err(Error::syntax("decompile: BIND outside a let scope"));
                };
                bindings.push(Value::list(vec![name, value]));
                Ok(pos + 1)
            }
            Instr::Exit => {
                let floor = self.let_floor();
                let body = self.pop_absorbing("EXIT body", floor)?;
                let Some((bindings, depth)) = self.lets.pop() else {
                    return Err(Error::syntax("decompile: EXIT outside a let scope"));
                };
                if self.stack.len() != depth {
                    return Err(Error::syntax("decompile: let body left residual stack entries"));
                }
                self.stack.push(Entry::Expr(Value::list(vec![
                    Value::str("let"),
                    Value::list(bindings),
                    body,
                ])));
                Ok(pos + 1)
            }
            Instr::JumpIfFalse { target } => {
                // if-shape: cond, JUMP_IF_FALSE Le, then…, JUMP Lx, Le: else…, Lx:
                let cond = self.pop_plain("if condition")?;
                let else_at = *target;
                let Some(Instr::Jump { target: end_at }) = self.instrs.get(else_at.wrapping_sub(1)) else {
                    return Err(Error::syntax("decompile: conditional without joining jump"));
                };
                let end_at = *end_at;
                if else_at > end || end_at > end || else_at <= pos + 1 {
                    return Err(Error::syntax("decompile: malformed conditional region"));
                }
                let then_branch = self.sub_region(pos + 1, else_at - 1)?;
                let else_branch = self.sub_region(else_at, end_at)?;
                self.stack.push(Entry::Expr(Value::list(vec![
                    Value::str("if"),
                    cond,
                    then_branch,
                    else_branch,
                ])));
                Ok(end_at)
            }
            Instr::Try { handler } => {
                // try-shape: TRY Lh, body…, END_TRY, JUMP Lx, Lh: handler…, SWAP, 1 __apply__, Lx:
                let handler_at = *handler;
                if handler_at < 2 || handler_at > end {
                    return Err(Error::syntax("decompile: malformed try region"));
                }
                let (Some(Instr::EndTry), Some(Instr::Jump { target: end_at })) =
                    (self.instrs.get(handler_at - 2), self.instrs.get(handler_at - 1))
                else {
                    return Err(Error::syntax("decompile: try body without END_TRY"));
                };
                let end_at = *end_at;
                if end_at < 2
                    || end_at > end
                    || !matches!(self.instrs.get(end_at - 2), Some(Instr::Swap))
                    || !matches!(self.instrs.get(end_at - 1), Some(Instr::Apply { argc: 1 }))
                {
                    return Err(Error::syntax("decompile: malformed try handler"));
                }
                let body = self.sub_region(pos + 1, handler_at - 2)?;
                let handler_expr = self.sub_region(handler_at, end_at - 2)?;
                self.stack.push(Entry::Expr(Value::list(vec![
                    Value::str("try"),
                    body,
                    handler_expr,
                ])));
                Ok(end_at)
            }
            Instr::Host { argc } => {
                let mut items = self.pop_args(*argc + 1, "HOST")?;
                items.insert(0, Value::str("host"));
                self.stack.push(Entry::Expr(Value::list(items)));
                Ok(pos + 1)
            }
            Instr::Where => {
                let cond = self.pop_lit("WHERE condition")?;
                let collection = self.pop_plain("WHERE collection")?;
                self.stack.push(Entry::Expr(Value::list(vec![
                    Value::str("where"),
                    collection,
                    cond,
                ])));
                Ok(pos + 1)
            }
            Instr::Transform { ops } => {
                let mut op_exprs = Vec::with_capacity(*ops);
                for _ in 0..*ops {
                    op_exprs.push(self.pop_lit("TRANSFORM op")?);
                }
                op_exprs.reverse();
                let data = self.pop_plain("TRANSFORM data")?;
                let mut items = vec![Value::str("transform"), data];
                items.extend(op_exprs);
                self.stack.push(Entry::Expr(Value::list(items)));
                Ok(pos + 1)
            }
            Instr::Jump { .. } | Instr::Swap | Instr::EndTry | Instr::Ret => Err(Error::syntax(format!(
                "decompile: {:?} outside its owning form",
                self.instrs[pos]
            ))),
        }
    }

    /// Extracts the final expression; the stack must end up empty.
    fn finish(&mut self) -> RunResult<Value> {
        let result = self.pop_absorbing("program result", 0)?;
        if self.stack.is_empty() && self.lets.is_empty() {
            Ok(result)
        } else {
            Err(Error::syntax("decompile: residual stack entries at end of program"))
        }
    }
}
