//! The JPN stack machine.
//!
//! Machine state is the quintuple `(S, pc, C, E, K)` of value stack,
//! program counter, code block, environment, and call stack, plus the
//! try-handler stack and the shared budget. The machine checks the budget at every
//! instruction boundary: gas or step exhaustion yields a [`VmState`]
//! snapshot the caller can serialize and resume; terminal limits raise
//! *ResourceExhausted* and are not catchable in-language.
//!
//! Item iteration (`WHERE`, `TRANSFORM`) and higher-order builtins evaluate
//! their sub-computations on nested runs of the same machine. Nested runs
//! share and keep charging the budget but never pause themselves; an
//! exhausted budget surfaces as a pause at the next outer boundary.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    budget::{self, Budget, GAS_CALL, GAS_LITERAL, GAS_LOOKUP},
    builtins::{CallCtx, apply_descriptor},
    env::Env,
    error::{Error, ErrorKind, RunResult},
    eval::param_list,
    host::HostRegistry,
    tracer::{TraceEvent, VmTracer},
    value::{Closure, ObjectMap, Value},
};

use super::{code::Instr, compile, Code};

/// A saved caller: everything needed to continue after a frame returns.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub stack: Vec<Value>,
    pub pc: usize,
    pub code: Rc<Code>,
    pub env: Rc<Env>,
    /// Height of the try stack when this frame was pushed; restored on
    /// return so handlers never outlive their frame.
    pub trys_len: usize,
}

/// An installed error handler.
#[derive(Debug, Clone)]
pub(crate) struct TryFrame {
    /// Where the handler code starts, in the owning frame's code block.
    pub handler_pc: usize,
    /// Value-stack height to restore before entering the handler.
    pub stack_len: usize,
    /// Environment to restore before entering the handler.
    pub env: Rc<Env>,
    /// Call-stack depth of the owning frame.
    pub frame_depth: usize,
}

/// The serializable machine snapshot: `(S, pc, C, E, K)` plus handlers.
#[derive(Debug, Clone)]
pub(crate) struct VmState {
    pub stack: Vec<Value>,
    pub pc: usize,
    pub code: Rc<Code>,
    pub env: Rc<Env>,
    pub frames: Vec<Frame>,
    pub trys: Vec<TryFrame>,
}

/// How a run ended: a final value, or a resumable pause.
#[derive(Debug)]
pub(crate) enum VmOutcome {
    Done(Value),
    Paused(VmState),
}

pub(crate) struct Vm<'a> {
    host: &'a HostRegistry,
    budget: &'a mut Budget,
    tracer: &'a mut dyn VmTracer,
    stack: Vec<Value>,
    pc: usize,
    code: Rc<Code>,
    env: Rc<Env>,
    frames: Vec<Frame>,
    trys: Vec<TryFrame>,
    /// Nested runs complete without pausing; the pause lands at the next
    /// boundary of the outermost machine.
    nested: bool,
    /// Call depth contributed by enclosing nested runs, counted against the
    /// budget's depth cap together with `frames.len()`.
    depth_base: usize,
}

impl<'a> Vm<'a> {
    pub fn new(
        host: &'a HostRegistry,
        budget: &'a mut Budget,
        tracer: &'a mut dyn VmTracer,
        code: Rc<Code>,
        env: Rc<Env>,
    ) -> Self {
        Self {
            host,
            budget,
            tracer,
            stack: Vec::new(),
            pc: 0,
            code,
            env,
            frames: Vec::new(),
            trys: Vec::new(),
            nested: false,
            depth_base: 0,
        }
    }

    /// Rebuilds a machine from a paused snapshot.
    pub fn from_state(
        host: &'a HostRegistry,
        budget: &'a mut Budget,
        tracer: &'a mut dyn VmTracer,
        state: VmState,
    ) -> Self {
        Self {
            host,
            budget,
            tracer,
            stack: state.stack,
            pc: state.pc,
            code: state.code,
            env: state.env,
            frames: state.frames,
            trys: state.trys,
            nested: false,
            depth_base: 0,
        }
    }

    /// Runs to completion, pause, or error.
    pub fn run(mut self) -> RunResult<VmOutcome> {
        match self.run_loop()? {
            Some(value) => Ok(VmOutcome::Done(value)),
            None => {
                self.tracer.on_event(&TraceEvent::Paused {
                    steps: self.budget.steps_used(),
                });
                Ok(VmOutcome::Paused(VmState {
                    stack: self.stack,
                    pc: self.pc,
                    code: self.code,
                    env: self.env,
                    frames: self.frames,
                    trys: self.trys,
                }))
            }
        }
    }

    /// The instruction loop. `Ok(Some(value))` on completion, `Ok(None)` on
    /// pause (outermost machine only).
    fn run_loop(&mut self) -> RunResult<Option<Value>> {
        loop {
            if !self.nested && self.budget.should_pause() {
                return Ok(None);
            }
            // Implicit return: a block ends carrying its top of stack.
            if self.pc >= self.code.len() {
                let value = self.stack.pop().unwrap_or(Value::Null);
                match self.frames.pop() {
                    Some(frame) => {
                        self.stack = frame.stack;
                        self.pc = frame.pc;
                        self.code = frame.code;
                        self.env = frame.env;
                        self.trys.truncate(frame.trys_len);
                        self.stack.push(value);
                        self.tracer.on_event(&TraceEvent::Return {
                            depth: self.frames.len(),
                        });
                        continue;
                    }
                    None => return Ok(Some(value)),
                }
            }

            self.budget.count_step();
            if self.budget.steps_used() % 32 == 0 {
                self.budget.check_terminal()?;
            }

            let instr = self.code.get(self.pc).cloned().expect("pc bounds checked");
            self.tracer.on_event(&TraceEvent::Instruction {
                pc: self.pc,
                op: instr.mnemonic(),
            });
            self.pc += 1;
            if let Err(err) = self.exec(instr) {
                self.raise(err)?;
            }
        }
    }

    fn exec(&mut self, instr: Instr) -> RunResult<()> {
        match instr {
            Instr::Const(value) => {
                self.budget.charge(GAS_LITERAL);
                self.stack.push(value);
            }
            Instr::Load(name) => {
                self.budget.charge(GAS_LOOKUP);
                let value = self.env.lookup(&name)?;
                self.stack.push(value);
            }
            Instr::CallOp { argc, name } => {
                self.budget.charge(budget::op_cost(argc));
                let args = self.pop_n(argc)?;
                let callee = self.env.lookup(&name)?;
                self.apply(&callee, args)?;
            }
            Instr::Apply { argc } => {
                self.budget.charge(budget::op_cost(argc));
                let args = self.pop_n(argc)?;
                let callee = self.pop()?;
                self.apply(&callee, args)?;
            }
            Instr::MakeDict { pairs } => {
                let flat = self.pop_n(pairs * 2)?;
                let mut map = ObjectMap::with_capacity(pairs);
                for chunk in flat.chunks_exact(2) {
                    let Value::Str(key) = &chunk[0] else {
                        return Err(Error::type_error(format!(
                            "object key evaluated to {}, expected string",
                            chunk[0].type_name()
                        )));
                    };
                    map.insert(key.to_string(), chunk[1].clone());
                }
                self.budget.charge_object_alloc(map.len());
                self.stack.push(Value::object(map));
            }
            Instr::Jump { target } => self.pc = target,
            Instr::JumpIfFalse { target } => {
                if !self.pop()?.is_truthy() {
                    self.pc = target;
                }
            }
            Instr::Lambda => {
                let body = self.pop()?;
                let params_expr = self.pop()?;
                let params = param_list(&params_expr)?;
                self.stack.push(Value::Closure(Rc::new(Closure::new(
                    params,
                    body,
                    Rc::clone(&self.env),
                ))));
            }
            Instr::Ret => {
                // Force the implicit-return path on the next iteration.
                self.pc = self.code.len();
            }
            Instr::Def => {
                let name = self.pop_symbol("def")?;
                let value = self.pop()?;
                self.env.define(name, value.clone())?;
                self.stack.push(value);
            }
            Instr::Bind => {
                let name = self.pop_symbol("let")?;
                let value = self.pop()?;
                self.env.define(name, value)?;
            }
            Instr::Enter => {
                self.env = Env::child(&self.env);
            }
            Instr::Exit => {
                let parent = self
                    .env
                    .parent()
                    .ok_or_else(|| Error::syntax("EXIT without an enclosing scope"))?;
                self.env = Rc::clone(parent);
            }
            Instr::Pop => {
                self.pop()?;
            }
            Instr::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(Error::syntax("SWAP on a short stack"));
                }
                self.stack.swap(len - 1, len - 2);
            }
            Instr::Try { handler } => {
                self.trys.push(TryFrame {
                    handler_pc: handler,
                    stack_len: self.stack.len(),
                    env: Rc::clone(&self.env),
                    frame_depth: self.frames.len(),
                });
            }
            Instr::EndTry => {
                self.trys.pop();
            }
            Instr::Host { argc } => {
                self.budget.charge(GAS_CALL);
                let args = self.pop_n(argc)?;
                let command = match self.pop()? {
                    Value::Str(s) => s,
                    other => {
                        return Err(Error::type_error(format!(
                            "host: command must be a string, got {}",
                            other.type_name()
                        )));
                    }
                };
                self.tracer.on_event(&TraceEvent::HostCall {
                    command: command.to_string(),
                });
                let response = self.host.dispatch(&command, &args)?;
                self.stack.push(response);
            }
            Instr::Where => {
                let cond_expr = self.pop()?;
                let collection = self.pop()?.unquote_data();
                let Some(items) = collection.as_list() else {
                    return Err(Error::type_error(format!(
                        "where: expected list, got {}",
                        collection.type_name()
                    )));
                };
                let items = items.to_vec();
                let cond_code = Rc::new(compile(&cond_expr)?);
                let mut out = Vec::new();
                for item in items {
                    let scope = Env::item_scope(&self.env, &item);
                    self.budget.charge(budget::op_cost(1));
                    if self.run_to_completion(Rc::clone(&cond_code), scope)?.is_truthy() {
                        out.push(item);
                    }
                }
                self.budget.charge_list_alloc(out.len());
                self.stack.push(Value::list(out));
            }
            Instr::Transform { ops } => {
                let op_exprs = self.pop_n(ops)?;
                let data = self.pop()?.unquote_data();
                let op_codes = op_exprs
                    .iter()
                    .map(|op| compile(op).map(Rc::new))
                    .collect::<RunResult<Vec<_>>>()?;
                match data {
                    Value::List(items) => {
                        let items = items.to_vec();
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            out.push(self.transform_item(item, &op_codes)?);
                        }
                        self.budget.charge_list_alloc(out.len());
                        self.stack.push(Value::list(out));
                    }
                    other => {
                        let result = self.transform_item(other, &op_codes)?;
                        self.stack.push(result);
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs one item through the transform pipeline; each op is evaluated in
    /// the scope of the current item.
    fn transform_item(&mut self, item: Value, op_codes: &[Rc<Code>]) -> RunResult<Value> {
        let mut acc = item;
        for op_code in op_codes {
            let scope = Env::item_scope(&self.env, &acc);
            self.budget.charge(budget::op_cost(1));
            let descriptor = self.run_to_completion(Rc::clone(op_code), scope)?;
            acc = apply_descriptor(self, &descriptor, &acc)?;
        }
        Ok(acc)
    }

    /// Applies a callee to already-evaluated arguments. Closures push a
    /// frame; builtins run inline.
    fn apply(&mut self, callee: &Value, args: SmallVec<[Value; 8]>) -> RunResult<()> {
        self.budget.charge(GAS_CALL);
        match callee {
            Value::Closure(closure) => {
                self.push_frame(closure, &args)?;
                Ok(())
            }
            Value::Builtin(def) => {
                let result = def.call(self, &args)?;
                self.stack.push(result);
                Ok(())
            }
            other => Err(Error::type_error(format!("{} is not callable", other.type_name()))),
        }
    }

    fn push_frame(&mut self, closure: &Rc<Closure>, args: &[Value]) -> RunResult<()> {
        self.budget.check_depth(self.depth_base + self.frames.len())?;
        if closure.params.len() != args.len() {
            return Err(Error::arity(format!(
                "closure expected {} argument(s), got {}",
                closure.params.len(),
                args.len()
            )));
        }
        let body_code = compiled_body(closure)?;
        let call_env = Env::child_with(
            &closure.env,
            closure.params.iter().cloned().zip(args.iter().cloned()),
        );
        self.frames.push(Frame {
            stack: std::mem::take(&mut self.stack),
            pc: self.pc,
            code: std::mem::replace(&mut self.code, body_code),
            env: std::mem::replace(&mut self.env, call_env),
            trys_len: self.trys.len(),
        });
        self.pc = 0;
        self.tracer.on_event(&TraceEvent::Call {
            depth: self.frames.len(),
        });
        Ok(())
    }

    /// Evaluates a code block to completion on this machine, preserving the
    /// current execution state around it. Used by item iteration and by
    /// builtins calling closures.
    fn run_to_completion(&mut self, code: Rc<Code>, env: Rc<Env>) -> RunResult<Value> {
        let saved_stack = std::mem::take(&mut self.stack);
        let saved_frames = std::mem::take(&mut self.frames);
        let saved_trys = std::mem::take(&mut self.trys);
        let saved_pc = self.pc;
        let saved_code = std::mem::replace(&mut self.code, code);
        let saved_env = std::mem::replace(&mut self.env, env);
        let saved_nested = self.nested;
        let saved_depth_base = self.depth_base;

        self.pc = 0;
        self.nested = true;
        self.depth_base = saved_depth_base + saved_frames.len() + 1;

        let result = self.run_loop();

        self.stack = saved_stack;
        self.frames = saved_frames;
        self.trys = saved_trys;
        self.pc = saved_pc;
        self.code = saved_code;
        self.env = saved_env;
        self.nested = saved_nested;
        self.depth_base = saved_depth_base;

        match result? {
            Some(value) => Ok(value),
            None => unreachable!("nested runs never pause"),
        }
    }

    /// Routes a raised error to the innermost handler, or out of the
    /// machine. Terminal resource errors stay uncatchable.
    fn raise(&mut self, err: Error) -> RunResult<()> {
        if err.kind() == ErrorKind::ResourceExhausted {
            return Err(err);
        }
        let Some(try_frame) = self.trys.pop() else {
            return Err(err);
        };
        while self.frames.len() > try_frame.frame_depth {
            let frame = self.frames.pop().expect("frame depth checked");
            self.stack = frame.stack;
            self.pc = frame.pc;
            self.code = frame.code;
            self.env = frame.env;
        }
        self.stack.truncate(try_frame.stack_len);
        self.env = try_frame.env;
        self.pc = try_frame.handler_pc;
        self.stack.push(err.to_value());
        Ok(())
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| Error::syntax("stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> RunResult<SmallVec<[Value; 8]>> {
        if self.stack.len() < n {
            return Err(Error::syntax("stack underflow"));
        }
        Ok(self.stack.drain(self.stack.len() - n..).collect())
    }

    fn pop_symbol(&mut self, form: &str) -> RunResult<Rc<str>> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            other => Err(Error::type_error(format!(
                "{form}: expected a symbol, got {other}"
            ))),
        }
    }
}

impl CallCtx for Vm<'_> {
    fn call_value(&mut self, callee: &Value, args: &[Value]) -> RunResult<Value> {
        match callee {
            Value::Closure(closure) => {
                self.budget.check_depth(self.depth_base + self.frames.len())?;
                self.budget.charge(GAS_CALL);
                if closure.params.len() != args.len() {
                    return Err(Error::arity(format!(
                        "closure expected {} argument(s), got {}",
                        closure.params.len(),
                        args.len()
                    )));
                }
                let body_code = compiled_body(closure)?;
                let call_env = Env::child_with(
                    &closure.env,
                    closure.params.iter().cloned().zip(args.iter().cloned()),
                );
                self.run_to_completion(body_code, call_env)
            }
            Value::Builtin(def) => {
                self.budget.charge(GAS_CALL);
                def.call(self, args)
            }
            other => Err(Error::type_error(format!("{} is not callable", other.type_name()))),
        }
    }

    fn budget(&mut self) -> &mut Budget {
        self.budget
    }
}

/// The closure body cache: compiled on first call, shared thereafter.
fn compiled_body(closure: &Closure) -> RunResult<Rc<Code>> {
    if let Some(code) = closure.compiled.get() {
        return Ok(Rc::clone(code));
    }
    let code = Rc::new(compile(&closure.body)?);
    Ok(Rc::clone(closure.compiled.get_or_init(|| code)))
}
