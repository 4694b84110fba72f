//! Public interface for running JSL code.
//!
//! A [`Runtime`] owns the frozen prelude and the host-command registry. The
//! canonical engine compiles to JPN and runs the stack VM; its step and gas
//! accounting are authoritative and only it produces resumable [`Paused`]
//! states. The tree walker stays available as a reference oracle through
//! [`Runtime::eval_tree`].
//!
//! # Example
//! ```
//! use jsl::{Budget, RunProgress, Runtime, Value};
//! use serde_json::json;
//!
//! let rt = Runtime::new();
//! let env = rt.new_env();
//! let program = Value::from_json(&json!(["+", 1, 2])).unwrap();
//! match rt.evaluate(&program, &env, Budget::unlimited()).unwrap() {
//!     RunProgress::Complete(value) => assert_eq!(value, Value::Int(3)),
//!     RunProgress::Paused(_) => unreachable!("unlimited budget"),
//! }
//! ```

use std::rc::Rc;

use crate::{
    budget::Budget,
    bytecode::{Vm, VmOutcome, VmState, compile},
    cas,
    env::Env,
    error::RunResult,
    eval,
    host::HostRegistry,
    tracer::{NoopTracer, VmTracer},
    value::Value,
};

/// The evaluation context: frozen prelude plus host-command registry.
#[derive(Debug)]
pub struct Runtime {
    prelude: Rc<Env>,
    host: HostRegistry,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Creates a runtime with the full builtin catalog and no host commands
    /// registered (a pure computation sandbox).
    #[must_use]
    pub fn new() -> Self {
        Self {
            prelude: crate::builtins::prelude(),
            host: HostRegistry::new(),
        }
    }

    /// The frozen prelude environment.
    #[must_use]
    pub fn prelude(&self) -> &Rc<Env> {
        &self.prelude
    }

    /// Creates a fresh top-level environment (a writable child of the
    /// prelude) for one program or session.
    #[must_use]
    pub fn new_env(&self) -> Rc<Env> {
        Env::child(&self.prelude)
    }

    /// Registers a host-command handler under `id`.
    ///
    /// Handlers receive the evaluated argument list of each
    /// `["host", cmd, …]` form whose command evaluates to `id`.
    pub fn register_host_command(
        &mut self,
        id: impl Into<String>,
        handler: impl Fn(&[Value]) -> RunResult<Value> + 'static,
    ) {
        self.host.register(id, handler);
    }

    /// The host-command registry, for direct dispatch or inspection.
    #[must_use]
    pub fn host(&self) -> &HostRegistry {
        &self.host
    }

    /// Evaluates `expr` in `env` under `budget` on the canonical engine.
    ///
    /// Gas or step exhaustion returns [`RunProgress::Paused`]; top the
    /// budget up and [`Paused::resume`]. Errors (including the terminal
    /// *ResourceExhausted* limits) surface as `Err`.
    pub fn evaluate(&self, expr: &Value, env: &Rc<Env>, budget: Budget) -> RunResult<RunProgress> {
        self.evaluate_traced(expr, env, budget, &mut NoopTracer)
    }

    /// [`Runtime::evaluate`] with an explicit tracer.
    pub fn evaluate_traced(
        &self,
        expr: &Value,
        env: &Rc<Env>,
        mut budget: Budget,
        tracer: &mut dyn VmTracer,
    ) -> RunResult<RunProgress> {
        let code = Rc::new(compile(expr)?);
        let vm = Vm::new(&self.host, &mut budget, tracer, code, Rc::clone(env));
        match vm.run()? {
            VmOutcome::Done(value) => Ok(RunProgress::Complete(value)),
            VmOutcome::Paused(state) => Ok(RunProgress::Paused(Paused { state, budget })),
        }
    }

    /// Evaluates on the tree-walking reference oracle.
    ///
    /// Semantics match [`Runtime::evaluate`]; the oracle charges the same
    /// gas schedule but cannot pause: an exhausted budget raises
    /// *ResourceExhausted* instead.
    pub fn eval_tree(&self, expr: &Value, env: &Rc<Env>, budget: &mut Budget) -> RunResult<Value> {
        eval::eval_expr(&self.host, budget, expr, env)
    }

    /// Deserializes a value produced by [`crate::serialize`], re-binding
    /// builtins and prelude ancestry to this runtime.
    pub fn deserialize(&self, json: &serde_json::Value) -> RunResult<Value> {
        cas::deserialize(&self.prelude, json)
    }

    /// Restores a paused machine from its [`Paused::dump`] document.
    pub fn load_paused(&self, json: &serde_json::Value) -> RunResult<Paused> {
        let (state, budget) = cas::load_state(&self.prelude, json)?;
        Ok(Paused { state, budget })
    }
}

/// Result of one evaluation step: a final value, or a resumable pause.
#[derive(Debug)]
pub enum RunProgress {
    /// Evaluation finished.
    Complete(Value),
    /// The budget ran out of gas or steps; the machine state is captured
    /// for resume.
    Paused(Paused),
}

impl RunProgress {
    /// Consumes the progress, returning the final value if complete.
    #[must_use]
    pub fn into_complete(self) -> Option<Value> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Paused(_) => None,
        }
    }

    /// Consumes the progress, returning the paused state if paused.
    #[must_use]
    pub fn into_paused(self) -> Option<Paused> {
        match self {
            Self::Paused(paused) => Some(paused),
            Self::Complete(_) => None,
        }
    }
}

/// A paused machine: the `(S, pc, C, E, K)` snapshot plus the exhausted
/// budget. Owned by the caller: serialize it, ship it, or resume it here.
#[derive(Debug)]
pub struct Paused {
    state: VmState,
    budget: Budget,
}

impl Paused {
    /// Adds gas to the captured budget. Resuming without topping up pauses
    /// again immediately.
    pub fn add_gas(&mut self, gas: i64) {
        self.budget.add_gas(gas);
    }

    /// Adds steps to the captured budget.
    pub fn add_steps(&mut self, steps: i64) {
        self.budget.add_steps(steps);
    }

    /// The captured budget, for inspection.
    #[must_use]
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Continues execution on `runtime` until completion, the next pause,
    /// or an error.
    pub fn resume(self, runtime: &Runtime) -> RunResult<RunProgress> {
        self.resume_traced(runtime, &mut NoopTracer)
    }

    /// [`Paused::resume`] with an explicit tracer.
    pub fn resume_traced(self, runtime: &Runtime, tracer: &mut dyn VmTracer) -> RunResult<RunProgress> {
        let Self { state, mut budget } = self;
        let vm = Vm::from_state(&runtime.host, &mut budget, tracer, state);
        match vm.run()? {
            VmOutcome::Done(value) => Ok(RunProgress::Complete(value)),
            VmOutcome::Paused(state) => Ok(RunProgress::Paused(Self { state, budget })),
        }
    }

    /// Serializes the paused machine to a JSON document. Deserialize on any
    /// host with [`Runtime::load_paused`]; moving the document is a
    /// transfer of ownership of the computation.
    ///
    /// The wall-clock deadline, if any, is not carried: a restored budget
    /// resumes with no active deadline.
    pub fn dump(&self) -> RunResult<serde_json::Value> {
        cas::dump_state(&self.state, &self.budget)
    }
}
