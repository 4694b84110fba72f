//! Execution budgets: gas, steps, memory, wall time, and stack depth.
//!
//! The budget splits its limits into two classes with different exhaustion
//! behavior:
//!
//! - **gas** and **steps** are the resumable pair: running out produces a
//!   paused machine state, and topping the budget up resumes it;
//! - **memory**, **wall-clock deadline**, and **stack depth** are terminal:
//!   exceeding them raises *ResourceExhausted*.
//!
//! Gas may run a bounded overshoot: nested item evaluation keeps charging the
//! shared budget and the pause lands at the next instruction boundary of the
//! frame machine. The debt is visible as a negative remainder and is settled
//! by the resume top-up.

use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind, RunResult};

/// Gas cost of pushing a literal.
pub const GAS_LITERAL: i64 = 1;
/// Gas cost of a variable lookup.
pub const GAS_LOOKUP: i64 = 2;
/// Base gas cost of an operator application (covers up to two arguments).
pub const GAS_OP: i64 = 3;
/// Gas cost of a closure or builtin call.
pub const GAS_CALL: i64 = 10;
/// Gas cost per element of a list allocation.
pub const GAS_ALLOC_LIST_ELEM: i64 = 1;
/// Gas cost per key of an object allocation.
pub const GAS_ALLOC_OBJECT_KEY: i64 = 2;

/// Default stack-depth cap when none is configured.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Gas cost of applying an operator to `argc` arguments.
///
/// Fixed-arity operators (two or fewer arguments) cost the base; variadic
/// applications add one unit per extra argument.
#[must_use]
pub fn op_cost(argc: usize) -> i64 {
    GAS_OP + i64::try_from(argc.saturating_sub(2)).unwrap_or(i64::MAX)
}

/// A resource budget for one evaluation.
///
/// All limits are optional; `Budget::unlimited()` disables everything except
/// the default stack-depth cap. Limits are set builder-style:
///
/// ```
/// use std::time::Duration;
/// use jsl::Budget;
///
/// let budget = Budget::with_gas(10_000)
///     .max_memory(1 << 20)
///     .deadline(Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Budget {
    /// Remaining gas; `None` disables metering. May go negative (overshoot
    /// debt) before a pause is observed.
    gas: Option<i64>,
    /// Remaining instruction steps; `None` disables step counting.
    steps: Option<i64>,
    /// Approximate live-memory cap in bytes.
    max_memory: Option<usize>,
    /// Wall-clock deadline. Not serialized with paused state: a resumed
    /// computation starts with no active deadline.
    #[serde(skip)]
    deadline: Option<Instant>,
    /// Call-stack depth cap.
    max_depth: usize,
    gas_used: u64,
    steps_used: u64,
    /// Approximate live bytes; transient, reset on restore.
    #[serde(skip)]
    mem_current: usize,
    mem_highwater: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Budget {
    /// A budget with no gas, step, memory, or time limits and the default
    /// depth cap.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            gas: None,
            steps: None,
            max_memory: None,
            deadline: None,
            max_depth: DEFAULT_MAX_DEPTH,
            gas_used: 0,
            steps_used: 0,
            mem_current: 0,
            mem_highwater: 0,
        }
    }

    /// A budget metered to `gas` units.
    #[must_use]
    pub fn with_gas(gas: i64) -> Self {
        Self {
            gas: Some(gas),
            ..Self::unlimited()
        }
    }

    /// Sets a step (instruction count) limit.
    #[must_use]
    pub fn max_steps(mut self, steps: i64) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Sets the approximate memory cap in bytes.
    #[must_use]
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Sets a wall-clock deadline `duration` from now.
    #[must_use]
    pub fn deadline(mut self, duration: Duration) -> Self {
        self.deadline = Some(Instant::now() + duration);
        self
    }

    /// Sets the call-stack depth cap.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Charges `cost` gas. Never fails; exhaustion is observed at the next
    /// pause check.
    pub fn charge(&mut self, cost: i64) {
        self.gas_used = self.gas_used.saturating_add(cost.max(0).cast_unsigned());
        if let Some(gas) = &mut self.gas {
            *gas -= cost;
        }
    }

    /// Counts one instruction step.
    pub fn count_step(&mut self) {
        self.steps_used += 1;
        if let Some(steps) = &mut self.steps {
            *steps -= 1;
        }
    }

    /// Returns `true` when gas or steps have run out and the machine should
    /// pause at the next instruction boundary.
    #[must_use]
    pub fn should_pause(&self) -> bool {
        matches!(self.gas, Some(g) if g <= 0) || matches!(self.steps, Some(s) if s <= 0)
    }

    /// Checks the terminal limits (deadline, memory cap).
    ///
    /// # Errors
    /// Returns *ResourceExhausted* when a terminal limit is exceeded.
    pub fn check_terminal(&self) -> RunResult<()> {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Error::new(ErrorKind::ResourceExhausted, "wall-clock deadline exceeded"));
        }
        if let Some(max) = self.max_memory
            && self.mem_current > max
        {
            return Err(Error::new(
                ErrorKind::ResourceExhausted,
                format!("memory limit exceeded: {} bytes > {max} bytes", self.mem_current),
            ));
        }
        Ok(())
    }

    /// Checks the call-stack depth cap before pushing a frame.
    ///
    /// # Errors
    /// Returns *ResourceExhausted* when the new frame would exceed the cap.
    pub fn check_depth(&self, current_depth: usize) -> RunResult<()> {
        if current_depth >= self.max_depth {
            return Err(Error::new(
                ErrorKind::ResourceExhausted,
                format!("stack depth limit exceeded: {}", self.max_depth),
            ));
        }
        Ok(())
    }

    /// Charges gas and memory for allocating a list of `len` elements.
    pub fn charge_list_alloc(&mut self, len: usize) {
        self.charge(i64::try_from(len).unwrap_or(i64::MAX) * GAS_ALLOC_LIST_ELEM);
        self.track_alloc(len * std::mem::size_of::<crate::Value>());
    }

    /// Charges gas and memory for allocating an object of `keys` entries.
    pub fn charge_object_alloc(&mut self, keys: usize) {
        self.charge(i64::try_from(keys).unwrap_or(i64::MAX) * GAS_ALLOC_OBJECT_KEY);
        self.track_alloc(keys * 2 * std::mem::size_of::<crate::Value>());
    }

    /// Records `bytes` of allocation against the memory high-water mark.
    pub fn track_alloc(&mut self, bytes: usize) {
        self.mem_current = self.mem_current.saturating_add(bytes);
        self.mem_highwater = self.mem_highwater.max(self.mem_current);
    }

    /// Adds `gas` to the remaining allowance; used when resuming a paused
    /// computation. A `None` gas limit stays unlimited.
    pub fn add_gas(&mut self, gas: i64) {
        if let Some(g) = &mut self.gas {
            *g = g.saturating_add(gas);
        }
    }

    /// Adds `steps` to the remaining step allowance.
    pub fn add_steps(&mut self, steps: i64) {
        if let Some(s) = &mut self.steps {
            *s = s.saturating_add(steps);
        }
    }

    /// Clears the remaining gas so the next pause check suspends. This is
    /// the polite-cancellation hook.
    pub fn cancel(&mut self) {
        self.gas = Some(0);
    }

    /// Total gas consumed so far.
    #[must_use]
    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    /// Remaining gas, if metered. Negative values are overshoot debt.
    #[must_use]
    pub fn gas_remaining(&self) -> Option<i64> {
        self.gas
    }

    /// Total instruction steps executed.
    #[must_use]
    pub fn steps_used(&self) -> u64 {
        self.steps_used
    }

    /// Approximate peak memory in bytes.
    #[must_use]
    pub fn memory_highwater(&self) -> usize {
        self.mem_highwater
    }

    /// The configured depth cap.
    #[must_use]
    pub fn depth_cap(&self) -> usize {
        self.max_depth
    }

    /// Serializes the budget counters to a JSON object for paused-state
    /// transport. The skipped fields (deadline, live-byte counter) restart
    /// clean on restore.
    #[must_use]
    pub(crate) fn dump(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("budget counters serialize to JSON")
    }

    /// Restores a budget from its [`dump`](Self::dump) form.
    pub(crate) fn load(json: &serde_json::Value) -> RunResult<Self> {
        serde_json::from_value(json.clone()).map_err(|e| Error::syntax(format!("budget: {e}")))
    }
}
