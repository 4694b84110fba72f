//! Execution tracing hooks.
//!
//! Tracing is host-side instrumentation: it observes the VM without touching
//! language semantics (in-language logging goes through `host` like every
//! other effect). The default [`NoopTracer`] compiles down to nothing;
//! [`RecordingTracer`] captures events for tests and tooling;
//! [`StderrTracer`] prints them as they happen.

use std::fmt;

/// One observed execution event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction is about to execute.
    Instruction {
        /// Program counter within the current code block.
        pc: usize,
        /// Mnemonic of the instruction.
        op: &'static str,
    },
    /// A closure call pushed a frame.
    Call {
        /// Depth of the frame stack after the push.
        depth: usize,
    },
    /// A frame returned.
    Return {
        /// Depth of the frame stack after the pop.
        depth: usize,
    },
    /// A reified effect left the core.
    HostCall {
        /// The command id dispatched.
        command: String,
    },
    /// The machine paused on budget exhaustion.
    Paused {
        /// Instruction steps executed so far.
        steps: u64,
    },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instruction { pc, op } => write!(f, "{pc:>6}  {op}"),
            Self::Call { depth } => write!(f, "call  -> depth {depth}"),
            Self::Return { depth } => write!(f, "ret   -> depth {depth}"),
            Self::HostCall { command } => write!(f, "host  {command}"),
            Self::Paused { steps } => write!(f, "pause after {steps} steps"),
        }
    }
}

/// Observer interface for VM execution.
///
/// All hooks default to no-ops so implementations only override what they
/// need.
pub trait VmTracer {
    /// Called before each instruction.
    fn on_event(&mut self, _event: &TraceEvent) {}
}

/// Tracer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that records events in memory.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded events, in order.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Consumes the recorder, returning its events.
    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl VmTracer for RecordingTracer {
    fn on_event(&mut self, event: &TraceEvent) {
        self.events.push(event.clone());
    }
}

/// Tracer that writes each event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_event(&mut self, event: &TraceEvent) {
        eprintln!("[jsl] {event}");
    }
}
