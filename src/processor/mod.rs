//! Stateful processor lifecycle: a node that declares ports, shared
//! states, and methods, and runs one processing thread.

pub mod context;
pub mod ports;
pub mod registry;

pub use context::{GlobalContext, ProcessingContext};
pub use ports::ProcessorPorts;
pub use registry::ProcessorFactory;

use crate::error::Result;
use crate::state::SharedStateRegistry;

/// A processor's lifecycle state, advanced only by the Graph Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Freshly constructed; `configure` not yet called.
    Unconfigured,
    /// Options parsed, ports and states declared.
    Configured,
    /// Ring buffers allocated, sockets/files opened.
    Prepared,
    /// `process` thread is running.
    Processing,
    /// `process` returned; `postprocess`/`unprepare` have (or will) run.
    Stopped,
}

/// The behavior contract every concrete processor implements. One layer,
/// no virtual hierarchy beyond it (`spec.md` §9 "Polymorphic processors").
pub trait Processor: Send {
    /// Stable name, unique within a graph.
    fn name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ProcessorState;

    /// Parse and validate `options` (already-decoded YAML), persisting
    /// them on the processor. May fail with a configuration error.
    fn configure(&mut self, options: &serde_yaml::Value, global: &GlobalContext) -> Result<()>;

    /// Declare all input/output ports, shared states, and methods. Ports
    /// cannot be added after this call returns. `buffer_overrides` maps
    /// `"port"` or `"port.slot"` names to a requested ring buffer capacity.
    fn create_ports(&mut self, buffer_overrides: &std::collections::HashMap<String, usize>) -> Result<()>;

    /// Access this processor's port table, for graph negotiation and
    /// wiring (read-only view).
    fn ports(&self) -> &ProcessorPorts;

    /// Access this processor's port table mutably, for wiring connections
    /// and allocating/freeing ring buffers.
    fn ports_mut(&mut self) -> &mut ProcessorPorts;

    /// Derive output stream info from (already-connected) input stream
    /// info. Must set `{nsamples, nchannels, sample_rate, stream_rate}` on
    /// every output slot.
    fn complete_stream_info(&mut self) -> Result<()>;

    /// One-time per-run initialization: open sockets/files. Ring buffers
    /// are allocated by the Graph Manager immediately before this call.
    fn prepare(&mut self, global: &GlobalContext) -> Result<()>;

    /// Per-run initialization that may assume ring buffers exist.
    fn preprocess(&mut self, ctx: &ProcessingContext) -> Result<()>;

    /// The main loop. Runs on its own thread; must return promptly once
    /// `ctx.terminated()` is observed or an input closes.
    fn process(&mut self, ctx: &ProcessingContext) -> Result<()>;

    /// Flush and log counters after `process` returns.
    fn postprocess(&mut self, ctx: &ProcessingContext) -> Result<()>;

    /// Release sockets, files, and scratch buffers.
    fn unprepare(&mut self, global: &GlobalContext) -> Result<()>;

    /// Unblock every wait inside this processor's ports, for cooperative
    /// cancellation.
    fn alert(&self) {
        self.ports().alert_all();
    }

    /// This processor's shared-state registry (read-only).
    fn shared_states(&self) -> &SharedStateRegistry;

    /// This processor's shared-state registry (mutable).
    fn shared_states_mut(&mut self) -> &mut SharedStateRegistry;

    /// Invoke a registered method by name with a YAML argument tree,
    /// returning a YAML result tree. Unknown methods are a control error.
    fn invoke_method(&mut self, name: &str, args: &serde_yaml::Value) -> Result<serde_yaml::Value>;
}
