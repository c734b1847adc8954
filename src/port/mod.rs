//! Typed attachment points between processors: ports own one or more
//! slots, resolve data-type compatibility, and (for outputs) own the ring
//! buffer each slot publishes into.

pub mod input_slot;
pub mod output_slot;

pub use input_slot::InputSlot;
pub use output_slot::OutputSlot;

use crate::data::DataTypePattern;

/// Which way data flows through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Data enters the processor.
    Input,
    /// Data leaves the processor.
    Output,
}

/// How many slots an input port requires, and how many an output port
/// offers, plus (for outputs) the per-slot ring buffer capacity and wait
/// strategy.
#[derive(Debug, Clone)]
pub struct PortPolicy {
    /// Number of slots this port has.
    pub n_slots: usize,
    /// Output-slot ring buffer capacity; ignored for input ports.
    pub buffer_size: usize,
    /// Output-slot wait strategy; ignored for input ports.
    pub wait_strategy: crate::disruptor::WaitStrategyType,
}

impl PortPolicy {
    /// An input port policy requiring exactly `n_slots` connections.
    pub fn input(n_slots: usize) -> Self {
        Self { n_slots, buffer_size: 0, wait_strategy: crate::disruptor::WaitStrategyType::default() }
    }

    /// An output port policy offering `n_slots` slots, each with the given
    /// ring buffer capacity and wait strategy.
    pub fn output(n_slots: usize, buffer_size: usize, wait_strategy: crate::disruptor::WaitStrategyType) -> Self {
        Self { n_slots, buffer_size, wait_strategy }
    }
}

/// Declared identity of a port: its name, direction, the data-type pattern
/// it accepts (inputs) or may produce (outputs), and its slot policy.
#[derive(Debug, Clone)]
pub struct PortSpec {
    /// Port name, unique within the owning processor and direction.
    pub name: String,
    /// Input or output.
    pub direction: Direction,
    /// Accepted (input) or offered (output) data-type pattern.
    pub pattern: DataTypePattern,
    /// Slot count and, for outputs, buffer policy.
    pub policy: PortPolicy,
}
