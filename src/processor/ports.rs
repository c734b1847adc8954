//! Generic port table shared by every concrete processor: a name-indexed
//! collection of input and output slots, built from declared [`PortSpec`]s
//! and wired together by the Graph Manager during negotiation.

use std::collections::HashMap;

use crate::disruptor::WaitStrategyType;
use crate::error::{FalconError, Result};
use crate::port::{Direction, InputSlot, OutputSlot, PortPolicy, PortSpec};
use crate::data::DataTypePattern;

/// Name-indexed table of a processor's input and output ports. Embedded in
/// every concrete processor; the `Processor` trait's port methods delegate
/// to it so graph wiring code is shared instead of reimplemented per type.
#[derive(Default)]
pub struct ProcessorPorts {
    specs: Vec<PortSpec>,
    outputs: HashMap<String, Vec<OutputSlot>>,
    inputs: HashMap<String, Vec<Option<InputSlot>>>,
}

impl ProcessorPorts {
    /// Build an empty port table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an output port with `policy.n_slots` freshly allocated
    /// (unfinalized) output slots.
    pub fn declare_output(&mut self, name: impl Into<String>, pattern: DataTypePattern, policy: PortPolicy) {
        let name = name.into();
        let slots = (0..policy.n_slots).map(|_| OutputSlot::new(policy.buffer_size, policy.wait_strategy)).collect();
        self.outputs.insert(name.clone(), slots);
        self.specs.push(PortSpec { name, direction: Direction::Output, pattern, policy });
    }

    /// Declare an input port with `policy.n_slots` not-yet-connected slots.
    pub fn declare_input(&mut self, name: impl Into<String>, pattern: DataTypePattern, policy: PortPolicy) {
        let name = name.into();
        let n_slots = policy.n_slots;
        self.inputs.insert(name.clone(), (0..n_slots).map(|_| None).collect());
        self.specs.push(PortSpec { name, direction: Direction::Input, pattern, policy });
    }

    /// Declared port specs, in declaration order.
    pub fn specs(&self) -> &[PortSpec] {
        &self.specs
    }

    /// Borrow one output slot.
    pub fn output(&self, name: &str, slot: usize) -> Result<&OutputSlot> {
        self.outputs
            .get(name)
            .and_then(|v| v.get(slot))
            .ok_or_else(|| FalconError::build(format!("no output slot {name}.{slot}")))
    }

    /// Iterate all slots of a named output port.
    pub fn output_slots(&self, name: &str) -> Result<&[OutputSlot]> {
        self.outputs.get(name).map(|v| v.as_slice()).ok_or_else(|| FalconError::build(format!("no output port {name}")))
    }

    /// Borrow one input slot, if connected.
    pub fn input(&self, name: &str, slot: usize) -> Result<Option<&InputSlot>> {
        self.inputs
            .get(name)
            .and_then(|v| v.get(slot))
            .map(|o| o.as_ref())
            .ok_or_else(|| FalconError::build(format!("no input slot {name}.{slot}")))
    }

    /// Mutably borrow one input slot's connection cell.
    pub fn input_mut(&mut self, name: &str, slot: usize) -> Result<&mut Option<InputSlot>> {
        self.inputs
            .get_mut(name)
            .and_then(|v| v.get_mut(slot))
            .ok_or_else(|| FalconError::build(format!("no input slot {name}.{slot}")))
    }

    /// Connect an input slot to an already-finalized upstream output slot,
    /// checking the declared pattern accepts the upstream's finalized type.
    pub fn connect_input(&mut self, name: &str, slot: usize, upstream: &OutputSlot) -> Result<()> {
        let pattern = self
            .specs
            .iter()
            .find(|s| s.name == name && s.direction == Direction::Input)
            .map(|s| s.pattern.clone())
            .ok_or_else(|| FalconError::build(format!("no declared input port {name}")))?;

        let finalized = upstream
            .stream_info()
            .data_type()
            .cloned()
            .ok_or_else(|| FalconError::build("upstream output slot not finalized"))?;

        if !pattern.accepts(&finalized) {
            return Err(FalconError::build(format!(
                "input port {name} does not accept upstream data type {finalized:?}"
            )));
        }

        let connected = InputSlot::connect(upstream)?;
        *self.input_mut(name, slot)? = Some(connected);
        Ok(())
    }

    /// Whether every declared input slot has been connected.
    pub fn all_inputs_connected(&self) -> bool {
        self.inputs.values().all(|slots| slots.iter().all(Option::is_some))
    }

    /// Names of input ports with at least one unconnected slot.
    pub fn unconnected_inputs(&self) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|(_, slots)| slots.iter().any(Option::is_none))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether every declared output slot has finalized stream info.
    pub fn all_outputs_finalized(&self) -> bool {
        self.outputs.values().all(|slots| slots.iter().all(OutputSlot::is_finalized))
    }

    /// Names of output ports with at least one unfinalized slot.
    pub fn unfinalized_outputs(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|(_, slots)| slots.iter().any(|s| !s.is_finalized()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Allocate ring buffers for every output slot. Called once per run
    /// during `prepare`, after negotiation finalizes stream info.
    pub fn allocate_ring_buffers(&self) -> Result<()> {
        for slots in self.outputs.values() {
            for slot in slots {
                slot.allocate_ring_buffer()?;
            }
        }
        Ok(())
    }

    /// Release every output slot's ring buffer. Called during `unprepare`.
    pub fn free_ring_buffers(&self) {
        for slots in self.outputs.values() {
            for slot in slots {
                slot.free_ring_buffer();
            }
        }
    }

    /// Unblock every wait on every input and output slot.
    pub fn alert_all(&self) {
        for slots in self.outputs.values() {
            for slot in slots {
                slot.alert();
            }
        }
        for slots in self.inputs.values() {
            for slot in slots.iter().flatten() {
                slot.alert();
            }
        }
    }

    /// Ring buffer handles for every allocated output and every connected
    /// input. The graph manager snapshots these before moving a processor
    /// into its worker thread, so `stop_processing` can alert it without
    /// needing access to the processor itself.
    pub fn ring_handles(&self) -> Vec<std::sync::Arc<crate::disruptor::RingBuffer<crate::data::DataItem>>> {
        let mut handles = Vec::new();
        for slots in self.outputs.values() {
            for slot in slots {
                if let Some(ring) = slot.ring_buffer() {
                    handles.push(ring);
                }
            }
        }
        for slots in self.inputs.values() {
            for slot in slots.iter().flatten() {
                handles.push(slot.ring_handle());
            }
        }
        handles
    }

    /// Sum of items published across every output slot, for throughput
    /// reporting.
    pub fn total_items_produced(&self) -> u64 {
        self.outputs.values().flatten().map(OutputSlot::items_produced).sum()
    }

    /// Sum of items released across every connected input slot, for
    /// throughput reporting.
    pub fn total_items_consumed(&self) -> u64 {
        self.inputs.values().flatten().flatten().map(InputSlot::items_consumed).sum()
    }
}

/// Convenience to build a blocking, single-slot input policy — the common
/// case for every concrete processor in this crate.
pub fn single_input() -> PortPolicy {
    PortPolicy::input(1)
}

/// Convenience to build a single-slot output policy with the given buffer
/// size and wait strategy.
pub fn single_output(buffer_size: usize, wait_strategy: WaitStrategyType) -> PortPolicy {
    PortPolicy::output(1, buffer_size, wait_strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::stream_info::{ChannelRange, FinalizedType};

    #[test]
    fn connect_input_rejects_incompatible_pattern() {
        let mut upstream_ports = ProcessorPorts::new();
        upstream_ports.declare_output(
            "out",
            DataTypePattern::Mua,
            single_output(4, WaitStrategyType::BusySpin),
        );
        let out_slot = upstream_ports.output("out", 0).unwrap();
        out_slot.finalize_data_type(FinalizedType::Mua).unwrap();
        out_slot.finalize_rate(10.0).unwrap();
        out_slot.allocate_ring_buffer().unwrap();

        let mut downstream = ProcessorPorts::new();
        downstream.declare_input(
            "in",
            DataTypePattern::MultiChannel { channels: ChannelRange::exact(4), nsamples: None },
            single_input(),
        );

        let result = downstream.connect_input("in", 0, out_slot);
        assert!(result.is_err());
    }

    #[test]
    fn connect_input_accepts_matching_pattern() {
        let mut upstream_ports = ProcessorPorts::new();
        upstream_ports.declare_output("out", DataTypePattern::Mua, single_output(4, WaitStrategyType::BusySpin));
        let out_slot = upstream_ports.output("out", 0).unwrap();
        out_slot.finalize_data_type(FinalizedType::Mua).unwrap();
        out_slot.finalize_rate(10.0).unwrap();
        out_slot.allocate_ring_buffer().unwrap();

        let mut downstream = ProcessorPorts::new();
        downstream.declare_input("in", DataTypePattern::Mua, single_input());
        downstream.connect_input("in", 0, out_slot).unwrap();
        assert!(downstream.all_inputs_connected());
    }

    #[test]
    fn unconnected_inputs_are_reported() {
        let mut ports = ProcessorPorts::new();
        ports.declare_input("in", DataTypePattern::Mua, single_input());
        assert_eq!(ports.unconnected_inputs(), vec!["in".to_string()]);
    }
}
