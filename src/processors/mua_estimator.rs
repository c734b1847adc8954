//! Aggregates spike counts across one or more `SpikeDetector` inputs into a
//! multi-unit-activity rate. Grounded in `src/processors/muaestimator.cpp`.

use std::collections::HashMap;

use tracing::info;

use crate::data::stream_info::{ChannelRange, FinalizedType};
use crate::data::{DataPayload, DataTypePattern, MuaData};
use crate::disruptor::WaitStrategyType;
use crate::error::{FalconError, Result};
use crate::processor::ports::{single_output, ProcessorPorts};
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorState};
use crate::processors::yaml_get;
use crate::state::{Permission, SharedStateRegistry};

const DEFAULT_BIN_SIZE_MS: f64 = 10.0;

/// Combines spike counts from one or more upstream `SpikeDetector`s into a
/// multi-unit-activity rate, recomputed on a configurable bin size.
pub struct MuaEstimator {
    name: String,
    state: ProcessorState,
    ports: ProcessorPorts,
    shared_states: SharedStateRegistry,

    initial_bin_size_ms: f64,
    n_slots: usize,
    spike_buffer_size_ms: f64,
    n_spike_buffers: usize,
    previous_bin_size_ms: f64,
}

impl MuaEstimator {
    /// Construct an unconfigured MUA estimator.
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: ProcessorState::Unconfigured,
            ports: ProcessorPorts::new(),
            shared_states: SharedStateRegistry::new(),
            initial_bin_size_ms: DEFAULT_BIN_SIZE_MS,
            n_slots: 1,
            spike_buffer_size_ms: 0.0,
            n_spike_buffers: 0,
            previous_bin_size_ms: 0.0,
        }
    }

    /// How many whole upstream spike buffers fit in `bin_size_ms`, rounding
    /// up. Mirrors the original's `check_buffer_sizes_and_log` in strict
    /// mode: the bin size must be an exact multiple of the spike buffer size.
    fn spike_buffers_for(&self, bin_size_ms: f64) -> Result<usize> {
        if self.spike_buffer_size_ms <= 0.0 {
            return Err(FalconError::config(&self.name, "incoming spike buffer size is zero"));
        }
        let ratio = bin_size_ms / self.spike_buffer_size_ms;
        let rounded = ratio.round();
        if (ratio - rounded).abs() > 1e-6 {
            return Err(FalconError::config(
                &self.name,
                format!("bin_size {bin_size_ms}ms is not a multiple of the incoming spike buffer size {}ms", self.spike_buffer_size_ms),
            ));
        }
        Ok(rounded as usize)
    }
}

impl Processor for MuaEstimator {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn configure(&mut self, options: &serde_yaml::Value, _global: &GlobalContext) -> Result<()> {
        self.initial_bin_size_ms = yaml_get(options, "bin_size_ms", DEFAULT_BIN_SIZE_MS);
        self.n_slots = yaml_get(options, "nslots", 1usize);
        if self.n_slots == 0 {
            return Err(FalconError::config(&self.name, "nslots must be at least 1"));
        }
        self.state = ProcessorState::Configured;
        Ok(())
    }

    fn create_ports(&mut self, buffer_overrides: &HashMap<String, usize>) -> Result<()> {
        self.ports.declare_input(
            "spikes",
            DataTypePattern::Spike { channels: ChannelRange::new(1, crate::constants::MAX_N_CHANNELS), buffer_ms: 0.0 },
            crate::port::PortPolicy::input(self.n_slots),
        );
        let buffer_size = buffer_overrides.get("mua").copied().unwrap_or(500);
        self.ports.declare_output("mua", DataTypePattern::Mua, single_output(buffer_size, WaitStrategyType::Blocking));

        self.shared_states.declare(
            "bin_size_ms",
            self.initial_bin_size_ms,
            "MUA bin size",
            "milliseconds",
            Permission::Read,
            Permission::Write,
        );
        self.shared_states.declare("MUA", 0.0, "last measured multi-unit activity rate", "Hz", Permission::Write, Permission::Read);
        Ok(())
    }

    fn ports(&self) -> &ProcessorPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut ProcessorPorts {
        &mut self.ports
    }

    fn complete_stream_info(&mut self) -> Result<()> {
        let out = self.ports.output("mua", 0)?;
        out.finalize_data_type(FinalizedType::Mua)?;
        out.finalize_rate(1_000.0 / self.initial_bin_size_ms)?;
        Ok(())
    }

    fn prepare(&mut self, _global: &GlobalContext) -> Result<()> {
        let mut buffer_ms: Option<f64> = None;
        for slot in 0..self.n_slots {
            let info = self
                .ports
                .input("spikes", slot)?
                .ok_or_else(|| FalconError::prepare(&self.name, format!("spikes slot {slot} not connected")))?
                .stream_info()
                .clone();
            let slot_buffer_ms = match info.stream_rate() {
                Some(rate) if rate > 0.0 => 1_000.0 / rate,
                _ => return Err(FalconError::prepare(&self.name, format!("spikes slot {slot} has no finalized publication rate"))),
            };
            match buffer_ms {
                None => buffer_ms = Some(slot_buffer_ms),
                Some(existing) if (existing - slot_buffer_ms).abs() > 1e-6 => {
                    return Err(FalconError::prepare(&self.name, "incoming SpikeData buffer sizes are different"));
                }
                _ => {}
            }
        }
        self.spike_buffer_size_ms = buffer_ms.unwrap_or(0.0);
        self.n_spike_buffers = self.spike_buffers_for(self.initial_bin_size_ms)?;
        self.previous_bin_size_ms = self.initial_bin_size_ms;
        info!(processor = %self.name, n_spike_buffers = self.n_spike_buffers, "MUA will be computed using spike buffers");
        Ok(())
    }

    fn preprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
        loop {
            let current_bin_size_ms = self.shared_states.read_internal("bin_size_ms")?;
            if (current_bin_size_ms - self.previous_bin_size_ms).abs() > 1e-6 {
                match self.spike_buffers_for(current_bin_size_ms) {
                    Ok(n) => {
                        self.n_spike_buffers = n;
                        self.previous_bin_size_ms = current_bin_size_ms;
                        info!(processor = %self.name, bin_size_ms = current_bin_size_ms, "MUA bin updated");
                    }
                    Err(err) => {
                        tracing::warn!(processor = %self.name, %err, "invalid bin size requested, keeping previous");
                    }
                }
            }

            let mut spike_counter = 0u64;
            let mut hardware_timestamp = u64::MAX;
            let mut terminated = false;

            'outer: for _ in 0..self.n_spike_buffers {
                for slot in 0..self.n_slots {
                    let mut item_spikes = 0usize;
                    let mut item_hw_ts = 0u64;
                    let input = self
                        .ports
                        .input_mut("spikes", slot)?
                        .as_mut()
                        .ok_or_else(|| FalconError::unexpected("spikes input slot not connected"))?;
                    let alive = input.retrieve(|item| {
                        if let DataPayload::Spike(data) = &item.payload {
                            item_spikes = data.len();
                            item_hw_ts = item.hardware_timestamp();
                        }
                    })?;
                    if !alive {
                        terminated = true;
                        break 'outer;
                    }
                    if slot == 0 {
                        hardware_timestamp = item_hw_ts;
                    } else if item_hw_ts != hardware_timestamp {
                        return Err(FalconError::processing(&self.name, "spike inputs desynchronized across slots"));
                    }
                    spike_counter += item_spikes as u64;
                    self.ports.input_mut("spikes", slot)?.as_ref().unwrap().release();
                }
            }

            if terminated {
                break;
            }

            let out = self.ports.output("mua", 0)?;
            let mua = MuaData::new(spike_counter as u32, self.previous_bin_size_ms);
            out.claim(DataPayload::Mua(mua), false)?;
            out.set_hardware_timestamp(hardware_timestamp)?;
            out.publish()?;

            self.shared_states.write_internal("MUA", mua.mua_rate())?;

            if ctx.terminated() {
                break;
            }
        }
        Ok(())
    }

    fn postprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn unprepare(&mut self, _global: &GlobalContext) -> Result<()> {
        Ok(())
    }

    fn shared_states(&self) -> &SharedStateRegistry {
        &self.shared_states
    }

    fn shared_states_mut(&mut self) -> &mut SharedStateRegistry {
        &mut self.shared_states
    }

    fn invoke_method(&mut self, name: &str, _args: &serde_yaml::Value) -> Result<serde_yaml::Value> {
        Err(FalconError::control(format!("no such method \"{name}\" on {}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_rejects_zero_slots() {
        let mut proc = MuaEstimator::new("mua1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("nslots: 0").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        assert!(proc.configure(&options, &global).is_err());
    }

    #[test]
    fn create_ports_declares_mua_output_and_states() {
        let mut proc = MuaEstimator::new("mua1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("bin_size_ms: 20\n").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&options, &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        assert!(proc.ports().output("mua", 0).is_ok());
        assert!(proc.shared_states().state_names().contains(&"bin_size_ms".to_string()));
    }

    #[test]
    fn spike_buffers_for_rejects_non_multiple_bin_size() {
        let mut proc = MuaEstimator::new("mua1".to_string());
        proc.spike_buffer_size_ms = 3.0;
        assert!(proc.spike_buffers_for(10.0).is_err());
        assert_eq!(proc.spike_buffers_for(9.0).unwrap(), 3);
    }
}
