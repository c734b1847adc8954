//! Splits one incoming `MultiChannel` stream into multiple named output
//! groups per a configured channel map. Grounded in
//! `src/processors/dispatcher.cpp`.

use std::collections::HashMap;

use tracing::info;

use crate::data::stream_info::{ChannelRange, FinalizedType};
use crate::data::{DataPayload, MultiChannelData};
use crate::disruptor::WaitStrategyType;
use crate::error::{FalconError, Result};
use crate::processor::ports::{single_input, single_output, ProcessorPorts};
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorState};
use crate::processors::yaml_get_opt;
use crate::state::SharedStateRegistry;

const MAX_N_CHANNELS: usize = crate::constants::MAX_N_CHANNELS;

/// Dispatches selected channels from one input to many named outputs.
pub struct Dispatcher {
    name: String,
    state: ProcessorState,
    ports: ProcessorPorts,
    shared_states: SharedStateRegistry,

    channelmap: HashMap<String, Vec<usize>>,
    incoming_batch_size: usize,
    max_n_channels: usize,
}

impl Dispatcher {
    /// Construct an unconfigured dispatcher with the given instance name.
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: ProcessorState::Unconfigured,
            ports: ProcessorPorts::new(),
            shared_states: SharedStateRegistry::new(),
            channelmap: HashMap::new(),
            incoming_batch_size: 0,
            max_n_channels: 0,
        }
    }
}

impl Processor for Dispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn configure(&mut self, options: &serde_yaml::Value, _global: &GlobalContext) -> Result<()> {
        if let Some(map) = yaml_get_opt::<HashMap<String, Vec<usize>>>(options, "channelmap") {
            self.channelmap = map;
        }
        if self.channelmap.is_empty() {
            return Err(FalconError::config(&self.name, "channelmap must declare at least one output group"));
        }
        self.state = ProcessorState::Configured;
        Ok(())
    }

    fn create_ports(&mut self, buffer_overrides: &HashMap<String, usize>) -> Result<()> {
        self.ports.declare_input(
            "data",
            crate::data::DataTypePattern::MultiChannel {
                channels: ChannelRange::new(1, MAX_N_CHANNELS),
                nsamples: None,
            },
            single_input(),
        );
        for (group, channels) in &self.channelmap {
            let buffer_size = buffer_overrides.get(group).copied().unwrap_or(2000);
            self.ports.declare_output(
                group.clone(),
                crate::data::DataTypePattern::MultiChannel {
                    channels: ChannelRange::exact(channels.len()),
                    nsamples: None,
                },
                single_output(buffer_size, WaitStrategyType::Blocking),
            );
        }
        Ok(())
    }

    fn ports(&self) -> &ProcessorPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut ProcessorPorts {
        &mut self.ports
    }

    fn complete_stream_info(&mut self) -> Result<()> {
        let input_info = self
            .ports
            .input("data", 0)?
            .ok_or_else(|| FalconError::build("dispatcher input not connected"))?
            .stream_info()
            .clone();
        let (nsamples, sample_rate) = match input_info.data_type() {
            Some(FinalizedType::MultiChannel { nsamples, sample_rate, .. }) => (*nsamples, *sample_rate),
            _ => return Err(FalconError::build("dispatcher input is not a MultiChannel stream")),
        };
        self.incoming_batch_size = nsamples;
        self.max_n_channels = match input_info.data_type() {
            Some(FinalizedType::MultiChannel { nchannels, .. }) => *nchannels,
            _ => 0,
        };
        info!(processor = %self.name, incoming_batch_size = nsamples, "stream info negotiated");

        for (group, channels) in &self.channelmap {
            for slot in self.ports.output_slots(group)? {
                slot.finalize_data_type(FinalizedType::MultiChannel {
                    nsamples,
                    nchannels: channels.len(),
                    sample_rate,
                })?;
                slot.finalize_rate(sample_rate / nsamples as f64)?;
            }
        }
        Ok(())
    }

    fn prepare(&mut self, _global: &GlobalContext) -> Result<()> {
        for (_, channels) in &self.channelmap {
            for &ch in channels {
                if ch >= self.max_n_channels {
                    return Err(FalconError::prepare(&self.name, format!("channel {ch} is invalid")));
                }
            }
        }
        Ok(())
    }

    fn preprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
        let groups: Vec<(String, Vec<usize>)> = self.channelmap.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let batch_size = self.incoming_batch_size;

        loop {
            let mut incoming: Option<MultiChannelData> = None;
            let mut hw_ts = 0u64;
            let mut sample_ts: Vec<u64> = Vec::new();
            {
                let input = self
                    .ports
                    .input_mut("data", 0)?
                    .as_mut()
                    .ok_or_else(|| FalconError::unexpected("dispatcher input not connected"))?;
                let alive = input.retrieve(|item| {
                    if let DataPayload::MultiChannel(data) = &item.payload {
                        incoming = Some(data.clone());
                        hw_ts = item.hardware_timestamp();
                        sample_ts = data.sample_timestamps().to_vec();
                    }
                })?;
                if !alive {
                    break;
                }
            }
            let Some(data_in) = incoming else { continue };

            for (group, channels) in &groups {
                let payload = DataPayload::MultiChannel(MultiChannelData::new(
                    batch_size,
                    channels.len(),
                    data_in.sample_rate(),
                ));
                let slot = self.ports.output(group, 0)?;
                slot.claim(payload, true)?;
                slot.set_hardware_timestamp(hw_ts)?;
                slot.with_claimed(|payload| {
                    if let DataPayload::MultiChannel(out) = payload {
                        out.set_sample_timestamps(&sample_ts);
                        for (ch_out, &ch_in) in channels.iter().enumerate() {
                            for s in 0..batch_size {
                                out.set_sample(s, ch_out, data_in.sample(s, ch_in));
                            }
                        }
                    }
                })?;
            }

            for (group, _) in &groups {
                self.ports.output(group, 0)?.publish()?;
            }
            self.ports.input_mut("data", 0)?.as_ref().unwrap().release();

            if ctx.terminated() {
                break;
            }
        }
        Ok(())
    }

    fn postprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        for (group, _) in &self.channelmap {
            if let Ok(slots) = self.ports.output_slots(group) {
                for slot in slots {
                    info!(processor = %self.name, port = %group, produced = slot.items_produced(), "dispatcher port summary");
                }
            }
        }
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
    fn configure_rejects_empty_channelmap() {
        let mut dispatcher = Dispatcher::new("d1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("{}").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        assert!(dispatcher.configure(&options, &global).is_err());
    }

    #[test]
    fn create_ports_declares_one_output_per_group() {
        let mut dispatcher = Dispatcher::new("d1".to_string());
        let options: serde_yaml::Value =
            serde_yaml::from_str("channelmap:\n  a: [0, 2]\n  b: [1]\n").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        dispatcher.configure(&options, &global).unwrap();
        dispatcher.create_ports(&HashMap::new()).unwrap();
        assert!(dispatcher.ports().output("a", 0).is_ok());
        assert!(dispatcher.ports().output("b", 0).is_ok());
    }
}
