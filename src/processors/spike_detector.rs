//! Detects spikes on any channel of an incoming MultiChannel stream;
//! publishes `SpikeData` plus a "spike"/"spikes" event whenever one or more
//! spikes are found in a processing window. Grounded in
//! `src/processors/spikedetector.cpp`.

use std::collections::HashMap;

use tracing::info;

use crate::data::stream_info::{ChannelRange, FinalizedType};
use crate::data::{DataPayload, DataTypePattern, EventData, MultiChannelData, SpikeData};
use crate::disruptor::WaitStrategyType;
use crate::dsp::MultiChannelSpikeDetector;
use crate::error::{FalconError, Result};
use crate::processor::ports::{single_input, single_output, ProcessorPorts};
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorState};
use crate::processors::yaml_get;
use crate::state::{Permission, SharedStateRegistry};

const DEFAULT_THRESHOLD: f64 = 60.0;
const DEFAULT_INVERT_SIGNAL: bool = true;
const DEFAULT_PEAK_LIFETIME: u32 = 8;
const DEFAULT_BUFFER_SIZE_MS: f64 = 0.5;
const DEFAULT_STRICT_TIME_BIN_CHECK: bool = true;
const SPIKE_RING_BUFFER_SIZE: usize = 100_000;

/// Spike detector over the full incoming channel set.
pub struct SpikeDetector {
    name: String,
    state: ProcessorState,
    ports: ProcessorPorts,
    shared_states: SharedStateRegistry,

    initial_threshold: f64,
    invert_signal: bool,
    initial_peak_lifetime: u32,
    buffer_size_ms: f64,
    strict_time_bin_check: bool,

    n_channels: usize,
    incoming_buffer_size_samples: usize,
    detector: Option<MultiChannelSpikeDetector>,
}

impl SpikeDetector {
    /// Construct an unconfigured spike detector.
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: ProcessorState::Unconfigured,
            ports: ProcessorPorts::new(),
            shared_states: SharedStateRegistry::new(),
            initial_threshold: DEFAULT_THRESHOLD,
            invert_signal: DEFAULT_INVERT_SIGNAL,
            initial_peak_lifetime: DEFAULT_PEAK_LIFETIME,
            buffer_size_ms: DEFAULT_BUFFER_SIZE_MS,
            strict_time_bin_check: DEFAULT_STRICT_TIME_BIN_CHECK,
            n_channels: 0,
            incoming_buffer_size_samples: 0,
            detector: None,
        }
    }
}

impl Processor for SpikeDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn configure(&mut self, options: &serde_yaml::Value, _global: &GlobalContext) -> Result<()> {
        self.initial_threshold = yaml_get(options, "threshold", DEFAULT_THRESHOLD);
        self.invert_signal = yaml_get(options, "invert_signal", DEFAULT_INVERT_SIGNAL);
        self.buffer_size_ms = yaml_get(options, "buffer_size", DEFAULT_BUFFER_SIZE_MS);
        self.strict_time_bin_check = yaml_get(options, "strict_time_bin_check", DEFAULT_STRICT_TIME_BIN_CHECK);
        self.initial_peak_lifetime = yaml_get(options, "peak_lifetime", DEFAULT_PEAK_LIFETIME);
        self.state = ProcessorState::Configured;
        Ok(())
    }

    fn create_ports(&mut self, buffer_overrides: &HashMap<String, usize>) -> Result<()> {
        self.ports.declare_input(
            "data",
            DataTypePattern::MultiChannel { channels: ChannelRange::new(1, crate::constants::MAX_N_CHANNELS), nsamples: None },
            single_input(),
        );
        let spikes_buffer = buffer_overrides.get("spikes").copied().unwrap_or(SPIKE_RING_BUFFER_SIZE);
        self.ports.declare_output(
            "spikes",
            DataTypePattern::Spike { channels: ChannelRange::new(1, crate::constants::MAX_N_CHANNELS), buffer_ms: self.buffer_size_ms },
            single_output(spikes_buffer, WaitStrategyType::Blocking),
        );
        let events_buffer = buffer_overrides.get("events").copied().unwrap_or(500);
        self.ports.declare_output("events", DataTypePattern::Event, single_output(events_buffer, WaitStrategyType::Blocking));

        self.shared_states.declare(
            "threshold",
            self.initial_threshold,
            "threshold a single channel must cross",
            "microvolts",
            Permission::Write,
            Permission::Write,
        );
        self.shared_states.declare(
            "peak_lifetime",
            self.initial_peak_lifetime as f64,
            "samples used to search for a peak after a threshold crossing",
            "samples",
            Permission::Write,
            Permission::Write,
        );
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
            .ok_or_else(|| FalconError::build("spike detector input not connected"))?
            .stream_info()
            .clone();
        let (nsamples, nchannels, incoming_stream_rate) = match (input_info.data_type(), input_info.stream_rate()) {
            (Some(FinalizedType::MultiChannel { nsamples, nchannels, .. }), Some(rate)) => (*nsamples, *nchannels, rate),
            _ => return Err(FalconError::build("spike detector input is not a finalized MultiChannel stream")),
        };

        self.incoming_buffer_size_samples = nsamples;
        self.n_channels = nchannels;

        let sample_rate = match input_info.data_type() {
            Some(FinalizedType::MultiChannel { sample_rate, .. }) => *sample_rate,
            _ => unreachable!(),
        };
        let incoming_buffer_size_ms = nsamples as f64 / sample_rate * 1000.0;
        if self.strict_time_bin_check && (incoming_buffer_size_ms - self.buffer_size_ms).abs() > f64::EPSILON {
            return Err(FalconError::build(format!(
                "incoming buffer size {incoming_buffer_size_ms}ms does not match configured buffer_size {}ms",
                self.buffer_size_ms
            )));
        }

        let spikes = self.ports.output("spikes", 0)?;
        spikes.finalize_data_type(FinalizedType::Spike { nchannels })?;
        spikes.finalize_rate(incoming_stream_rate / nsamples as f64)?;

        let events = self.ports.output("events", 0)?;
        events.finalize_data_type(FinalizedType::Event)?;
        events.finalize_rate(crate::constants::IRREGULAR_STREAM_RATE)?;
        Ok(())
    }

    fn prepare(&mut self, _global: &GlobalContext) -> Result<()> {
        self.detector = Some(MultiChannelSpikeDetector::new(self.n_channels, self.initial_threshold, self.initial_peak_lifetime));
        Ok(())
    }

    fn preprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
        loop {
            let mut incoming: Option<MultiChannelData> = None;
            let mut hw_timestamp = 0u64;
            {
                let input = self
                    .ports
                    .input_mut("data", 0)?
                    .as_mut()
                    .ok_or_else(|| FalconError::unexpected("spike detector input not connected"))?;
                let alive = input.retrieve(|item| {
                    if let DataPayload::MultiChannel(data) = &item.payload {
                        incoming = Some(data.clone());
                        hw_timestamp = item.hardware_timestamp();
                    }
                })?;
                if !alive {
                    break;
                }
            }
            let Some(data_in) = incoming else { continue };

            let threshold = self.shared_states.read_internal("threshold")?;
            let peak_lifetime = self.shared_states.read_internal("peak_lifetime")? as u32;
            let detector = self.detector.as_mut().expect("prepare must run before process");
            detector.set_threshold(threshold);
            detector.set_peak_life_time(peak_lifetime);

            let spikes = self.ports.output("spikes", 0)?;
            spikes.claim(DataPayload::Spike(SpikeData::default()), true)?;

            for s in 0..self.incoming_buffer_size_samples {
                let mut row = vec![0.0; self.n_channels];
                for c in 0..self.n_channels {
                    let value = data_in.sample(s, c);
                    row[c] = if self.invert_signal { -value } else { value };
                }
                if detector.is_spike(data_in.sample_timestamps()[s], &row) {
                    spikes.with_claimed(|payload| {
                        if let DataPayload::Spike(sd) = payload {
                            sd.push(crate::data::Peak {
                                amplitudes: detector.amplitudes_detected_spike().to_vec(),
                                timestamp: detector.timestamp_detected_spike(),
                            });
                        }
                    })?;
                }
            }

            self.ports.input_mut("data", 0)?.as_ref().unwrap().release();
            spikes.set_hardware_timestamp(hw_timestamp)?;

            let mut n_spikes = 0usize;
            spikes.with_claimed(|payload| {
                if let DataPayload::Spike(sd) = payload {
                    n_spikes = sd.len();
                }
            })?;
            spikes.publish()?;

            if n_spikes > 0 {
                let tag = if n_spikes > 1 { "spikes" } else { "spike" };
                let events = self.ports.output("events", 0)?;
                events.claim(DataPayload::Event(EventData::new(tag)), false)?;
                events.set_hardware_timestamp(hw_timestamp)?;
                events.publish()?;
            }

            if ctx.terminated() {
                break;
            }
        }
        Ok(())
    }

    fn postprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        if let Some(detector) = &self.detector {
            let produced = self.ports.output("spikes", 0).map(|s| s.items_produced()).unwrap_or(0);
            let spike_rate = if produced > 0 {
                detector.nspikes() as f64 / (produced as f64 * self.buffer_size_ms / 1000.0)
            } else {
                0.0
            };
            info!(processor = %self.name, nspikes = detector.nspikes(), spike_rate, "spike detector summary");
        }
        Ok(())
    }

    fn unprepare(&mut self, _global: &GlobalContext) -> Result<()> {
        self.detector = None;
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
    fn configure_parses_threshold_and_peak_lifetime() {
        let mut proc = SpikeDetector::new("sd1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("threshold: 40.0\npeak_lifetime: 5\n").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&options, &global).unwrap();
        assert_eq!(proc.initial_threshold, 40.0);
        assert_eq!(proc.initial_peak_lifetime, 5);
    }

    #[test]
    fn create_ports_declares_spikes_and_events() {
        let mut proc = SpikeDetector::new("sd1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("{}").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&options, &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        assert!(proc.ports().output("spikes", 0).is_ok());
        assert!(proc.ports().output("events", 0).is_ok());
        assert!(proc.shared_states().state_names().contains(&"threshold".to_string()));
        assert!(proc.shared_states().state_names().contains(&"peak_lifetime".to_string()));
    }
}
