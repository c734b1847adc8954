//! Running mean/MAD of channel 0 of an incoming MultiChannel stream,
//! published as a 2-channel `[center, dispersion]` stream. Grounded in
//! `src/processors/runningstats.cpp`.

use std::collections::HashMap;

use tracing::info;

use crate::data::stream_info::{ChannelRange, FinalizedType};
use crate::data::{DataPayload, DataTypePattern, MultiChannelData};
use crate::disruptor::WaitStrategyType;
use crate::dsp::RunningMeanMad;
use crate::error::{FalconError, Result};
use crate::processor::ports::{single_input, single_output, ProcessorPorts};
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorState};
use crate::processors::yaml_get;
use crate::state::SharedStateRegistry;

const DEFAULT_INTEGRATION_TIME: f64 = 1.0;
const DEFAULT_OUTLIER_PROTECTION: bool = false;
const DEFAULT_OUTLIER_ZSCORE: f64 = 6.0;
const DEFAULT_OUTLIER_HALF_LIFE: f64 = 2.0;
const LOG_EVERY_N_BUCKETS: u32 = 100;

/// Tracks an exponentially-smoothed mean and MAD of one channel.
pub struct RunningStats {
    name: String,
    state: ProcessorState,
    ports: ProcessorPorts,
    shared_states: SharedStateRegistry,

    integration_time: f64,
    outlier_protection: bool,
    outlier_zscore: f64,
    outlier_half_life: f64,

    stats: Option<RunningMeanMad>,
    log_counter: u32,
}

impl RunningStats {
    /// Construct an unconfigured running-stats processor.
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: ProcessorState::Unconfigured,
            ports: ProcessorPorts::new(),
            shared_states: SharedStateRegistry::new(),
            integration_time: DEFAULT_INTEGRATION_TIME,
            outlier_protection: DEFAULT_OUTLIER_PROTECTION,
            outlier_zscore: DEFAULT_OUTLIER_ZSCORE,
            outlier_half_life: DEFAULT_OUTLIER_HALF_LIFE,
            stats: None,
            log_counter: LOG_EVERY_N_BUCKETS,
        }
    }
}

impl Processor for RunningStats {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn configure(&mut self, options: &serde_yaml::Value, _global: &GlobalContext) -> Result<()> {
        self.integration_time = yaml_get(options, "integration_time", DEFAULT_INTEGRATION_TIME);
        self.outlier_protection = yaml_get(options, "outlier_protection", DEFAULT_OUTLIER_PROTECTION);
        self.outlier_zscore = yaml_get(options, "outlier_zscore", DEFAULT_OUTLIER_ZSCORE);
        self.outlier_half_life = yaml_get(options, "outlier_half_life", DEFAULT_OUTLIER_HALF_LIFE);
        if self.integration_time <= 0.0 {
            return Err(FalconError::config(&self.name, "integration_time must be positive"));
        }
        self.state = ProcessorState::Configured;
        Ok(())
    }

    fn create_ports(&mut self, buffer_overrides: &HashMap<String, usize>) -> Result<()> {
        self.ports.declare_input(
            "data",
            DataTypePattern::MultiChannel { channels: ChannelRange::new(1, crate::constants::MAX_N_CHANNELS), nsamples: None },
            single_input(),
        );
        let buffer_size = buffer_overrides.get("data").copied().unwrap_or(2000);
        self.ports.declare_output(
            "data",
            DataTypePattern::MultiChannel { channels: ChannelRange::exact(2), nsamples: None },
            single_output(buffer_size, WaitStrategyType::Blocking),
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
            .ok_or_else(|| FalconError::build("running stats input not connected"))?
            .stream_info()
            .clone();
        let (nsamples, sample_rate, stream_rate) = match (input_info.data_type(), input_info.stream_rate()) {
            (Some(FinalizedType::MultiChannel { nsamples, sample_rate, .. }), Some(rate)) => (*nsamples, *sample_rate, rate),
            _ => return Err(FalconError::build("running stats input is not a finalized MultiChannel stream")),
        };
        let out = self.ports.output("data", 0)?;
        out.finalize_data_type(FinalizedType::MultiChannel { nsamples, nchannels: 2, sample_rate })?;
        out.finalize_rate(stream_rate)?;
        Ok(())
    }

    fn prepare(&mut self, _global: &GlobalContext) -> Result<()> {
        Ok(())
    }

    fn preprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        let sample_rate = match self.ports.input("data", 0)?.and_then(|s| s.stream_info().data_type().cloned()) {
            Some(FinalizedType::MultiChannel { sample_rate, .. }) => sample_rate,
            _ => return Err(FalconError::unexpected("running stats input stream info missing at preprocess")),
        };
        let burn_in = (self.integration_time * sample_rate).round().max(1.0) as u64;
        let alpha = 1.0 / (self.integration_time * sample_rate);
        self.stats = Some(RunningMeanMad::new(
            alpha,
            burn_in,
            self.outlier_protection,
            self.outlier_zscore,
            self.outlier_half_life,
            0.0,
            1.0,
        ));
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
        loop {
            let mut incoming: Option<MultiChannelData> = None;
            let mut hw_ts = 0u64;
            {
                let input = self
                    .ports
                    .input_mut("data", 0)?
                    .as_mut()
                    .ok_or_else(|| FalconError::unexpected("running stats input not connected"))?;
                let alive = input.retrieve(|item| {
                    if let DataPayload::MultiChannel(data) = &item.payload {
                        incoming = Some(data.clone());
                        hw_ts = item.hardware_timestamp();
                    }
                })?;
                if !alive {
                    break;
                }
            }
            let Some(data_in) = incoming else { continue };
            let stats = self.stats.as_mut().expect("preprocess must run before process");

            let payload = DataPayload::MultiChannel(MultiChannelData::new(data_in.nsamples(), 2, data_in.sample_rate()));
            let out = self.ports.output("data", 0)?;
            out.claim(payload, true)?;
            out.set_hardware_timestamp(hw_ts)?;
            out.with_claimed(|payload| {
                if let DataPayload::MultiChannel(bucket) = payload {
                    bucket.set_sample_timestamps(data_in.sample_timestamps());
                    for s in 0..data_in.nsamples() {
                        stats.add_sample(data_in.sample(s, 0));
                        bucket.set_sample(s, 0, stats.mean());
                        bucket.set_sample(s, 1, stats.mad());
                    }
                }
            })?;
            out.publish()?;
            self.ports.input_mut("data", 0)?.as_ref().unwrap().release();

            self.log_counter -= 1;
            if self.log_counter == 0 {
                info!(processor = %self.name, center = stats.mean(), dispersion = stats.mad(), "running stats update");
                self.log_counter = LOG_EVERY_N_BUCKETS;
            }

            if ctx.terminated() {
                break;
            }
        }
        Ok(())
    }

    fn postprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        if let Some(stats) = &self.stats {
            info!(processor = %self.name, center = stats.mean(), dispersion = stats.mad(), "final running stats");
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
    fn configure_rejects_zero_integration_time() {
        let mut proc = RunningStats::new("rs1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("integration_time: 0").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        assert!(proc.configure(&options, &global).is_err());
    }

    #[test]
    fn create_ports_declares_two_channel_output() {
        let mut proc = RunningStats::new("rs1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("{}").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&options, &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        assert!(proc.ports().output("data", 0).is_ok());
    }
}
