//! UDP source processor: reads Neuralynx Digilynx packets, validates and
//! batches them into per-channel-group `MultiChannel` buckets.
//!
//! Grounded in `src/processors/nlxreader.cpp`: same counters
//! (`invalid`/`duplicated`/`out_of_order`/`missed`/`gap_count`), same
//! optional hardware-trigger gate, same batching behavior.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::data::stream_info::{ChannelRange, FinalizedType};
use crate::data::{DataItem, DataPayload, MultiChannelData};
use crate::disruptor::WaitStrategyType;
use crate::error::{FalconError, Result};
use crate::net::NlxRecord;
use crate::processor::ports::{single_output, ProcessorPorts};
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorState};
use crate::processors::{yaml_get, yaml_get_opt};
use crate::state::{Permission, SharedStateRegistry};

const DEFAULT_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 26090;
const DEFAULT_NCHANNELS: usize = 128;
const DEFAULT_BATCH_SIZE: usize = 1;
const DEFAULT_NPACKETS: u64 = 0;
const DEFAULT_UPDATE_INTERVAL_SEC: f64 = 10.0;
const MAX_ALLOWABLE_TIMEGAP_US: u64 = 1_000_000; // 1 second
const SAMPLING_PERIOD_US: f64 = 1_000_000.0 / crate::constants::NLX_SIGNAL_SAMPLING_FREQUENCY;

#[derive(Default, Debug, Clone, Copy)]
struct ReaderStats {
    invalid: u64,
    duplicated: u64,
    out_of_order: u64,
    missed: u64,
    gaps: u64,
    valid: u64,
}

/// UDP source processor. One output port per channel-map entry.
pub struct Reader {
    name: String,
    state: ProcessorState,
    ports: ProcessorPorts,
    shared_states: SharedStateRegistry,

    address: String,
    port: u16,
    channelmap: HashMap<String, Vec<usize>>,
    nchannels: usize,
    npackets: u64,
    batch_size: usize,
    update_interval: u64,
    hardware_trigger: bool,
    hardware_trigger_channel: u32,

    socket: Option<UdpSocket>,
    stats: ReaderStats,
    last_timestamp: Option<u64>,
    sample_counter: usize,
    test_source_timestamps: Vec<Instant>,
}

impl Reader {
    /// Construct an unconfigured reader with the given instance name.
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: ProcessorState::Unconfigured,
            ports: ProcessorPorts::new(),
            shared_states: SharedStateRegistry::new(),
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            channelmap: HashMap::new(),
            nchannels: DEFAULT_NCHANNELS,
            npackets: u64::MAX,
            batch_size: DEFAULT_BATCH_SIZE,
            update_interval: 0,
            hardware_trigger: false,
            hardware_trigger_channel: 0,
            socket: None,
            stats: ReaderStats::default(),
            last_timestamp: None,
            sample_counter: 0,
            test_source_timestamps: Vec::new(),
        }
    }

    fn check_packet(&mut self, record: &NlxRecord) -> bool {
        let timestamp = record.timestamp();
        match self.last_timestamp {
            None => self.last_timestamp = Some(timestamp),
            Some(last) if timestamp == last => {
                self.stats.duplicated += 1;
                return false;
            }
            Some(last) if timestamp < last => {
                self.stats.out_of_order += 1;
                return false;
            }
            Some(last) => {
                let delta = timestamp - last;
                if delta > MAX_ALLOWABLE_TIMEGAP_US {
                    let missed = ((delta as f64 / SAMPLING_PERIOD_US).round() as i64 - 1).max(0) as u64;
                    self.stats.missed += missed;
                    self.stats.gaps += 1;
                    debug!(missed, "timestamps were found to be missing");
                }
                self.last_timestamp = Some(timestamp);
            }
        }
        true
    }
}

impl Processor for Reader {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn configure(&mut self, options: &serde_yaml::Value, _global: &GlobalContext) -> Result<()> {
        self.address = yaml_get(options, "address", DEFAULT_ADDRESS.to_string());
        self.port = yaml_get(options, "port", DEFAULT_PORT);
        if let Some(map) = yaml_get_opt::<HashMap<String, Vec<usize>>>(options, "channelmap") {
            self.channelmap = map;
        }
        let npackets: u64 = yaml_get(options, "npackets", DEFAULT_NPACKETS);
        self.npackets = if npackets == 0 { u64::MAX } else { npackets };
        self.batch_size = yaml_get(options, "batch_size", DEFAULT_BATCH_SIZE);
        self.nchannels = yaml_get(options, "nchannels", DEFAULT_NCHANNELS);
        let update_interval_sec: f64 = yaml_get(options, "update_interval", DEFAULT_UPDATE_INTERVAL_SEC);
        let computed = (update_interval_sec * crate::constants::NLX_SIGNAL_SAMPLING_FREQUENCY) as u64;
        self.update_interval = if computed == 0 { u64::MAX } else { computed };
        self.hardware_trigger = yaml_get(options, "hardware_trigger", false);
        self.hardware_trigger_channel = yaml_get(options, "hardware_trigger_channel", 0u32);

        if self.channelmap.is_empty() {
            return Err(FalconError::config(&self.name, "channelmap must declare at least one output group"));
        }
        self.state = ProcessorState::Configured;
        Ok(())
    }

    fn create_ports(&mut self, buffer_overrides: &HashMap<String, usize>) -> Result<()> {
        for (group, channels) in &self.channelmap {
            let buffer_size = buffer_overrides.get(group).copied().unwrap_or(500);
            self.ports.declare_output(
                group.clone(),
                crate::data::DataTypePattern::MultiChannel {
                    channels: ChannelRange::exact(channels.len()),
                    nsamples: None,
                },
                single_output(buffer_size, WaitStrategyType::Blocking),
            );
        }
        self.shared_states.declare(
            "valid_packets",
            0.0,
            "number of valid packets received",
            "count",
            crate::state::Permission::Write,
            Permission::Read,
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
        for (group, channels) in &self.channelmap {
            for slot in self.ports.output_slots(group)? {
                slot.finalize_data_type(FinalizedType::MultiChannel {
                    nsamples: self.batch_size,
                    nchannels: channels.len(),
                    sample_rate: crate::constants::NLX_SIGNAL_SAMPLING_FREQUENCY,
                })?;
                slot.finalize_rate(crate::constants::NLX_SIGNAL_SAMPLING_FREQUENCY / self.batch_size as f64)?;
            }
        }
        Ok(())
    }

    fn prepare(&mut self, _global: &GlobalContext) -> Result<()> {
        let socket = UdpSocket::bind((self.address.as_str(), self.port))
            .map_err(|e| FalconError::prepare(&self.name, format!("socket bind failed: {e}")))?;
        socket
            .set_read_timeout(Some(crate::constants::SOURCE_SELECT_TIMEOUT))
            .map_err(|e| FalconError::prepare(&self.name, format!("socket configure failed: {e}")))?;
        self.socket = Some(socket);
        info!(processor = %self.name, "socket bound and ready");
        Ok(())
    }

    fn preprocess(&mut self, ctx: &ProcessingContext) -> Result<()> {
        self.sample_counter = 0;
        self.stats = ReaderStats::default();
        self.last_timestamp = None;
        if ctx.test() {
            self.test_source_timestamps.clear();
        }
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| FalconError::unexpected("socket not prepared"))?;
        let mut buffer = [0u8; crate::constants::MAX_UDP_PAYLOAD];
        let groups: Vec<(String, Vec<usize>)> = self.channelmap.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut dispatching = !self.hardware_trigger;

        while !ctx.terminated() && self.stats.valid < self.npackets {
            let recv = socket.recv_from(&mut buffer);
            let size = match recv {
                Ok((n, _)) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(_) => continue,
            };

            if ctx.test() {
                self.test_source_timestamps.push(Instant::now());
            }

            let record = match NlxRecord::from_network_buffer(&buffer[..size], self.nchannels) {
                Some(r) => r,
                None => {
                    self.stats.invalid += 1;
                    continue;
                }
            };

            if !self.check_packet(&record) {
                continue;
            }
            self.stats.valid += 1;

            if !dispatching {
                if record.trigger_bit(self.hardware_trigger_channel) {
                    dispatching = true;
                    info!(processor = %self.name, "hardware trigger received, dispatching starts");
                } else {
                    continue;
                }
            }

            if self.sample_counter == 0 {
                for (group, _) in &groups {
                    let payload = DataPayload::MultiChannel(MultiChannelData::new(
                        self.batch_size,
                        self.channelmap[group].len(),
                        crate::constants::NLX_SIGNAL_SAMPLING_FREQUENCY,
                    ));
                    let slot = self.ports.output(group, 0)?;
                    slot.claim(payload, true)?;
                    slot.set_hardware_timestamp(record.timestamp())?;
                }
            }

            for (group, channels) in &groups {
                let slot = self.ports.output(group, 0)?;
                let sample_index = self.sample_counter;
                slot.with_claimed(|payload| {
                    if let DataPayload::MultiChannel(data) = payload {
                        for (ch_index, &src_channel) in channels.iter().enumerate() {
                            data.set_sample(sample_index, ch_index, record.sample_microvolt(src_channel));
                        }
                        let mut timestamps = data.sample_timestamps().to_vec();
                        timestamps[sample_index] = record.timestamp();
                        data.set_sample_timestamps(&timestamps);
                    }
                })?;
            }

            self.sample_counter += 1;
            if self.sample_counter == self.batch_size {
                for (group, _) in &groups {
                    self.ports.output(group, 0)?.publish()?;
                }
                self.sample_counter = 0;
            }

            if self.update_interval != 0 && self.stats.valid % self.update_interval == 0 {
                info!(processor = %self.name, valid = self.stats.valid, "packets received");
            }
        }

        Ok(())
    }

    fn postprocess(&mut self, ctx: &ProcessingContext) -> Result<()> {
        info!(
            processor = %self.name,
            valid = self.stats.valid,
            invalid = self.stats.invalid,
            duplicated = self.stats.duplicated,
            out_of_order = self.stats.out_of_order,
            missed = self.stats.missed,
            gaps = self.stats.gaps,
            "reader stopped"
        );
        if ctx.test() && !self.test_source_timestamps.is_empty() {
            let path = ctx.run_dir.join(format!("{}.source_latency.bin", self.name));
            if let Err(e) = std::fs::create_dir_all(&ctx.run_dir) {
                warn!(processor = %self.name, error = %e, "could not create run directory for latency log");
            }
            let t0 = self.test_source_timestamps[0];
            let mut buf = Vec::with_capacity(self.test_source_timestamps.len() * 8);
            for instant in &self.test_source_timestamps {
                let micros = instant.duration_since(t0).as_micros() as u64;
                buf.extend_from_slice(&micros.to_le_bytes());
            }
            if let Err(e) = std::fs::write(&path, buf) {
                warn!(processor = %self.name, error = %e, "could not write source latency log");
            }
        }
        Ok(())
    }

    fn unprepare(&mut self, _global: &GlobalContext) -> Result<()> {
        self.socket = None;
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

    fn configured_reader() -> Reader {
        let mut reader = Reader::new("reader1".to_string());
        let mut map = HashMap::new();
        map.insert("region_a".to_string(), vec![0, 1]);
        let options: serde_yaml::Value = serde_yaml::from_str(
            "address: 127.0.0.1\nport: 0\nnchannels: 4\nbatch_size: 2\nchannelmap:\n  region_a: [0, 1]\n",
        )
        .unwrap();
        let global = GlobalContext::new("/tmp/falcon_run", "/tmp/falcon_res");
        reader.configure(&options, &global).unwrap();
        reader.create_ports(&HashMap::new()).unwrap();
        let _ = map;
        reader
    }

    #[test]
    fn configure_parses_channelmap_and_batch_size() {
        let reader = configured_reader();
        assert_eq!(reader.batch_size, 2);
        assert_eq!(reader.channelmap.get("region_a").unwrap(), &vec![0, 1]);
    }

    #[test]
    fn configure_rejects_empty_channelmap() {
        let mut reader = Reader::new("reader1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("port: 0\n").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        assert!(reader.configure(&options, &global).is_err());
    }

    #[test]
    fn complete_stream_info_finalizes_every_output() {
        let mut reader = configured_reader();
        reader.complete_stream_info().unwrap();
        assert!(reader.ports().output("region_a", 0).unwrap().is_finalized());
    }
}
