//! Turns tagged events into digital-output pulses on a hardware or dummy
//! device, following a per-event channel protocol. Grounded in
//! `src/processors/digitaloutput.cpp`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::data::{DataPayload, DataTypePattern, EventData};
use crate::dio::{DigitalDevice, DigitalOutputMode, DummyDevice};
use crate::error::{FalconError, Result};
use crate::processor::ports::ProcessorPorts;
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorState};
use crate::processors::{yaml_get, yaml_get_opt};
use crate::state::{Permission, SharedStateRegistry};

const DEFAULT_ENABLED: bool = true;
const DEFAULT_SAVE_STIM_EVENTS: bool = true;
const DEFAULT_DUMMY_NCHANNELS: usize = 16;
const MAX_INPUT_SLOTS: usize = 4;
const STIM_EVENT_PREFIX: &str = "stim_";

/// A single event's effect on a set of digital-output channels.
#[derive(Debug, Clone, Default)]
struct Protocol {
    modes: HashMap<usize, DigitalOutputMode>,
}

impl Protocol {
    fn set_mode(&mut self, channels: &[usize], mode: DigitalOutputMode) {
        for &channel in channels {
            self.modes.insert(channel, mode);
        }
    }

    fn execute(&self, device: &Arc<Mutex<Box<dyn DigitalDevice>>>, pulse_width: Duration) -> Result<()> {
        let mut pulsed = Vec::new();
        {
            let mut dev = device.lock().expect("digital device lock poisoned");
            let mut state = dev.read_state();
            for (&channel, mode) in &self.modes {
                match mode {
                    DigitalOutputMode::None => {}
                    DigitalOutputMode::High => state.set_state(channel, true),
                    DigitalOutputMode::Low => state.set_state(channel, false),
                    DigitalOutputMode::Toggle => state.toggle_state(channel),
                    DigitalOutputMode::Pulse => {
                        state.set_state(channel, true);
                        pulsed.push(channel);
                    }
                }
            }
            dev.write_state(state)?;
        }
        if !pulsed.is_empty() {
            let device = Arc::clone(device);
            std::thread::spawn(move || {
                std::thread::sleep(pulse_width);
                let mut dev = device.lock().expect("digital device lock poisoned");
                let mut state = dev.read_state();
                for channel in pulsed {
                    state.set_state(channel, false);
                }
                let _ = dev.write_state(state);
            });
        }
        Ok(())
    }
}

/// Drives a digital-output device from tagged events, per a configurable
/// event-to-channel protocol map, with a per-slot lockout period.
pub struct DigitalOutput {
    name: String,
    state: ProcessorState,
    ports: ProcessorPorts,
    shared_states: SharedStateRegistry,

    default_enabled: bool,
    default_lockout_period_ms: u64,
    save_stim_events: bool,
    pulse_width_us: u64,
    n_input_slots: usize,

    device: Option<Arc<Mutex<Box<dyn DigitalDevice>>>>,
    protocols: HashMap<String, Protocol>,

    previous_timestamp_nostim: Vec<u64>,
    nreceived_events: u64,
    ntarget_events: u64,
    nprotocol_executions: u64,
    n_locked_out_events: u64,
    stim_files: HashMap<String, BufWriter<File>>,
}

impl DigitalOutput {
    /// Construct an unconfigured digital output processor.
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: ProcessorState::Unconfigured,
            ports: ProcessorPorts::new(),
            shared_states: SharedStateRegistry::new(),
            default_enabled: DEFAULT_ENABLED,
            default_lockout_period_ms: crate::constants::DEFAULT_LOCKOUT_PERIOD_MS,
            save_stim_events: DEFAULT_SAVE_STIM_EVENTS,
            pulse_width_us: crate::constants::DEFAULT_PULSE_WIDTH_US,
            n_input_slots: 1,
            device: None,
            protocols: HashMap::new(),
            previous_timestamp_nostim: Vec::new(),
            nreceived_events: 0,
            ntarget_events: 0,
            nprotocol_executions: 0,
            n_locked_out_events: 0,
            stim_files: HashMap::new(),
        }
    }

    fn to_lock_out(&mut self, slot: usize, current_timestamp: u64) -> Result<bool> {
        let previous = self.previous_timestamp_nostim[slot];
        if current_timestamp < previous {
            return Err(FalconError::processing(&self.name, "non-sequential stimulation event timestamp"));
        }
        let delta_ms = (current_timestamp - previous) / 1_000;
        let lockout_period_ms = self.shared_states.read_internal("lockout_period_ms")? as u64;
        if delta_ms <= lockout_period_ms {
            return Ok(true);
        }
        self.previous_timestamp_nostim[slot] = current_timestamp;
        Ok(false)
    }

    fn record_stim_event(&mut self, ctx: &ProcessingContext, tag: &str, serial_number: u64) {
        let filename = format!("{STIM_EVENT_PREFIX}{tag}");
        if !self.stim_files.contains_key(&filename) {
            if let Err(e) = std::fs::create_dir_all(&ctx.run_dir) {
                warn!(processor = %self.name, error = %e, "could not create run directory for stim log");
                return;
            }
            let path = ctx.run_dir.join(format!("{}.{filename}.bin", self.name));
            match File::create(&path) {
                Ok(file) => {
                    self.stim_files.insert(filename.clone(), BufWriter::new(file));
                }
                Err(e) => {
                    warn!(processor = %self.name, error = %e, "could not create stim log file");
                    return;
                }
            }
        }
        if let Some(writer) = self.stim_files.get_mut(&filename) {
            let _ = writer.write_all(&serial_number.to_le_bytes());
        }
    }
}

impl Processor for DigitalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn configure(&mut self, options: &serde_yaml::Value, _global: &GlobalContext) -> Result<()> {
        self.default_enabled = yaml_get(options, "enabled", DEFAULT_ENABLED);
        self.default_lockout_period_ms = yaml_get(options, "lockout_period_ms", crate::constants::DEFAULT_LOCKOUT_PERIOD_MS);
        self.save_stim_events = yaml_get(options, "enable_saving", DEFAULT_SAVE_STIM_EVENTS);
        self.pulse_width_us = yaml_get(options, "pulse_width", crate::constants::DEFAULT_PULSE_WIDTH_US);
        self.n_input_slots = yaml_get(options, "nslots", 1usize);
        if self.n_input_slots == 0 || self.n_input_slots > MAX_INPUT_SLOTS {
            return Err(FalconError::config(&self.name, format!("nslots must be between 1 and {MAX_INPUT_SLOTS}")));
        }

        if self.default_lockout_period_ms == 0 {
            info!(processor = %self.name, "no lockout period set");
        } else {
            info!(processor = %self.name, max_hz = 1e3 / self.default_lockout_period_ms as f64, "max stimulation frequency set");
        }

        let device_node = options.get("device").ok_or_else(|| FalconError::config(&self.name, "no digital output device specified"))?;
        let device_type: String =
            yaml_get_opt(device_node, "type").ok_or_else(|| FalconError::config(&self.name, "device.type is required"))?;
        let device: Box<dyn DigitalDevice> = match device_type.as_str() {
            "dummy" => {
                let nchannels: usize = yaml_get(device_node, "nchannels", DEFAULT_DUMMY_NCHANNELS);
                Box::new(DummyDevice::new(nchannels))
            }
            other => return Err(FalconError::config(&self.name, format!("unsupported digital output device type \"{other}\""))),
        };
        info!(processor = %self.name, device = device.device_type(), nchannels = device.nchannels(), "opened digital output device");
        self.device = Some(Arc::new(Mutex::new(device)));

        if let Some(protocols_node) = options.get("protocols") {
            if let serde_yaml::Value::Mapping(map) = protocols_node {
                for (event_key, actions) in map {
                    let event_name = event_key.as_str().unwrap_or_default().to_string();
                    let mut protocol = Protocol::default();
                    if let serde_yaml::Value::Mapping(actions) = actions {
                        for (action_key, channels_val) in actions {
                            let action = action_key.as_str().unwrap_or_default();
                            let channels: Vec<usize> = serde_yaml::from_value(channels_val.clone()).unwrap_or_default();
                            let mode = match action {
                                "high" => DigitalOutputMode::High,
                                "low" => DigitalOutputMode::Low,
                                "toggle" => DigitalOutputMode::Toggle,
                                "pulse" => DigitalOutputMode::Pulse,
                                _ => continue,
                            };
                            protocol.set_mode(&channels, mode);
                        }
                    }
                    self.protocols.insert(event_name, protocol);
                }
            }
        }
        info!(processor = %self.name, n_protocols = self.protocols.len(), "configured output protocols");

        self.state = ProcessorState::Configured;
        Ok(())
    }

    fn create_ports(&mut self, _buffer_overrides: &HashMap<String, usize>) -> Result<()> {
        self.ports.declare_input("events", DataTypePattern::Event, crate::port::PortPolicy::input(self.n_input_slots));

        self.shared_states.declare("enabled", if self.default_enabled { 1.0 } else { 0.0 }, "enable digital output", "bool", Permission::Read, Permission::Write);
        self.shared_states.declare(
            "lockout_period_ms",
            self.default_lockout_period_ms as f64,
            "minimum interval between executed protocols",
            "milliseconds",
            Permission::Read,
            Permission::Write,
        );
        self.shared_states.declare_method("reset_lockout");
        Ok(())
    }

    fn ports(&self) -> &ProcessorPorts {
        &self.ports
    }

    fn ports_mut(&mut self) -> &mut ProcessorPorts {
        &mut self.ports
    }

    fn complete_stream_info(&mut self) -> Result<()> {
        Ok(())
    }

    fn prepare(&mut self, _global: &GlobalContext) -> Result<()> {
        if self.device.is_none() {
            return Err(FalconError::prepare(&self.name, "no digital output device configured"));
        }
        Ok(())
    }

    fn preprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        self.nreceived_events = 0;
        self.ntarget_events = 0;
        self.nprotocol_executions = 0;
        self.n_locked_out_events = 0;
        self.previous_timestamp_nostim = vec![0; self.n_input_slots.max(1)];
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
        let device = self.device.clone().expect("prepare must run before process");
        let pulse_width = Duration::from_micros(self.pulse_width_us);

        loop {
            let mut any_alive = false;
            for slot in 0..self.n_input_slots {
                let mut incoming: Option<EventData> = None;
                let mut hw_ts = 0u64;
                let mut serial = 0u64;
                {
                    let Some(input) = self.ports.input_mut("events", slot)?.as_mut() else { continue };
                    let alive = input.retrieve(|item| {
                        if let DataPayload::Event(data) = &item.payload {
                            incoming = Some(data.clone());
                            hw_ts = item.hardware_timestamp();
                            serial = item.header.serial_number as u64;
                        }
                    })?;
                    if !alive {
                        continue;
                    }
                    any_alive = true;
                }
                let Some(event) = incoming else { continue };
                self.nreceived_events += 1;

                let enabled = self.shared_states.read_internal("enabled")? != 0.0;
                if enabled {
                    if let Some(protocol) = self.protocols.get(event.tag()).cloned() {
                        self.ntarget_events += 1;
                        if !self.to_lock_out(slot, hw_ts)? {
                            if let Err(e) = protocol.execute(&device, pulse_width) {
                                warn!(processor = %self.name, event = event.tag(), error = %e, "could not execute protocol");
                            } else {
                                self.nprotocol_executions += 1;
                                debug!(processor = %self.name, event = event.tag(), "protocol executed");
                            }
                            if self.save_stim_events {
                                self.record_stim_event(ctx, event.tag(), serial);
                            }
                        } else {
                            self.n_locked_out_events += 1;
                        }
                    }
                }
                self.ports.input_mut("events", slot)?.as_ref().unwrap().release();
            }

            if !any_alive {
                break;
            }
            if ctx.terminated() {
                break;
            }
        }
        Ok(())
    }

    fn postprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        info!(
            processor = %self.name,
            received = self.nreceived_events,
            targets = self.ntarget_events,
            executed = self.nprotocol_executions,
            locked_out = self.n_locked_out_events,
            "digital output stopped"
        );
        for (_, writer) in self.stim_files.drain() {
            let _ = writer.into_inner();
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
        if !self.shared_states.has_method(name) {
            return Err(FalconError::control(format!("no such method \"{name}\" on {}", self.name)));
        }
        match name {
            "reset_lockout" => {
                self.previous_timestamp_nostim = vec![0; self.n_input_slots.max(1)];
                info!(processor = %self.name, "lockout timestamps reset via control method");
                Ok(serde_yaml::Value::Null)
            }
            _ => Err(FalconError::control(format!("no such method \"{name}\" on {}", self.name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_options() -> serde_yaml::Value {
        serde_yaml::from_str(
            "device:\n  type: dummy\n  nchannels: 4\nprotocols:\n  stim_a:\n    high: [0, 1]\n  stim_b:\n    pulse: [2]\n",
        )
        .unwrap()
    }

    #[test]
    fn configure_requires_a_device() {
        let mut proc = DigitalOutput::new("do1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("{}").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        assert!(proc.configure(&options, &global).is_err());
    }

    #[test]
    fn configure_parses_protocols() {
        let mut proc = DigitalOutput::new("do1".to_string());
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&dummy_options(), &global).unwrap();
        assert_eq!(proc.protocols.len(), 2);
        assert_eq!(proc.protocols["stim_a"].modes[&0], DigitalOutputMode::High);
        assert_eq!(proc.protocols["stim_b"].modes[&2], DigitalOutputMode::Pulse);
    }

    #[test]
    fn create_ports_declares_events_input_and_states() {
        let mut proc = DigitalOutput::new("do1".to_string());
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&dummy_options(), &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        assert!(proc.ports().input("events", 0).is_ok());
        assert!(proc.shared_states().state_names().contains(&"lockout_period_ms".to_string()));
    }

    #[test]
    fn lock_out_rejects_rapid_repeats() {
        let mut proc = DigitalOutput::new("do1".to_string());
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&dummy_options(), &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        proc.previous_timestamp_nostim = vec![0];
        assert!(!proc.to_lock_out(0, 1_000_000).unwrap());
        assert!(proc.to_lock_out(0, 1_000_001).unwrap());
    }

    #[test]
    fn reset_lockout_method_is_registered_and_clears_state() {
        let mut proc = DigitalOutput::new("do1".to_string());
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&dummy_options(), &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        assert!(proc.shared_states().has_method("reset_lockout"));

        proc.previous_timestamp_nostim = vec![5_000_000];
        let args: serde_yaml::Value = serde_yaml::from_str("null").unwrap();
        let result = proc.invoke_method("reset_lockout", &args);
        assert!(result.is_ok());
        assert_eq!(proc.previous_timestamp_nostim, vec![0]);
    }

    #[test]
    fn invoke_unknown_method_is_an_error() {
        let mut proc = DigitalOutput::new("do1".to_string());
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&dummy_options(), &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        let args: serde_yaml::Value = serde_yaml::from_str("null").unwrap();
        assert!(proc.invoke_method("no_such_method", &args).is_err());
    }
}
