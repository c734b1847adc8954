//! Counts the arrival of a target event, logging every receipt. Grounded
//! in `src/processors/eventsink.cpp`.

use std::collections::HashMap;

use tracing::debug;
use tracing::info;

use crate::data::{DataPayload, DataTypePattern, EventData};
use crate::error::{FalconError, Result};
use crate::processor::ports::{single_input, ProcessorPorts};
use crate::processor::{GlobalContext, ProcessingContext, Processor, ProcessorState};
use crate::processors::yaml_get;
use crate::state::SharedStateRegistry;

const DEFAULT_TARGET_EVENT: &str = "none";

/// Running counts of events seen by an [`EventSink`].
#[derive(Debug, Clone, Copy, Default)]
struct EventCounter {
    all_received: u64,
    target: u64,
    non_target: u64,
}

impl EventCounter {
    fn consistent(&self) -> bool {
        self.all_received == self.target + self.non_target
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Logs the arrival of a configured target event on an `EventData` stream.
pub struct EventSink {
    name: String,
    state: ProcessorState,
    ports: ProcessorPorts,
    shared_states: SharedStateRegistry,

    target_event: EventData,
    counter: EventCounter,
}

impl EventSink {
    /// Construct an unconfigured event sink.
    pub fn new(name: String) -> Self {
        Self {
            name,
            state: ProcessorState::Unconfigured,
            ports: ProcessorPorts::new(),
            shared_states: SharedStateRegistry::new(),
            target_event: EventData::new(DEFAULT_TARGET_EVENT),
            counter: EventCounter::default(),
        }
    }
}

impl Processor for EventSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ProcessorState {
        self.state
    }

    fn configure(&mut self, options: &serde_yaml::Value, _global: &GlobalContext) -> Result<()> {
        let target_event: String = yaml_get(options, "target_event", DEFAULT_TARGET_EVENT.to_string());
        self.target_event = EventData::new(target_event);
        self.state = ProcessorState::Configured;
        Ok(())
    }

    fn create_ports(&mut self, _buffer_overrides: &HashMap<String, usize>) -> Result<()> {
        self.ports.declare_input("events", DataTypePattern::Event, single_input());
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
        Ok(())
    }

    fn preprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        self.counter.reset();
        Ok(())
    }

    fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
        loop {
            let mut incoming: Option<EventData> = None;
            {
                let input = self
                    .ports
                    .input_mut("events", 0)?
                    .as_mut()
                    .ok_or_else(|| FalconError::unexpected("event sink input not connected"))?;
                let alive = input.retrieve(|item| {
                    if let DataPayload::Event(data) = &item.payload {
                        incoming = Some(data.clone());
                    }
                })?;
                if !alive {
                    break;
                }
            }
            let Some(event) = incoming else { continue };

            self.counter.all_received += 1;
            if event == self.target_event {
                self.counter.target += 1;
                debug!(processor = %self.name, event = event.tag(), "received target event");
            } else {
                self.counter.non_target += 1;
                debug!(processor = %self.name, event = event.tag(), "skipped event");
            }

            self.ports.input_mut("events", 0)?.as_ref().unwrap().release();

            if ctx.terminated() {
                break;
            }
        }
        Ok(())
    }

    fn postprocess(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        info!(
            processor = %self.name,
            received = self.counter.all_received,
            targets = self.counter.target,
            "event sink stopped"
        );
        if self.counter.consistent() {
            debug!(processor = %self.name, "event counters are consistent");
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
    fn configure_sets_target_event() {
        let mut proc = EventSink::new("sink1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("target_event: stim_a\n").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&options, &global).unwrap();
        assert_eq!(proc.target_event, EventData::new("stim_a"));
    }

    #[test]
    fn create_ports_declares_events_input() {
        let mut proc = EventSink::new("sink1".to_string());
        let options: serde_yaml::Value = serde_yaml::from_str("{}").unwrap();
        let global = GlobalContext::new("/tmp", "/tmp");
        proc.configure(&options, &global).unwrap();
        proc.create_ports(&HashMap::new()).unwrap();
        assert!(proc.ports().input("events", 0).is_ok());
    }

    #[test]
    fn counter_reports_consistent_when_totals_match() {
        let mut counter = EventCounter::default();
        counter.all_received = 3;
        counter.target = 1;
        counter.non_target = 2;
        assert!(counter.consistent());
    }
}
