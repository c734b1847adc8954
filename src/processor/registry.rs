//! Maps a graph spec's `class` string to a concrete processor
//! constructor, mirroring the original's factory-by-name instantiation.

use std::collections::HashMap;

use crate::error::{FalconError, Result};
use crate::processor::Processor;

type Constructor = Box<dyn Fn(String) -> Box<dyn Processor> + Send + Sync>;

/// Registry of processor classes, keyed by the name used in a graph spec's
/// `class` field (e.g. `"SpikeDetector"`).
pub struct ProcessorFactory {
    constructors: HashMap<String, Constructor>,
}

impl ProcessorFactory {
    /// Build a factory with every processor type this crate ships
    /// pre-registered.
    pub fn with_builtins() -> Self {
        let mut factory = Self { constructors: HashMap::new() };
        factory.register("Reader", |name| Box::new(crate::processors::reader::Reader::new(name)));
        factory.register("Dispatcher", |name| Box::new(crate::processors::dispatcher::Dispatcher::new(name)));
        factory.register("RunningStats", |name| Box::new(crate::processors::running_stats::RunningStats::new(name)));
        factory.register("SpikeDetector", |name| Box::new(crate::processors::spike_detector::SpikeDetector::new(name)));
        factory.register("MuaEstimator", |name| Box::new(crate::processors::mua_estimator::MuaEstimator::new(name)));
        factory.register("DigitalOutput", |name| Box::new(crate::processors::digital_output::DigitalOutput::new(name)));
        factory.register("EventSink", |name| Box::new(crate::processors::event_sink::EventSink::new(name)));
        factory
    }

    /// Register (or override) a processor class constructor.
    pub fn register<F>(&mut self, class: &str, constructor: F)
    where
        F: Fn(String) -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.constructors.insert(class.to_string(), Box::new(constructor));
    }

    /// Instantiate a processor of the named class with the given instance
    /// name. Unknown class names are a graph build error.
    pub fn create(&self, class: &str, name: &str) -> Result<Box<dyn Processor>> {
        let constructor = self
            .constructors
            .get(class)
            .ok_or_else(|| FalconError::build(format!("unknown processor class \"{class}\"")))?;
        Ok(constructor(name.to_string()))
    }

    /// Every registered class name.
    pub fn class_names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl Default for ProcessorFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_class_is_a_build_error() {
        let factory = ProcessorFactory::with_builtins();
        assert!(factory.create("NoSuchProcessor", "p1").is_err());
    }

    #[test]
    fn builtins_are_registered() {
        let factory = ProcessorFactory::with_builtins();
        let names = factory.class_names();
        assert!(names.contains(&"SpikeDetector".to_string()));
        assert!(names.contains(&"Reader".to_string()));
    }
}
