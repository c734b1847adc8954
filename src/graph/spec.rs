//! YAML-equivalent graph specification: a map of processor declarations
//! plus a list of port-to-port connection edges.
//!
//! Grounded in `spec.md` §6 "Graph specification" and the original's
//! `graphmanager.cpp` YAML handling (build/buildfile accept this same
//! shape over the control socket or from a file).

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{FalconError, Result};

/// One processor entry: its class name, free-form options passed to
/// `configure`, and optional per-port ring buffer capacity overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSpec {
    pub class: String,
    #[serde(default)]
    pub options: serde_yaml::Value,
    #[serde(default)]
    pub buffer_sizes: HashMap<String, usize>,
}

/// The full graph specification: every processor keyed by its instance
/// name, plus the connections wiring their ports together.
///
/// Deserializes a YAML mapping shaped like:
/// ```yaml
/// reader1:
///   class: Reader
///   options: { port: 26090 }
/// detector1:
///   class: SpikeDetector
/// connections:
///   - "reader1.data -> detector1.data"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(flatten)]
    pub processors: HashMap<String, ProcessorSpec>,
}

impl GraphSpec {
    /// Parse a specification from a YAML-equivalent string.
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| FalconError::build(format!("invalid graph specification: {err}")))
    }

    /// Parsed connection edges, in declaration order.
    pub fn parsed_connections(&self) -> Result<Vec<Connection>> {
        self.connections.iter().map(|c| Connection::parse(c)).collect()
    }
}

/// One side of a connection: a processor name, an optional port name
/// (required only when the processor has more than one port in that
/// direction), and a slot index (default 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub processor: String,
    pub port: Option<String>,
    pub slot: usize,
}

/// One directed edge from a producer's output slot to a consumer's input
/// slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl Connection {
    /// Parse `"src[.port[.slot]] -> dst[.port[.slot]]"`. Accepts both the
    /// ASCII arrow and the unicode arrow from `spec.md`.
    pub fn parse(text: &str) -> Result<Self> {
        let (lhs, rhs) = text
            .split_once("->")
            .or_else(|| text.split_once('\u{2192}'))
            .ok_or_else(|| FalconError::build(format!("connection \"{text}\" is missing a -> separator")))?;
        Ok(Connection { src: Endpoint::parse(lhs.trim())?, dst: Endpoint::parse(rhs.trim())? })
    }
}

impl Endpoint {
    fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('.').collect();
        match parts.as_slice() {
            [processor] => Ok(Endpoint { processor: processor.to_string(), port: None, slot: 0 }),
            [processor, port] => Ok(Endpoint { processor: processor.to_string(), port: Some(port.to_string()), slot: 0 }),
            [processor, port, slot] => {
                let slot: usize = slot
                    .parse()
                    .map_err(|_| FalconError::build(format!("connection endpoint \"{text}\" has a non-numeric slot")))?;
                Ok(Endpoint { processor: processor.to_string(), port: Some(port.to_string()), slot })
            }
            _ => Err(FalconError::build(format!("connection endpoint \"{text}\" has too many components"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_processors_and_connections() {
        let yaml = r#"
reader1:
  class: Reader
  options:
    port: 26090
detector1:
  class: SpikeDetector
connections:
  - "reader1.data -> detector1.data"
"#;
        let spec = GraphSpec::parse(yaml).unwrap();
        assert_eq!(spec.processors.len(), 2);
        assert_eq!(spec.connections.len(), 1);
        let conns = spec.parsed_connections().unwrap();
        assert_eq!(conns[0].src.processor, "reader1");
        assert_eq!(conns[0].dst.port.as_deref(), Some("data"));
    }

    #[test]
    fn endpoint_without_port_defaults_slot_zero() {
        let ep = Endpoint::parse("reader1").unwrap();
        assert_eq!(ep.port, None);
        assert_eq!(ep.slot, 0);
    }

    #[test]
    fn endpoint_with_explicit_slot() {
        let ep = Endpoint::parse("mua1.spikes.2").unwrap();
        assert_eq!(ep.port.as_deref(), Some("spikes"));
        assert_eq!(ep.slot, 2);
    }

    #[test]
    fn connection_without_arrow_is_rejected() {
        assert!(Connection::parse("reader1.data detector1.data").is_err());
    }

    #[test]
    fn connection_with_unicode_arrow_parses() {
        let c = Connection::parse("reader1.data \u{2192} detector1.data").unwrap();
        assert_eq!(c.dst.processor, "detector1");
    }
}
