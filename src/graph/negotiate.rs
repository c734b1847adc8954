//! Graph negotiation: wires declared connections, derives and finalizes
//! stream info in topological order, then allocates ring buffers.
//!
//! Grounded in `spec.md` §4.B "Negotiation algorithm". Runs once, during
//! `graph build`: `StreamInfo::finalize_data_type`/`finalize_rate` refuse a
//! second call, so this cannot be re-run on every `graph start` without a
//! rebuild (see `DESIGN.md`).

use std::collections::{HashMap, VecDeque};

use crate::error::{FalconError, Result};
use crate::graph::spec::Connection;
use crate::port::Direction;
use crate::processor::Processor;

/// Resolve an endpoint's port name, defaulting to the processor's sole
/// port in the given direction when the connection left it unspecified.
fn resolve_port(proc: &dyn Processor, direction: Direction, port: &Option<String>) -> Result<String> {
    if let Some(name) = port {
        return Ok(name.clone());
    }
    let candidates: Vec<&str> =
        proc.ports().specs().iter().filter(|s| s.direction == direction).map(|s| s.name.as_str()).collect();
    match candidates.as_slice() {
        [one] => Ok(one.to_string()),
        [] => Err(FalconError::build(format!("processor \"{}\" has no {:?} ports", proc.name(), direction))),
        many => Err(FalconError::build(format!(
            "processor \"{}\" has {} {:?} ports ({}); connection must name one",
            proc.name(),
            many.len(),
            direction,
            many.join(", ")
        ))),
    }
}

/// Topologically order `names` by the edges in `connections` (source
/// before destination). Errors if the connection graph has a cycle.
fn topological_order(names: &[String], connections: &[Connection]) -> Result<Vec<String>> {
    let mut indegree: HashMap<&str, usize> = names.iter().map(|n| (n.as_str(), 0)).collect();
    let mut edges_out: HashMap<&str, Vec<&str>> = names.iter().map(|n| (n.as_str(), Vec::new())).collect();

    for c in connections {
        if c.src.processor == c.dst.processor {
            return Err(FalconError::build(format!("processor \"{}\" cannot connect to itself", c.src.processor)));
        }
        edges_out
            .get_mut(c.src.processor.as_str())
            .ok_or_else(|| FalconError::build(format!("unknown processor \"{}\" in connection", c.src.processor)))?
            .push(c.dst.processor.as_str());
        *indegree
            .get_mut(c.dst.processor.as_str())
            .ok_or_else(|| FalconError::build(format!("unknown processor \"{}\" in connection", c.dst.processor)))? += 1;
    }

    let mut queue: VecDeque<&str> = indegree.iter().filter(|(_, &d)| d == 0).map(|(n, _)| *n).collect();
    let mut order = Vec::with_capacity(names.len());
    while let Some(n) = queue.pop_front() {
        order.push(n.to_string());
        for &m in &edges_out[n] {
            let d = indegree.get_mut(m).unwrap();
            *d -= 1;
            if *d == 0 {
                queue.push_back(m);
            }
        }
    }

    if order.len() != names.len() {
        return Err(FalconError::build("graph contains a connection cycle"));
    }
    Ok(order)
}

/// Run the full negotiation pass: wire every connection, finalize stream
/// info in dependency order, and allocate ring buffers.
pub fn negotiate(processors: &mut HashMap<String, Box<dyn Processor>>, connections: &[Connection]) -> Result<()> {
    let names: Vec<String> = processors.keys().cloned().collect();
    let order = topological_order(&names, connections)?;

    for name in &order {
        let incoming: Vec<Connection> = connections.iter().filter(|c| &c.dst.processor == name).cloned().collect();

        for c in incoming {
            let dst_port = resolve_port(processors[&c.dst.processor].as_ref(), Direction::Input, &c.dst.port)?;
            let src_port = resolve_port(processors[&c.src.processor].as_ref(), Direction::Output, &c.src.port)?;

            let mut dst_proc = processors.remove(&c.dst.processor).unwrap();
            let result = {
                let src_proc = processors
                    .get(&c.src.processor)
                    .ok_or_else(|| FalconError::build(format!("unknown processor \"{}\" in connection", c.src.processor)))?;
                let upstream = src_proc.ports().output(&src_port, c.src.slot)?;
                dst_proc.ports_mut().connect_input(&dst_port, c.dst.slot, upstream)
            };
            processors.insert(c.dst.processor.clone(), dst_proc);
            result?;
        }

        let proc = processors.get_mut(name).unwrap();
        proc.complete_stream_info()?;
        proc.ports_mut().allocate_ring_buffers()?;
    }

    for (name, proc) in processors.iter() {
        let missing = proc.ports().unconnected_inputs();
        if !missing.is_empty() {
            return Err(FalconError::build(format!("processor \"{name}\" has unconnected input ports: {missing:?}")));
        }
        let unfinalized = proc.ports().unfinalized_outputs();
        if !unfinalized.is_empty() {
            return Err(FalconError::build(format!("processor \"{name}\" has unfinalized output ports: {unfinalized:?}")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::spec::Endpoint;
    use crate::processors::mua_estimator::MuaEstimator;
    use crate::processors::spike_detector::SpikeDetector;
    use crate::processor::GlobalContext;
    use std::collections::HashMap as Map;

    fn endpoint(processor: &str, port: &str, slot: usize) -> Endpoint {
        Endpoint { processor: processor.to_string(), port: Some(port.to_string()), slot }
    }

    #[test]
    fn self_loop_is_rejected() {
        let global = GlobalContext::new("/tmp", "/tmp");
        let mut sd = Box::new(SpikeDetector::new("sd1".to_string()));
        sd.configure(&serde_yaml::from_str("{}").unwrap(), &global).unwrap();
        sd.create_ports(&Map::new()).unwrap();
        let mut processors: HashMap<String, Box<dyn Processor>> = HashMap::new();
        processors.insert("sd1".to_string(), sd);

        let connections = vec![Connection { src: endpoint("sd1", "spikes", 0), dst: endpoint("sd1", "spikes", 0) }];
        assert!(negotiate(&mut processors, &connections).is_err());
    }

    #[test]
    fn cycle_is_rejected() {
        let global = GlobalContext::new("/tmp", "/tmp");
        let mut a = Box::new(MuaEstimator::new("a".to_string()));
        a.configure(&serde_yaml::from_str("{}").unwrap(), &global).unwrap();
        a.create_ports(&Map::new()).unwrap();
        let mut b = Box::new(MuaEstimator::new("b".to_string()));
        b.configure(&serde_yaml::from_str("{}").unwrap(), &global).unwrap();
        b.create_ports(&Map::new()).unwrap();

        let mut processors: HashMap<String, Box<dyn Processor>> = HashMap::new();
        processors.insert("a".to_string(), a);
        processors.insert("b".to_string(), b);

        let connections = vec![
            Connection { src: endpoint("a", "mua", 0), dst: endpoint("b", "spikes", 0) },
            Connection { src: endpoint("b", "mua", 0), dst: endpoint("a", "spikes", 0) },
        ];
        assert!(negotiate(&mut processors, &connections).is_err());
    }

    #[test]
    fn unknown_processor_in_connection_is_rejected() {
        let global = GlobalContext::new("/tmp", "/tmp");
        let mut a = Box::new(MuaEstimator::new("a".to_string()));
        a.configure(&serde_yaml::from_str("{}").unwrap(), &global).unwrap();
        a.create_ports(&Map::new()).unwrap();
        let mut processors: HashMap<String, Box<dyn Processor>> = HashMap::new();
        processors.insert("a".to_string(), a);

        let connections = vec![Connection { src: endpoint("ghost", "mua", 0), dst: endpoint("a", "spikes", 0) }];
        assert!(negotiate(&mut processors, &connections).is_err());
    }
}
