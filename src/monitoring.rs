//! Per-processor throughput and error counters surfaced by `graph info`.
//!
//! Grounded in `src/performance/mod.rs`'s `PerformanceMonitor`: lock-free
//! atomic counters sampled against an elapsed wall-clock. Throughput here
//! is read live from each processor's ports (`OutputSlot`/`InputSlot`
//! already count published/released items) rather than duplicated;
//! `GraphMonitor` only tracks what ports can't: errors and elapsed time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::processor::ProcessorPorts;

/// Throughput and error snapshot for one processor at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Items published across all of this processor's output ports.
    pub items_produced: u64,
    /// Items released across all of this processor's input ports.
    pub items_consumed: u64,
    /// Errors raised by this processor's lifecycle calls since the last
    /// `mark_started`.
    pub errors: u64,
}

/// Graph-wide error counters and a run clock, shared between the Graph
/// Manager and every processor's worker thread via `Arc`.
#[derive(Default)]
pub struct GraphMonitor {
    errors: Mutex<HashMap<String, u64>>,
    start_time: Mutex<Option<Instant>>,
}

impl GraphMonitor {
    /// Build an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a processing run, resetting the elapsed clock and
    /// error counters.
    pub fn mark_started(&self) {
        *self.start_time.lock() = Some(Instant::now());
        self.errors.lock().clear();
    }

    /// Record one lifecycle error for `processor`.
    pub fn record_error(&self, processor: &str) {
        *self.errors.lock().entry(processor.to_string()).or_insert(0) += 1;
    }

    /// Errors recorded for `processor` since the last `mark_started`.
    pub fn error_count(&self, processor: &str) -> u64 {
        self.errors.lock().get(processor).copied().unwrap_or(0)
    }

    /// Errors recorded across every processor since the last `mark_started`.
    pub fn total_errors(&self) -> u64 {
        self.errors.lock().values().sum()
    }

    /// Wall-clock time since the last `mark_started`, zero if never started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.lock().map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Build a stats snapshot for one processor, combining its ports'
    /// throughput counters with this monitor's error count.
    pub fn snapshot(&self, name: &str, ports: &ProcessorPorts) -> ProcessorStats {
        ProcessorStats {
            items_produced: ports.total_items_produced(),
            items_consumed: ports.total_items_consumed(),
            errors: self.error_count(name),
        }
    }
}

/// Rate of `total` events over `elapsed`, matching the original's integer
/// truncation (zero while under a second has elapsed).
pub fn rate_per_second(total: u64, elapsed: Duration) -> u64 {
    if elapsed.as_secs() > 0 { total / elapsed.as_secs() } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataTypePattern;
    use crate::disruptor::WaitStrategyType;
    use crate::processor::ports::single_output;

    #[test]
    fn records_and_reports_errors_per_processor() {
        let monitor = GraphMonitor::new();
        monitor.mark_started();
        monitor.record_error("reader1");
        monitor.record_error("reader1");
        monitor.record_error("sink1");
        assert_eq!(monitor.error_count("reader1"), 2);
        assert_eq!(monitor.error_count("sink1"), 1);
        assert_eq!(monitor.error_count("unknown"), 0);
        assert_eq!(monitor.total_errors(), 3);
    }

    #[test]
    fn mark_started_resets_errors() {
        let monitor = GraphMonitor::new();
        monitor.record_error("reader1");
        monitor.mark_started();
        assert_eq!(monitor.error_count("reader1"), 0);
    }

    #[test]
    fn snapshot_reads_throughput_from_ports() {
        let mut ports = ProcessorPorts::new();
        ports.declare_output("out", DataTypePattern::Mua, single_output(4, WaitStrategyType::BusySpin));
        let monitor = GraphMonitor::new();
        let stats = monitor.snapshot("p1", &ports);
        assert_eq!(stats.items_produced, 0);
        assert_eq!(stats.items_consumed, 0);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn rate_per_second_truncates_like_the_original() {
        assert_eq!(rate_per_second(100, Duration::from_secs(0)), 0);
        assert_eq!(rate_per_second(100, Duration::from_secs(2)), 50);
    }
}
