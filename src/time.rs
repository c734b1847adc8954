//! Timestamp helpers shared by processors and the data contracts.
//!
//! Source timestamps are wall-clock nanoseconds since `UNIX_EPOCH`; hardware
//! timestamps come from the acquisition device's own clock (microseconds for
//! the Neuralynx stream) and pass through this module unmodified.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_nanos() as u64
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> u64 {
    now_nanos() / 1_000
}

/// Name a per-run output directory after the current wall-clock time, in the
/// same format the original used for run subdirectories.
pub fn run_timestamp_name() -> String {
    format!("run_{}", now_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_nanos_increases() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn run_timestamp_name_is_prefixed() {
        assert!(run_timestamp_name().starts_with("run_"));
    }
}
