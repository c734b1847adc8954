//! Tuning constants shared across the graph runtime.

/// Default ring buffer capacity for an output slot when a processor does not
/// request an override (must be a power of two).
pub const DEFAULT_RING_BUFFER_SIZE: usize = 2048;

/// Hard ceiling on a single slot's ring buffer capacity.
pub const MAX_RING_BUFFER_SIZE: usize = 1 << 20;

/// Cache line size used to pad producer/consumer cursors apart.
pub const CACHE_LINE_SIZE: usize = 64;

/// Maximum UDP payload size accepted from the Neuralynx acquisition stream.
pub const MAX_UDP_PAYLOAD: usize = 1500;

/// Sample rate of the Neuralynx Digilynx acquisition stream, in Hz.
pub const NLX_SIGNAL_SAMPLING_FREQUENCY: f64 = 32_000.0;

/// Maximum number of channels supported by a single MultiChannel bucket.
pub const MAX_N_CHANNELS: usize = 256;

/// Bound on the length of an event tag string.
pub const EVENT_STRING_LENGTH: usize = 128;

/// Grace period the graph manager grants processor threads to exit after
/// `alert()` before logging a shutdown error.
pub const THREAD_TERMINATION_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

/// Poll interval of the graph manager's control socket.
pub const CONTROL_SOCKET_POLL: std::time::Duration = std::time::Duration::from_millis(1);

/// Select timeout used by source processors reading from sockets, chosen so
/// a blocked `select` remains cancellable.
pub const SOURCE_SELECT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(100);

/// Default digital-output lockout period.
pub const DEFAULT_LOCKOUT_PERIOD_MS: u64 = 300;

/// Default digital-output pulse width, in microseconds.
pub const DEFAULT_PULSE_WIDTH_US: u64 = 400;

/// Sentinel publication rate for a stream whose buckets are emitted
/// irregularly rather than at a fixed cadence (e.g. event streams).
pub const IRREGULAR_STREAM_RATE: f64 = -1.0;

/// Validate that size-sensitive constants hold the invariants the runtime
/// assumes (power-of-two buffer sizes, non-zero bounds).
pub fn validate_constants() -> Result<(), &'static str> {
    if !DEFAULT_RING_BUFFER_SIZE.is_power_of_two() {
        return Err("DEFAULT_RING_BUFFER_SIZE must be a power of 2");
    }
    if !MAX_RING_BUFFER_SIZE.is_power_of_two() {
        return Err("MAX_RING_BUFFER_SIZE must be a power of 2");
    }
    if MAX_N_CHANNELS == 0 || EVENT_STRING_LENGTH == 0 {
        return Err("channel/event bounds must be greater than 0");
    }
    if CACHE_LINE_SIZE == 0 || !CACHE_LINE_SIZE.is_power_of_two() {
        return Err("CACHE_LINE_SIZE must be a power of 2");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_valid() {
        assert!(validate_constants().is_ok());
    }

    #[test]
    fn ring_buffer_sizes_are_powers_of_two() {
        assert!(DEFAULT_RING_BUFFER_SIZE.is_power_of_two());
        assert!(MAX_RING_BUFFER_SIZE.is_power_of_two());
    }
}
