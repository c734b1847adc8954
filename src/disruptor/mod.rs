//! Bounded lock-free sequence-numbered ring buffer transport, shared by one
//! claimer and many readers, underlying every output port slot.

pub mod ring_buffer;
pub mod wait_strategy;

pub use ring_buffer::RingBuffer;
pub use wait_strategy::{WaitStrategy, WaitStrategyFactory};

/// A ring-buffer sequence number. Signed so the initial, empty-buffer cursor
/// can sit one below the first valid slot (`-1`), matching the classic
/// LMAX Disruptor convention.
pub type Sequence = i64;

/// Sentinel cursor value for a ring buffer that has not published anything
/// yet, and for an input slot that has not consumed anything yet.
pub const INITIAL_SEQUENCE: Sequence = -1;

/// Selects which [`WaitStrategy`] a ring buffer uses when a consumer is
/// waiting for new data or a producer is waiting for free capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategyType {
    /// Pure spin loop: lowest latency, highest CPU usage.
    BusySpin,
    /// Mutex + condition variable, signaled on publish.
    Blocking,
    /// Busy-check, then short yield, then incremental sleep.
    Sleeping,
    /// Spin a fixed budget, then yield cooperatively.
    Yielding,
}

impl Default for WaitStrategyType {
    fn default() -> Self {
        Self::Yielding
    }
}

/// Construction-time configuration for a [`RingBuffer`].
#[derive(Debug, Clone)]
pub struct RingBufferConfig {
    /// Number of slots; rounded up to the next power of two.
    pub capacity: usize,
    /// Wait strategy used by consumers waiting for new data and the
    /// producer waiting for free capacity.
    pub wait_strategy: WaitStrategyType,
}

impl RingBufferConfig {
    /// Start a config at the given capacity with the default wait strategy.
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.next_power_of_two(), wait_strategy: WaitStrategyType::default() }
    }

    /// Select the wait strategy.
    pub fn with_wait_strategy(mut self, strategy: WaitStrategyType) -> Self {
        self.wait_strategy = strategy;
        self
    }
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_RING_BUFFER_SIZE)
    }
}
