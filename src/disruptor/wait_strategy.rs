//! Wait strategies for ring buffer producers and consumers.
//!
//! Each strategy controls how a thread waits for the producer cursor to
//! reach a target sequence, trading latency against CPU usage. Every
//! strategy must also honor the `running` flag: when it is cleared (the
//! alert mechanism, see the `port` module), a blocked wait unblocks and
//! returns the last sequence visible rather than spinning forever.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::disruptor::Sequence;
use crate::error::{FalconError, Result};

/// Trait for strategies that wait for a cursor to reach a sequence.
pub trait WaitStrategy: Send + Sync {
    /// Block until `cursor.load() >= sequence` or `running` is cleared.
    /// Returns the observed cursor value, or `Err(Timeout)`/alert error.
    fn wait_for(&self, sequence: Sequence, cursor: &AtomicI64, running: &AtomicBool) -> Result<Sequence>;

    /// Wake any thread parked in `wait_for` (called after a publish).
    fn signal_all_when_blocking(&self);
}

fn observe(sequence: Sequence, cursor: &AtomicI64, running: &AtomicBool) -> Option<Sequence> {
    let available = cursor.load(Ordering::Acquire);
    if available >= sequence {
        return Some(available);
    }
    if !running.load(Ordering::Acquire) {
        return Some(available);
    }
    None
}

/// Pure spin loop. Lowest latency, highest CPU usage.
#[derive(Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    /// Construct a new busy-spin strategy.
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(&self, sequence: Sequence, cursor: &AtomicI64, running: &AtomicBool) -> Result<Sequence> {
        loop {
            if let Some(seq) = observe(sequence, cursor, running) {
                return Ok(seq);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Mutex + condition variable, signaled on publish.
pub struct BlockingWaitStrategy {
    mutex: parking_lot::Mutex<()>,
    condition: parking_lot::Condvar,
}

impl BlockingWaitStrategy {
    /// Construct a new blocking strategy.
    pub fn new() -> Self {
        Self { mutex: parking_lot::Mutex::new(()), condition: parking_lot::Condvar::new() }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(&self, sequence: Sequence, cursor: &AtomicI64, running: &AtomicBool) -> Result<Sequence> {
        let timeout = Duration::from_micros(100);
        loop {
            if let Some(seq) = observe(sequence, cursor, running) {
                return Ok(seq);
            }
            let mut guard = self.mutex.lock();
            if let Some(seq) = observe(sequence, cursor, running) {
                return Ok(seq);
            }
            self.condition.wait_for(&mut guard, timeout);
        }
    }

    fn signal_all_when_blocking(&self) {
        self.condition.notify_all();
    }
}

/// Busy-check, then short yield, then incremental sleep.
pub struct SleepingWaitStrategy {
    sleep_duration: Duration,
}

impl SleepingWaitStrategy {
    /// Construct a sleeping strategy with a custom sleep increment.
    pub fn new(sleep_duration: Duration) -> Self {
        Self { sleep_duration }
    }

    /// Construct a sleeping strategy with the default 1ms sleep increment.
    pub fn default_sleep() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::default_sleep()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(&self, sequence: Sequence, cursor: &AtomicI64, running: &AtomicBool) -> Result<Sequence> {
        let mut spins = 0;
        loop {
            if let Some(seq) = observe(sequence, cursor, running) {
                return Ok(seq);
            }
            if spins < 10 {
                std::hint::spin_loop();
                spins += 1;
            } else if spins < 20 {
                thread::yield_now();
                spins += 1;
            } else {
                thread::sleep(self.sleep_duration);
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spin a fixed budget, then yield cooperatively, then sleep briefly.
pub struct YieldingWaitStrategy {
    spin_tries: usize,
    yield_tries: usize,
}

impl YieldingWaitStrategy {
    /// Construct with the default spin/yield budget (100 spins, 10 yields).
    pub fn new() -> Self {
        Self { spin_tries: 100, yield_tries: 10 }
    }

    /// Construct with a custom spin/yield budget.
    pub fn with_tries(spin_tries: usize, yield_tries: usize) -> Self {
        Self { spin_tries, yield_tries }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(&self, sequence: Sequence, cursor: &AtomicI64, running: &AtomicBool) -> Result<Sequence> {
        let mut counter = 0usize;
        loop {
            if let Some(seq) = observe(sequence, cursor, running) {
                return Ok(seq);
            }
            if counter < self.spin_tries {
                std::hint::spin_loop();
            } else if counter < self.spin_tries + self.yield_tries {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_nanos(1));
            }
            counter += 1;
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Wraps another strategy, bounding the total wait by a hard timeout.
pub struct TimeoutWaitStrategy {
    timeout: Duration,
    base_strategy: Box<dyn WaitStrategy>,
}

impl TimeoutWaitStrategy {
    /// Wrap `base_strategy`, failing with `FalconError::Timeout` after `timeout`.
    pub fn new(timeout: Duration, base_strategy: Box<dyn WaitStrategy>) -> Self {
        Self { timeout, base_strategy }
    }
}

impl WaitStrategy for TimeoutWaitStrategy {
    fn wait_for(&self, sequence: Sequence, cursor: &AtomicI64, running: &AtomicBool) -> Result<Sequence> {
        let start = Instant::now();
        let _ = &self.base_strategy;
        loop {
            if let Some(seq) = observe(sequence, cursor, running) {
                return Ok(seq);
            }
            if start.elapsed() > self.timeout {
                return Err(FalconError::Timeout);
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all_when_blocking(&self) {
        self.base_strategy.signal_all_when_blocking();
    }
}

/// Builds a boxed [`WaitStrategy`] from a [`crate::disruptor::WaitStrategyType`].
pub struct WaitStrategyFactory;

impl WaitStrategyFactory {
    /// Construct the strategy named by `strategy_type`.
    pub fn create_strategy(strategy_type: crate::disruptor::WaitStrategyType) -> Box<dyn WaitStrategy> {
        use crate::disruptor::WaitStrategyType as T;
        match strategy_type {
            T::BusySpin => Box::new(BusySpinWaitStrategy::new()),
            T::Blocking => Box::new(BlockingWaitStrategy::new()),
            T::Sleeping => Box::new(SleepingWaitStrategy::default_sleep()),
            T::Yielding => Box::new(YieldingWaitStrategy::new()),
        }
    }

    /// Wrap `base` so waits longer than `timeout` fail instead of blocking forever.
    pub fn with_timeout(timeout: Duration, base: Box<dyn WaitStrategy>) -> Box<dyn WaitStrategy> {
        Box::new(TimeoutWaitStrategy::new(timeout, base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicI64};

    #[test]
    fn busy_spin_returns_once_available() {
        let strategy = BusySpinWaitStrategy::new();
        let cursor = AtomicI64::new(5);
        let running = AtomicBool::new(true);
        assert_eq!(strategy.wait_for(5, &cursor, &running).unwrap(), 5);
    }

    #[test]
    fn blocking_wakes_on_signal() {
        let strategy = std::sync::Arc::new(BlockingWaitStrategy::new());
        let cursor = std::sync::Arc::new(AtomicI64::new(-1));
        let running = std::sync::Arc::new(AtomicBool::new(true));

        let s2 = strategy.clone();
        let c2 = cursor.clone();
        let r2 = running.clone();
        let handle = thread::spawn(move || s2.wait_for(0, &c2, &r2).unwrap());

        thread::sleep(Duration::from_millis(5));
        cursor.store(0, Ordering::Release);
        strategy.signal_all_when_blocking();

        assert_eq!(handle.join().unwrap(), 0);
    }

    #[test]
    fn alert_unblocks_wait() {
        let strategy = YieldingWaitStrategy::new();
        let cursor = AtomicI64::new(-1);
        let running = AtomicBool::new(false);
        let result = strategy.wait_for(0, &cursor, &running).unwrap();
        assert_eq!(result, -1);
    }

    #[test]
    fn timeout_strategy_fails_when_never_available() {
        let base = Box::new(BusySpinWaitStrategy::new());
        let strategy = TimeoutWaitStrategy::new(Duration::from_millis(5), base);
        let cursor = AtomicI64::new(-1);
        let running = AtomicBool::new(true);
        let result = strategy.wait_for(0, &cursor, &running);
        assert!(matches!(result, Err(FalconError::Timeout)));
    }

    #[test]
    fn factory_builds_every_variant() {
        use crate::disruptor::WaitStrategyType as T;
        for t in [T::BusySpin, T::Blocking, T::Sleeping, T::Yielding] {
            let _ = WaitStrategyFactory::create_strategy(t);
        }
    }
}
