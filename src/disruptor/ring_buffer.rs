//! Single-producer, multi-consumer lock-free ring buffer.
//!
//! Mirrors the LMAX Disruptor pattern: a fixed slab of pre-constructed slots,
//! a producer cursor advanced by `publish`, and a set of consumer ("gating")
//! sequences registered by each connected input slot so the producer never
//! overwrites a slot a consumer has not yet read.
//!
//! Multi-producer claiming is an explicit open question in the upstream
//! design and is left unimplemented here; [`RingBuffer::new`] only supports
//! a single claimer, matching the one output slot that owns each buffer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::disruptor::wait_strategy::WaitStrategyFactory;
use crate::disruptor::{Sequence, WaitStrategy, WaitStrategyType, INITIAL_SEQUENCE};
use crate::error::{FalconError, Result};

/// Padding wrapper that keeps a hot atomic cursor on its own cache line, so
/// producer and consumer sequences sharing a struct don't false-share.
#[repr(align(128))]
struct PaddedSequence(AtomicI64);

impl PaddedSequence {
    fn new(value: Sequence) -> Self {
        Self(AtomicI64::new(value))
    }
}

/// A bounded lock-free queue of pre-allocated slots of type `T`.
///
/// One producer calls [`next`](RingBuffer::next) / [`publish`](RingBuffer::publish);
/// any number of consumers register a gating sequence via
/// [`register_gating_sequence`](RingBuffer::register_gating_sequence) and call
/// [`wait_for`](RingBuffer::wait_for) / [`get`](RingBuffer::get).
pub struct RingBuffer<T> {
    capacity: usize,
    mask: i64,
    buffer: Box<[UnsafeCell<T>]>,
    cursor: PaddedSequence,
    claimed: PaddedSequence,
    gating_sequences: parking_lot::RwLock<Vec<Arc<AtomicI64>>>,
    wait_strategy: Box<dyn WaitStrategy>,
    running: AtomicBool,
}

// SAFETY: access to `buffer` slots is coordinated entirely through the
// producer/consumer cursor protocol, not through locking: the single
// producer only calls `slot_mut` for a sequence whose slot every gating
// (consumer) sequence has already moved past, and a consumer only calls
// `get` for a sequence `wait_for` has confirmed published — so no two
// threads ever hold a reference into the same slot at the same time.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Default> RingBuffer<T> {
    /// Build a ring buffer of `capacity` (rounded to a power of two) slots,
    /// each default-initialized, using `wait_strategy_type` for waits.
    pub fn new(capacity: usize, wait_strategy_type: WaitStrategyType) -> Result<Self> {
        let capacity = capacity.next_power_of_two();
        if capacity == 0 || capacity > crate::constants::MAX_RING_BUFFER_SIZE {
            return Err(FalconError::build(format!(
                "ring buffer capacity {} out of bounds",
                capacity
            )));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || UnsafeCell::new(T::default()));

        Ok(Self {
            capacity,
            mask: (capacity as i64) - 1,
            buffer: slots.into_boxed_slice(),
            cursor: PaddedSequence::new(INITIAL_SEQUENCE),
            claimed: PaddedSequence::new(INITIAL_SEQUENCE),
            gating_sequences: parking_lot::RwLock::new(Vec::new()),
            wait_strategy: WaitStrategyFactory::create_strategy(wait_strategy_type),
            running: AtomicBool::new(true),
        })
    }
}

impl<T> RingBuffer<T> {
    /// Number of slots in this buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest sequence published so far (`INITIAL_SEQUENCE` if empty).
    pub fn cursor(&self) -> Sequence {
        self.cursor.0.load(Ordering::Acquire)
    }

    /// Register a new consumer cursor, starting at `INITIAL_SEQUENCE`. Called
    /// once by an input slot when it connects to this buffer's output slot.
    pub fn register_gating_sequence(&self) -> Arc<AtomicI64> {
        let seq = Arc::new(AtomicI64::new(INITIAL_SEQUENCE));
        self.gating_sequences.write().push(seq.clone());
        seq
    }

    fn min_gating_sequence(&self) -> Sequence {
        let gating = self.gating_sequences.read();
        if gating.is_empty() {
            return self.cursor.0.load(Ordering::Acquire);
        }
        gating.iter().map(|s| s.load(Ordering::Acquire)).min().unwrap()
    }

    /// Reserve the next `n` sequence numbers for the single producer,
    /// blocking with the wait strategy until capacity permits. Returns the
    /// last sequence number of the reservation.
    pub fn next(&self, n: usize) -> Result<Sequence> {
        let current = self.claimed.0.load(Ordering::Relaxed);
        let target = current + n as i64;
        let wrap_point = target - self.capacity as i64;

        loop {
            let min_gate = self.min_gating_sequence();
            if wrap_point <= min_gate {
                break;
            }
            if !self.running.load(Ordering::Acquire) {
                return Err(FalconError::unexpected("ring buffer was shut down"));
            }
            std::hint::spin_loop();
        }

        self.claimed.0.store(target, Ordering::Relaxed);
        Ok(target)
    }

    /// Reserve the next `n` sequence numbers without blocking. Returns
    /// `RingBufferFull` immediately if capacity is not available right now.
    pub fn try_next(&self, n: usize) -> Result<Sequence> {
        let current = self.claimed.0.load(Ordering::Relaxed);
        let target = current + n as i64;
        let wrap_point = target - self.capacity as i64;

        if wrap_point > self.min_gating_sequence() {
            return Err(FalconError::RingBufferFull);
        }
        self.claimed.0.store(target, Ordering::Relaxed);
        Ok(target)
    }

    /// Borrow the slot at `seq mod capacity` for writing; used by the
    /// producer after a successful `next`.
    ///
    /// # Safety (protocol, not `unsafe fn`)
    /// Callable only by the single producer, and only for a `seq` no
    /// gating sequence has been handed yet — guaranteed by `next`/
    /// `try_next` never claiming past `min_gating_sequence() + capacity`.
    #[allow(clippy::mut_from_ref)]
    pub fn slot_mut(&self, seq: Sequence) -> &mut T {
        let idx = (seq & self.mask) as usize;
        // SAFETY: see struct-level comment; the cursor protocol guarantees
        // exclusive access to this slot for the duration of the borrow.
        unsafe { &mut *self.buffer[idx].get() }
    }

    /// Borrow the slot at `seq mod capacity` for reading; used by consumers
    /// after `wait_for` confirms the sequence is published.
    pub fn get(&self, seq: Sequence) -> &T {
        let idx = (seq & self.mask) as usize;
        // SAFETY: see struct-level comment; `wait_for` having returned a
        // sequence >= `seq` means the producer has finished writing it and
        // will not touch it again until every gating sequence passes it.
        unsafe { &*self.buffer[idx].get() }
    }

    /// Publish `seq`, making it (and any prior reserved sequence) visible to
    /// consumers. Must be called in monotone order by the single producer.
    pub fn publish(&self, seq: Sequence) {
        self.cursor.0.store(seq, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Block per the configured wait strategy until the producer cursor is
    /// at least `sequence`. Returns the highest published sequence, or the
    /// last-seen cursor if the buffer was shut down via `alert`.
    pub fn wait_for(&self, sequence: Sequence) -> Result<Sequence> {
        self.wait_strategy.wait_for(sequence, &self.cursor.0, &self.running)
    }

    /// Unblock every waiting producer and consumer; used by a processor's
    /// alert mechanism to force cancellable waits to return.
    pub fn alert(&self) {
        self.running.store(false, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Whether `alert` has been called on this buffer.
    pub fn is_alerted(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn claim_publish_consume_cycle() {
        let rb: RingBuffer<u64> = RingBuffer::new(2, WaitStrategyType::BusySpin).unwrap();
        let consumer = rb.register_gating_sequence();

        let seq = rb.next(1).unwrap();
        *rb.slot_mut(seq) = 42;
        rb.publish(seq);

        let available = rb.wait_for(seq).unwrap();
        assert_eq!(available, seq);
        assert_eq!(*rb.get(seq), 42);
        consumer.store(seq, Ordering::Release);
    }

    #[test]
    fn capacity_two_full_cycle_no_deadlock() {
        let rb: RingBuffer<u64> = RingBuffer::new(2, WaitStrategyType::BusySpin).unwrap();
        let consumer = rb.register_gating_sequence();

        for i in 0..10u64 {
            let seq = rb.next(1).unwrap();
            *rb.slot_mut(seq) = i;
            rb.publish(seq);
            rb.wait_for(seq).unwrap();
            assert_eq!(*rb.get(seq), i);
            consumer.store(seq, Ordering::Release);
        }
    }

    #[test]
    fn producer_blocks_until_consumer_releases() {
        let rb: Arc<RingBuffer<u64>> = Arc::new(RingBuffer::new(2, WaitStrategyType::Yielding).unwrap());
        let consumer = rb.register_gating_sequence();

        // Fill the buffer completely.
        let s0 = rb.next(1).unwrap();
        rb.publish(s0);
        let s1 = rb.next(1).unwrap();
        rb.publish(s1);

        let rb2 = rb.clone();
        let handle = std::thread::spawn(move || rb2.next(1).unwrap());

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!handle.is_finished());

        consumer.store(s0, Ordering::Release);
        let claimed = handle.join().unwrap();
        assert_eq!(claimed, s1 + 1);
    }

    #[test]
    fn alert_unblocks_pending_wait() {
        let rb: Arc<RingBuffer<u64>> = Arc::new(RingBuffer::new(4, WaitStrategyType::Yielding).unwrap());
        let rb2 = rb.clone();
        let handle = std::thread::spawn(move || rb2.wait_for(0));

        std::thread::sleep(std::time::Duration::from_millis(5));
        rb.alert();

        let result = handle.join().unwrap();
        assert!(result.is_ok());
        assert!(rb.is_alerted());
    }

    #[test]
    fn rejects_non_power_of_two_beyond_ceiling() {
        let result: Result<RingBuffer<u64>> =
            RingBuffer::new(crate::constants::MAX_RING_BUFFER_SIZE * 4, WaitStrategyType::BusySpin);
        assert!(result.is_err());
    }
}
