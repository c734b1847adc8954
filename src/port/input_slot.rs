//! Input slot: a non-owning reference into an upstream output slot's ring
//! buffer, plus a local consumer cursor.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::data::{DataItem, StreamInfo};
use crate::disruptor::{RingBuffer, Sequence, INITIAL_SEQUENCE};
use crate::error::{FalconError, Result};
use crate::port::OutputSlot;

/// One input slot: holds a non-owning `Arc` to the upstream output slot's
/// ring buffer plus a registered gating sequence that advances as items
/// are released.
pub struct InputSlot {
    ring: Arc<RingBuffer<DataItem>>,
    upstream_info: StreamInfo,
    cursor: Arc<AtomicI64>,
    next_to_read: Sequence,
    items_consumed: std::sync::atomic::AtomicU64,
}

impl InputSlot {
    /// Connect to `upstream`, which must already have an allocated ring
    /// buffer and finalized stream info (post-negotiation).
    pub fn connect(upstream: &OutputSlot) -> Result<Self> {
        let ring = upstream.ring_buffer().ok_or_else(|| {
            FalconError::build("cannot connect input slot: upstream ring buffer not allocated")
        })?;
        let cursor = ring.register_gating_sequence();
        Ok(Self {
            ring,
            upstream_info: upstream.stream_info(),
            cursor,
            next_to_read: INITIAL_SEQUENCE,
            items_consumed: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// The upstream slot's finalized stream info.
    pub fn stream_info(&self) -> &StreamInfo {
        &self.upstream_info
    }

    /// Block per the upstream wait strategy until the next item is
    /// available, then hand it to `f`. Returns `Ok(false)` if the upstream
    /// ring buffer was alerted for termination before an item arrived.
    pub fn retrieve<F: FnOnce(&DataItem)>(&mut self, f: F) -> Result<bool> {
        let target = self.next_to_read + 1;
        let available = self.ring.wait_for(target)?;
        if available < target {
            // Alerted before the next item arrived.
            return Ok(false);
        }
        f(self.ring.get(target));
        self.next_to_read = target;
        Ok(true)
    }

    /// Advance the cursor past the current item, freeing its slot in the
    /// upstream ring buffer.
    pub fn release(&self) {
        self.cursor.store(self.next_to_read, Ordering::Release);
        self.items_consumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of items this slot has released so far.
    pub fn items_consumed(&self) -> u64 {
        self.items_consumed.load(Ordering::Relaxed)
    }

    /// Unblock a pending `retrieve`, as part of a processor-wide alert.
    pub fn alert(&self) {
        self.ring.alert();
    }

    /// The upstream ring buffer this slot reads from, shared so the graph
    /// manager can alert it from outside the owning processor's thread.
    pub fn ring_handle(&self) -> Arc<RingBuffer<DataItem>> {
        self.ring.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::stream_info::FinalizedType;
    use crate::data::{DataPayload, MuaData};
    use crate::disruptor::WaitStrategyType;

    #[test]
    fn retrieve_then_release_advances_cursor() {
        let output = OutputSlot::new(4, WaitStrategyType::BusySpin);
        output.finalize_data_type(FinalizedType::Mua).unwrap();
        output.finalize_rate(10.0).unwrap();
        output.allocate_ring_buffer().unwrap();

        output.claim(DataPayload::Mua(MuaData::new(3, 100.0)), true).unwrap();
        output.publish().unwrap();

        let mut input = InputSlot::connect(&output).unwrap();
        let mut seen = 0u32;
        let alive = input
            .retrieve(|item| {
                if let DataPayload::Mua(mua) = &item.payload {
                    seen = mua.n_spikes();
                }
            })
            .unwrap();
        assert!(alive);
        assert_eq!(seen, 3);
        input.release();
        assert_eq!(input.items_consumed(), 1);
    }

    #[test]
    fn alert_makes_retrieve_return_false() {
        let output = OutputSlot::new(4, WaitStrategyType::BusySpin);
        output.finalize_data_type(FinalizedType::Mua).unwrap();
        output.finalize_rate(10.0).unwrap();
        output.allocate_ring_buffer().unwrap();

        let mut input = InputSlot::connect(&output).unwrap();
        output.alert();
        let alive = input.retrieve(|_| {}).unwrap();
        assert!(!alive);
    }
}
