//! Output slot: owns one ring buffer and the stream info negotiated for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::data::stream_info::FinalizedType;
use crate::data::{DataItem, DataPayload, StreamInfo};
use crate::disruptor::{RingBuffer, Sequence, WaitStrategyType};
use crate::error::{FalconError, Result};
use crate::time::now_nanos;

/// One output slot: a ring buffer of `DataItem`s plus negotiated stream
/// info and a produced-item counter.
pub struct OutputSlot {
    stream_info: parking_lot::RwLock<StreamInfo>,
    ring: parking_lot::RwLock<Option<Arc<RingBuffer<DataItem>>>>,
    buffer_size: usize,
    wait_strategy: WaitStrategyType,
    serial_counter: AtomicU64,
    items_produced: AtomicU64,
    claimed_seq: parking_lot::Mutex<Option<Sequence>>,
}

impl OutputSlot {
    /// Build an unallocated output slot; the ring buffer is created later
    /// by `allocate_ring_buffer` once stream info is finalized.
    pub fn new(buffer_size: usize, wait_strategy: WaitStrategyType) -> Self {
        Self {
            stream_info: parking_lot::RwLock::new(StreamInfo::default()),
            ring: parking_lot::RwLock::new(None),
            buffer_size,
            wait_strategy,
            serial_counter: AtomicU64::new(0),
            items_produced: AtomicU64::new(0),
            claimed_seq: parking_lot::Mutex::new(None),
        }
    }

    /// Finalize this slot's data type during `complete_stream_info()`.
    pub fn finalize_data_type(&self, data_type: FinalizedType) -> Result<()> {
        self.stream_info.write().finalize_data_type(data_type)
    }

    /// Finalize this slot's publication rate during `complete_stream_info()`.
    pub fn finalize_rate(&self, stream_rate: f64) -> Result<()> {
        self.stream_info.write().finalize_rate(stream_rate)
    }

    /// Whether this slot's stream info is fully finalized.
    pub fn is_finalized(&self) -> bool {
        self.stream_info.read().is_finalized()
    }

    /// Read a copy of this slot's finalized stream info.
    pub fn stream_info(&self) -> StreamInfo {
        self.stream_info.read().clone()
    }

    /// Allocate the ring buffer. Called once per run during `prepare`,
    /// after negotiation has finalized stream info.
    pub fn allocate_ring_buffer(&self) -> Result<()> {
        if !self.is_finalized() {
            return Err(FalconError::build("cannot allocate ring buffer before stream info is finalized"));
        }
        let rb = RingBuffer::new(self.buffer_size, self.wait_strategy)?;
        *self.ring.write() = Some(Arc::new(rb));
        Ok(())
    }

    /// Release the ring buffer. Called during `unprepare`.
    pub fn free_ring_buffer(&self) {
        *self.ring.write() = None;
    }

    /// The underlying ring buffer, shared with connecting input slots.
    pub fn ring_buffer(&self) -> Option<Arc<RingBuffer<DataItem>>> {
        self.ring.read().clone()
    }

    /// Reserve and zero-initialize one entry. `blocking` controls whether a
    /// full buffer blocks (per wait strategy) or returns immediately with
    /// `RingBufferFull`.
    pub fn claim(&self, payload: DataPayload, blocking: bool) -> Result<()> {
        let ring = self.ring.read().clone().ok_or_else(|| FalconError::unexpected("ring buffer not allocated"))?;

        let mut claimed = self.claimed_seq.lock();
        if claimed.is_some() {
            return Err(FalconError::unexpected("previous claim not yet published"));
        }

        let seq = if blocking { ring.next(1)? } else { ring.try_next(1)? };

        {
            let mut slot = ring.slot_mut(seq);
            slot.header.serial_number = seq;
            slot.header.source_timestamp = now_nanos();
            slot.payload = payload;
        }

        *claimed = Some(seq);
        Ok(())
    }

    /// Set the hardware timestamp on the currently claimed (not yet
    /// published) entry.
    pub fn set_hardware_timestamp(&self, hardware_timestamp: u64) -> Result<()> {
        let ring = self.ring.read().clone().ok_or_else(|| FalconError::unexpected("ring buffer not allocated"))?;
        let claimed = self.claimed_seq.lock();
        let seq = claimed.ok_or_else(|| FalconError::unexpected("no entry currently claimed"))?;
        ring.slot_mut(seq).header.hardware_timestamp = hardware_timestamp;
        Ok(())
    }

    /// Mutate the currently claimed entry's payload in place.
    pub fn with_claimed<F: FnOnce(&mut DataPayload)>(&self, f: F) -> Result<()> {
        let ring = self.ring.read().clone().ok_or_else(|| FalconError::unexpected("ring buffer not allocated"))?;
        let claimed = self.claimed_seq.lock();
        let seq = claimed.ok_or_else(|| FalconError::unexpected("no entry currently claimed"))?;
        f(&mut ring.slot_mut(seq).payload);
        Ok(())
    }

    /// Commit the last claimed entry, making it visible to consumers and
    /// incrementing the items-produced counter.
    pub fn publish(&self) -> Result<()> {
        let ring = self.ring.read().clone().ok_or_else(|| FalconError::unexpected("ring buffer not allocated"))?;
        let mut claimed = self.claimed_seq.lock();
        let seq = claimed.take().ok_or_else(|| FalconError::unexpected("nothing claimed to publish"))?;
        self.serial_counter.store((seq + 1) as u64, Ordering::Relaxed);
        ring.publish(seq);
        self.items_produced.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of items published through this slot so far.
    pub fn items_produced(&self) -> u64 {
        self.items_produced.load(Ordering::Relaxed)
    }

    /// Unblock any producer/consumer currently waiting on this slot's ring
    /// buffer, as part of a processor-wide alert.
    pub fn alert(&self) {
        if let Some(ring) = self.ring.read().as_ref() {
            ring.alert();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::stream_info::FinalizedType;

    fn finalized_slot() -> OutputSlot {
        let slot = OutputSlot::new(4, WaitStrategyType::BusySpin);
        slot.finalize_data_type(FinalizedType::Mua).unwrap();
        slot.finalize_rate(10.0).unwrap();
        slot.allocate_ring_buffer().unwrap();
        slot
    }

    #[test]
    fn claim_publish_increments_counter() {
        let slot = finalized_slot();
        slot.claim(DataPayload::Mua(crate::data::MuaData::new(1, 100.0)), true).unwrap();
        slot.publish().unwrap();
        assert_eq!(slot.items_produced(), 1);
    }

    #[test]
    fn cannot_allocate_before_finalized() {
        let slot = OutputSlot::new(4, WaitStrategyType::BusySpin);
        assert!(slot.allocate_ring_buffer().is_err());
    }

    #[test]
    fn double_claim_without_publish_errors() {
        let slot = finalized_slot();
        slot.claim(DataPayload::Empty, true).unwrap();
        assert!(slot.claim(DataPayload::Empty, true).is_err());
    }
}
