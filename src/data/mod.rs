//! Timestamped data contracts that flow across ports.
//!
//! A single closed sum type represents every bucket kind instead of a
//! virtual `IData` hierarchy: one `DataItem` header plus a `DataPayload`
//! enum, with serialization and compatibility checks as free functions
//! dispatched on the variant. This keeps one `RingBuffer<DataItem>` type
//! usable for every port regardless of payload.

mod event;
mod mua;
mod multichannel;
mod spike;
pub mod stream_info;

pub use event::EventData;
pub use mua::MuaData;
pub use multichannel::MultiChannelData;
pub use spike::{Peak, SpikeData};
pub use stream_info::{DataTypePattern, StreamInfo};

/// Common header carried by every bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataHeader {
    /// Monotonically increasing serial number, assigned at publish time.
    pub serial_number: i64,
    /// Wall-clock time at the producer, nanoseconds since Unix epoch.
    pub source_timestamp: u64,
    /// Sample clock at acquisition, in the upstream device's own units.
    pub hardware_timestamp: u64,
}

/// The data carried in one bucket. Default is `Empty`, used to
/// default-initialize ring buffer slots before the first claim.
#[derive(Debug, Clone)]
pub enum DataPayload {
    /// Placeholder payload for freshly allocated, never-claimed slots.
    Empty,
    /// Matrix of N samples x C channels.
    MultiChannel(MultiChannelData),
    /// Variable-length list of peaks detected within one processing window.
    Spike(SpikeData),
    /// Scalar event count over a bin duration.
    Mua(MuaData),
    /// Short tag string plus its stable hash.
    Event(EventData),
}

impl Default for DataPayload {
    fn default() -> Self {
        Self::Empty
    }
}

/// One bucket of data flowing across a port: a header plus a payload.
#[derive(Debug, Clone, Default)]
pub struct DataItem {
    /// Header common to every payload kind.
    pub header: DataHeader,
    /// The payload itself.
    pub payload: DataPayload,
}

impl DataItem {
    /// Build an item with the given payload and a zeroed header; the header
    /// is filled in by the output slot at claim/publish time.
    pub fn new(payload: DataPayload) -> Self {
        Self { header: DataHeader::default(), payload }
    }

    /// Hardware timestamp recorded in the header.
    pub fn hardware_timestamp(&self) -> u64 {
        self.header.hardware_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_item_is_empty_payload() {
        let item = DataItem::default();
        assert!(matches!(item.payload, DataPayload::Empty));
        assert_eq!(item.header.serial_number, 0);
    }
}
