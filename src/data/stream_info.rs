//! Stream info: the finalized data-type and rate metadata of an output
//! slot, frozen before ring-buffer allocation, plus the pattern language a
//! consumer port uses to declare what it accepts.

use crate::error::{FalconError, Result};

/// The element type carried by a `MultiChannel` bucket. The spec's DSP
/// Non-goal excludes specific filter math, not the element type itself, so
/// we only need the one type the processors actually exchange.
pub type Sample = f64;

/// A declared acceptable range of channel counts, `min..=max` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRange {
    /// Minimum accepted channel count.
    pub min: usize,
    /// Maximum accepted channel count.
    pub max: usize,
}

impl ChannelRange {
    /// Accept exactly `n` channels.
    pub fn exact(n: usize) -> Self {
        Self { min: n, max: n }
    }

    /// Accept any channel count in `min..=max`.
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Whether `n` falls within the declared range.
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && n <= self.max
    }
}

/// A consumer port's declared data-type pattern: what producer types it is
/// willing to bind to. Mirrors `spec.md` §9's sum-type design note.
#[derive(Debug, Clone)]
pub enum DataTypePattern {
    /// Accepts a MultiChannel bucket whose channel count falls in range and,
    /// optionally, whose sample count per bucket matches exactly.
    MultiChannel { channels: ChannelRange, nsamples: Option<usize> },
    /// Accepts a Spike bucket whose channel count falls in range.
    Spike { channels: ChannelRange, buffer_ms: f64 },
    /// Accepts any MUA bucket.
    Mua,
    /// Accepts any Event bucket.
    Event,
}

/// Finalized data type and rate for one output slot. Immutable once built
/// by `complete_stream_info` during graph negotiation.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    data_type: Option<FinalizedType>,
    stream_rate: Option<f64>,
}

/// The concrete, finalized type a producer slot carries after negotiation.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizedType {
    /// `nsamples` x `nchannels` matrix at `sample_rate` Hz.
    MultiChannel { nsamples: usize, nchannels: usize, sample_rate: f64 },
    /// Peak buckets with up to `nchannels` amplitudes each.
    Spike { nchannels: usize },
    /// Scalar event-count bucket.
    Mua,
    /// Tagged-string bucket.
    Event,
}

impl StreamInfo {
    /// Finalize the data type. May only be called once per slot.
    pub fn finalize_data_type(&mut self, data_type: FinalizedType) -> Result<()> {
        if self.data_type.is_some() {
            return Err(FalconError::build("stream info data type already finalized"));
        }
        self.data_type = Some(data_type);
        Ok(())
    }

    /// Finalize the bucket-publication rate in Hz. May only be called once.
    pub fn finalize_rate(&mut self, stream_rate: f64) -> Result<()> {
        if self.stream_rate.is_some() {
            return Err(FalconError::build("stream info rate already finalized"));
        }
        self.stream_rate = Some(stream_rate);
        Ok(())
    }

    /// Whether both the data type and rate have been finalized.
    pub fn is_finalized(&self) -> bool {
        self.data_type.is_some() && self.stream_rate.is_some()
    }

    /// The finalized data type, if set.
    pub fn data_type(&self) -> Option<&FinalizedType> {
        self.data_type.as_ref()
    }

    /// The finalized bucket rate in Hz, if set.
    pub fn stream_rate(&self) -> Option<f64> {
        self.stream_rate
    }
}

impl DataTypePattern {
    /// Whether this pattern accepts the producer's finalized type.
    pub fn accepts(&self, finalized: &FinalizedType) -> bool {
        match (self, finalized) {
            (
                Self::MultiChannel { channels, nsamples },
                FinalizedType::MultiChannel { nchannels, nsamples: actual_nsamples, .. },
            ) => channels.accepts(*nchannels) && nsamples.map_or(true, |n| n == *actual_nsamples),
            (Self::Spike { channels, .. }, FinalizedType::Spike { nchannels }) => channels.accepts(*nchannels),
            (Self::Mua, FinalizedType::Mua) => true,
            (Self::Event, FinalizedType::Event) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_accepts_matching_channel_range() {
        let pattern = DataTypePattern::MultiChannel { channels: ChannelRange::new(1, 4), nsamples: None };
        let finalized = FinalizedType::MultiChannel { nsamples: 10, nchannels: 3, sample_rate: 32_000.0 };
        assert!(pattern.accepts(&finalized));
    }

    #[test]
    fn pattern_rejects_out_of_range_channels() {
        let pattern = DataTypePattern::MultiChannel { channels: ChannelRange::exact(2), nsamples: None };
        let finalized = FinalizedType::MultiChannel { nsamples: 10, nchannels: 3, sample_rate: 32_000.0 };
        assert!(!pattern.accepts(&finalized));
    }

    #[test]
    fn finalize_twice_is_an_error() {
        let mut info = StreamInfo::default();
        info.finalize_data_type(FinalizedType::Mua).unwrap();
        assert!(info.finalize_data_type(FinalizedType::Mua).is_err());
    }

    #[test]
    fn unfinalized_info_is_not_finalized() {
        let info = StreamInfo::default();
        assert!(!info.is_finalized());
    }
}
