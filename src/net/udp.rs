//! Neuralynx Digilynx UDP record: fixed header, N x 32-bit channel
//! samples, a parallel-port bitfield, and a 64-bit microsecond timestamp.
//!
//! CRC/magic validation mechanics are an external collaborator (the wire
//! checksum scheme is vendor-defined); we validate the structural
//! invariants a corrupt or truncated packet would violate and treat
//! anything else as already checked by the transport.

use crate::constants::MAX_N_CHANNELS;

/// Scale applied to raw 32-bit ADC counts to produce microvolt samples.
/// Chosen to match the Digilynx default gain; DSP tuning beyond this is
/// out of scope.
pub const AD_BIT_VOLTS: f64 = 0.01;

/// One decoded Neuralynx acquisition record.
#[derive(Debug, Clone)]
pub struct NlxRecord {
    nchannels: usize,
    samples_raw: Vec<i32>,
    parallel_port: u32,
    timestamp_us: u64,
}

/// Minimum wire size: 4-byte channel count prefix is implicit (known from
/// configuration), so the minimum is one timestamp (8) + one port word (4).
const MIN_RECORD_SIZE: usize = 12;

impl NlxRecord {
    /// Parse a record carrying exactly `nchannels` channel samples from a
    /// little-endian wire buffer. Returns `None` if the buffer is too
    /// short or its length doesn't match the expected record size for
    /// `nchannels` — both signs of a corrupt/truncated packet.
    pub fn from_network_buffer(buffer: &[u8], nchannels: usize) -> Option<Self> {
        if nchannels == 0 || nchannels > MAX_N_CHANNELS {
            return None;
        }
        let expected_len = MIN_RECORD_SIZE + nchannels * 4;
        if buffer.len() < expected_len {
            return None;
        }

        let mut offset = 0;
        let mut samples_raw = Vec::with_capacity(nchannels);
        for _ in 0..nchannels {
            let bytes: [u8; 4] = buffer[offset..offset + 4].try_into().ok()?;
            samples_raw.push(i32::from_le_bytes(bytes));
            offset += 4;
        }

        let port_bytes: [u8; 4] = buffer[offset..offset + 4].try_into().ok()?;
        let parallel_port = u32::from_le_bytes(port_bytes);
        offset += 4;

        let ts_bytes: [u8; 8] = buffer[offset..offset + 8].try_into().ok()?;
        let timestamp_us = u64::from_le_bytes(ts_bytes);

        Some(Self { nchannels, samples_raw, parallel_port, timestamp_us })
    }

    /// Number of channels in this record.
    pub fn nchannels(&self) -> usize {
        self.nchannels
    }

    /// Sample acquisition timestamp, in microseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp_us
    }

    /// Parallel-port digital input bitfield.
    pub fn parallel_port(&self) -> u32 {
        self.parallel_port
    }

    /// Whether the given digital input channel is set on this record.
    pub fn trigger_bit(&self, channel: u32) -> bool {
        (self.parallel_port & (1 << channel)) != 0
    }

    /// Raw ADC sample for `channel`, scaled to microvolts.
    pub fn sample_microvolt(&self, channel: usize) -> f64 {
        self.samples_raw[channel] as f64 * AD_BIT_VOLTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_record(samples: &[i32], port: u32, timestamp: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        for s in samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        buf.extend_from_slice(&port.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf
    }

    #[test]
    fn parses_well_formed_record() {
        let buf = encode_record(&[100, -200, 300], 0b101, 123_456);
        let record = NlxRecord::from_network_buffer(&buf, 3).unwrap();
        assert_eq!(record.timestamp(), 123_456);
        assert_eq!(record.parallel_port(), 0b101);
        assert!(record.trigger_bit(0));
        assert!(!record.trigger_bit(1));
        assert_eq!(record.sample_microvolt(0), 1.0);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let buf = encode_record(&[1, 2, 3], 0, 0);
        assert!(NlxRecord::from_network_buffer(&buf[..buf.len() - 1], 3).is_none());
    }

    #[test]
    fn rejects_zero_channels() {
        let buf = encode_record(&[], 0, 0);
        assert!(NlxRecord::from_network_buffer(&buf, 0).is_none());
    }
}
