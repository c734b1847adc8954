//! Digital I/O device abstraction. Only a `DigitalDevice` trait and a
//! `dummy` software device are implemented here, mirroring `lib/dio`'s own
//! split between the vendor-neutral interface and `dummydio.cpp`;
//! hardware-vendor bindings (e.g. Advantech) are out of scope.

use crate::error::Result;

/// Action a digital output protocol may request on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitalOutputMode {
    /// No action this round.
    None,
    /// Drive the channel high.
    High,
    /// Drive the channel low.
    Low,
    /// Flip the channel's current state.
    Toggle,
    /// Drive high for the configured pulse width, then low.
    Pulse,
}

/// A snapshot of every channel's boolean state.
#[derive(Debug, Clone)]
pub struct DigitalState {
    bits: Vec<bool>,
}

impl DigitalState {
    /// Build an all-low state of `nchannels` channels.
    pub fn new(nchannels: usize) -> Self {
        Self { bits: vec![false; nchannels] }
    }

    /// Number of channels in this state.
    pub fn nchannels(&self) -> usize {
        self.bits.len()
    }

    /// Current value of one channel.
    pub fn state(&self, channel: usize) -> bool {
        self.bits[channel]
    }

    /// Set one channel's value.
    pub fn set_state(&mut self, channel: usize, value: bool) {
        self.bits[channel] = value;
    }

    /// Flip one channel's value.
    pub fn toggle_state(&mut self, channel: usize) {
        self.bits[channel] = !self.bits[channel];
    }
}

/// A digital output device: read/write the current per-channel state.
/// Vendor bindings implement this trait; only [`DummyDevice`] ships here.
pub trait DigitalDevice: Send {
    /// Device kind, e.g. `"dummy"` or `"advantech"`.
    fn device_type(&self) -> &str;

    /// Number of channels this device exposes.
    fn nchannels(&self) -> usize;

    /// Read the device's current state.
    fn read_state(&self) -> DigitalState;

    /// Write a new state to the device.
    fn write_state(&mut self, state: DigitalState) -> Result<()>;
}

/// A software-only digital device that just stores whatever was written,
/// for graphs run without real hardware attached.
pub struct DummyDevice {
    state: DigitalState,
}

impl DummyDevice {
    /// Build a dummy device with `nchannels` channels, all initially low.
    pub fn new(nchannels: usize) -> Self {
        Self { state: DigitalState::new(nchannels) }
    }
}

impl DigitalDevice for DummyDevice {
    fn device_type(&self) -> &str {
        "dummy"
    }

    fn nchannels(&self) -> usize {
        self.state.nchannels()
    }

    fn read_state(&self) -> DigitalState {
        self.state.clone()
    }

    fn write_state(&mut self, state: DigitalState) -> Result<()> {
        self.state = state;
        Ok(())
    }
}

/// Construct the device named in a processor's `device` configuration.
/// Only `"dummy"` is implemented; any other name is a configuration error
/// rather than a silent fallback.
pub fn build_device(device_type: &str, nchannels: usize) -> Result<Box<dyn DigitalDevice>> {
    match device_type {
        "dummy" => Ok(Box::new(DummyDevice::new(nchannels))),
        other => Err(crate::error::FalconError::config(
            "dio",
            format!("unsupported digital device type \"{other}\" (only \"dummy\" is built in)"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_device_round_trips_state() {
        let mut device = DummyDevice::new(4);
        let mut state = device.read_state();
        state.set_state(2, true);
        device.write_state(state).unwrap();
        assert!(device.read_state().state(2));
        assert!(!device.read_state().state(0));
    }

    #[test]
    fn toggle_flips_channel() {
        let mut state = DigitalState::new(2);
        state.toggle_state(0);
        assert!(state.state(0));
        state.toggle_state(0);
        assert!(!state.state(0));
    }

    #[test]
    fn build_device_rejects_unknown_type() {
        assert!(build_device("advantech", 4).is_err());
        assert!(build_device("dummy", 4).is_ok());
    }
}
