//! Running statistics, threshold crossing, and peak detection — the
//! exact formulas grounded in `lib/dsp/algorithms.cpp`, the DSP *tuning*
//! (specific coefficients, production-grade filters) stays out of scope.

/// Which direction counts as a crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slope {
    /// Crossing from at-or-below threshold to above it.
    Up,
    /// Crossing from at-or-above threshold to below it.
    Down,
}

/// Detects a single threshold crossing between consecutive samples.
pub struct ThresholdCrosser {
    threshold: f64,
    slope: Slope,
    prev_sample: f64,
}

impl ThresholdCrosser {
    /// Build a crosser watching `threshold` in the given direction.
    pub fn new(threshold: f64, slope: Slope) -> Self {
        Self { threshold, slope, prev_sample: 0.0 }
    }

    /// Current threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Change the threshold.
    pub fn set_threshold(&mut self, value: f64) {
        self.threshold = value;
    }

    /// Feed the next sample, returning whether it crossed per the
    /// configured slope.
    pub fn has_crossed(&mut self, sample: f64) -> bool {
        match self.slope {
            Slope::Up => self.has_crossed_up(sample),
            Slope::Down => self.has_crossed_down(sample),
        }
    }

    fn has_crossed_up(&mut self, sample: f64) -> bool {
        let crossed = self.prev_sample <= self.threshold && sample > self.threshold;
        self.prev_sample = sample;
        crossed
    }

    fn has_crossed_down(&mut self, sample: f64) -> bool {
        let crossed = self.prev_sample >= self.threshold && sample < self.threshold;
        self.prev_sample = sample;
        crossed
    }
}

/// Exponentially-weighted running mean and mean absolute deviation, with a
/// burn-in period during which the effective smoothing factor grows from
/// near-1 down to the configured `alpha`, and optional outlier attenuation.
///
/// Formulas preserved verbatim from the original: during burn-in,
/// `alpha_eff = alpha + (1 - alpha) / (burn_in - burn_in_counter)` with
/// `burn_in_counter` decremented before the division each call; after
/// burn-in, with outlier protection enabled, `alpha *= 2^((z0 - |z|) /
/// half_life)` whenever `|z| > z0`.
pub struct RunningMeanMad {
    alpha: f64,
    burn_in: u64,
    burn_in_counter: u64,
    outlier_protection: bool,
    outlier_zscore: f64,
    outlier_half_life: f64,
    mean: f64,
    mad: f64,
}

impl RunningMeanMad {
    /// Build a running mean/MAD estimator.
    ///
    /// # Panics
    /// Panics if `alpha` is outside `[0, 1]`, or `outlier_zscore`/
    /// `outlier_half_life` are not strictly positive — these mirror the
    /// original's `std::out_of_range` constructor validation.
    pub fn new(
        alpha: f64,
        burn_in: u64,
        outlier_protection: bool,
        outlier_zscore: f64,
        outlier_half_life: f64,
        mean: f64,
        mad: f64,
    ) -> Self {
        assert!((0.0..=1.0).contains(&alpha), "alpha should be in range 0-1");
        assert!(outlier_zscore > 0.0, "outlier zscore should be larger than zero");
        assert!(outlier_half_life > 0.0, "outlier half life should be larger than zero");
        assert!(mad >= 0.0, "dispersion should be equal to or larger than 0");
        Self {
            alpha,
            burn_in,
            burn_in_counter: burn_in,
            outlier_protection,
            outlier_zscore,
            outlier_half_life,
            mean,
            mad,
        }
    }

    /// Whether the estimator is still within its burn-in window.
    pub fn is_burning_in(&self) -> bool {
        self.burn_in_counter > 0
    }

    /// Current mean estimate.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Current mean absolute deviation estimate.
    pub fn mad(&self) -> f64 {
        self.mad
    }

    /// Configured (steady-state) alpha, before burn-in/outlier adjustment.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// `(value - mean) / mad`.
    pub fn zscore(&self, value: f64) -> f64 {
        (value - self.mean) / self.mad
    }

    /// Feed one sample, updating mean and MAD with the burn-in/outlier
    /// adjusted alpha.
    pub fn add_sample(&mut self, sample: f64) {
        let mut alpha = self.alpha;

        if self.burn_in_counter > 0 {
            self.burn_in_counter -= 1;
            alpha = alpha + (1.0 - alpha) / (self.burn_in - self.burn_in_counter) as f64;
        } else if self.outlier_protection {
            let z = self.zscore(sample).abs();
            if z > self.outlier_zscore {
                alpha *= 2f64.powf((self.outlier_zscore - z) / self.outlier_half_life);
            }
        }

        self.mean = (1.0 - alpha) * self.mean + alpha * sample;
        self.mad = (1.0 - alpha) * self.mad + alpha * (sample - self.mean).abs();
    }
}

/// Detects local maxima in a sample stream, reporting the previous
/// sample's value/timestamp once the slope turns from up to down.
pub struct PeakDetector {
    last_slope_is_up: bool,
    previous_value: f64,
    previous_timestamp: u64,
    npeaks_found: u64,
    last_peak_amplitude: f64,
    last_peak_timestamp: u64,
}

impl PeakDetector {
    /// Build a detector seeded with an initial timestamp/value.
    pub fn new(init_timestamp: u64, init_value: f64) -> Self {
        Self {
            last_slope_is_up: false,
            previous_value: init_value,
            previous_timestamp: init_timestamp,
            npeaks_found: 0,
            last_peak_amplitude: 0.0,
            last_peak_timestamp: 0,
        }
    }

    /// Reset to a fresh seed, clearing the peak count.
    pub fn reset(&mut self, init_timestamp: u64, init_value: f64) {
        *self = Self::new(init_timestamp, init_value);
    }

    /// Feed the next `(timestamp, sample)` pair. Returns true exactly when
    /// this call detects a peak (the previous sample was a local maximum).
    pub fn is_peak(&mut self, timestamp: u64, sample: f64) -> bool {
        let diff = sample - self.previous_value;
        let peak = diff < 0.0 && self.last_slope_is_up;

        if peak {
            self.npeaks_found += 1;
            self.last_peak_amplitude = self.previous_value;
            self.last_peak_timestamp = self.previous_timestamp;
        }

        self.previous_value = sample;
        self.previous_timestamp = timestamp;

        if diff != 0.0 {
            self.last_slope_is_up = diff > 0.0;
        }

        peak
    }

    /// Amplitude of the most recently detected peak.
    pub fn last_peak_amplitude(&self) -> f64 {
        self.last_peak_amplitude
    }

    /// Timestamp of the most recently detected peak.
    pub fn last_peak_timestamp(&self) -> u64 {
        self.last_peak_timestamp
    }

    /// Total peaks detected since construction or the last `reset`.
    pub fn npeaks(&self) -> u64 {
        self.npeaks_found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpikeDetectionMode {
    Threshold,
    Peak,
}

/// Multi-channel spike detector: looks for an upward threshold crossing on
/// any channel, then a local maximum on each channel within `peak_life_time`
/// samples. A spike is reported once at least one channel peaks; channels
/// that never peaked within the window report their value at the
/// threshold-crossing sample instead. Grounded verbatim in
/// `dsp::algorithms::SpikeDetector`.
pub struct MultiChannelSpikeDetector {
    nchannels: usize,
    threshold: f64,
    peak_life_time: u32,
    nspikes_found: u64,

    mode: SpikeDetectionMode,
    previous_sample: Vec<f64>,
    spike_timestamp: u64,
    slope: Vec<f64>,
    peak_countdown: u32,
    peak_found: Vec<bool>,
    npeaks_found: usize,
    peak_amplitudes: Vec<f64>,
}

impl MultiChannelSpikeDetector {
    /// Build a detector watching `nchannels` channels.
    pub fn new(nchannels: usize, threshold: f64, peak_life_time: u32) -> Self {
        let mut detector = Self {
            nchannels,
            threshold,
            peak_life_time,
            nspikes_found: 0,
            mode: SpikeDetectionMode::Threshold,
            previous_sample: Vec::new(),
            spike_timestamp: 0,
            slope: Vec::new(),
            peak_countdown: 0,
            peak_found: Vec::new(),
            npeaks_found: 0,
            peak_amplitudes: Vec::new(),
        };
        detector.reset();
        detector
    }

    /// Clear all per-channel detection state and the spike counter, keeping
    /// `nchannels`/`threshold`/`peak_life_time` as configured.
    pub fn reset(&mut self) {
        self.previous_sample = vec![0.0; self.nchannels];
        self.peak_countdown = 0;
        self.slope = vec![0.0; self.nchannels];
        self.spike_timestamp = 0;
        self.nspikes_found = 0;
        self.peak_found = vec![false; self.nchannels];
        self.peak_amplitudes = vec![0.0; self.nchannels];
        self.npeaks_found = 0;
        self.mode = SpikeDetectionMode::Threshold;
    }

    /// Current threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Change the threshold used for future crossings.
    pub fn set_threshold(&mut self, value: f64) {
        self.threshold = value;
    }

    /// Current peak-search window, in samples.
    pub fn peak_life_time(&self) -> u32 {
        self.peak_life_time
    }

    /// Change the peak-search window used for future crossings.
    pub fn set_peak_life_time(&mut self, value: u32) {
        self.peak_life_time = value;
    }

    /// Timestamp of the most recently detected spike's threshold crossing.
    pub fn timestamp_detected_spike(&self) -> u64 {
        self.spike_timestamp
    }

    /// Per-channel amplitudes of the most recently detected spike.
    pub fn amplitudes_detected_spike(&self) -> &[f64] {
        &self.peak_amplitudes
    }

    /// Total spikes detected since construction or the last `reset`.
    pub fn nspikes(&self) -> u64 {
        self.nspikes_found
    }

    fn update_slope(&mut self, sample: &[f64]) {
        for c in 0..self.nchannels {
            if self.previous_sample[c] != sample[c] {
                self.slope[c] = sample[c] - self.previous_sample[c];
            }
        }
    }

    fn prepare_peak_detection(&mut self, timestamp: u64, sample: &[f64]) {
        self.spike_timestamp = timestamp;
        self.peak_countdown = self.peak_life_time;
        self.npeaks_found = 0;
        self.peak_found.fill(false);
        self.peak_amplitudes.copy_from_slice(&self.previous_sample);
        self.update_slope(sample);
    }

    /// Feed one multi-channel sample. Returns true exactly on the call where
    /// a spike (at least one channel peaking within the window) is reported.
    pub fn is_spike(&mut self, timestamp: u64, sample: &[f64]) -> bool {
        let mut spike_found = false;

        match self.mode {
            SpikeDetectionMode::Threshold => {
                for c in 0..self.nchannels {
                    if self.previous_sample[c] <= self.threshold && sample[c] > self.threshold {
                        self.mode = SpikeDetectionMode::Peak;
                        self.prepare_peak_detection(timestamp, sample);
                        break;
                    }
                }
            }
            SpikeDetectionMode::Peak => {
                for c in 0..self.nchannels {
                    if !self.peak_found[c] && self.slope[c] > 0.0 && sample[c] < self.previous_sample[c] {
                        self.peak_found[c] = true;
                        self.npeaks_found += 1;
                        self.peak_amplitudes[c] = self.previous_sample[c];
                    }
                }

                self.peak_countdown -= 1;

                if self.peak_countdown == 0 || self.npeaks_found == self.nchannels {
                    if self.npeaks_found > 0 {
                        self.nspikes_found += 1;
                        spike_found = true;
                    }
                    self.mode = SpikeDetectionMode::Threshold;
                } else {
                    self.update_slope(sample);
                }
            }
        }

        self.previous_sample.copy_from_slice(sample);
        spike_found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_crosser_detects_upward_crossing() {
        let mut crosser = ThresholdCrosser::new(1.0, Slope::Up);
        assert!(!crosser.has_crossed(0.5));
        assert!(crosser.has_crossed(1.5));
        assert!(!crosser.has_crossed(2.0));
    }

    #[test]
    fn burn_in_alpha_follows_formula() {
        let mut stats = RunningMeanMad::new(0.1, 4, false, 3.0, 1.0, 0.0, 1.0);
        assert!(stats.is_burning_in());
        // first call: burn_in_counter 4->3, alpha_eff = 0.1 + 0.9/(4-3) = 1.0
        stats.add_sample(10.0);
        assert_eq!(stats.mean(), 10.0);
    }

    #[test]
    fn burn_in_ends_after_configured_samples() {
        let mut stats = RunningMeanMad::new(0.1, 2, false, 3.0, 1.0, 0.0, 1.0);
        stats.add_sample(1.0);
        assert!(stats.is_burning_in());
        stats.add_sample(1.0);
        assert!(!stats.is_burning_in());
    }

    #[test]
    fn outlier_attenuates_alpha_after_burn_in() {
        let mut stats = RunningMeanMad::new(0.1, 0, true, 2.0, 1.0, 0.0, 1.0);
        assert!(!stats.is_burning_in());
        let before = stats.mean();
        stats.add_sample(100.0); // huge z-score, attenuated update
        assert!((stats.mean() - before).abs() < 100.0);
    }

    #[test]
    fn peak_detector_finds_local_maximum() {
        let mut detector = PeakDetector::new(0, 0.0);
        assert!(!detector.is_peak(1, 1.0));
        assert!(!detector.is_peak(2, 2.0));
        assert!(detector.is_peak(3, 1.0)); // previous sample (2.0) was the peak
        assert_eq!(detector.last_peak_amplitude(), 2.0);
        assert_eq!(detector.npeaks(), 1);
    }

    #[test]
    fn multichannel_spike_detector_reports_once_per_peak() {
        let mut detector = MultiChannelSpikeDetector::new(1, 1.0, 3);
        assert!(!detector.is_spike(1, &[0.5]));
        assert!(!detector.is_spike(2, &[1.5])); // crosses threshold, enters peak search
        assert!(!detector.is_spike(3, &[2.0])); // still rising
        assert!(detector.is_spike(4, &[1.0])); // falls: channel 0 peaked at 2.0
        assert_eq!(detector.amplitudes_detected_spike(), &[2.0]);
        assert_eq!(detector.nspikes(), 1);
    }

    #[test]
    fn multichannel_spike_detector_times_out_without_a_peak() {
        let mut detector = MultiChannelSpikeDetector::new(1, 1.0, 2);
        assert!(!detector.is_spike(1, &[0.5]));
        assert!(!detector.is_spike(2, &[1.5])); // crosses threshold, peak_countdown = 2
        assert!(!detector.is_spike(3, &[1.6])); // still rising, countdown -> 1
        assert!(!detector.is_spike(4, &[1.7])); // countdown -> 0, no peak ever found
        assert_eq!(detector.nspikes(), 0);
    }
}
