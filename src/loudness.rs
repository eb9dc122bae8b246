//! Loudness metering of the rendered mix.
//!
//! Implements EBU R128 / ITU-R BS.1770 style statistics: gated integrated
//! loudness, momentary (400 ms) and short-term (3 s) loudness, and true
//! peak with 4x oversampling. The meter measures the final binaural render,
//! not the raw ambisonic field, so head tracking and the fold-down are part
//! of what is measured.
//!
//! The meter is fed from the render tick and uses only fixed storage: the
//! gating histogram and the sliding windows are preallocated, so processing
//! never allocates.

use std::f64::consts::PI;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Rendered loudness statistics. All values default to -inf until enough
/// audio has been measured.
#[derive(Debug, Clone, Copy)]
pub struct LoudnessStats {
    /// Gated integrated loudness in LUFS.
    pub integrated: f32,
    /// Short-term loudness in LUFS, 3 second window.
    pub short_term: f32,
    /// Momentary loudness in LUFS, 400 ms window.
    pub momentary: f32,
    /// True peak in dBTP.
    pub true_peak: f32,
}

impl Default for LoudnessStats {
    fn default() -> Self {
        Self {
            integrated: f32::NEG_INFINITY,
            short_term: f32::NEG_INFINITY,
            momentary: f32::NEG_INFINITY,
            true_peak: f32::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output =
            c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Two-stage K-weighting per ITU-R BS.1770: a high-frequency shelf followed
/// by a high-pass.
fn shelf_coeffs(sample_rate: u32) -> BiquadCoeffs {
    let fc = 1681.974450955533;
    let gain_db = 3.999843853973347;
    let q = 0.7071752369554196;

    let k = (PI * fc / sample_rate as f64).tan();
    let vh = 10.0_f64.powf(gain_db / 20.0);
    let vb = vh.powf(0.4996667741545416);
    let k2 = k * k;
    let a0 = 1.0 + k / q + k2;
    BiquadCoeffs {
        b0: (vh + vb * k / q + k2) / a0,
        b1: 2.0 * (k2 - vh) / a0,
        b2: (vh - vb * k / q + k2) / a0,
        a1: 2.0 * (k2 - 1.0) / a0,
        a2: (1.0 - k / q + k2) / a0,
    }
}

fn highpass_coeffs(sample_rate: u32) -> BiquadCoeffs {
    let fc = 38.13547087602444;
    let q = 0.5003270373238773;

    let k = (PI * fc / sample_rate as f64).tan();
    let k2 = k * k;
    let a0 = 1.0 + k / q + k2;
    BiquadCoeffs {
        b0: 1.0,
        b1: -2.0,
        b2: 1.0,
        a1: 2.0 * (k2 - 1.0) / a0,
        a2: (1.0 - k / q + k2) / a0,
    }
}

const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;
/// Gating histogram over [-70, 5) LUFS at 0.1 LU per bin.
const HISTOGRAM_BINS: usize = 750;
/// 100 ms gating hop (75% overlap of the 400 ms blocks).
const HOPS_PER_SECOND: usize = 10;
const MOMENTARY_HOPS: usize = 4;
const SHORT_TERM_HOPS: usize = 30;

/// 4x oversampling FIR phase taps for true peak interpolation.
const TRUE_PEAK_TAPS: [f64; 12] = [
    0.0017089843750,
    0.0109863281250,
    -0.0196533203125,
    0.0332031250000,
    -0.0594482421875,
    0.1373291015625,
    0.9721679687500,
    -0.1022949218750,
    0.0476074218750,
    -0.0266113281250,
    0.0148925781250,
    -0.0083007812500,
];

fn power_to_lufs(power: f64) -> f64 {
    if power > 0.0 {
        -0.691 + 10.0 * power.log10()
    } else {
        f64::NEG_INFINITY
    }
}

/// EBU R128 style loudness meter for the stereo render.
pub struct LoudnessMeter {
    shelf: BiquadCoeffs,
    highpass: BiquadCoeffs,
    shelf_state: [BiquadState; 2],
    highpass_state: [BiquadState; 2],

    hop_samples: usize,
    hop_accum: f64,
    hop_count: usize,
    /// Sliding window of hop powers; momentary uses the tail, short-term
    /// the whole ring.
    hops: [f64; SHORT_TERM_HOPS],
    hops_filled: usize,
    hop_write: usize,

    /// Gating histogram for integrated loudness.
    histogram_counts: Box<[u64; HISTOGRAM_BINS]>,
    histogram_power: Box<[f64; HISTOGRAM_BINS]>,

    peak_history: [[f64; TRUE_PEAK_TAPS.len()]; 2],
    true_peak: f64,
}

impl LoudnessMeter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shelf: shelf_coeffs(sample_rate),
            highpass: highpass_coeffs(sample_rate),
            shelf_state: Default::default(),
            highpass_state: Default::default(),
            hop_samples: (sample_rate as usize / HOPS_PER_SECOND).max(1),
            hop_accum: 0.0,
            hop_count: 0,
            hops: [0.0; SHORT_TERM_HOPS],
            hops_filled: 0,
            hop_write: 0,
            histogram_counts: Box::new([0; HISTOGRAM_BINS]),
            histogram_power: Box::new([0.0; HISTOGRAM_BINS]),
            peak_history: [[0.0; TRUE_PEAK_TAPS.len()]; 2],
            true_peak: 0.0,
        }
    }

    /// Reset all accumulated state. Measurement resumes immediately.
    pub fn reset(&mut self) {
        self.shelf_state = Default::default();
        self.highpass_state = Default::default();
        self.hop_accum = 0.0;
        self.hop_count = 0;
        self.hops = [0.0; SHORT_TERM_HOPS];
        self.hops_filled = 0;
        self.hop_write = 0;
        self.histogram_counts.fill(0);
        self.histogram_power.fill(0.0);
        self.peak_history = [[0.0; TRUE_PEAK_TAPS.len()]; 2];
        self.true_peak = 0.0;
    }

    /// Feed interleaved stereo samples from the rendered mix.
    pub fn process_interleaved(&mut self, samples: &[f32]) {
        for frame in samples.chunks_exact(2) {
            let mut frame_power = 0.0;
            for (channel, &sample) in frame.iter().enumerate() {
                let sample = sample as f64;
                self.update_true_peak(channel, sample);
                let shelved = self.shelf_state[channel].process(sample, &self.shelf);
                let weighted = self.highpass_state[channel].process(shelved, &self.highpass);
                frame_power += weighted * weighted;
            }
            self.hop_accum += frame_power;
            self.hop_count += 1;
            if self.hop_count >= self.hop_samples {
                self.complete_hop();
            }
        }
    }

    fn complete_hop(&mut self) {
        let hop_power = self.hop_accum / self.hop_count as f64;
        self.hop_accum = 0.0;
        self.hop_count = 0;

        self.hops[self.hop_write] = hop_power;
        self.hop_write = (self.hop_write + 1) % SHORT_TERM_HOPS;
        self.hops_filled = (self.hops_filled + 1).min(SHORT_TERM_HOPS);

        // Gate a full 400 ms block once enough hops exist.
        if self.hops_filled >= MOMENTARY_HOPS {
            let block_power = self.window_power(MOMENTARY_HOPS);
            let lufs = power_to_lufs(block_power);
            if lufs >= ABSOLUTE_GATE_LUFS {
                let bin = (((lufs - ABSOLUTE_GATE_LUFS) * 10.0) as usize).min(HISTOGRAM_BINS - 1);
                self.histogram_counts[bin] += 1;
                self.histogram_power[bin] += block_power;
            }
        }
    }

    /// Mean power of the most recent `hops` hops.
    fn window_power(&self, hops: usize) -> f64 {
        let hops = hops.min(self.hops_filled);
        if hops == 0 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..hops {
            let index = (self.hop_write + SHORT_TERM_HOPS - 1 - i) % SHORT_TERM_HOPS;
            sum += self.hops[index];
        }
        sum / hops as f64
    }

    #[inline]
    fn update_true_peak(&mut self, channel: usize, sample: f64) {
        let history = &mut self.peak_history[channel];
        history.copy_within(1.., 0);
        history[TRUE_PEAK_TAPS.len() - 1] = sample;

        let peak = sample.abs();
        if peak > self.true_peak {
            self.true_peak = peak;
        }
        for phase in 0..4 {
            let mut interpolated = 0.0;
            for (i, &coeff) in TRUE_PEAK_TAPS.iter().enumerate() {
                let index = (i * 4 + phase) % TRUE_PEAK_TAPS.len();
                interpolated += history[index] * coeff;
            }
            let peak = interpolated.abs();
            if peak > self.true_peak {
                self.true_peak = peak;
            }
        }
    }

    fn integrated(&self) -> f64 {
        let mut count = 0u64;
        let mut power = 0.0;
        for bin in 0..HISTOGRAM_BINS {
            count += self.histogram_counts[bin];
            power += self.histogram_power[bin];
        }
        if count == 0 {
            return f64::NEG_INFINITY;
        }
        // Relative gate: 10 LU below the ungated gated-at-absolute mean.
        let threshold = power_to_lufs(power / count as f64) + RELATIVE_GATE_LU;
        let mut gated_count = 0u64;
        let mut gated_power = 0.0;
        for bin in 0..HISTOGRAM_BINS {
            let bin_lufs = ABSOLUTE_GATE_LUFS + bin as f64 / 10.0;
            if bin_lufs >= threshold {
                gated_count += self.histogram_counts[bin];
                gated_power += self.histogram_power[bin];
            }
        }
        if gated_count == 0 {
            return f64::NEG_INFINITY;
        }
        power_to_lufs(gated_power / gated_count as f64)
    }

    /// Current statistics.
    pub fn stats(&self) -> LoudnessStats {
        let momentary = if self.hops_filled >= MOMENTARY_HOPS {
            power_to_lufs(self.window_power(MOMENTARY_HOPS)) as f32
        } else {
            f32::NEG_INFINITY
        };
        let short_term = if self.hops_filled > 0 {
            power_to_lufs(self.window_power(SHORT_TERM_HOPS)) as f32
        } else {
            f32::NEG_INFINITY
        };
        let true_peak = if self.true_peak > 0.0 {
            (20.0 * self.true_peak.log10()) as f32
        } else {
            f32::NEG_INFINITY
        };
        LoudnessStats {
            integrated: self.integrated() as f32,
            short_term,
            momentary,
            true_peak,
        }
    }
}

/// Meter state shared between the render tick and the control API. The
/// render tick uses `try_lock` and skips metering under contention; reset
/// and the stats accessor must not race each other, which the mutex
/// enforces.
pub(crate) struct LoudnessShared {
    enabled: AtomicBool,
    pub meter: Mutex<LoudnessMeter>,
}

impl LoudnessShared {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            meter: Mutex::new(LoudnessMeter::new(sample_rate)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_stereo(freq: f64, amplitude: f64, sample_rate: u32, seconds: f64) -> Vec<f32> {
        let frames = (sample_rate as f64 * seconds) as usize;
        let mut samples = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (amplitude * (2.0 * PI * freq * i as f64 / sample_rate as f64).sin()) as f32;
            samples.push(s);
            samples.push(s);
        }
        samples
    }

    #[test]
    fn test_silence_measures_negative_infinity() {
        let mut meter = LoudnessMeter::new(48_000);
        meter.process_interleaved(&vec![0.0; 48_000 * 2]);
        let stats = meter.stats();
        assert_eq!(stats.integrated, f32::NEG_INFINITY);
        assert_eq!(stats.true_peak, f32::NEG_INFINITY);
    }

    #[test]
    fn test_sine_level_tracks_amplitude() {
        // A 1 kHz stereo sine at full scale lands near -3 LUFS (stereo sums
        // both channels); the absolute level matters less than consistency.
        let mut meter = LoudnessMeter::new(48_000);
        meter.process_interleaved(&sine_stereo(1000.0, 0.5, 48_000, 2.0));
        let loud = meter.stats();
        assert!(loud.integrated.is_finite());

        let mut quiet_meter = LoudnessMeter::new(48_000);
        quiet_meter.process_interleaved(&sine_stereo(1000.0, 0.05, 48_000, 2.0));
        let quiet = quiet_meter.stats();
        // 20 dB of amplitude difference shows up as ~20 LU.
        assert!((loud.integrated - quiet.integrated - 20.0).abs() < 1.5);
    }

    #[test]
    fn test_true_peak_close_to_amplitude() {
        let mut meter = LoudnessMeter::new(48_000);
        meter.process_interleaved(&sine_stereo(997.0, 0.5, 48_000, 0.5));
        let stats = meter.stats();
        // -6 dBTP for a 0.5 amplitude sine, within interpolation tolerance.
        assert!(stats.true_peak > -6.5 && stats.true_peak < -5.5);
    }

    #[test]
    fn test_momentary_reacts_faster_than_short_term() {
        let mut meter = LoudnessMeter::new(48_000);
        // 3 seconds of quiet, then half a second loud.
        meter.process_interleaved(&sine_stereo(1000.0, 0.02, 48_000, 3.0));
        meter.process_interleaved(&sine_stereo(1000.0, 0.5, 48_000, 0.5));
        let stats = meter.stats();
        assert!(stats.momentary > stats.short_term);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut meter = LoudnessMeter::new(48_000);
        meter.process_interleaved(&sine_stereo(1000.0, 0.5, 48_000, 1.0));
        assert!(meter.stats().integrated.is_finite());
        meter.reset();
        let stats = meter.stats();
        assert_eq!(stats.integrated, f32::NEG_INFINITY);
        assert_eq!(stats.momentary, f32::NEG_INFINITY);
        assert_eq!(stats.true_peak, f32::NEG_INFINITY);
    }
}
