//! The pluggable soundfield transform.
//!
//! Rotating a spherical-harmonic field and folding it to binaural stereo
//! are numeric transforms the engine treats as a black box behind
//! [`FieldRenderer`]. Production builds plug in an HRTF-backed
//! implementation; [`ReferenceFieldRenderer`] is the built-in reference: it
//! rotates the first-order components of the field exactly, passes
//! higher-order components through unrotated, and decodes through a pair of
//! virtual cardioid microphones at ±30 degrees.
//!
//! Ambisonic channels follow ACN ordering with SN3D weights: W, Y, Z, X for
//! the first order. The ambisonic frame is +X front, +Y left, +Z up; the
//! engine's world frame is -Z front, +X right, +Y up.

use crate::math::{Mat3, Quat, Vec3};
use crate::render::MixBed;

/// A soundfield rotation and binaural fold-down.
///
/// Implementations must be real-time safe: no allocation, no blocking.
pub trait FieldRenderer: Send {
    /// Rotate `frames` samples of planar ambisonic channels in place.
    fn rotate(&mut self, rotation: Quat, channels: &mut [Vec<f32>], frames: usize);

    /// Fold the ambisonic bed down to interleaved binaural stereo, adding
    /// into `out`.
    fn binauralize(&mut self, bed: &MixBed, frames: usize, out: &mut [f32]);
}

/// Change of basis from the engine's world frame to the ambisonic frame.
fn world_to_ambisonic() -> Mat3 {
    // Columns are the images of the world basis vectors:
    // right -> -left, up -> up, back -> -front.
    Mat3::from_cols(
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(-1.0, 0.0, 0.0),
    )
}

/// First-order ACN/SN3D encoding gains for a unit direction in the world
/// frame: `[W, Y, Z, X]`.
pub fn encode_direction(direction: Vec3) -> [f32; 4] {
    let d = world_to_ambisonic() * direction;
    [std::f32::consts::FRAC_1_SQRT_2, d.y, d.z, d.x]
}

/// The built-in reference field transform.
#[derive(Debug, Default)]
pub struct ReferenceFieldRenderer;

impl ReferenceFieldRenderer {
    pub fn new() -> Self {
        Self
    }
}

/// Virtual microphone azimuth for the stereo fold, in radians.
const MIC_AZIMUTH: f32 = std::f32::consts::PI / 6.0;

impl FieldRenderer for ReferenceFieldRenderer {
    fn rotate(&mut self, rotation: Quat, channels: &mut [Vec<f32>], frames: usize) {
        if channels.len() < 4 {
            return;
        }
        let c = world_to_ambisonic();
        let m = c * Mat3::from_quat(rotation.normalize()) * c.transpose();
        for i in 0..frames.min(channels[1].len()) {
            let v = m * Vec3::new(channels[3][i], channels[1][i], channels[2][i]);
            channels[3][i] = v.x;
            channels[1][i] = v.y;
            channels[2][i] = v.z;
        }
    }

    fn binauralize(&mut self, bed: &MixBed, frames: usize, out: &mut [f32]) {
        let ambi = bed.ambi();
        let (cos_az, sin_az) = (MIC_AZIMUTH.cos(), MIC_AZIMUTH.sin());
        let w_weight = std::f32::consts::SQRT_2;
        for i in 0..frames.min(bed.frames()) {
            let w = ambi[0][i];
            let y = ambi[1][i];
            let x = ambi[3][i];
            let left = 0.5 * (w_weight * w + x * cos_az + y * sin_az);
            let right = 0.5 * (w_weight * w + x * cos_az - y * sin_az);
            out[i * 2] += left;
            out[i * 2 + 1] += right;
        }
    }
}

/// Virtual-speaker decomposition renderer.
///
/// Decodes the bed at a ring of fixed speaker directions, then pans each
/// speaker into the stereo output with constant-power gains. A plain
/// alternative to the binaural fold for playback chains that do their own
/// headphone processing downstream.
pub struct SpeakerGridRenderer {
    speakers: Vec<(Vec3, f32, f32)>,
    inner: ReferenceFieldRenderer,
}

impl SpeakerGridRenderer {
    /// Eight virtual speakers every 45 degrees around the listener.
    pub fn new() -> Self {
        let mut speakers = Vec::new();
        let count = 8;
        for i in 0..count {
            let azimuth = i as f32 * std::f32::consts::TAU / count as f32;
            let direction = Quat::from_rotation_y(-azimuth) * (-Vec3::Z);
            // Constant-power pan from the signed azimuth.
            let pan = (azimuth.sin() * 0.5 + 0.5).clamp(0.0, 1.0);
            let angle = pan * std::f32::consts::FRAC_PI_2;
            speakers.push((direction, angle.cos(), angle.sin()));
        }
        Self {
            speakers,
            inner: ReferenceFieldRenderer::new(),
        }
    }

    /// First-order cardioid decode of the bed in `direction`.
    fn sample_direction(bed: &MixBed, frame: usize, direction: Vec3) -> f32 {
        let d = world_to_ambisonic() * direction;
        let ambi = bed.ambi();
        let w = ambi[0][frame];
        let y = ambi[1][frame];
        let z = ambi[2][frame];
        let x = ambi[3][frame];
        0.5 * (std::f32::consts::SQRT_2 * w + x * d.x + y * d.y + z * d.z)
    }
}

impl Default for SpeakerGridRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldRenderer for SpeakerGridRenderer {
    fn rotate(&mut self, rotation: Quat, channels: &mut [Vec<f32>], frames: usize) {
        self.inner.rotate(rotation, channels, frames);
    }

    fn binauralize(&mut self, bed: &MixBed, frames: usize, out: &mut [f32]) {
        let normalize = 2.0 / self.speakers.len() as f32;
        for i in 0..frames.min(bed.frames()) {
            let mut left = 0.0;
            let mut right = 0.0;
            for &(direction, left_gain, right_gain) in &self.speakers {
                let sample = Self::sample_direction(bed, i, direction);
                left += sample * left_gain;
                right += sample * right_gain;
            }
            out[i * 2] += left * normalize;
            out[i * 2 + 1] += right * normalize;
        }
    }
}
