//! Accumulation beds for one render tick.

use crate::render::{BED_CHANNELS, OUTPUT_CHANNELS};

/// The per-tick mixing surface: a second-order ambisonic bed that every
/// spatialized object accumulates into, and a separate head-locked stereo
/// bed that bypasses rotation. The two are never mixed with each other
/// before the final render step.
///
/// All storage is allocated once; clearing and accumulating never allocate.
pub struct MixBed {
    ambi: Vec<Vec<f32>>,
    head: Vec<Vec<f32>>,
    frames: usize,
}

impl MixBed {
    pub fn new(frames: usize) -> Self {
        Self {
            ambi: (0..BED_CHANNELS).map(|_| vec![0.0; frames]).collect(),
            head: (0..OUTPUT_CHANNELS).map(|_| vec![0.0; frames]).collect(),
            frames,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn clear(&mut self) {
        for channel in &mut self.ambi {
            channel.fill(0.0);
        }
        for channel in &mut self.head {
            channel.fill(0.0);
        }
    }

    pub fn ambi(&self) -> &[Vec<f32>] {
        &self.ambi
    }

    pub fn ambi_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.ambi
    }

    pub fn head(&self) -> &[Vec<f32>] {
        &self.head
    }

    /// Add `frames` samples of `planar` ambisonic channels into the bed,
    /// scaled by `gain`. Channels beyond the bed's order are ignored.
    pub fn accumulate_ambi(&mut self, planar: &[Vec<f32>], frames: usize, gain: f32) {
        let frames = frames.min(self.frames);
        for (channel, source) in self.ambi.iter_mut().zip(planar.iter()) {
            for (dest, &sample) in channel[..frames].iter_mut().zip(source[..frames].iter()) {
                *dest += sample * gain;
            }
        }
    }

    /// Add one planar head-locked channel into the bed. A mono source goes
    /// to both sides.
    pub fn accumulate_head(&mut self, channel: usize, samples: &[f32], frames: usize, gain: f32) {
        let frames = frames.min(self.frames).min(samples.len());
        for (dest, &sample) in self.head[channel][..frames]
            .iter_mut()
            .zip(samples[..frames].iter())
        {
            *dest += sample * gain;
        }
    }

    /// Add a single weighted sample run into one ambisonic channel.
    pub fn accumulate_ambi_channel(
        &mut self,
        channel: usize,
        samples: &[f32],
        frames: usize,
        gain: f32,
    ) {
        let frames = frames.min(self.frames).min(samples.len());
        for (dest, &sample) in self.ambi[channel][..frames]
            .iter_mut()
            .zip(samples[..frames].iter())
        {
            *dest += sample * gain;
        }
    }

    /// Add the head-locked bed into an interleaved stereo buffer.
    pub fn mix_head_locked_into(&self, out: &mut [f32], frames: usize) {
        let frames = frames.min(self.frames);
        for i in 0..frames {
            out[i * 2] += self.head[0][i];
            out[i * 2 + 1] += self.head[1][i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beds_accumulate_independently() {
        let mut bed = MixBed::new(4);
        let planar: Vec<Vec<f32>> = vec![vec![1.0; 4]; 4];
        bed.accumulate_ambi(&planar, 4, 0.5);
        bed.accumulate_head(0, &[0.25; 4], 4, 1.0);

        assert_eq!(bed.ambi()[0], vec![0.5; 4]);
        assert_eq!(bed.ambi()[3], vec![0.5; 4]);
        // Channels beyond the source stay silent.
        assert_eq!(bed.ambi()[4], vec![0.0; 4]);
        // Head-locked bed is untouched by ambisonic accumulation.
        assert_eq!(bed.head()[0], vec![0.25; 4]);
        assert_eq!(bed.head()[1], vec![0.0; 4]);

        bed.clear();
        assert_eq!(bed.ambi()[0], vec![0.0; 4]);
        assert_eq!(bed.head()[0], vec![0.0; 4]);
    }

    #[test]
    fn test_head_locked_mix_into_interleaved() {
        let mut bed = MixBed::new(2);
        bed.accumulate_head(0, &[0.1, 0.2], 2, 1.0);
        bed.accumulate_head(1, &[0.3, 0.4], 2, 1.0);
        let mut out = [0.0f32; 4];
        bed.mix_head_locked_into(&mut out, 2);
        assert_eq!(out, [0.1, 0.3, 0.2, 0.4]);
    }
}
