//! Streaming resampler used by decoders whose source rate differs from the
//! engine rate.

use crate::error::{EngineError, Result};
use rubato::{FftFixedIn, Resampler};

/// Resamples interleaved audio in fixed chunks. Input is accumulated until
/// a full chunk is available; the tail is padded with silence on flush.
pub(crate) struct StreamResampler {
    inner: FftFixedIn<f32>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(EngineError::InvalidSampleRate(source_rate.min(target_rate)));
        }
        let inner = FftFixedIn::new(
            source_rate as usize,
            target_rate as usize,
            chunk_frames,
            2,
            channels,
        )
        .map_err(|e| EngineError::DecoderInit(format!("failed to create resampler: {e}")))?;
        Ok(Self {
            inner,
            channels,
            chunk_frames,
            pending: vec![Vec::new(); channels],
        })
    }

    /// Feed interleaved samples, appending resampled interleaved output.
    pub fn push_interleaved(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        for frame in input.chunks_exact(self.channels) {
            for (channel, &sample) in self.pending.iter_mut().zip(frame.iter()) {
                channel.push(sample);
            }
        }
        let chunk_frames = self.chunk_frames;
        while self.pending[0].len() >= chunk_frames {
            let waves_in: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..chunk_frames).collect())
                .collect();
            self.process_chunk(&waves_in, out)?;
        }
        Ok(())
    }

    /// Resample whatever is left, padding the final chunk with silence.
    pub fn flush_into(&mut self, out: &mut Vec<f32>) -> Result<()> {
        if self.pending[0].is_empty() {
            return Ok(());
        }
        let chunk_frames = self.chunk_frames;
        let waves_in: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut chunk: Vec<f32> = channel.drain(..).collect();
                chunk.resize(chunk_frames, 0.0);
                chunk
            })
            .collect();
        self.process_chunk(&waves_in, out)
    }

    /// Drop buffered input, e.g. after a seek.
    pub fn clear(&mut self) {
        for channel in &mut self.pending {
            channel.clear();
        }
    }

    fn process_chunk(&mut self, waves_in: &[Vec<f32>], out: &mut Vec<f32>) -> Result<()> {
        let waves_out = self
            .inner
            .process(waves_in, None)
            .map_err(|e| EngineError::Failed(format!("resampling error: {e}")))?;
        let frames = waves_out.first().map_or(0, Vec::len);
        for frame in 0..frames {
            for channel in &waves_out {
                out.push(channel[frame]);
            }
        }
        Ok(())
    }
}
