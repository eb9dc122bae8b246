//! Audio format decoding.
//!
//! The engine pulls PCM through the [`FormatDecoder`] trait and treats the
//! codec behind it as a collaborator: anything that can report its channel
//! count and rate, decode into an interleaved f32 buffer and seek can back
//! a file object. [`SymphoniaDecoder`] is the built-in implementation,
//! covering wav and the other formats symphonia ships, resampled to the
//! engine rate when needed.

mod media;
mod resampler;

pub use media::SymphoniaDecoder;
pub(crate) use resampler::StreamResampler;

use crate::error::Result;

/// A decoder for a compressed or uncompressed audio source.
pub trait FormatDecoder: Send {
    /// Number of channels in the decoded output.
    fn channels(&self) -> usize;

    /// Output sample rate in Hz, after any resampling.
    fn sample_rate(&self) -> u32;

    /// Sample rate of the underlying source in Hz.
    fn source_sample_rate(&self) -> u32;

    /// Total frames per channel at the output rate; 0 if unknown.
    fn total_frames(&self) -> u64;

    /// Duration per channel in milliseconds; 0.0 if unknown.
    fn duration_ms(&self) -> f64 {
        if self.sample_rate() == 0 {
            return 0.0;
        }
        self.total_frames() as f64 * 1000.0 / self.sample_rate() as f64
    }

    /// Current position in output-rate frames.
    fn position_frames(&self) -> u64;

    /// Seek to an output-rate frame position.
    fn seek_to_frame(&mut self, frame: u64) -> Result<()>;

    /// Decode into an interleaved buffer. Returns the number of samples
    /// written, which is 0 at the end of the stream or on a decoder error.
    fn decode_into(&mut self, out: &mut [f32]) -> usize;

    /// True once the source is exhausted.
    fn end_of_stream(&self) -> bool;

    /// True if decoding failed irrecoverably.
    fn had_error(&self) -> bool;

    /// Drop buffered state. With `reset_to_zero`, the stream was rewound to
    /// its start and the position resets with it.
    fn flush(&mut self, reset_to_zero: bool);

    /// Upper bound of frames a single `decode_into` call may produce.
    fn max_frames_per_read(&self) -> usize;

    /// Short format name, e.g. "wav".
    fn name(&self) -> &'static str;
}
