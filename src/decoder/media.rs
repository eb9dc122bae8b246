//! Symphonia-backed implementation of [`FormatDecoder`].

use crate::decoder::{FormatDecoder, StreamResampler};
use crate::error::{EngineError, Result};
use crate::io::ByteStream;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use symphonia::default::{get_codecs, get_probe};

/// Adapts a [`ByteStream`] to symphonia's `MediaSource`.
struct ByteStreamSource {
    inner: Box<dyn ByteStream>,
}

impl std::io::Read for ByteStreamSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::io::Seek for ByteStreamSource {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl MediaSource for ByteStreamSource {
    fn is_seekable(&self) -> bool {
        self.inner.can_seek()
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Frames decoded per packet pull, before resampling.
const DEFAULT_MAX_FRAMES_PER_READ: usize = 2048;
/// Resampler chunk size in source frames.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Decodes any format symphonia can probe, resampling to the engine rate.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    source_rate: u32,
    output_rate: u32,
    source_total_frames: u64,
    resampler: Option<StreamResampler>,
    /// Interleaved output-rate samples decoded but not yet served.
    pending: Vec<f32>,
    pending_offset: usize,
    position_frames: u64,
    end_of_stream: bool,
    had_error: bool,
}

impl SymphoniaDecoder {
    /// Open a file on disk.
    pub fn from_path(path: impl AsRef<Path>, output_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| EngineError::OpenFile(format!("{}: {e}", path.display())))?;
        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }
        Self::from_media_source(Box::new(file), hint, output_rate)
    }

    /// Open an arbitrary byte stream. The extension hint helps the probe
    /// pick a demuxer.
    pub fn from_stream(
        stream: Box<dyn ByteStream>,
        extension_hint: Option<&str>,
        output_rate: u32,
    ) -> Result<Self> {
        let mut hint = Hint::new();
        if let Some(extension) = extension_hint {
            hint.with_extension(extension);
        }
        Self::from_media_source(Box::new(ByteStreamSource { inner: stream }), hint, output_rate)
    }

    fn from_media_source(
        source: Box<dyn MediaSource>,
        hint: Hint,
        output_rate: u32,
    ) -> Result<Self> {
        if output_rate == 0 {
            return Err(EngineError::InvalidSampleRate(output_rate));
        }
        let mss = MediaSourceStream::new(source, Default::default());
        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::InvalidHeader(format!("failed to probe format: {e:?}")))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::InvalidHeader("no decodable audio track".into()))?;

        let source_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| EngineError::InvalidHeader("sample rate not found".into()))?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| EngineError::InvalidHeader("channel count not found".into()))?
            .count();
        let source_total_frames = track.codec_params.n_frames.unwrap_or(0);
        let track_id = track.id;

        let decoder = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::DecoderInit(format!("failed to create decoder: {e:?}")))?;

        let resampler = if source_rate != output_rate {
            Some(StreamResampler::new(
                source_rate,
                output_rate,
                channels,
                RESAMPLE_CHUNK_FRAMES,
            )?)
        } else {
            None
        };

        log::debug!(
            "opened audio track: {} ch, {} Hz -> {} Hz, {} frames",
            channels,
            source_rate,
            output_rate,
            source_total_frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            source_rate,
            output_rate,
            source_total_frames,
            resampler,
            pending: Vec::new(),
            pending_offset: 0,
            position_frames: 0,
            end_of_stream: false,
            had_error: false,
        })
    }

    fn source_to_output_frames(&self, frames: u64) -> u64 {
        if self.source_rate == self.output_rate {
            frames
        } else {
            frames * self.output_rate as u64 / self.source_rate as u64
        }
    }

    /// Pull one packet through the codec into the pending buffer. Returns
    /// false when no more data will arrive.
    fn decode_next_packet(&mut self) -> bool {
        let packet = loop {
            match self.format.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => break packet,
                Ok(_) => continue,
                Err(SymphoniaError::IoError(_)) => {
                    self.finish_stream();
                    return false;
                }
                Err(e) => {
                    log::warn!("error reading packet: {e:?}");
                    self.had_error = true;
                    return false;
                }
            }
        };

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                match &mut self.resampler {
                    Some(resampler) => {
                        if let Err(e) = resampler.push_interleaved(buffer.samples(), &mut self.pending)
                        {
                            log::warn!("resampler failed: {e}");
                            self.had_error = true;
                            return false;
                        }
                    }
                    None => self.pending.extend_from_slice(buffer.samples()),
                }
                true
            }
            Err(SymphoniaError::IoError(_)) => {
                self.finish_stream();
                false
            }
            // Recoverable corruption; skip the packet.
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("skipping corrupt packet: {e}");
                true
            }
            Err(e) => {
                log::warn!("decode failed: {e:?}");
                self.had_error = true;
                false
            }
        }
    }

    fn finish_stream(&mut self) {
        if !self.end_of_stream {
            self.end_of_stream = true;
            if let Some(resampler) = &mut self.resampler {
                let _ = resampler.flush_into(&mut self.pending);
            }
        }
    }

    fn pending_len(&self) -> usize {
        self.pending.len() - self.pending_offset
    }
}

impl FormatDecoder for SymphoniaDecoder {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.output_rate
    }

    fn source_sample_rate(&self) -> u32 {
        self.source_rate
    }

    fn total_frames(&self) -> u64 {
        self.source_to_output_frames(self.source_total_frames)
    }

    fn position_frames(&self) -> u64 {
        self.position_frames
    }

    fn seek_to_frame(&mut self, frame: u64) -> Result<()> {
        let source_frame = if self.source_rate == self.output_rate {
            frame
        } else {
            frame * self.source_rate as u64 / self.output_rate as u64
        };
        let seconds = source_frame / self.source_rate as u64;
        let frac =
            (source_frame % self.source_rate as u64) as f64 / self.source_rate as f64;
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(seconds, frac),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::Failed(format!("seek failed: {e:?}")))?;
        self.decoder.reset();
        if let Some(resampler) = &mut self.resampler {
            resampler.clear();
        }
        self.pending.clear();
        self.pending_offset = 0;
        self.position_frames = frame;
        self.end_of_stream = false;
        self.had_error = false;
        Ok(())
    }

    fn decode_into(&mut self, out: &mut [f32]) -> usize {
        if self.had_error {
            return 0;
        }
        while self.pending_len() < out.len() && !self.end_of_stream && !self.had_error {
            if !self.decode_next_packet() {
                break;
            }
        }
        let available = self.pending_len().min(out.len());
        let served = available / self.channels * self.channels;
        out[..served]
            .copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + served]);
        self.pending_offset += served;
        if self.pending_offset == self.pending.len() {
            self.pending.clear();
            self.pending_offset = 0;
        }
        self.position_frames += (served / self.channels) as u64;
        served
    }

    fn end_of_stream(&self) -> bool {
        self.end_of_stream && self.pending_len() == 0
    }

    fn had_error(&self) -> bool {
        self.had_error
    }

    fn flush(&mut self, reset_to_zero: bool) {
        self.decoder.reset();
        if let Some(resampler) = &mut self.resampler {
            resampler.clear();
        }
        self.pending.clear();
        self.pending_offset = 0;
        if reset_to_zero {
            self.position_frames = 0;
            self.end_of_stream = false;
            self.had_error = false;
        }
    }

    fn max_frames_per_read(&self) -> usize {
        DEFAULT_MAX_FRAMES_PER_READ
    }

    fn name(&self) -> &'static str {
        "symphonia"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryByteStream;

    /// Minimal 16-bit PCM wav writer for test fixtures.
    fn wav_bytes(sample_rate: u32, channels: u16, frames: &[i16]) -> Vec<u8> {
        let data_len = (frames.len() * 2) as u32;
        let byte_rate = sample_rate * channels as u32 * 2;
        let block_align = channels * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for &sample in frames {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_wav_stream() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 64) as i16).collect();
        let bytes = wav_bytes(48_000, 1, &samples);
        let stream = Box::new(MemoryByteStream::new(bytes));
        let mut decoder =
            SymphoniaDecoder::from_stream(stream, Some("wav"), 48_000).unwrap();

        assert_eq!(decoder.channels(), 1);
        assert_eq!(decoder.sample_rate(), 48_000);
        assert_eq!(decoder.source_sample_rate(), 48_000);
        assert_eq!(decoder.total_frames(), 480);

        let mut out = vec![0.0f32; 480];
        let mut decoded = 0;
        while decoded < 480 {
            let n = decoder.decode_into(&mut out[decoded..]);
            if n == 0 {
                break;
            }
            decoded += n;
        }
        assert_eq!(decoded, 480);
        assert!((out[1] - 64.0 / 32768.0).abs() < 1e-4);
        assert_eq!(decoder.position_frames(), 480);

        // Exhausted now.
        let mut tail = [0.0f32; 16];
        assert_eq!(decoder.decode_into(&mut tail), 0);
        assert!(decoder.end_of_stream());
        assert!(!decoder.had_error());
    }

    #[test]
    fn test_seek_rewinds() {
        let samples: Vec<i16> = (0..1000).map(|i| i as i16).collect();
        let bytes = wav_bytes(44_100, 1, &samples);
        let stream = Box::new(MemoryByteStream::new(bytes));
        let mut decoder =
            SymphoniaDecoder::from_stream(stream, Some("wav"), 44_100).unwrap();

        let mut out = vec![0.0f32; 1000];
        while decoder.decode_into(&mut out) > 0 {}
        assert!(decoder.end_of_stream());

        decoder.seek_to_frame(0).unwrap();
        assert!(!decoder.end_of_stream());
        assert_eq!(decoder.position_frames(), 0);
        let n = decoder.decode_into(&mut out[..100]);
        assert_eq!(n, 100);
    }

    #[test]
    fn test_garbage_rejected() {
        let stream = Box::new(MemoryByteStream::new(vec![0xAB; 512]));
        let result = SymphoniaDecoder::from_stream(stream, Some("wav"), 48_000);
        assert!(matches!(result, Err(EngineError::InvalidHeader(_))));
    }
}
