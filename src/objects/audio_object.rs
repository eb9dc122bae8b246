//! Render-side state of a positional audio object.
//!
//! An audio object positions a mono or stereo source in space. Its samples
//! come either from a client callback invoked inside the render tick, or
//! from a decoder feed like a file object. When spatialization is switched
//! off the object renders head-locked instead.

use crate::decode::DecodeFeed;
use crate::events::EventSource;
use crate::objects::PlaybackShared;
use crate::rt::QueueConsumer;
use crate::spatial::SpatialParams;
use crate::transport::{Transport, VolumeRamp};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Client callback filling an interleaved buffer. Arguments: buffer,
/// number of frames, number of channels. Must not block or allocate.
pub type AudioBufferCallback = Box<dyn FnMut(&mut [f32], usize, usize) + Send>;

/// Where an audio object gets its samples from.
pub(crate) enum PointInput {
    None,
    Callback {
        callback: AudioBufferCallback,
        channels: usize,
    },
    Stream {
        consumer: QueueConsumer,
        channels: usize,
    },
}

impl PointInput {
    pub fn channels(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Callback { channels, .. } | Self::Stream { channels, .. } => *channels,
        }
    }
}

pub(crate) struct PointObject {
    pub input: PointInput,
    pub transport: Transport,
    pub volume: VolumeRamp,
    pub params: SpatialParams,
    pub shared: Arc<PlaybackShared>,
    pub source: EventSource,
    pub looping: Arc<AtomicBool>,
    pub inline_feed: Option<Box<DecodeFeed>>,
    /// Asset duration in engine-rate frames, 0 for callback input.
    pub total_frames: u64,
}

impl PointObject {
    pub fn new(sample_rate: u32, shared: Arc<PlaybackShared>, source: EventSource) -> Self {
        Self {
            input: PointInput::None,
            transport: Transport::new(sample_rate),
            volume: VolumeRamp::new(sample_rate),
            params: SpatialParams::point_source(),
            shared,
            source,
            looping: Arc::new(AtomicBool::new(false)),
            inline_feed: None,
            total_frames: 0,
        }
    }
}
