//! Render-side state of a speakers virtualizer.
//!
//! A virtualizer plays an arbitrary interleaved speaker-layout stream
//! (stereo, 5.1, 7.1, ...) by treating every speaker as an independently
//! spatialized feed at a fixed direction around the listener; the feeds are
//! summed into the ambisonic bed.

use crate::events::EventSource;
use crate::math::Vec3;
use crate::objects::PlaybackShared;
use crate::rt::QueueConsumer;
use crate::transport::{Transport, VolumeRamp};
use std::sync::Arc;

pub(crate) struct VirtualizerObject {
    pub consumer: QueueConsumer,
    /// Unit direction of each speaker in the listener's frame, one per
    /// interleaved channel.
    pub directions: Vec<Vec3>,
    pub transport: Transport,
    pub volume: VolumeRamp,
    pub shared: Arc<PlaybackShared>,
    pub source: EventSource,
}

impl VirtualizerObject {
    pub fn new(
        consumer: QueueConsumer,
        directions: Vec<Vec3>,
        sample_rate: u32,
        shared: Arc<PlaybackShared>,
        source: EventSource,
    ) -> Self {
        Self {
            consumer,
            directions,
            transport: Transport::new(sample_rate),
            volume: VolumeRamp::new(sample_rate),
            shared,
            source,
        }
    }
}
