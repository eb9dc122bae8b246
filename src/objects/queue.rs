//! Render-side state of a soundfield object.
//!
//! Queue objects and file objects share this state: an interleaved stream
//! of a fixed channel layout, a transport, a client volume and the spatial
//! parameter set. The only difference is who produces into the stream
//! queue: the client (queue objects) or a decoder feed (file objects).

use crate::events::EventSource;
use crate::layout::ChannelLayout;
use crate::objects::PlaybackShared;
use crate::rt::QueueConsumer;
use crate::spatial::SpatialParams;
use crate::transport::{Transport, VolumeRamp};
use std::sync::Arc;

pub(crate) struct SoundfieldObject {
    pub layout: ChannelLayout,
    /// None for a file object with no asset attached yet.
    pub consumer: Option<QueueConsumer>,
    pub transport: Transport,
    pub volume: VolumeRamp,
    pub params: SpatialParams,
    pub shared: Arc<PlaybackShared>,
    pub source: EventSource,
}

impl SoundfieldObject {
    pub fn new(
        layout: ChannelLayout,
        consumer: Option<QueueConsumer>,
        sample_rate: u32,
        shared: Arc<PlaybackShared>,
        source: EventSource,
    ) -> Self {
        Self {
            layout,
            consumer,
            transport: Transport::new(sample_rate),
            volume: VolumeRamp::new(sample_rate),
            params: SpatialParams::soundfield(),
            shared,
            source,
        }
    }
}
