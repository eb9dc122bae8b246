//! Render-side state of a file-backed soundfield object.

use crate::decode::DecodeFeed;
use crate::events::EventSource;
use crate::layout::ChannelLayout;
use crate::objects::PlaybackShared;
use crate::sync::SyncClock;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use super::queue::SoundfieldObject;

pub(crate) struct FileObject {
    pub playback: SoundfieldObject,
    pub sync: SyncClock,
    pub looping: Arc<AtomicBool>,
    /// Present when the object decodes inside the render tick instead of on
    /// the decoder thread.
    pub inline_feed: Option<Box<DecodeFeed>>,
    /// Asset duration in engine-rate frames, 0 while nothing is open.
    pub total_frames: u64,
}

impl FileObject {
    pub fn new(sample_rate: u32, shared: Arc<PlaybackShared>, source: EventSource) -> Self {
        Self {
            playback: SoundfieldObject::new(
                ChannelLayout::Hybrid8Stereo,
                None,
                sample_rate,
                shared,
                source,
            ),
            sync: SyncClock::new(),
            looping: Arc::new(AtomicBool::new(false)),
            inline_feed: None,
            total_frames: 0,
        }
    }

    pub fn has_asset(&self) -> bool {
        self.playback.consumer.is_some()
    }

    /// Drop the attached stream and reset playback bookkeeping.
    pub fn detach(&mut self) -> (Option<crate::rt::QueueConsumer>, Option<Box<DecodeFeed>>) {
        self.total_frames = 0;
        self.playback.transport.reset();
        self.playback.shared.set_play_state(crate::transport::PlayState::Stopped);
        self.playback.shared.set_elapsed_frames(0);
        (self.playback.consumer.take(), self.inline_feed.take())
    }
}
