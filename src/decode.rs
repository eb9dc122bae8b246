//! Background decode pipeline.
//!
//! When the engine runs with a decoder thread, every open file-backed
//! object registers a [`DecodeFeed`] here: a decoder plus the producer half
//! of the object's stream queue. The pipeline thread services all feeds in
//! a loop, decoding only while the queue has room (backpressure is the
//! queue's free space, never an overwrite) and parking briefly when there
//! is nothing to do. Objects created with decode-in-callback keep their
//! feed on the render side instead and service it inline each tick.

use crate::decoder::FormatDecoder;
use crate::events::{EventKind, EventSink, EventSource};
use crate::rt::QueueProducer;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Frames moved from the decoder to the stream queue per service step.
const FEED_CHUNK_FRAMES: usize = 1024;

/// A decoder wired to the producer half of an object's stream queue.
pub(crate) struct DecodeFeed {
    decoder: Box<dyn FormatDecoder>,
    producer: QueueProducer,
    looping: Arc<AtomicBool>,
    source: EventSource,
    chunk: Vec<f32>,
    ready_notified: bool,
}

impl DecodeFeed {
    pub fn new(
        decoder: Box<dyn FormatDecoder>,
        producer: QueueProducer,
        looping: Arc<AtomicBool>,
        source: EventSource,
    ) -> Self {
        let channels = producer.channels();
        let capacity_frames = producer.capacity() / channels;
        let chunk_frames = FEED_CHUNK_FRAMES.min(capacity_frames.max(1));
        Self {
            decoder,
            producer,
            looping,
            source,
            chunk: vec![0.0; chunk_frames * channels],
            ready_notified: false,
        }
    }

    /// Decode into the queue until it is full, the stream ends or the
    /// decoder has nothing more right now.
    pub fn service(&mut self, events: &EventSink) {
        loop {
            if self.producer.end_of_stream() {
                break;
            }
            if self.producer.free_space() < self.chunk.len() {
                break;
            }
            let decoded = self.decoder.decode_into(&mut self.chunk);
            if decoded > 0 {
                let _ = self.producer.enqueue(&self.chunk[..decoded]);
            } else if self.decoder.had_error() {
                log::warn!("decoder error on {:?}, ending stream", self.source);
                self.producer.set_end_of_stream(true);
                break;
            } else if self.decoder.end_of_stream() {
                if self.looping.load(Ordering::Relaxed)
                    && self.decoder.seek_to_frame(0).is_ok()
                {
                    events.emit(EventKind::Looped, self.source);
                    continue;
                }
                self.producer.set_end_of_stream(true);
                break;
            } else {
                break;
            }
        }
        if !self.ready_notified {
            self.ready_notified = true;
            events.emit(EventKind::DecoderReady, self.source);
        }
    }

    /// Seek the decoder, dropping whatever was buffered ahead.
    pub fn seek(&mut self, frame: u64) {
        self.producer.flush();
        if let Err(e) = self.decoder.seek_to_frame(frame) {
            log::warn!("seek failed on {:?}: {e}", self.source);
        }
    }
}

/// Work requests handled by the pipeline thread.
pub(crate) enum DecodeJob {
    Attach {
        key: EventSource,
        feed: Box<DecodeFeed>,
    },
    Detach {
        key: EventSource,
    },
    Seek {
        key: EventSource,
        frame: u64,
    },
    Shutdown,
}

/// Owns the decode thread.
pub(crate) struct DecodePipeline {
    tx: Sender<DecodeJob>,
    thread: Option<JoinHandle<()>>,
}

impl DecodePipeline {
    pub fn spawn(events: EventSink) -> Self {
        let (tx, rx) = unbounded();
        let thread = std::thread::Builder::new()
            .name("orbisonic-decoder".into())
            .spawn(move || run(rx, events))
            .expect("failed to spawn decoder thread");
        Self {
            tx,
            thread: Some(thread),
        }
    }

    pub fn sender(&self) -> Sender<DecodeJob> {
        self.tx.clone()
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(DecodeJob::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(rx: Receiver<DecodeJob>, events: EventSink) {
    let mut feeds: HashMap<EventSource, Box<DecodeFeed>> = HashMap::new();
    loop {
        match rx.recv_timeout(Duration::from_millis(2)) {
            Ok(DecodeJob::Attach { key, feed }) => {
                feeds.insert(key, feed);
            }
            Ok(DecodeJob::Detach { key }) => {
                feeds.remove(&key);
            }
            Ok(DecodeJob::Seek { key, frame }) => {
                if let Some(feed) = feeds.get_mut(&key) {
                    feed.seek(frame);
                }
            }
            Ok(DecodeJob::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        for feed in feeds.values_mut() {
            feed.service(&events);
        }
    }
    log::debug!("decode pipeline shut down with {} feeds attached", feeds.len());
}
