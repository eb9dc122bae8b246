//! Lock-free single-producer/single-consumer sample queue.
//!
//! The queue is the only data structure shared between a producer thread
//! (client enqueue calls or the decode thread) and the render tick. Both
//! sides are wait-free: `enqueue` accepts at most the free space and drops
//! the excess, `dequeue_into` delivers at most what is buffered and pads the
//! remainder with silence. Producer and consumer are distinct, non-clonable
//! handle types, so a second producer or consumer cannot attach to the same
//! queue.
//!
//! Cursors are monotonically increasing sample counters; the occupancy is
//! `write - read` and `free_space() + size() == capacity` holds after every
//! operation.

use crate::error::{EngineError, Result};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

struct Shared {
    buf: Box<[UnsafeCell<f32>]>,
    capacity: usize,
    channels: usize,
    /// Absolute read cursor in samples, owned by the consumer.
    read: AtomicUsize,
    /// Absolute write cursor in samples, owned by the producer.
    write: AtomicUsize,
    end_of_stream: AtomicBool,
    /// Latched once the end-of-stream drain event has fired.
    end_fired: AtomicBool,
    /// Cumulative samples dequeued, across all channels.
    dequeued: AtomicU64,
}

// The buffer cells are plain f32s; the cursor protocol guarantees the
// producer only writes cells the consumer is not reading and vice versa.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn used(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    fn free(&self) -> usize {
        self.capacity - self.used()
    }
}

/// Producer half of a stream queue. Exactly one exists per queue.
pub struct QueueProducer {
    shared: Arc<Shared>,
}

/// Consumer half of a stream queue. Exactly one exists per queue.
pub struct QueueConsumer {
    shared: Arc<Shared>,
    /// True once at least one sample has been delivered since the last
    /// flush; starvation is only reported for a stream that has started.
    primed: bool,
}

/// Result of a single `dequeue_into` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DequeueOutcome {
    /// Samples copied from the queue; the rest of the destination was
    /// zeroed.
    pub produced: usize,
    /// The queue ran dry mid-stream and silence was substituted.
    pub starved: bool,
    /// The end-of-stream flag was set and the queue fully drained on this
    /// call. Fires exactly once per stream.
    pub ended: bool,
}

/// Create a stream queue holding `capacity_per_channel` samples for each of
/// `channels` interleaved channels.
pub fn stream_queue(channels: usize, capacity_per_channel: usize) -> (QueueProducer, QueueConsumer) {
    assert!(channels > 0, "stream queue needs at least one channel");
    let capacity = channels * capacity_per_channel;
    let mut buf = Vec::with_capacity(capacity);
    buf.resize_with(capacity, || UnsafeCell::new(0.0));
    let shared = Arc::new(Shared {
        buf: buf.into_boxed_slice(),
        capacity,
        channels,
        read: AtomicUsize::new(0),
        write: AtomicUsize::new(0),
        end_of_stream: AtomicBool::new(false),
        end_fired: AtomicBool::new(false),
        dequeued: AtomicU64::new(0),
    });
    (
        QueueProducer {
            shared: shared.clone(),
        },
        QueueConsumer {
            shared,
            primed: false,
        },
    )
}

impl QueueProducer {
    /// Enqueue interleaved samples. Accepts `min(samples.len(), free_space())`
    /// rounded down to a whole frame and returns the accepted count; the
    /// excess is dropped. Never blocks, never allocates.
    ///
    /// The sample count must be a multiple of the channel count.
    pub fn enqueue(&mut self, samples: &[f32]) -> Result<usize> {
        let channels = self.shared.channels;
        if samples.len() % channels != 0 {
            return Err(EngineError::InvalidBufferSize(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }
        let write = self.shared.write.load(Ordering::Relaxed);
        let free = self.shared.free();
        let accepted = samples.len().min(free) / channels * channels;
        for (offset, &sample) in samples[..accepted].iter().enumerate() {
            let index = write.wrapping_add(offset) % self.shared.capacity;
            // Sole producer; these cells are outside the consumer's window.
            unsafe { *self.shared.buf[index].get() = sample };
        }
        self.shared
            .write
            .store(write.wrapping_add(accepted), Ordering::Release);
        Ok(accepted)
    }

    /// Enqueue interleaved 16-bit samples, converting to f32.
    pub fn enqueue_i16(&mut self, samples: &[i16], scratch: &mut Vec<f32>) -> Result<usize> {
        scratch.clear();
        scratch.extend(samples.iter().map(|&s| f32::from(s) / 32768.0));
        self.enqueue(scratch)
    }

    /// Enqueue `count` samples of silence.
    pub fn enqueue_silence(&mut self, count: usize) -> Result<usize> {
        let channels = self.shared.channels;
        if count % channels != 0 {
            return Err(EngineError::InvalidBufferSize(format!(
                "{count} samples is not a whole number of {channels}-channel frames"
            )));
        }
        let write = self.shared.write.load(Ordering::Relaxed);
        let accepted = count.min(self.shared.free()) / channels * channels;
        for offset in 0..accepted {
            let index = write.wrapping_add(offset) % self.shared.capacity;
            unsafe { *self.shared.buf[index].get() = 0.0 };
        }
        self.shared
            .write
            .store(write.wrapping_add(accepted), Ordering::Release);
        Ok(accepted)
    }

    /// Mark (or unmark) the end of the stream. Once set, the consumer drains
    /// whatever is buffered and reports the end exactly once.
    pub fn set_end_of_stream(&self, end: bool) {
        self.shared.end_of_stream.store(end, Ordering::Release);
        if !end {
            self.shared.end_fired.store(false, Ordering::Release);
        }
    }

    pub fn end_of_stream(&self) -> bool {
        self.shared.end_of_stream.load(Ordering::Acquire)
    }

    /// Drop all buffered samples and clear the end-of-stream flag.
    ///
    /// Producer-side operation: must not race a concurrent `dequeue_into`.
    /// Callers flush either before playback starts or after the consumer has
    /// gone quiet, matching the queue's single-writer discipline.
    pub fn flush(&mut self) {
        let write = self.shared.write.load(Ordering::Relaxed);
        self.shared.read.store(write, Ordering::Release);
        self.shared.end_of_stream.store(false, Ordering::Release);
        self.shared.end_fired.store(false, Ordering::Release);
    }

    pub fn free_space(&self) -> usize {
        self.shared.free()
    }

    pub fn size(&self) -> usize {
        self.shared.used()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    /// Cumulative samples dequeued per channel by the consumer side.
    pub fn dequeued_per_channel(&self) -> u64 {
        self.shared.dequeued.load(Ordering::Relaxed) / self.shared.channels as u64
    }
}

impl QueueConsumer {
    /// Fill `dest` with interleaved samples. Copies `min(dest.len(), size())`
    /// whole frames and zeroes the remainder. Starvation and end-of-stream
    /// are reported through the outcome; the render path converts them to
    /// events rather than errors.
    pub fn dequeue_into(&mut self, dest: &mut [f32]) -> Result<DequeueOutcome> {
        let channels = self.shared.channels;
        if dest.len() % channels != 0 {
            return Err(EngineError::InvalidBufferSize(format!(
                "{} samples is not a whole number of {}-channel frames",
                dest.len(),
                channels
            )));
        }
        let read = self.shared.read.load(Ordering::Relaxed);
        let used = self.shared.used();
        let produced = dest.len().min(used) / channels * channels;
        for (offset, slot) in dest[..produced].iter_mut().enumerate() {
            let index = read.wrapping_add(offset) % self.shared.capacity;
            // Sole consumer; these cells were published by the producer.
            *slot = unsafe { *self.shared.buf[index].get() };
        }
        dest[produced..].fill(0.0);
        self.shared
            .read
            .store(read.wrapping_add(produced), Ordering::Release);
        self.shared
            .dequeued
            .fetch_add(produced as u64, Ordering::Relaxed);

        let mut outcome = DequeueOutcome {
            produced,
            ..Default::default()
        };
        let ended_stream = self.shared.end_of_stream.load(Ordering::Acquire);
        if produced > 0 {
            self.primed = true;
        }
        if produced < dest.len() {
            if ended_stream {
                if !self.shared.end_fired.swap(true, Ordering::AcqRel) {
                    outcome.ended = true;
                }
            } else if self.primed {
                outcome.starved = true;
            }
        }
        Ok(outcome)
    }

    /// Drop all buffered samples and clear end-of-stream state.
    pub fn flush(&mut self) {
        let write = self.shared.write.load(Ordering::Acquire);
        self.shared.read.store(write, Ordering::Release);
        self.shared.end_of_stream.store(false, Ordering::Release);
        self.shared.end_fired.store(false, Ordering::Release);
        self.primed = false;
    }

    /// Cumulative samples dequeued per channel, across the queue's lifetime.
    pub fn dequeued_per_channel(&self) -> u64 {
        self.shared.dequeued.load(Ordering::Relaxed) / self.shared.channels as u64
    }

    pub fn end_of_stream(&self) -> bool {
        self.shared.end_of_stream.load(Ordering::Acquire)
    }

    pub fn free_space(&self) -> usize {
        self.shared.free()
    }

    pub fn size(&self) -> usize {
        self.shared.used()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invariant(producer: &QueueProducer) {
        assert_eq!(
            producer.free_space() + producer.size(),
            producer.capacity()
        );
    }

    #[test]
    fn test_enqueue_dequeue_round() {
        let (mut producer, mut consumer) = stream_queue(2, 8);
        invariant(&producer);

        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(producer.enqueue(&data).unwrap(), 8);
        invariant(&producer);
        assert_eq!(consumer.size(), 8);

        let mut out = [0.0f32; 8];
        let outcome = consumer.dequeue_into(&mut out).unwrap();
        assert_eq!(outcome.produced, 8);
        assert!(!outcome.starved);
        assert!(!outcome.ended);
        assert_eq!(&out[..], &data[..]);
        assert_eq!(consumer.dequeued_per_channel(), 4);
        invariant(&producer);
    }

    #[test]
    fn test_enqueue_never_exceeds_free_space() {
        let (mut producer, _consumer) = stream_queue(1, 4);
        let data = [1.0f32; 10];
        assert_eq!(producer.enqueue(&data).unwrap(), 4);
        assert_eq!(producer.free_space(), 0);
        assert_eq!(producer.enqueue(&data).unwrap(), 0);
        invariant(&producer);
    }

    #[test]
    fn test_unaligned_counts_rejected() {
        let (mut producer, mut consumer) = stream_queue(10, 16);
        assert!(matches!(
            producer.enqueue(&[0.0; 15]),
            Err(EngineError::InvalidBufferSize(_))
        ));
        let mut out = [0.0f32; 7];
        assert!(matches!(
            consumer.dequeue_into(&mut out),
            Err(EngineError::InvalidBufferSize(_))
        ));
    }

    #[test]
    fn test_ten_channel_layout_accounting() {
        // A queue sized for a 10-channel layout with 4096 samples per channel.
        let (mut producer, mut consumer) = stream_queue(10, 4096);
        assert_eq!(producer.capacity(), 40_960);

        let free_before = producer.free_space();
        assert_eq!(producer.enqueue(&vec![0.25; 100]).unwrap(), 100);
        assert_eq!(producer.free_space(), free_before - 100);
        assert_eq!(consumer.size(), 100);

        let mut out = vec![0.0f32; 1000];
        let outcome = consumer.dequeue_into(&mut out).unwrap();
        assert_eq!(outcome.produced, 100);
        // 100 interleaved samples over 10 channels advance the per-channel
        // counter by 10.
        assert_eq!(consumer.dequeued_per_channel(), 10);
    }

    #[test]
    fn test_starvation_pads_silence() {
        let (mut producer, mut consumer) = stream_queue(1, 16);
        producer.enqueue(&[0.5; 4]).unwrap();

        let mut out = [1.0f32; 8];
        let outcome = consumer.dequeue_into(&mut out).unwrap();
        assert_eq!(outcome.produced, 4);
        assert!(outcome.starved);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
    }

    #[test]
    fn test_no_starvation_before_first_sample() {
        let (_producer, mut consumer) = stream_queue(1, 16);
        let mut out = [0.0f32; 8];
        // An empty queue that never produced data is not starving yet.
        let outcome = consumer.dequeue_into(&mut out).unwrap();
        assert!(!outcome.starved);
        assert_eq!(outcome.produced, 0);
    }

    #[test]
    fn test_end_of_stream_fires_once() {
        let (mut producer, mut consumer) = stream_queue(1, 16);
        producer.enqueue(&[0.1; 6]).unwrap();
        producer.set_end_of_stream(true);

        let mut out = [0.0f32; 4];
        let first = consumer.dequeue_into(&mut out).unwrap();
        assert_eq!(first.produced, 4);
        assert!(!first.ended);

        // Remainder drains below the request; the end fires here, once.
        let second = consumer.dequeue_into(&mut out).unwrap();
        assert_eq!(second.produced, 2);
        assert!(second.ended);
        assert!(!second.starved);

        let third = consumer.dequeue_into(&mut out).unwrap();
        assert_eq!(third.produced, 0);
        assert!(!third.ended);
    }

    #[test]
    fn test_flush_resets_queue() {
        let (mut producer, mut consumer) = stream_queue(2, 8);
        producer.enqueue(&[0.3; 10]).unwrap();
        producer.set_end_of_stream(true);

        producer.flush();
        assert_eq!(producer.size(), 0);
        assert!(!producer.end_of_stream());
        invariant(&producer);

        // The queue keeps working after a flush.
        producer.enqueue(&[0.7; 4]).unwrap();
        let mut out = [0.0f32; 4];
        let outcome = consumer.dequeue_into(&mut out).unwrap();
        assert_eq!(outcome.produced, 4);
        assert_eq!(out, [0.7; 4]);
    }

    #[test]
    fn test_cumulative_accounting_across_wrap() {
        let (mut producer, mut consumer) = stream_queue(1, 8);
        let mut total_in = 0u64;
        let mut total_out = 0u64;
        let mut out = [0.0f32; 4];
        for round in 0..10 {
            let chunk = [round as f32; 4];
            total_in += producer.enqueue(&chunk).unwrap() as u64;
            let outcome = consumer.dequeue_into(&mut out).unwrap();
            total_out += outcome.produced as u64;
            assert_eq!(producer.free_space() + producer.size(), 8);
        }
        assert_eq!(total_in, total_out);
        assert_eq!(consumer.dequeued_per_channel(), total_out);
    }

    #[test]
    fn test_i16_enqueue_converts() {
        let (mut producer, mut consumer) = stream_queue(1, 8);
        let mut scratch = Vec::new();
        producer
            .enqueue_i16(&[i16::MAX, 0, i16::MIN, 16384], &mut scratch)
            .unwrap();
        let mut out = [0.0f32; 4];
        consumer.dequeue_into(&mut out).unwrap();
        assert!((out[0] - 0.99997).abs() < 1e-4);
        assert_eq!(out[1], 0.0);
        assert!((out[2] + 1.0).abs() < 1e-6);
        assert!((out[3] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_cross_thread_stream() {
        let (mut producer, mut consumer) = stream_queue(2, 1024);
        let writer = std::thread::spawn(move || {
            let chunk: Vec<f32> = (0..64).map(|i| (i % 7) as f32).collect();
            let total = 64 * 100;
            let mut sent = 0usize;
            while sent < total {
                let want = (total - sent).min(chunk.len());
                sent += producer.enqueue(&chunk[..want]).unwrap();
                std::thread::yield_now();
            }
            producer.set_end_of_stream(true);
        });

        let mut received = 0usize;
        let mut out = [0.0f32; 128];
        loop {
            let outcome = consumer.dequeue_into(&mut out).unwrap();
            received += outcome.produced;
            if outcome.ended {
                break;
            }
        }
        writer.join().unwrap();
        assert_eq!(received, 64 * 100);
    }
}
