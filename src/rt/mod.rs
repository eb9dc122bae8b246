//! Real-time safe primitives shared between the control, producer and
//! render paths.

mod stream_queue;

pub use stream_queue::{DequeueOutcome, QueueConsumer, QueueProducer, stream_queue};
