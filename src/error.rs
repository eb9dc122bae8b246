//! Error types for Orbisonic

use thiserror::Error;

/// Errors returned synchronously from configuration and IO-shaped calls.
///
/// Faults on the real-time render path (queue starvation, buffer underruns,
/// end of stream) are never surfaced through this type; they are delivered
/// asynchronously as [`EngineEvent`](crate::events::EngineEvent)s while the
/// render path substitutes silence.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no free objects left in the pool")]
    PoolExhausted,

    #[error("stale handle: the object has been destroyed")]
    StaleHandle,

    #[error("called from a different thread than the one this API is bound to")]
    BadThread,

    #[error("invalid buffer size: {0}")]
    InvalidBufferSize(String),

    #[error("invalid channel count: expected {expected}, got {actual}")]
    InvalidChannelCount { expected: usize, actual: usize },

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("not supported in this configuration")]
    NotSupported,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("could not initialise engine core: {0}")]
    CoreInit(String),

    #[error("no asset is open")]
    NoAsset,

    #[error("could not open asset: {0}")]
    OpenFile(String),

    #[error("invalid or unrecognised header: {0}")]
    InvalidHeader(String),

    #[error("could not initialise decoder: {0}")]
    DecoderInit(String),

    #[error("queue is full")]
    QueueFull,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
