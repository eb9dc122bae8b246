//! Orbisonic is a real-time ambisonic decoding and mixing engine for
//! head-tracked spatial audio playback.
//!
//! The [`AudioEngine`] owns fixed-capacity pools of playable objects:
//! queue objects fed interleaved spatial audio by the client, file objects
//! streaming through a decoder, positional audio objects and speaker
//! virtualizers. Each render tick the engine pulls ready samples from
//! every playing object, spatializes them against the tracked listener,
//! accumulates an ambisonic bed plus a head-locked stereo bed and folds
//! the result to binaural stereo for the device or the pull API.
//!
//! # Architecture
//!
//! - **Control threads**: create and destroy objects, set transport,
//!   volume and spatial parameters. Calls validate against the pools and
//!   post commands to the render side.
//! - **Render thread**: the device callback, or whichever thread calls
//!   [`AudioEngine::get_audio_mix`](engine::AudioEngine::get_audio_mix)
//!   when the device is disabled. Runs the tick without blocking,
//!   allocating or taking control-path locks.
//! - **Decoder thread** (optional): pulls compressed data through
//!   [`FormatDecoder`] collaborators into each object's stream queue.
//! - **Event thread** (optional): delivers [`EngineEvent`]s to callbacks;
//!   alternatively the client pumps events from its own thread.

pub mod config;
mod decode;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod events;
pub mod io;
pub mod layout;
pub mod loudness;
pub mod math;
mod mixer;
pub mod objects;
mod pool;
pub mod render;
pub mod rt;
pub mod spatial;
pub mod sync;
pub mod transport;

pub use config::{
    AudioDeviceType, AudioSettings, EngineSettings, MemorySettings, ThreadSettings,
};
pub use decoder::{FormatDecoder, SymphoniaDecoder};
pub use engine::AudioEngine;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventCallback, EventKind, EventSource};
pub use io::{AssetDescriptor, ByteStream, FileByteStream, MemoryByteStream, SubrangeStream};
pub use layout::ChannelLayout;
pub use loudness::{LoudnessMeter, LoudnessStats};
pub use math::{Pose, Quat, Vec3};
pub use mixer::MixObserver;
pub use objects::{
    AudioBufferCallback, FileId, ObjectId, ObjectOptions, QueueId, SpeakerPosition, VirtualizerId,
};
pub use render::{FieldRenderer, ReferenceFieldRenderer, SpeakerGridRenderer};
pub use rt::{DequeueOutcome, QueueConsumer, QueueProducer};
pub use spatial::{AttenuationMode, AttenuationProps, FocusParams, SpatialParams};
pub use sync::SyncMode;
pub use transport::PlayState;
