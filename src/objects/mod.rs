//! Playable object kinds and their typed handles.
//!
//! Objects are pooled by the engine; clients hold copyable
//! index-plus-generation handles. A destroyed object's handle goes stale
//! and every later call with it fails with
//! [`EngineError::StaleHandle`](crate::error::EngineError::StaleHandle).

pub(crate) mod audio_object;
pub(crate) mod file;
pub(crate) mod queue;
pub(crate) mod virtualizer;

pub use audio_object::AudioBufferCallback;

use crate::math::{Quat, Vec3};
use crate::transport::PlayState;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Playback state mirrored by the render thread for lock-free control-side
/// getters. Staleness of one tick is acceptable by contract.
#[derive(Debug, Default)]
pub(crate) struct PlaybackShared {
    play_state: AtomicU8,
    volume: AtomicU32,
    elapsed_frames: AtomicU64,
}

impl PlaybackShared {
    pub fn new() -> Self {
        let shared = Self::default();
        shared.set_volume(1.0);
        shared
    }

    pub fn set_play_state(&self, state: PlayState) {
        let encoded = match state {
            PlayState::Stopped => 0,
            PlayState::Playing => 1,
            PlayState::Paused => 2,
        };
        self.play_state.store(encoded, Ordering::Release);
    }

    pub fn play_state(&self) -> PlayState {
        match self.play_state.load(Ordering::Acquire) {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Acquire))
    }

    pub fn set_elapsed_frames(&self, frames: u64) {
        self.elapsed_frames.store(frames, Ordering::Release);
    }

    pub fn add_elapsed_frames(&self, frames: u64) {
        self.elapsed_frames.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn elapsed_frames(&self) -> u64 {
        self.elapsed_frames.load(Ordering::Acquire)
    }
}

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            pub(crate) slot: usize,
            pub(crate) generation: u32,
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({}.{})", stringify!($name), self.slot, self.generation)
            }
        }
    };
}

handle_type! {
    /// Handle to a queue object fed by client-enqueued spatial audio.
    QueueId
}
handle_type! {
    /// Handle to a file object streaming through a decoder.
    FileId
}
handle_type! {
    /// Handle to a positional audio object playing mono or stereo sources.
    ObjectId
}
handle_type! {
    /// Handle to a speakers virtualizer.
    VirtualizerId
}

/// Creation options for file and audio objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectOptions {
    /// Decode inside the render tick instead of the decoder thread. Useful
    /// when the engine runs as an in-place processor without threading.
    pub decode_in_callback: bool,
}

impl ObjectOptions {
    pub const DECODE_IN_CALLBACK: Self = Self {
        decode_in_callback: true,
    };
}

/// Nominal positions of virtual speakers, used by the speakers virtualizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerPosition {
    Left,
    Right,
    Center,
    LeftSurround,
    RightSurround,
    LeftBackSurround,
    RightBackSurround,
    Lfe,
}

impl SpeakerPosition {
    /// Azimuth of the speaker in degrees; negative is left of center.
    fn azimuth_degrees(self) -> f32 {
        match self {
            Self::Left => -30.0,
            Self::Right => 30.0,
            Self::Center | Self::Lfe => 0.0,
            Self::LeftSurround => -110.0,
            Self::RightSurround => 110.0,
            Self::LeftBackSurround => -150.0,
            Self::RightBackSurround => 150.0,
        }
    }

    /// Unit direction of the speaker in the listener's frame.
    pub fn direction(self) -> Vec3 {
        Quat::from_rotation_y(-self.azimuth_degrees().to_radians()) * (-Vec3::Z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_directions() {
        let center = SpeakerPosition::Center.direction();
        assert!((center - (-Vec3::Z)).length() < 1e-5);

        // Left of center means negative X in the listener frame.
        let left = SpeakerPosition::Left.direction();
        assert!(left.x < 0.0 && left.z < 0.0);
        let right = SpeakerPosition::Right.direction();
        assert!(right.x > 0.0 && right.z < 0.0);

        // Back surrounds point behind the listener.
        assert!(SpeakerPosition::LeftBackSurround.direction().z > 0.0);
        assert!(SpeakerPosition::RightBackSurround.direction().z > 0.0);
    }

    #[test]
    fn test_handles_are_value_types() {
        let a = QueueId {
            slot: 0,
            generation: 1,
        };
        let b = a;
        assert_eq!(a, b);
        assert_eq!(format!("{a}"), "QueueId(0.1)");
    }
}
