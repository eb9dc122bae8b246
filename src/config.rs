//! Engine construction settings.

/// Which audio device the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioDeviceType {
    /// Use the system's default output device.
    #[default]
    Default,
    /// Use a named output device.
    Custom,
    /// No device; the client pulls mixed audio through
    /// [`AudioEngine::get_audio_mix`](crate::engine::AudioEngine::get_audio_mix).
    Disabled,
}

/// Sample rate, buffer size and device selection.
#[derive(Debug, Clone)]
pub struct AudioSettings {
    /// Sample rate of the engine in Hz.
    pub sample_rate: u32,
    /// Render block size of the engine in frames.
    pub buffer_size: usize,
    /// Audio device selection.
    pub device_type: AudioDeviceType,
    /// Output device name, used only with [`AudioDeviceType::Custom`].
    pub custom_device_name: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_size: 1024,
            device_type: AudioDeviceType::Default,
            custom_device_name: String::new(),
        }
    }
}

/// Fixed pool sizes. All pools are allocated once at engine construction;
/// creating an object never allocates a new slot.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// Number of queue objects in the pool.
    pub queue_pool_size: usize,
    /// Number of file objects in the pool.
    pub file_pool_size: usize,
    /// Capacity of each streaming queue, in samples per channel.
    pub queue_capacity_per_channel: usize,
    /// Number of positional audio objects in the pool.
    pub audio_object_pool_size: usize,
    /// Number of speaker virtualizers in the pool.
    pub virtualizer_pool_size: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            queue_pool_size: 1,
            file_pool_size: 1,
            queue_capacity_per_channel: 4096,
            audio_object_pool_size: 128,
            virtualizer_pool_size: 8,
        }
    }
}

/// Thread configuration.
#[derive(Debug, Clone)]
pub struct ThreadSettings {
    /// Dispatch event callbacks from a dedicated thread. When false, the
    /// client drains events with
    /// [`AudioEngine::process_events`](crate::engine::AudioEngine::process_events).
    pub use_event_thread: bool,
    /// Run all decoding jobs on a dedicated thread. When false, decoding
    /// happens inline in the render tick, as with
    /// [`ObjectOptions::DECODE_IN_CALLBACK`](crate::objects::ObjectOptions).
    pub use_decoder_thread: bool,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            use_event_thread: true,
            use_decoder_thread: true,
        }
    }
}

/// Top-level engine construction settings.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub audio: AudioSettings,
    pub memory: MemorySettings,
    pub threads: ThreadSettings,
}

/// Bounded capacity of the engine event queue. Oldest events are dropped
/// when producers outrun the consumer.
pub(crate) const EVENT_QUEUE_CAPACITY: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.audio.sample_rate, 44_100);
        assert_eq!(settings.audio.buffer_size, 1024);
        assert_eq!(settings.audio.device_type, AudioDeviceType::Default);
        assert_eq!(settings.memory.queue_capacity_per_channel, 4096);
        assert_eq!(settings.memory.audio_object_pool_size, 128);
        assert!(settings.threads.use_event_thread);
        assert!(settings.threads.use_decoder_thread);
    }
}
