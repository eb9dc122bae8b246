//! The audio engine: device setup, object pools and the listener.
//!
//! `AudioEngine` is the top-level context. It owns every pool slot and the
//! listener; clients hold copyable handles and drive objects through the
//! engine's control surface. Control calls validate against the pools,
//! then post commands to the render core, which applies them at the next
//! tick. The render tick runs on the device callback thread, or on
//! whichever thread calls [`AudioEngine::get_audio_mix`] when the device
//! is disabled.

use crate::config::{AudioDeviceType, EngineSettings};
use crate::decode::{DecodeFeed, DecodeJob, DecodePipeline};
use crate::decoder::{FormatDecoder, SymphoniaDecoder};
use crate::error::{EngineError, Result};
use crate::events::{EventCallback, EventDispatcher, EventKind, EventSource};
use crate::io::{AssetDescriptor, ByteStream, FileByteStream, SubrangeStream};
use crate::layout::ChannelLayout;
use crate::loudness::{LoudnessShared, LoudnessStats};
use crate::math::{Quat, Vec3, db_to_linear, linear_to_db, rotation_from_vectors};
use crate::mixer::{Command, MixObserver, RenderCore, Reclaimed};
use crate::objects::audio_object::{AudioBufferCallback, PointObject};
use crate::objects::file::FileObject;
use crate::objects::queue::SoundfieldObject;
use crate::objects::virtualizer::VirtualizerObject;
use crate::objects::{
    FileId, ObjectId, ObjectOptions, PlaybackShared, QueueId, SpeakerPosition, VirtualizerId,
};
use crate::pool::SlotPool;
use crate::render::ReferenceFieldRenderer;
use crate::rt::{QueueProducer, stream_queue};
use crate::spatial::{AttenuationMode, AttenuationProps};
use crate::sync::{DEFAULT_FREEWHEEL_MS, DEFAULT_RESYNC_THRESHOLD_MS, SyncMode};
use crate::transport::{PlayState, TransportMode, TransportOp};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

/// Maximum number of virtual speakers in one virtualizer.
const MAX_VIRTUALIZER_SPEAKERS: usize = 8;

struct QueueControl {
    producer: Option<QueueProducer>,
    shared: Arc<PlaybackShared>,
    layout: ChannelLayout,
    i16_scratch: Vec<f32>,
    position: Vec3,
    rotation: Quat,
}

struct FileControl {
    shared: Arc<PlaybackShared>,
    looping: Arc<AtomicBool>,
    open: bool,
    total_frames: u64,
    decode_in_callback: bool,
    sync_mode: SyncMode,
    freewheel_ms: f64,
    resync_threshold_ms: f64,
    position: Vec3,
    rotation: Quat,
}

struct ObjectControl {
    shared: Arc<PlaybackShared>,
    looping: Arc<AtomicBool>,
    open: bool,
    total_frames: u64,
    decode_in_callback: bool,
    spatialize: bool,
    attenuation_mode: AttenuationMode,
    attenuation: AttenuationProps,
    position: Vec3,
    rotation: Quat,
}

struct VirtualizerControl {
    producer: Option<QueueProducer>,
    shared: Arc<PlaybackShared>,
    affinity: Option<ThreadId>,
    i16_scratch: Vec<f32>,
}

struct ControlState {
    queues: SlotPool<QueueControl>,
    files: SlotPool<FileControl>,
    objects: SlotPool<ObjectControl>,
    virtualizers: SlotPool<VirtualizerControl>,
    listener_position: Vec3,
    listener_rotation: Quat,
    tracking_enabled: bool,
}

/// Owns the device thread. `cpal` streams are not `Send`, so the stream
/// lives on its own thread and the engine holds only the shutdown handle;
/// this keeps the engine shareable across control threads.
struct DeviceHandle {
    shutdown_tx: Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The engine. Construct it once, create objects from its pools, destroy it
/// last.
pub struct AudioEngine {
    settings: EngineSettings,
    control: Mutex<ControlState>,
    command_tx: Sender<Command>,
    reclaim_rx: Receiver<Reclaimed>,
    render: Arc<Mutex<RenderCore>>,
    running: Arc<AtomicBool>,
    dsp_samples: Arc<AtomicU64>,
    events: EventDispatcher,
    decode: Option<DecodePipeline>,
    decode_tx: Option<Sender<DecodeJob>>,
    loudness: Arc<LoudnessShared>,
    device: Option<DeviceHandle>,
}

impl AudioEngine {
    /// Create an engine with the built-in reference field renderer.
    pub fn new(settings: EngineSettings) -> Result<Self> {
        Self::with_field_renderer(settings, Box::new(ReferenceFieldRenderer::new()))
    }

    /// Create an engine with a custom soundfield transform, e.g. an
    /// HRTF-backed renderer or
    /// [`SpeakerGridRenderer`](crate::render::SpeakerGridRenderer).
    pub fn with_field_renderer(
        settings: EngineSettings,
        field: Box<dyn crate::render::FieldRenderer>,
    ) -> Result<Self> {
        if settings.audio.sample_rate == 0 {
            return Err(EngineError::InvalidSampleRate(settings.audio.sample_rate));
        }
        if settings.audio.buffer_size == 0 {
            return Err(EngineError::InvalidBufferSize(
                "buffer size must be non-zero".into(),
            ));
        }

        let events = EventDispatcher::new(settings.threads.use_event_thread);
        let decode = settings
            .threads
            .use_decoder_thread
            .then(|| DecodePipeline::spawn(events.sink()));
        let decode_tx = decode.as_ref().map(DecodePipeline::sender);

        let (command_tx, command_rx) = unbounded();
        let total_slots = settings.memory.queue_pool_size
            + settings.memory.file_pool_size
            + settings.memory.audio_object_pool_size
            + settings.memory.virtualizer_pool_size;
        let (reclaim_tx, reclaim_rx) = bounded(total_slots.max(16) * 2);

        let dsp_samples = Arc::new(AtomicU64::new(0));
        let loudness = Arc::new(LoudnessShared::new(settings.audio.sample_rate));

        let render = RenderCore::new(
            &settings,
            command_rx,
            reclaim_tx,
            decode_tx.clone(),
            events.sink(),
            dsp_samples.clone(),
            loudness.clone(),
            field,
        );

        let control = ControlState {
            queues: SlotPool::new(settings.memory.queue_pool_size),
            files: SlotPool::new(settings.memory.file_pool_size),
            objects: SlotPool::new(settings.memory.audio_object_pool_size),
            virtualizers: SlotPool::new(settings.memory.virtualizer_pool_size),
            listener_position: Vec3::ZERO,
            listener_rotation: Quat::IDENTITY,
            tracking_enabled: false,
        };

        log::info!(
            "engine created: {} Hz, {} frame blocks, device {:?}",
            settings.audio.sample_rate,
            settings.audio.buffer_size,
            settings.audio.device_type
        );

        Ok(Self {
            settings,
            control: Mutex::new(control),
            command_tx,
            reclaim_rx,
            render: Arc::new(Mutex::new(render)),
            running: Arc::new(AtomicBool::new(false)),
            dsp_samples,
            events,
            decode,
            decode_tx,
            loudness,
            device: None,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.settings.audio.sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.settings.audio.buffer_size
    }

    /// Elapsed engine time in samples. Frozen while suspended.
    pub fn dsp_time_samples(&self) -> u64 {
        self.dsp_samples.load(Ordering::Relaxed)
    }

    fn send(&self, command: Command) {
        let _ = self.command_tx.send(command);
    }

    fn drain_reclaimed(&self) {
        while let Ok(reclaimed) = self.reclaim_rx.try_recv() {
            drop(reclaimed);
        }
    }

    fn control(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Device lifecycle
    // ------------------------------------------------------------------

    /// Start the audio device and all processing. With the device disabled
    /// this only unfreezes the clock for the pull API.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::Relaxed) {
            return Ok(());
        }
        if self.settings.audio.device_type != AudioDeviceType::Disabled
            && self.device.is_none()
        {
            self.device = Some(self.spawn_device_thread()?);
        }
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Suspend all processing; the device keeps running but renders
    /// silence and the DSP clock freezes.
    pub fn suspend(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Build and run the stream on a dedicated thread; `cpal` streams are
    /// not `Send`, so they never leave it.
    fn spawn_device_thread(&self) -> Result<DeviceHandle> {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let settings = self.settings.audio.clone();
        let render = self.render.clone();
        let running = self.running.clone();
        let sink = self.events.sink();

        let thread = std::thread::Builder::new()
            .name("orbisonic-device".into())
            .spawn(move || {
                match build_stream(&settings, render, running, sink) {
                    Ok(stream) => match stream.play() {
                        Ok(()) => {
                            let _ = ready_tx.send(Ok(()));
                            let _ = shutdown_rx.recv();
                            drop(stream);
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(EngineError::Device(format!(
                                "failed to start stream: {e}"
                            ))));
                        }
                    },
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| EngineError::Device(format!("failed to spawn device thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(DeviceHandle {
                shutdown_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EngineError::Device("device thread died".into()))
            }
        }
    }

    /// Pull the next mixed buffer. Only valid when the engine was built
    /// with the audio device disabled; `buffer` is interleaved stereo.
    pub fn get_audio_mix(&self, buffer: &mut [f32], num_channels: usize) -> Result<()> {
        if self.device.is_some() {
            return Err(EngineError::NotSupported);
        }
        if num_channels != 2 {
            return Err(EngineError::InvalidChannelCount {
                expected: 2,
                actual: num_channels,
            });
        }
        if buffer.len() % num_channels != 0 {
            return Err(EngineError::InvalidBufferSize(format!(
                "{} samples is not a whole number of {num_channels}-channel frames",
                buffer.len()
            )));
        }
        if !self.running.load(Ordering::Relaxed) {
            buffer.fill(0.0);
            return Ok(());
        }
        let mut core = self
            .render
            .lock()
            .map_err(|_| EngineError::Failed("render core poisoned".into()))?;
        core.render(buffer);
        Ok(())
    }

    /// Observe the final interleaved mix right before it reaches the
    /// device. The callback must not block or allocate.
    pub fn set_mix_observer(&self, observer: Option<MixObserver>) {
        self.send(Command::SetMixObserver { observer });
    }

    /// Play a test sine tone, overriding all mixed audio.
    pub fn enable_test_tone(&self, enabled: bool, frequency: f32, gain: f32) {
        self.send(Command::TestTone {
            enabled,
            frequency,
            gain,
        });
    }

    // ------------------------------------------------------------------
    // Listener
    // ------------------------------------------------------------------

    pub fn set_listener_position(&self, position: Vec3) {
        self.control().listener_position = position;
        self.send(Command::SetListenerPosition { position });
    }

    pub fn listener_position(&self) -> Vec3 {
        self.control().listener_position
    }

    pub fn set_listener_rotation(&self, rotation: Quat) {
        let rotation = rotation.normalize();
        self.control().listener_rotation = rotation;
        self.send(Command::SetListenerRotation { rotation });
    }

    /// Set the listener orientation from forward and up vectors.
    pub fn set_listener_rotation_vectors(&self, forward: Vec3, up: Vec3) {
        self.set_listener_rotation(rotation_from_vectors(forward, up));
    }

    /// Set the listener orientation from yaw/pitch/roll in degrees.
    pub fn set_listener_rotation_euler(&self, yaw: f32, pitch: f32, roll: f32) {
        self.set_listener_rotation(Quat::from_euler(
            glam::EulerRot::YXZ,
            yaw.to_radians(),
            pitch.to_radians(),
            roll.to_radians(),
        ));
    }

    pub fn listener_rotation(&self) -> Quat {
        self.control().listener_rotation
    }

    pub fn listener_forward(&self) -> Vec3 {
        self.listener_rotation() * (-Vec3::Z)
    }

    pub fn listener_up(&self) -> Vec3 {
        self.listener_rotation() * Vec3::Y
    }

    /// Enable positional tracking around an initial listener position. The
    /// tracked delta is limited to one unit per axis.
    pub fn enable_positional_tracking(
        &self,
        enabled: bool,
        initial_position: Vec3,
    ) -> Result<()> {
        self.control().tracking_enabled = enabled;
        self.send(Command::SetTracking {
            enabled,
            origin: initial_position,
        });
        Ok(())
    }

    pub fn positional_tracking_enabled(&self) -> bool {
        self.control().tracking_enabled
    }

    // ------------------------------------------------------------------
    // Queue objects
    // ------------------------------------------------------------------

    /// Create a queue object for the given layout from the pool.
    pub fn create_queue(&self, layout: ChannelLayout) -> Result<QueueId> {
        self.drain_reclaimed();
        let mut control = self.control();
        let shared = Arc::new(PlaybackShared::new());
        let (producer, consumer) = stream_queue(
            layout.channel_count(),
            self.settings.memory.queue_capacity_per_channel,
        );
        let (slot, generation) = control.queues.acquire(QueueControl {
            producer: Some(producer),
            shared: shared.clone(),
            layout,
            i16_scratch: Vec::new(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        })?;
        let id = QueueId { slot, generation };
        let object = Box::new(SoundfieldObject::new(
            layout,
            Some(consumer),
            self.settings.audio.sample_rate,
            shared,
            EventSource::Queue(id),
        ));
        self.send(Command::InstallQueue { id, object });
        log::debug!("created {id} with layout {layout:?}");
        Ok(id)
    }

    /// Destroy a queue object, returning its slot to the pool. The handle
    /// and any detached producer go stale.
    pub fn destroy_queue(&self, id: QueueId) -> Result<()> {
        self.drain_reclaimed();
        self.control().queues.release(id.slot, id.generation)?;
        self.events
            .set_source_callback(EventSource::Queue(id), None);
        self.send(Command::RemoveQueue { id });
        Ok(())
    }

    /// Enqueue interleaved samples; returns how many were accepted.
    pub fn enqueue(&self, id: QueueId, samples: &[f32]) -> Result<usize> {
        let mut control = self.control();
        let queue = control.queues.get_mut(id.slot, id.generation)?;
        match queue.producer.as_mut() {
            Some(producer) => producer.enqueue(samples),
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    /// Enqueue interleaved 16-bit samples; returns how many were accepted.
    pub fn enqueue_i16(&self, id: QueueId, samples: &[i16]) -> Result<usize> {
        let mut control = self.control();
        let queue = control.queues.get_mut(id.slot, id.generation)?;
        let QueueControl {
            producer,
            i16_scratch,
            ..
        } = queue;
        match producer.as_mut() {
            Some(producer) => producer.enqueue_i16(samples, i16_scratch),
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    /// Enqueue `count` samples of silence.
    pub fn enqueue_silence(&self, id: QueueId, count: usize) -> Result<usize> {
        let mut control = self.control();
        let queue = control.queues.get_mut(id.slot, id.generation)?;
        match queue.producer.as_mut() {
            Some(producer) => producer.enqueue_silence(count),
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    /// Take exclusive ownership of the queue's producer half for lock-free
    /// streaming from a dedicated thread. Can be taken once.
    pub fn take_queue_producer(&self, id: QueueId) -> Result<QueueProducer> {
        let mut control = self.control();
        let queue = control.queues.get_mut(id.slot, id.generation)?;
        queue.producer.take().ok_or_else(|| {
            EngineError::Failed("queue producer already taken".into())
        })
    }

    /// Mark the end of the enqueued stream so the tail drains correctly.
    pub fn set_end_of_stream(&self, id: QueueId, end_of_stream: bool) -> Result<()> {
        let mut control = self.control();
        let queue = control.queues.get_mut(id.slot, id.generation)?;
        match queue.producer.as_ref() {
            Some(producer) => {
                producer.set_end_of_stream(end_of_stream);
                Ok(())
            }
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    pub fn end_of_stream(&self, id: QueueId) -> Result<bool> {
        let mut control = self.control();
        let queue = control.queues.get_mut(id.slot, id.generation)?;
        match queue.producer.as_ref() {
            Some(producer) => Ok(producer.end_of_stream()),
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    /// Drop all buffered samples and clear end-of-stream state.
    pub fn flush_queue(&self, id: QueueId) -> Result<()> {
        let mut control = self.control();
        let queue = control.queues.get_mut(id.slot, id.generation)?;
        if let Some(producer) = queue.producer.as_mut() {
            producer.flush();
            return Ok(());
        }
        // The producer was taken by the client; flush from the consumer
        // side on the render thread instead.
        drop(control);
        self.send(Command::FlushQueue { id });
        Ok(())
    }

    /// Free space in the queue, in samples across all channels.
    pub fn queue_free_space(&self, id: QueueId) -> Result<usize> {
        let control = self.control();
        let queue = control.queues.get(id.slot, id.generation)?;
        match queue.producer.as_ref() {
            Some(producer) => Ok(producer.free_space()),
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    /// Buffered samples in the queue, across all channels.
    pub fn queue_size(&self, id: QueueId) -> Result<usize> {
        let control = self.control();
        let queue = control.queues.get(id.slot, id.generation)?;
        match queue.producer.as_ref() {
            Some(producer) => Ok(producer.size()),
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    /// Cumulative samples dequeued and processed, per channel.
    pub fn queue_dequeued_per_channel(&self, id: QueueId) -> Result<u64> {
        let control = self.control();
        let queue = control.queues.get(id.slot, id.generation)?;
        match queue.producer.as_ref() {
            Some(producer) => Ok(producer.dequeued_per_channel()),
            None => Err(EngineError::Failed(
                "queue producer has been detached".into(),
            )),
        }
    }

    pub fn queue_layout(&self, id: QueueId) -> Result<ChannelLayout> {
        Ok(self.control().queues.get(id.slot, id.generation)?.layout)
    }

    // ------------------------------------------------------------------
    // File objects
    // ------------------------------------------------------------------

    /// Create a file object from the pool. Nothing is open yet.
    pub fn create_file(&self, options: ObjectOptions) -> Result<FileId> {
        self.drain_reclaimed();
        let mut control = self.control();
        let shared = Arc::new(PlaybackShared::new());
        let looping = Arc::new(AtomicBool::new(false));
        let (slot, generation) = control.files.acquire(FileControl {
            shared: shared.clone(),
            looping: looping.clone(),
            open: false,
            total_frames: 0,
            decode_in_callback: options.decode_in_callback,
            sync_mode: SyncMode::Internal,
            freewheel_ms: DEFAULT_FREEWHEEL_MS,
            resync_threshold_ms: DEFAULT_RESYNC_THRESHOLD_MS,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        })?;
        let id = FileId { slot, generation };
        let mut object = Box::new(FileObject::new(
            self.settings.audio.sample_rate,
            shared,
            EventSource::File(id),
        ));
        object.looping = looping;
        self.send(Command::InstallFile { id, object });
        Ok(id)
    }

    pub fn destroy_file(&self, id: FileId) -> Result<()> {
        self.drain_reclaimed();
        let removed = self.control().files.release(id.slot, id.generation)?;
        if removed.open {
            self.detach_decoder(EventSource::File(id), removed.decode_in_callback);
        }
        self.events.set_source_callback(EventSource::File(id), None);
        self.send(Command::RemoveFile { id });
        Ok(())
    }

    /// Open an asset from a path. The file is probed synchronously and
    /// buffered asynchronously; [`EventKind::DecoderReady`] fires when
    /// playback can start.
    pub fn open_file(&self, id: FileId, path: impl AsRef<Path>, layout: ChannelLayout) -> Result<()> {
        let decoder = SymphoniaDecoder::from_path(path, self.settings.audio.sample_rate)?;
        self.attach_file_decoder(id, Box::new(decoder), layout)
    }

    /// Open an asset from any byte stream.
    pub fn open_file_stream(
        &self,
        id: FileId,
        stream: Box<dyn ByteStream>,
        extension_hint: Option<&str>,
        layout: ChannelLayout,
    ) -> Result<()> {
        let decoder =
            SymphoniaDecoder::from_stream(stream, extension_hint, self.settings.audio.sample_rate)?;
        self.attach_file_decoder(id, Box::new(decoder), layout)
    }

    /// Open a sub-range of a larger file, described by an asset
    /// descriptor.
    pub fn open_file_descriptor(
        &self,
        id: FileId,
        path: impl AsRef<Path>,
        descriptor: AssetDescriptor,
        layout: ChannelLayout,
    ) -> Result<()> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_owned);
        let file = FileByteStream::open(path)
            .map_err(|e| EngineError::OpenFile(format!("{}: {e}", path.display())))?;
        let stream = SubrangeStream::new(Box::new(file), descriptor)
            .map_err(|e| EngineError::OpenFile(format!("{}: {e}", path.display())))?;
        self.open_file_stream(id, Box::new(stream), extension.as_deref(), layout)
    }

    fn attach_file_decoder(
        &self,
        id: FileId,
        decoder: Box<dyn FormatDecoder>,
        layout: ChannelLayout,
    ) -> Result<()> {
        if decoder.channels() != layout.channel_count() {
            return Err(EngineError::InvalidChannelCount {
                expected: layout.channel_count(),
                actual: decoder.channels(),
            });
        }
        let mut control = self.control();
        let file = control.files.get_mut(id.slot, id.generation)?;
        let was_open = file.open;
        let decode_in_callback = file.decode_in_callback;
        let total_frames = decoder.total_frames();
        let (producer, consumer) = stream_queue(
            layout.channel_count(),
            self.settings.memory.queue_capacity_per_channel,
        );
        let feed = Box::new(DecodeFeed::new(
            decoder,
            producer,
            file.looping.clone(),
            EventSource::File(id),
        ));
        file.open = true;
        file.total_frames = total_frames;
        file.shared.set_elapsed_frames(0);
        drop(control);

        if was_open {
            self.detach_decoder(EventSource::File(id), decode_in_callback);
        }
        let inline_feed = self.dispatch_feed(EventSource::File(id), feed, decode_in_callback);
        self.send(Command::AttachFileStream {
            id,
            layout,
            consumer,
            inline_feed,
            total_frames,
        });
        Ok(())
    }

    /// Hand a feed to the decoder thread, or back to the render side when
    /// decoding happens in the audio callback.
    fn dispatch_feed(
        &self,
        key: EventSource,
        feed: Box<DecodeFeed>,
        decode_in_callback: bool,
    ) -> Option<Box<DecodeFeed>> {
        if decode_in_callback {
            return Some(feed);
        }
        match &self.decode_tx {
            Some(tx) => {
                let _ = tx.send(DecodeJob::Attach { key, feed });
                None
            }
            None => Some(feed),
        }
    }

    fn detach_decoder(&self, key: EventSource, decode_in_callback: bool) {
        if !decode_in_callback {
            if let Some(tx) = &self.decode_tx {
                let _ = tx.send(DecodeJob::Detach { key });
            }
        }
    }

    /// Close the open asset and release its stream.
    pub fn close_file(&self, id: FileId) -> Result<()> {
        let mut control = self.control();
        let file = control.files.get_mut(id.slot, id.generation)?;
        if !file.open {
            return Ok(());
        }
        file.open = false;
        file.total_frames = 0;
        let decode_in_callback = file.decode_in_callback;
        drop(control);
        self.detach_decoder(EventSource::File(id), decode_in_callback);
        self.send(Command::DetachFileStream { id });
        Ok(())
    }

    pub fn is_file_open(&self, id: FileId) -> Result<bool> {
        Ok(self.control().files.get(id.slot, id.generation)?.open)
    }

    /// Seek to a position in engine-rate frames.
    pub fn file_seek_to_frame(&self, id: FileId, frame: u64) -> Result<()> {
        let control = self.control();
        let file = control.files.get(id.slot, id.generation)?;
        if !file.open {
            return Err(EngineError::NoAsset);
        }
        drop(control);
        self.send(Command::Seek {
            target: EventSource::File(id),
            frame,
        });
        Ok(())
    }

    pub fn file_seek_to_ms(&self, id: FileId, time_ms: f64) -> Result<()> {
        let frame = (time_ms.max(0.0) * self.settings.audio.sample_rate as f64 / 1000.0) as u64;
        self.file_seek_to_frame(id, frame)
    }

    pub fn file_elapsed_frames(&self, id: FileId) -> Result<u64> {
        Ok(self
            .control()
            .files
            .get(id.slot, id.generation)?
            .shared
            .elapsed_frames())
    }

    pub fn file_elapsed_ms(&self, id: FileId) -> Result<f64> {
        Ok(self.file_elapsed_frames(id)? as f64 * 1000.0 / self.settings.audio.sample_rate as f64)
    }

    pub fn file_duration_frames(&self, id: FileId) -> Result<u64> {
        Ok(self.control().files.get(id.slot, id.generation)?.total_frames)
    }

    pub fn file_duration_ms(&self, id: FileId) -> Result<f64> {
        Ok(self.file_duration_frames(id)? as f64 * 1000.0 / self.settings.audio.sample_rate as f64)
    }

    pub fn set_sync_mode(&self, id: FileId, mode: SyncMode) -> Result<()> {
        self.control().files.get_mut(id.slot, id.generation)?.sync_mode = mode;
        self.send(Command::SetSyncMode { id, mode });
        Ok(())
    }

    pub fn sync_mode(&self, id: FileId) -> Result<SyncMode> {
        Ok(self.control().files.get(id.slot, id.generation)?.sync_mode)
    }

    /// Supply the external clock value for [`SyncMode::External`].
    pub fn set_external_clock_ms(&self, id: FileId, clock_ms: f64) -> Result<()> {
        self.control().files.get(id.slot, id.generation)?;
        self.send(Command::SetExternalClock { id, clock_ms });
        Ok(())
    }

    pub fn set_freewheel_time_ms(&self, id: FileId, freewheel_ms: f64) -> Result<()> {
        self.control()
            .files
            .get_mut(id.slot, id.generation)?
            .freewheel_ms = freewheel_ms;
        self.send(Command::SetFreewheel {
            id,
            ms: freewheel_ms,
        });
        Ok(())
    }

    pub fn freewheel_time_ms(&self, id: FileId) -> Result<f64> {
        Ok(self.control().files.get(id.slot, id.generation)?.freewheel_ms)
    }

    pub fn set_resync_threshold_ms(&self, id: FileId, threshold_ms: f64) -> Result<()> {
        self.control()
            .files
            .get_mut(id.slot, id.generation)?
            .resync_threshold_ms = threshold_ms;
        self.send(Command::SetResyncThreshold {
            id,
            ms: threshold_ms,
        });
        Ok(())
    }

    pub fn resync_threshold_ms(&self, id: FileId) -> Result<f64> {
        Ok(self
            .control()
            .files
            .get(id.slot, id.generation)?
            .resync_threshold_ms)
    }

    /// Enable sample-accurate looping of the open asset.
    pub fn enable_file_looping(&self, id: FileId, looping: bool) -> Result<()> {
        self.control()
            .files
            .get(id.slot, id.generation)?
            .looping
            .store(looping, Ordering::Relaxed);
        Ok(())
    }

    pub fn file_looping_enabled(&self, id: FileId) -> Result<bool> {
        Ok(self
            .control()
            .files
            .get(id.slot, id.generation)?
            .looping
            .load(Ordering::Relaxed))
    }

    // ------------------------------------------------------------------
    // Audio objects
    // ------------------------------------------------------------------

    /// Create a positional audio object from the pool.
    pub fn create_audio_object(&self, options: ObjectOptions) -> Result<ObjectId> {
        self.drain_reclaimed();
        let mut control = self.control();
        let shared = Arc::new(PlaybackShared::new());
        let looping = Arc::new(AtomicBool::new(false));
        let (slot, generation) = control.objects.acquire(ObjectControl {
            shared: shared.clone(),
            looping: looping.clone(),
            open: false,
            total_frames: 0,
            decode_in_callback: options.decode_in_callback,
            spatialize: true,
            attenuation_mode: AttenuationMode::Logarithmic,
            attenuation: AttenuationProps::default(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        })?;
        let id = ObjectId { slot, generation };
        let mut object = Box::new(PointObject::new(
            self.settings.audio.sample_rate,
            shared,
            EventSource::Object(id),
        ));
        object.looping = looping;
        self.send(Command::InstallObject { id, object });
        Ok(id)
    }

    pub fn destroy_audio_object(&self, id: ObjectId) -> Result<()> {
        self.drain_reclaimed();
        let removed = self.control().objects.release(id.slot, id.generation)?;
        if removed.open {
            self.detach_decoder(EventSource::Object(id), removed.decode_in_callback);
        }
        self.events
            .set_source_callback(EventSource::Object(id), None);
        self.send(Command::RemoveObject { id });
        Ok(())
    }

    /// Open a mono or stereo asset for this object.
    pub fn open_audio_object(&self, id: ObjectId, path: impl AsRef<Path>) -> Result<()> {
        let decoder = SymphoniaDecoder::from_path(path, self.settings.audio.sample_rate)?;
        self.attach_object_decoder(id, Box::new(decoder))
    }

    /// Open a sub-range of a larger file for this object.
    pub fn open_audio_object_descriptor(
        &self,
        id: ObjectId,
        path: impl AsRef<Path>,
        descriptor: AssetDescriptor,
    ) -> Result<()> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_owned);
        let file = FileByteStream::open(path)
            .map_err(|e| EngineError::OpenFile(format!("{}: {e}", path.display())))?;
        let stream = SubrangeStream::new(Box::new(file), descriptor)
            .map_err(|e| EngineError::OpenFile(format!("{}: {e}", path.display())))?;
        let decoder = SymphoniaDecoder::from_stream(
            Box::new(stream),
            extension.as_deref(),
            self.settings.audio.sample_rate,
        )?;
        self.attach_object_decoder(id, Box::new(decoder))
    }

    fn attach_object_decoder(&self, id: ObjectId, decoder: Box<dyn FormatDecoder>) -> Result<()> {
        let channels = decoder.channels();
        if channels == 0 || channels > 2 {
            return Err(EngineError::InvalidChannelCount {
                expected: 2,
                actual: channels,
            });
        }
        let mut control = self.control();
        let object = control.objects.get_mut(id.slot, id.generation)?;
        let was_open = object.open;
        let decode_in_callback = object.decode_in_callback;
        let total_frames = decoder.total_frames();
        let (producer, consumer) = stream_queue(
            channels,
            self.settings.memory.queue_capacity_per_channel,
        );
        let feed = Box::new(DecodeFeed::new(
            decoder,
            producer,
            object.looping.clone(),
            EventSource::Object(id),
        ));
        object.open = true;
        object.total_frames = total_frames;
        object.shared.set_elapsed_frames(0);
        drop(control);

        if was_open {
            self.detach_decoder(EventSource::Object(id), decode_in_callback);
        }
        let inline_feed = self.dispatch_feed(EventSource::Object(id), feed, decode_in_callback);
        self.send(Command::AttachObjectStream {
            id,
            channels,
            consumer,
            inline_feed,
            total_frames,
        });
        Ok(())
    }

    /// Provide samples from a client callback instead of a file. The
    /// callback runs inside the render tick and must not block or
    /// allocate. Closes any open asset.
    pub fn set_audio_object_callback(
        &self,
        id: ObjectId,
        callback: AudioBufferCallback,
        num_channels: usize,
    ) -> Result<()> {
        if num_channels == 0 || num_channels > 2 {
            return Err(EngineError::InvalidChannelCount {
                expected: 2,
                actual: num_channels,
            });
        }
        let mut control = self.control();
        let object = control.objects.get_mut(id.slot, id.generation)?;
        let was_open = object.open;
        let decode_in_callback = object.decode_in_callback;
        object.open = false;
        object.total_frames = 0;
        drop(control);
        if was_open {
            self.detach_decoder(EventSource::Object(id), decode_in_callback);
        }
        self.send(Command::SetObjectCallback {
            id,
            channels: num_channels,
            callback,
        });
        Ok(())
    }

    /// Close the object's asset or callback input.
    pub fn close_audio_object(&self, id: ObjectId) -> Result<()> {
        let mut control = self.control();
        let object = control.objects.get_mut(id.slot, id.generation)?;
        let was_open = object.open;
        let decode_in_callback = object.decode_in_callback;
        object.open = false;
        object.total_frames = 0;
        drop(control);
        if was_open {
            self.detach_decoder(EventSource::Object(id), decode_in_callback);
        }
        self.send(Command::DetachObjectInput { id });
        Ok(())
    }

    pub fn is_audio_object_open(&self, id: ObjectId) -> Result<bool> {
        Ok(self.control().objects.get(id.slot, id.generation)?.open)
    }

    pub fn audio_object_seek_to_frame(&self, id: ObjectId, frame: u64) -> Result<()> {
        let control = self.control();
        let object = control.objects.get(id.slot, id.generation)?;
        if !object.open {
            return Err(EngineError::NoAsset);
        }
        drop(control);
        self.send(Command::Seek {
            target: EventSource::Object(id),
            frame,
        });
        Ok(())
    }

    pub fn audio_object_elapsed_frames(&self, id: ObjectId) -> Result<u64> {
        Ok(self
            .control()
            .objects
            .get(id.slot, id.generation)?
            .shared
            .elapsed_frames())
    }

    pub fn audio_object_duration_frames(&self, id: ObjectId) -> Result<u64> {
        Ok(self.control().objects.get(id.slot, id.generation)?.total_frames)
    }

    /// Toggle spatialization; a non-spatialized object renders head-locked.
    pub fn set_spatialization(&self, id: ObjectId, spatialize: bool) -> Result<()> {
        self.control()
            .objects
            .get_mut(id.slot, id.generation)?
            .spatialize = spatialize;
        self.send(Command::SetSpatialize {
            target: EventSource::Object(id),
            spatialize,
        });
        Ok(())
    }

    pub fn is_spatialized(&self, id: ObjectId) -> Result<bool> {
        Ok(self.control().objects.get(id.slot, id.generation)?.spatialize)
    }

    pub fn set_attenuation_mode(&self, id: ObjectId, mode: AttenuationMode) -> Result<()> {
        self.control()
            .objects
            .get_mut(id.slot, id.generation)?
            .attenuation_mode = mode;
        self.send(Command::SetAttenuationMode {
            target: EventSource::Object(id),
            mode,
        });
        Ok(())
    }

    pub fn attenuation_mode(&self, id: ObjectId) -> Result<AttenuationMode> {
        Ok(self
            .control()
            .objects
            .get(id.slot, id.generation)?
            .attenuation_mode)
    }

    pub fn set_attenuation_properties(&self, id: ObjectId, props: AttenuationProps) -> Result<()> {
        self.control()
            .objects
            .get_mut(id.slot, id.generation)?
            .attenuation = props;
        self.send(Command::SetAttenuationProps {
            target: EventSource::Object(id),
            props,
        });
        Ok(())
    }

    pub fn attenuation_properties(&self, id: ObjectId) -> Result<AttenuationProps> {
        Ok(self
            .control()
            .objects
            .get(id.slot, id.generation)?
            .attenuation)
    }

    pub fn enable_audio_object_looping(&self, id: ObjectId, looping: bool) -> Result<()> {
        self.control()
            .objects
            .get(id.slot, id.generation)?
            .looping
            .store(looping, Ordering::Relaxed);
        Ok(())
    }

    pub fn audio_object_looping_enabled(&self, id: ObjectId) -> Result<bool> {
        Ok(self
            .control()
            .objects
            .get(id.slot, id.generation)?
            .looping
            .load(Ordering::Relaxed))
    }

    // ------------------------------------------------------------------
    // Speakers virtualizer
    // ------------------------------------------------------------------

    /// Create a virtualizer for an interleaved speaker layout. Each
    /// speaker becomes an independently spatialized feed.
    pub fn create_virtualizer(
        &self,
        speakers: &[SpeakerPosition],
        capacity_per_channel: usize,
    ) -> Result<VirtualizerId> {
        if speakers.is_empty() || speakers.len() > MAX_VIRTUALIZER_SPEAKERS {
            return Err(EngineError::InvalidChannelCount {
                expected: MAX_VIRTUALIZER_SPEAKERS,
                actual: speakers.len(),
            });
        }
        if capacity_per_channel == 0 {
            return Err(EngineError::InvalidBufferSize(
                "virtualizer capacity must be non-zero".into(),
            ));
        }
        self.drain_reclaimed();
        let mut control = self.control();
        let shared = Arc::new(PlaybackShared::new());
        let (producer, consumer) = stream_queue(speakers.len(), capacity_per_channel);
        let (slot, generation) = control.virtualizers.acquire(VirtualizerControl {
            producer: Some(producer),
            shared: shared.clone(),
            affinity: None,
            i16_scratch: Vec::new(),
        })?;
        let id = VirtualizerId { slot, generation };
        let directions = speakers.iter().map(|s| s.direction()).collect();
        let object = Box::new(VirtualizerObject::new(
            consumer,
            directions,
            self.settings.audio.sample_rate,
            shared,
            EventSource::Virtualizer(id),
        ));
        self.send(Command::InstallVirtualizer { id, object });
        Ok(id)
    }

    pub fn destroy_virtualizer(&self, id: VirtualizerId) -> Result<()> {
        self.drain_reclaimed();
        self.control().virtualizers.release(id.slot, id.generation)?;
        self.events
            .set_source_callback(EventSource::Virtualizer(id), None);
        self.send(Command::RemoveVirtualizer { id });
        Ok(())
    }

    /// Enqueue interleaved speaker samples. Must be called consistently
    /// from the same thread; returns the number of samples accepted.
    pub fn enqueue_virtualizer(&self, id: VirtualizerId, samples: &[f32]) -> Result<usize> {
        let mut control = self.control();
        let virtualizer = control.virtualizers.get_mut(id.slot, id.generation)?;
        Self::check_affinity(virtualizer)?;
        match virtualizer.producer.as_mut() {
            Some(producer) => producer.enqueue(samples),
            None => Err(EngineError::Failed("virtualizer producer detached".into())),
        }
    }

    pub fn enqueue_virtualizer_i16(&self, id: VirtualizerId, samples: &[i16]) -> Result<usize> {
        let mut control = self.control();
        let virtualizer = control.virtualizers.get_mut(id.slot, id.generation)?;
        Self::check_affinity(virtualizer)?;
        let VirtualizerControl {
            producer,
            i16_scratch,
            ..
        } = virtualizer;
        match producer.as_mut() {
            Some(producer) => producer.enqueue_i16(samples, i16_scratch),
            None => Err(EngineError::Failed("virtualizer producer detached".into())),
        }
    }

    fn check_affinity(virtualizer: &mut VirtualizerControl) -> Result<()> {
        let current = std::thread::current().id();
        match virtualizer.affinity {
            None => {
                virtualizer.affinity = Some(current);
                Ok(())
            }
            Some(bound) if bound == current => Ok(()),
            Some(_) => Err(EngineError::BadThread),
        }
    }

    pub fn set_virtualizer_end_of_stream(&self, id: VirtualizerId, end: bool) -> Result<()> {
        let control = self.control();
        let virtualizer = control.virtualizers.get(id.slot, id.generation)?;
        match virtualizer.producer.as_ref() {
            Some(producer) => {
                producer.set_end_of_stream(end);
                Ok(())
            }
            None => Err(EngineError::Failed("virtualizer producer detached".into())),
        }
    }

    pub fn virtualizer_free_space(&self, id: VirtualizerId) -> Result<usize> {
        let control = self.control();
        let virtualizer = control.virtualizers.get(id.slot, id.generation)?;
        match virtualizer.producer.as_ref() {
            Some(producer) => Ok(producer.free_space()),
            None => Err(EngineError::Failed("virtualizer producer detached".into())),
        }
    }

    pub fn virtualizer_queue_size(&self, id: VirtualizerId) -> Result<usize> {
        let control = self.control();
        let virtualizer = control.virtualizers.get(id.slot, id.generation)?;
        match virtualizer.producer.as_ref() {
            Some(producer) => Ok(producer.size()),
            None => Err(EngineError::Failed("virtualizer producer detached".into())),
        }
    }

    pub fn virtualizer_dequeued_per_channel(&self, id: VirtualizerId) -> Result<u64> {
        let control = self.control();
        let virtualizer = control.virtualizers.get(id.slot, id.generation)?;
        match virtualizer.producer.as_ref() {
            Some(producer) => Ok(producer.dequeued_per_channel()),
            None => Err(EngineError::Failed("virtualizer producer detached".into())),
        }
    }

    pub fn flush_virtualizer(&self, id: VirtualizerId) -> Result<()> {
        let mut control = self.control();
        let virtualizer = control.virtualizers.get_mut(id.slot, id.generation)?;
        if let Some(producer) = virtualizer.producer.as_mut() {
            producer.flush();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transport and volume, shared across object kinds
    // ------------------------------------------------------------------

    fn validate_target(&self, target: EventSource) -> Result<()> {
        let control = self.control();
        match target {
            EventSource::Queue(id) => control.queues.get(id.slot, id.generation).map(|_| ()),
            EventSource::File(id) => control.files.get(id.slot, id.generation).map(|_| ()),
            EventSource::Object(id) => control.objects.get(id.slot, id.generation).map(|_| ()),
            EventSource::Virtualizer(id) => {
                control.virtualizers.get(id.slot, id.generation).map(|_| ())
            }
            EventSource::Engine => Err(EngineError::NotSupported),
        }
    }

    fn transport(&self, target: EventSource, op: TransportOp, mode: TransportMode) -> Result<()> {
        self.validate_target(target)?;
        self.send(Command::Transport { target, op, mode });
        Ok(())
    }

    /// Begin playback.
    pub fn play(&self, target: impl Into<EventSource>) -> Result<()> {
        self.transport(target.into(), TransportOp::Play, TransportMode::Instant)
    }

    /// Schedule playback after a delay. A later transport call supersedes
    /// the schedule if it has not fired yet.
    pub fn play_scheduled(&self, target: impl Into<EventSource>, delay_ms: f32) -> Result<()> {
        self.transport(
            target.into(),
            TransportOp::Play,
            TransportMode::Scheduled { delay_ms },
        )
    }

    /// Begin playback with a fade-in.
    pub fn play_with_fade(&self, target: impl Into<EventSource>, duration_ms: f32) -> Result<()> {
        self.transport(
            target.into(),
            TransportOp::Play,
            TransportMode::Fade { duration_ms },
        )
    }

    pub fn pause(&self, target: impl Into<EventSource>) -> Result<()> {
        self.transport(target.into(), TransportOp::Pause, TransportMode::Instant)
    }

    pub fn pause_scheduled(&self, target: impl Into<EventSource>, delay_ms: f32) -> Result<()> {
        self.transport(
            target.into(),
            TransportOp::Pause,
            TransportMode::Scheduled { delay_ms },
        )
    }

    pub fn pause_with_fade(&self, target: impl Into<EventSource>, duration_ms: f32) -> Result<()> {
        self.transport(
            target.into(),
            TransportOp::Pause,
            TransportMode::Fade { duration_ms },
        )
    }

    /// Stop playback and reset the playhead.
    pub fn stop(&self, target: impl Into<EventSource>) -> Result<()> {
        self.transport(target.into(), TransportOp::Stop, TransportMode::Instant)
    }

    pub fn stop_scheduled(&self, target: impl Into<EventSource>, delay_ms: f32) -> Result<()> {
        self.transport(
            target.into(),
            TransportOp::Stop,
            TransportMode::Scheduled { delay_ms },
        )
    }

    pub fn stop_with_fade(&self, target: impl Into<EventSource>, duration_ms: f32) -> Result<()> {
        self.transport(
            target.into(),
            TransportOp::Stop,
            TransportMode::Fade { duration_ms },
        )
    }

    pub fn play_state(&self, target: impl Into<EventSource>) -> Result<PlayState> {
        let target = target.into();
        self.validate_target(target)?;
        let control = self.control();
        let shared = match target {
            EventSource::Queue(id) => &control.queues.get(id.slot, id.generation)?.shared,
            EventSource::File(id) => &control.files.get(id.slot, id.generation)?.shared,
            EventSource::Object(id) => &control.objects.get(id.slot, id.generation)?.shared,
            EventSource::Virtualizer(id) => {
                &control.virtualizers.get(id.slot, id.generation)?.shared
            }
            EventSource::Engine => return Err(EngineError::NotSupported),
        };
        Ok(shared.play_state())
    }

    /// Set the volume in linear gain with an optional ramp.
    /// `force_previous_ramp` snaps an in-flight ramp to its end value
    /// before applying the new one.
    pub fn set_volume(
        &self,
        target: impl Into<EventSource>,
        linear_gain: f32,
        ramp_time_ms: f32,
        force_previous_ramp: bool,
    ) -> Result<()> {
        let target = target.into();
        self.validate_target(target)?;
        self.send(Command::SetVolume {
            target,
            gain: linear_gain,
            ramp_ms: ramp_time_ms,
            force_previous_ramp,
        });
        Ok(())
    }

    /// Set the volume in decibels, 0 dB being unity gain.
    pub fn set_volume_decibels(
        &self,
        target: impl Into<EventSource>,
        db: f32,
        ramp_time_ms: f32,
        force_previous_ramp: bool,
    ) -> Result<()> {
        self.set_volume(target, db_to_linear(db), ramp_time_ms, force_previous_ramp)
    }

    /// Apply an immediate fade from `start` to `end` linear gain.
    pub fn apply_volume_fade(
        &self,
        target: impl Into<EventSource>,
        start_linear_gain: f32,
        end_linear_gain: f32,
        fade_duration_ms: f32,
    ) -> Result<()> {
        let target = target.into();
        self.validate_target(target)?;
        self.send(Command::VolumeFade {
            target,
            start: start_linear_gain,
            end: end_linear_gain,
            duration_ms: fade_duration_ms,
        });
        Ok(())
    }

    pub fn volume(&self, target: impl Into<EventSource>) -> Result<f32> {
        let target = target.into();
        self.validate_target(target)?;
        let control = self.control();
        let shared = match target {
            EventSource::Queue(id) => &control.queues.get(id.slot, id.generation)?.shared,
            EventSource::File(id) => &control.files.get(id.slot, id.generation)?.shared,
            EventSource::Object(id) => &control.objects.get(id.slot, id.generation)?.shared,
            EventSource::Virtualizer(id) => {
                &control.virtualizers.get(id.slot, id.generation)?.shared
            }
            EventSource::Engine => return Err(EngineError::NotSupported),
        };
        Ok(shared.volume())
    }

    pub fn volume_decibels(&self, target: impl Into<EventSource>) -> Result<f32> {
        Ok(linear_to_db(self.volume(target)?))
    }

    // ------------------------------------------------------------------
    // Spatial parameters, for queue, file and audio objects
    // ------------------------------------------------------------------

    fn spatial_target(&self, target: EventSource) -> Result<()> {
        match target {
            EventSource::Queue(_) | EventSource::File(_) | EventSource::Object(_) => {
                self.validate_target(target)
            }
            _ => Err(EngineError::NotSupported),
        }
    }

    pub fn set_position(&self, target: impl Into<EventSource>, position: Vec3) -> Result<()> {
        let target = target.into();
        self.spatial_target(target)?;
        let mut control = self.control();
        match target {
            EventSource::Queue(id) => {
                control.queues.get_mut(id.slot, id.generation)?.position = position
            }
            EventSource::File(id) => {
                control.files.get_mut(id.slot, id.generation)?.position = position
            }
            EventSource::Object(id) => {
                control.objects.get_mut(id.slot, id.generation)?.position = position
            }
            _ => unreachable!(),
        }
        drop(control);
        self.send(Command::SetPosition { target, position });
        Ok(())
    }

    pub fn position(&self, target: impl Into<EventSource>) -> Result<Vec3> {
        let target = target.into();
        self.spatial_target(target)?;
        let control = self.control();
        Ok(match target {
            EventSource::Queue(id) => control.queues.get(id.slot, id.generation)?.position,
            EventSource::File(id) => control.files.get(id.slot, id.generation)?.position,
            EventSource::Object(id) => control.objects.get(id.slot, id.generation)?.position,
            _ => unreachable!(),
        })
    }

    pub fn set_rotation(&self, target: impl Into<EventSource>, rotation: Quat) -> Result<()> {
        let target = target.into();
        self.spatial_target(target)?;
        let rotation = rotation.normalize();
        let mut control = self.control();
        match target {
            EventSource::Queue(id) => {
                control.queues.get_mut(id.slot, id.generation)?.rotation = rotation
            }
            EventSource::File(id) => {
                control.files.get_mut(id.slot, id.generation)?.rotation = rotation
            }
            EventSource::Object(id) => {
                control.objects.get_mut(id.slot, id.generation)?.rotation = rotation
            }
            _ => unreachable!(),
        }
        drop(control);
        self.send(Command::SetRotation { target, rotation });
        Ok(())
    }

    /// Set the rotation from forward and up vectors.
    pub fn set_rotation_vectors(
        &self,
        target: impl Into<EventSource>,
        forward: Vec3,
        up: Vec3,
    ) -> Result<()> {
        self.set_rotation(target, rotation_from_vectors(forward, up))
    }

    pub fn rotation(&self, target: impl Into<EventSource>) -> Result<Quat> {
        let target = target.into();
        self.spatial_target(target)?;
        let control = self.control();
        Ok(match target {
            EventSource::Queue(id) => control.queues.get(id.slot, id.generation)?.rotation,
            EventSource::File(id) => control.files.get(id.slot, id.generation)?.rotation,
            EventSource::Object(id) => control.objects.get(id.slot, id.generation)?.rotation,
            _ => unreachable!(),
        })
    }

    /// Enable the focus effect: the area outside the focus cone is
    /// attenuated.
    pub fn enable_focus(
        &self,
        target: impl Into<EventSource>,
        enabled: bool,
        follow_listener: bool,
    ) -> Result<()> {
        let target = target.into();
        self.spatial_target(target)?;
        self.send(Command::SetFocus {
            target,
            enabled,
            follow_listener,
        });
        Ok(())
    }

    /// Level outside the focus area in dB, clamped to [-24, 0].
    pub fn set_off_focus_level_db(&self, target: impl Into<EventSource>, db: f32) -> Result<()> {
        let target = target.into();
        self.spatial_target(target)?;
        self.send(Command::SetOffFocusLevel { target, db });
        Ok(())
    }

    /// Width of the focus area in degrees, clamped to [40, 120].
    pub fn set_focus_width_degrees(
        &self,
        target: impl Into<EventSource>,
        degrees: f32,
    ) -> Result<()> {
        let target = target.into();
        self.spatial_target(target)?;
        self.send(Command::SetFocusWidth { target, degrees });
        Ok(())
    }

    /// Orientation of the focus axis when not following the listener.
    pub fn set_focus_orientation(
        &self,
        target: impl Into<EventSource>,
        orientation: Quat,
    ) -> Result<()> {
        let target = target.into();
        self.spatial_target(target)?;
        self.send(Command::SetFocusOrientation {
            target,
            orientation,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events, loudness
    // ------------------------------------------------------------------

    /// Register the engine-wide event callback.
    pub fn set_event_callback(&self, callback: Option<EventCallback>) {
        self.events.set_callback(callback);
    }

    /// Register a callback for one object's events.
    pub fn set_object_event_callback(
        &self,
        target: impl Into<EventSource>,
        callback: Option<EventCallback>,
    ) -> Result<()> {
        let target = target.into();
        self.validate_target(target)?;
        self.events.set_source_callback(target, callback);
        Ok(())
    }

    /// Drain pending events on the calling thread. Only supported when the
    /// engine runs without an event thread.
    pub fn process_events(&self) -> Result<usize> {
        self.events.pump()
    }

    /// Enable loudness measurement of the rendered mix. Disabled by
    /// default.
    pub fn enable_loudness(&self, enabled: bool) {
        self.loudness.set_enabled(enabled);
    }

    /// Loudness statistics of the rendered mix since construction or the
    /// last reset.
    pub fn rendered_loudness(&self) -> LoudnessStats {
        self.loudness
            .meter
            .lock()
            .map(|meter| meter.stats())
            .unwrap_or_default()
    }

    pub fn reset_loudness(&self) {
        if let Ok(mut meter) = self.loudness.meter.lock() {
            meter.reset();
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.device.take();
        self.decode.take();
        self.drain_reclaimed();
    }
}

fn build_stream(
    settings: &crate::config::AudioSettings,
    render: Arc<Mutex<RenderCore>>,
    running: Arc<AtomicBool>,
    sink: crate::events::EventSink,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = match settings.device_type {
        AudioDeviceType::Default => host
            .default_output_device()
            .ok_or_else(|| EngineError::Device("no default output device available".into()))?,
        AudioDeviceType::Custom => {
            let wanted = &settings.custom_device_name;
            host.output_devices()
                .map_err(|e| EngineError::Device(format!("cannot list devices: {e}")))?
                .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
                .ok_or_else(|| {
                    EngineError::Device(format!("output device '{wanted}' not found"))
                })?
        }
        AudioDeviceType::Disabled => return Err(EngineError::NotSupported),
    };

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(settings.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(settings.buffer_size as u32),
    };
    let default_config = device
        .default_output_config()
        .map_err(|e| EngineError::Device(format!("failed to get default device config: {e}")))?;

    match default_config.sample_format() {
        cpal::SampleFormat::F32 => build_typed_stream::<f32>(&device, &config, render, running, sink),
        cpal::SampleFormat::I16 => build_typed_stream::<i16>(&device, &config, render, running, sink),
        cpal::SampleFormat::U16 => build_typed_stream::<u16>(&device, &config, render, running, sink),
        other => Err(EngineError::Device(format!(
            "unsupported device sample format {other:?}"
        ))),
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    render: Arc<Mutex<RenderCore>>,
    running: Arc<AtomicBool>,
    sink: crate::events::EventSink,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() != data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                if !running.load(Ordering::Relaxed) {
                    scratch.fill(0.0);
                } else {
                    match render.try_lock() {
                        Ok(mut core) => core.render(&mut scratch),
                        Err(_) => {
                            // Someone else holds the core; degrade to
                            // silence rather than blocking the device.
                            sink.emit(EventKind::BufferUnderrun, EventSource::Engine);
                            scratch.fill(0.0);
                        }
                    }
                }
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| log::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| EngineError::Device(format!("failed to build stream: {e}")))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EngineEvent;
    use crate::io::MemoryByteStream;
    use std::time::Duration;

    const RATE: u32 = 48_000;
    const BLOCK: usize = 256;

    fn pull_settings() -> EngineSettings {
        let mut settings = EngineSettings::default();
        settings.audio.sample_rate = RATE;
        settings.audio.buffer_size = BLOCK;
        settings.audio.device_type = AudioDeviceType::Disabled;
        settings.threads.use_event_thread = false;
        settings.threads.use_decoder_thread = false;
        settings
    }

    fn pull_engine() -> AudioEngine {
        let mut engine = AudioEngine::new(pull_settings()).unwrap();
        engine.start().unwrap();
        engine
    }

    fn render_ms(engine: &AudioEngine, ms: usize) -> Vec<f32> {
        let frames = RATE as usize * ms / 1000;
        let mut buffer = vec![0.0f32; frames * 2];
        engine.get_audio_mix(&mut buffer, 2).unwrap();
        buffer
    }

    fn collect_events(engine: &AudioEngine) -> Arc<Mutex<Vec<EngineEvent>>> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let log = collected.clone();
        engine.set_event_callback(Some(Box::new(move |event| {
            log.lock().unwrap().push(event);
        })));
        collected
    }

    /// Minimal 16-bit PCM wav for in-memory fixtures.
    fn wav_bytes(sample_rate: u32, channels: u16, frames: &[i16]) -> Vec<u8> {
        let data_len = (frames.len() * 2) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        bytes.extend_from_slice(&(channels * 2).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for &sample in frames {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_invalid_construction_settings() {
        let mut settings = pull_settings();
        settings.audio.sample_rate = 0;
        assert!(matches!(
            AudioEngine::new(settings),
            Err(EngineError::InvalidSampleRate(0))
        ));

        let mut settings = pull_settings();
        settings.audio.buffer_size = 0;
        assert!(matches!(
            AudioEngine::new(settings),
            Err(EngineError::InvalidBufferSize(_))
        ));
    }

    #[test]
    fn test_queue_pool_exhaustion_and_reuse() {
        let mut settings = pull_settings();
        settings.memory.queue_pool_size = 2;
        let mut engine = AudioEngine::new(settings).unwrap();
        engine.start().unwrap();

        let a = engine.create_queue(ChannelLayout::Stereo).unwrap();
        let b = engine.create_queue(ChannelLayout::Stereo).unwrap();
        assert!(matches!(
            engine.create_queue(ChannelLayout::Stereo),
            Err(EngineError::PoolExhausted)
        ));

        engine.destroy_queue(b).unwrap();
        let c = engine.create_queue(ChannelLayout::Stereo).unwrap();
        assert_ne!(b, c);

        // The destroyed handle is rejected everywhere.
        assert!(matches!(
            engine.enqueue(b, &[0.0, 0.0]),
            Err(EngineError::StaleHandle)
        ));
        assert!(matches!(engine.play(b), Err(EngineError::StaleHandle)));
        let _ = a;
    }

    #[test]
    fn test_get_audio_mix_validation() {
        let engine = pull_engine();
        let mut buffer = vec![0.0f32; 512];
        assert!(matches!(
            engine.get_audio_mix(&mut buffer, 4),
            Err(EngineError::InvalidChannelCount {
                expected: 2,
                actual: 4
            })
        ));
        let mut odd = vec![0.0f32; 511];
        assert!(matches!(
            engine.get_audio_mix(&mut odd, 2),
            Err(EngineError::InvalidBufferSize(_))
        ));
        assert!(engine.get_audio_mix(&mut buffer, 2).is_ok());
    }

    #[test]
    fn test_head_locked_queue_passes_through() {
        let engine = pull_engine();
        let queue = engine.create_queue(ChannelLayout::HeadLockedStereo).unwrap();

        let frames = BLOCK;
        let samples: Vec<f32> = (0..frames * 2).map(|i| (i % 17) as f32 * 0.01).collect();
        assert_eq!(engine.enqueue(queue, &samples).unwrap(), samples.len());
        engine.play(queue).unwrap();

        let mut out = vec![0.0f32; frames * 2];
        engine.get_audio_mix(&mut out, 2).unwrap();
        // Head-locked audio reaches the output untouched at unity gain.
        assert_eq!(out, samples);
        assert_eq!(engine.play_state(queue).unwrap(), PlayState::Playing);
        assert_eq!(engine.queue_dequeued_per_channel(queue).unwrap(), frames as u64);
    }

    #[test]
    fn test_queue_accounting_against_layout() {
        let engine = pull_engine();
        let queue = engine.create_queue(ChannelLayout::Hybrid8Stereo).unwrap();

        let free_before = engine.queue_free_space(queue).unwrap();
        assert_eq!(free_before, 10 * 4096);
        assert_eq!(engine.enqueue(queue, &vec![0.1; 100]).unwrap(), 100);
        assert_eq!(engine.queue_free_space(queue).unwrap(), free_before - 100);
        assert_eq!(engine.queue_size(queue).unwrap(), 100);

        // A count that is not a whole number of frames is rejected.
        assert!(matches!(
            engine.enqueue(queue, &vec![0.1; 15]),
            Err(EngineError::InvalidBufferSize(_))
        ));
    }

    #[test]
    fn test_scheduled_pause_superseded_by_play() {
        let engine = pull_engine();
        let queue = engine.create_queue(ChannelLayout::HeadLockedStereo).unwrap();
        engine.enqueue(queue, &vec![0.1; BLOCK * 2 * 40]).unwrap();

        engine.play(queue).unwrap();
        engine.pause_scheduled(queue, 100.0).unwrap();
        engine.play(queue).unwrap();

        render_ms(&engine, 150);
        // The pause never fired: latest call wins.
        assert_eq!(engine.play_state(queue).unwrap(), PlayState::Playing);
    }

    #[test]
    fn test_scheduled_pause_fires_without_superseding_call() {
        let engine = pull_engine();
        let queue = engine.create_queue(ChannelLayout::HeadLockedStereo).unwrap();
        engine.enqueue(queue, &vec![0.1; BLOCK * 2 * 40]).unwrap();

        engine.play(queue).unwrap();
        engine.pause_scheduled(queue, 50.0).unwrap();
        render_ms(&engine, 100);
        assert_eq!(engine.play_state(queue).unwrap(), PlayState::Paused);
    }

    #[test]
    fn test_end_of_stream_event_stops_queue() {
        let engine = pull_engine();
        let events = collect_events(&engine);
        let queue = engine.create_queue(ChannelLayout::HeadLockedStereo).unwrap();

        engine.enqueue(queue, &vec![0.2; BLOCK]).unwrap();
        engine.set_end_of_stream(queue, true).unwrap();
        engine.play(queue).unwrap();

        render_ms(&engine, 50);
        engine.process_events().unwrap();

        let kinds: Vec<EventKind> = events.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds
                .iter()
                .filter(|&&kind| kind == EventKind::EndOfStream)
                .count(),
            1
        );
        assert_eq!(engine.play_state(queue).unwrap(), PlayState::Stopped);
    }

    #[test]
    fn test_starvation_event_mid_stream() {
        let engine = pull_engine();
        let events = collect_events(&engine);
        let queue = engine.create_queue(ChannelLayout::HeadLockedStereo).unwrap();

        // One block of audio, then nothing, with no end-of-stream marker.
        engine.enqueue(queue, &vec![0.2; BLOCK * 2]).unwrap();
        engine.play(queue).unwrap();
        render_ms(&engine, 50);
        engine.process_events().unwrap();

        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.kind == EventKind::QueueStarvation)
        );
        // Starvation degrades to silence but keeps playing.
        assert_eq!(engine.play_state(queue).unwrap(), PlayState::Playing);
    }

    #[test]
    fn test_stop_resets_elapsed() {
        let engine = pull_engine();
        let queue = engine.create_queue(ChannelLayout::HeadLockedStereo).unwrap();
        engine.enqueue(queue, &vec![0.1; BLOCK * 2 * 4]).unwrap();
        engine.play(queue).unwrap();
        render_ms(&engine, 10);
        assert!(engine.queue_dequeued_per_channel(queue).unwrap() > 0);

        engine.stop(queue).unwrap();
        render_ms(&engine, 10);
        assert_eq!(engine.play_state(queue).unwrap(), PlayState::Stopped);
        // Stop flushed the buffered remainder.
        assert_eq!(engine.queue_size(queue).unwrap(), 0);
    }

    #[test]
    fn test_test_tone_overrides_mix() {
        let engine = pull_engine();
        engine.enable_test_tone(true, 440.0, 0.5);
        let out = render_ms(&engine, 20);
        let peak = out.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(peak > 0.4 && peak <= 0.51);
        // The tone is mono, identical in both channels.
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_spatialized_object_pans_left() {
        let engine = pull_engine();
        let object = engine.create_audio_object(ObjectOptions::default()).unwrap();
        engine
            .set_audio_object_callback(
                object,
                Box::new(|buffer, _frames, _channels| buffer.fill(0.5)),
                1,
            )
            .unwrap();
        engine.set_position(object, Vec3::new(-2.0, 0.0, 0.0)).unwrap();
        engine.play(object).unwrap();

        let out = render_ms(&engine, 20);
        let (mut left_energy, mut right_energy) = (0.0f64, 0.0f64);
        for frame in out.chunks_exact(2) {
            left_energy += (frame[0] as f64).powi(2);
            right_energy += (frame[1] as f64).powi(2);
        }
        assert!(left_energy > 0.0);
        assert!(left_energy > right_energy * 2.0);
    }

    #[test]
    fn test_max_distance_mute_silences_object() {
        let engine = pull_engine();
        let object = engine.create_audio_object(ObjectOptions::default()).unwrap();
        engine
            .set_audio_object_callback(
                object,
                Box::new(|buffer, _frames, _channels| buffer.fill(0.5)),
                1,
            )
            .unwrap();
        engine.set_attenuation_mode(object, AttenuationMode::Linear).unwrap();
        engine
            .set_attenuation_properties(
                object,
                AttenuationProps {
                    min_distance: 1.0,
                    max_distance: 10.0,
                    factor: 1.0,
                    max_distance_mute: true,
                },
            )
            .unwrap();
        engine.set_position(object, Vec3::new(0.0, 0.0, -50.0)).unwrap();
        engine.play(object).unwrap();

        let out = render_ms(&engine, 20);
        assert!(out.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn test_positional_tracking_flag() {
        let engine = pull_engine();
        assert!(!engine.positional_tracking_enabled());
        engine
            .enable_positional_tracking(true, Vec3::new(1.0, 0.0, 0.0))
            .unwrap();
        assert!(engine.positional_tracking_enabled());
    }

    #[test]
    fn test_listener_rotation_round_trip() {
        let engine = pull_engine();
        engine.set_listener_rotation_vectors(Vec3::X, Vec3::Y);
        let forward = engine.listener_forward();
        assert!((forward - Vec3::X).length() < 1e-4);
        assert!((engine.listener_up() - Vec3::Y).length() < 1e-4);
    }

    #[test]
    fn test_suspend_freezes_clock() {
        let mut engine = pull_engine();
        render_ms(&engine, 10);
        let elapsed = engine.dsp_time_samples();
        assert_eq!(elapsed, (RATE as usize * 10 / 1000) as u64);

        engine.suspend().unwrap();
        let mut buffer = vec![0.3f32; BLOCK * 2];
        engine.get_audio_mix(&mut buffer, 2).unwrap();
        // Suspended: silence, and the clock does not advance.
        assert!(buffer.iter().all(|&s| s == 0.0));
        assert_eq!(engine.dsp_time_samples(), elapsed);

        engine.start().unwrap();
        render_ms(&engine, 10);
        assert!(engine.dsp_time_samples() > elapsed);
    }

    #[test]
    fn test_loudness_measures_rendered_mix() {
        let engine = pull_engine();
        engine.enable_loudness(true);
        engine.enable_test_tone(true, 997.0, 0.25);
        for _ in 0..10 {
            render_ms(&engine, 100);
        }
        let stats = engine.rendered_loudness();
        assert!(stats.integrated.is_finite());
        assert!(stats.true_peak > -13.0 && stats.true_peak < -11.0);

        engine.reset_loudness();
        let stats = engine.rendered_loudness();
        assert_eq!(stats.integrated, f32::NEG_INFINITY);
    }

    #[test]
    fn test_virtualizer_thread_affinity() {
        let mut settings = pull_settings();
        settings.memory.virtualizer_pool_size = 1;
        let mut engine = AudioEngine::new(settings).unwrap();
        engine.start().unwrap();
        let engine = Arc::new(engine);

        let id = engine
            .create_virtualizer(&[SpeakerPosition::Left, SpeakerPosition::Right], 1024)
            .unwrap();
        assert_eq!(engine.enqueue_virtualizer(id, &[0.1, 0.2]).unwrap(), 2);

        let remote = engine.clone();
        let result = std::thread::spawn(move || remote.enqueue_virtualizer(id, &[0.3, 0.4]))
            .join()
            .unwrap();
        assert!(matches!(result, Err(EngineError::BadThread)));
    }

    #[test]
    fn test_virtualizer_renders_speakers() {
        let engine = pull_engine();
        let id = engine
            .create_virtualizer(&[SpeakerPosition::Left, SpeakerPosition::Right], 8192)
            .unwrap();
        let frames = BLOCK * 4;
        // Only the left speaker carries signal.
        let mut samples = vec![0.0f32; frames * 2];
        for frame in samples.chunks_exact_mut(2) {
            frame[0] = 0.5;
        }
        engine.enqueue_virtualizer(id, &samples).unwrap();
        engine.play(id).unwrap();

        let out = render_ms(&engine, 10);
        let (mut left_energy, mut right_energy) = (0.0f64, 0.0f64);
        for frame in out.chunks_exact(2) {
            left_energy += (frame[0] as f64).powi(2);
            right_energy += (frame[1] as f64).powi(2);
        }
        assert!(left_energy > right_energy);
        assert!(right_energy > 0.0);
    }

    #[test]
    fn test_file_streams_through_decoder_thread() {
        let mut settings = pull_settings();
        settings.threads.use_decoder_thread = true;
        let mut engine = AudioEngine::new(settings).unwrap();
        engine.start().unwrap();
        let events = collect_events(&engine);

        // Half a second of a quiet ramp, mono at the engine rate.
        let frames: Vec<i16> = (0..RATE as usize / 2).map(|i| (i % 512) as i16).collect();
        let wav = wav_bytes(RATE, 1, &frames);

        let file = engine.create_file(ObjectOptions::default()).unwrap();
        engine
            .open_file_stream(
                file,
                Box::new(MemoryByteStream::new(wav)),
                Some("wav"),
                ChannelLayout::Mono,
            )
            .unwrap();
        assert!(engine.is_file_open(file).unwrap());
        assert_eq!(engine.file_duration_frames(file).unwrap(), RATE as u64 / 2);

        engine.play(file).unwrap();

        let mut finished = false;
        let mut produced_signal = false;
        for _ in 0..400 {
            let out = render_ms(&engine, 10);
            if out.iter().any(|&s| s != 0.0) {
                produced_signal = true;
            }
            engine.process_events().unwrap();
            if events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.kind == EventKind::EndOfStream)
            {
                finished = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(finished, "file playback never reached end of stream");
        assert!(produced_signal);
        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.kind == EventKind::DecoderReady)
        );
        assert_eq!(engine.play_state(file).unwrap(), PlayState::Stopped);

        engine.close_file(file).unwrap();
        assert!(!engine.is_file_open(file).unwrap());
        engine.destroy_file(file).unwrap();
        assert!(matches!(
            engine.is_file_open(file),
            Err(EngineError::StaleHandle)
        ));
    }

    #[test]
    fn test_volume_ramp_reaches_target() {
        let engine = pull_engine();
        let queue = engine.create_queue(ChannelLayout::HeadLockedStereo).unwrap();
        engine.enqueue(queue, &vec![0.5; BLOCK * 2 * 40]).unwrap();
        engine.play(queue).unwrap();
        engine.set_volume(queue, 0.25, 50.0, false).unwrap();

        render_ms(&engine, 100);
        let volume = engine.volume(queue).unwrap();
        assert!((volume - 0.25).abs() < 1e-5);
        assert!((engine.volume_decibels(queue).unwrap() + 12.04).abs() < 0.1);
    }
}
