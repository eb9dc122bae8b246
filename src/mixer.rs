//! The render core: command application and the per-tick mix.
//!
//! All playable state lives here, owned by whichever thread runs the render
//! tick (the device callback or the caller of the pull API). Control calls
//! never touch this state directly; they post typed commands through a
//! channel and the core drains them at the start of each render call. The
//! tick itself is bounded work on preallocated storage: dequeue ready
//! samples per object, spatialize, accumulate into the beds, fold to
//! stereo, meter.

use crate::config::EngineSettings;
use crate::decode::{DecodeFeed, DecodeJob};
use crate::events::{EventKind, EventSink, EventSource};
use crate::layout::ChannelLayout;
use crate::loudness::LoudnessShared;
use crate::math::{Quat, Vec3};
use crate::objects::audio_object::{AudioBufferCallback, PointInput, PointObject};
use crate::objects::file::FileObject;
use crate::objects::queue::SoundfieldObject;
use crate::objects::virtualizer::VirtualizerObject;
use crate::objects::{FileId, ObjectId, QueueId, VirtualizerId};
use crate::render::{BED_CHANNELS, FieldRenderer, MixBed, encode_direction};
use crate::rt::QueueConsumer;
use crate::spatial::{AttenuationMode, AttenuationProps, SpatialProcessor};
use crate::sync::SyncMode;
use crate::transport::{PlayState, Transport, TransportMode, TransportOp, VolumeRamp};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Widest interleaved stream the core mixes (second-order plus head-locked
/// stereo).
pub(crate) const MAX_STREAM_CHANNELS: usize = 11;

/// Callback observing the final interleaved mix right before the device
/// hand-off. Must not block or allocate.
pub type MixObserver = Box<dyn FnMut(&[f32], usize, usize) + Send>;

/// Control-to-render messages, drained at the start of each render call.
pub(crate) enum Command {
    InstallQueue {
        id: QueueId,
        object: Box<SoundfieldObject>,
    },
    RemoveQueue {
        id: QueueId,
    },
    InstallFile {
        id: FileId,
        object: Box<FileObject>,
    },
    RemoveFile {
        id: FileId,
    },
    InstallObject {
        id: ObjectId,
        object: Box<PointObject>,
    },
    RemoveObject {
        id: ObjectId,
    },
    InstallVirtualizer {
        id: VirtualizerId,
        object: Box<VirtualizerObject>,
    },
    RemoveVirtualizer {
        id: VirtualizerId,
    },

    AttachFileStream {
        id: FileId,
        layout: ChannelLayout,
        consumer: QueueConsumer,
        inline_feed: Option<Box<DecodeFeed>>,
        total_frames: u64,
    },
    DetachFileStream {
        id: FileId,
    },
    AttachObjectStream {
        id: ObjectId,
        channels: usize,
        consumer: QueueConsumer,
        inline_feed: Option<Box<DecodeFeed>>,
        total_frames: u64,
    },
    SetObjectCallback {
        id: ObjectId,
        channels: usize,
        callback: AudioBufferCallback,
    },
    DetachObjectInput {
        id: ObjectId,
    },

    Transport {
        target: EventSource,
        op: TransportOp,
        mode: TransportMode,
    },
    SetVolume {
        target: EventSource,
        gain: f32,
        ramp_ms: f32,
        force_previous_ramp: bool,
    },
    VolumeFade {
        target: EventSource,
        start: f32,
        end: f32,
        duration_ms: f32,
    },
    Seek {
        target: EventSource,
        frame: u64,
    },
    SetLooping {
        target: EventSource,
        looping: bool,
    },
    FlushQueue {
        id: QueueId,
    },

    SetPosition {
        target: EventSource,
        position: Vec3,
    },
    SetRotation {
        target: EventSource,
        rotation: Quat,
    },
    SetAttenuationMode {
        target: EventSource,
        mode: AttenuationMode,
    },
    SetAttenuationProps {
        target: EventSource,
        props: AttenuationProps,
    },
    SetFocus {
        target: EventSource,
        enabled: bool,
        follow_listener: bool,
    },
    SetOffFocusLevel {
        target: EventSource,
        db: f32,
    },
    SetFocusWidth {
        target: EventSource,
        degrees: f32,
    },
    SetFocusOrientation {
        target: EventSource,
        orientation: Quat,
    },
    SetSpatialize {
        target: EventSource,
        spatialize: bool,
    },

    SetListenerPosition {
        position: Vec3,
    },
    SetListenerRotation {
        rotation: Quat,
    },
    SetTracking {
        enabled: bool,
        origin: Vec3,
    },

    SetSyncMode {
        id: FileId,
        mode: SyncMode,
    },
    SetExternalClock {
        id: FileId,
        clock_ms: f64,
    },
    SetFreewheel {
        id: FileId,
        ms: f64,
    },
    SetResyncThreshold {
        id: FileId,
        ms: f64,
    },

    TestTone {
        enabled: bool,
        frequency: f32,
        gain: f32,
    },
    SetMixObserver {
        observer: Option<MixObserver>,
    },
}

/// State handed back to the control thread for disposal, keeping drops off
/// the render path.
pub(crate) enum Reclaimed {
    Queue(Box<SoundfieldObject>),
    File(Box<FileObject>),
    Object(Box<PointObject>),
    Virtualizer(Box<VirtualizerObject>),
    Stream(Option<QueueConsumer>, Option<Box<DecodeFeed>>),
    Input(PointInput, Option<Box<DecodeFeed>>),
}

struct ToneState {
    frequency: f32,
    gain: f32,
    phase: f32,
}

pub(crate) struct RenderCore {
    sample_rate: u32,
    block: usize,
    commands: Receiver<Command>,
    reclaim_tx: Sender<Reclaimed>,
    decode_tx: Option<Sender<DecodeJob>>,
    events: EventSink,
    dsp_samples: Arc<AtomicU64>,
    loudness: Arc<LoudnessShared>,

    queues: Vec<Option<(u32, Box<SoundfieldObject>)>>,
    files: Vec<Option<(u32, Box<FileObject>)>>,
    objects: Vec<Option<(u32, Box<PointObject>)>>,
    virtualizers: Vec<Option<(u32, Box<VirtualizerObject>)>>,

    listener_position: Vec3,
    listener_rotation: Quat,
    tracking_origin: Option<Vec3>,

    bed: MixBed,
    field: Box<dyn FieldRenderer>,
    interleave_scratch: Vec<f32>,
    planar: Vec<Vec<f32>>,
    mono_scratch: Vec<f32>,
    head_scratch: Vec<f32>,
    tone: Option<ToneState>,
    observer: Option<MixObserver>,
}

impl RenderCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &EngineSettings,
        commands: Receiver<Command>,
        reclaim_tx: Sender<Reclaimed>,
        decode_tx: Option<Sender<DecodeJob>>,
        events: EventSink,
        dsp_samples: Arc<AtomicU64>,
        loudness: Arc<LoudnessShared>,
        field: Box<dyn FieldRenderer>,
    ) -> Self {
        let block = settings.audio.buffer_size;
        fn slot<T>(n: usize) -> Vec<Option<T>> {
            let mut v = Vec::with_capacity(n);
            v.resize_with(n, || None);
            v
        }
        Self {
            sample_rate: settings.audio.sample_rate,
            block,
            commands,
            reclaim_tx,
            decode_tx,
            events,
            dsp_samples,
            loudness,
            queues: slot(settings.memory.queue_pool_size),
            files: slot(settings.memory.file_pool_size),
            objects: slot(settings.memory.audio_object_pool_size),
            virtualizers: slot(settings.memory.virtualizer_pool_size),
            listener_position: Vec3::ZERO,
            listener_rotation: Quat::IDENTITY,
            tracking_origin: None,
            bed: MixBed::new(block),
            field,
            interleave_scratch: vec![0.0; block * MAX_STREAM_CHANNELS],
            planar: (0..BED_CHANNELS).map(|_| vec![0.0; block]).collect(),
            mono_scratch: vec![0.0; block],
            head_scratch: vec![0.0; block],
            tone: None,
            observer: None,
        }
    }

    /// Render interleaved stereo into `out`, advancing the engine clock.
    pub fn render(&mut self, out: &mut [f32]) {
        self.apply_commands();
        let mut offset = 0;
        while offset < out.len() {
            let chunk = (out.len() - offset).min(self.block * 2);
            self.tick(&mut out[offset..offset + chunk]);
            offset += chunk;
        }
    }

    fn now(&self) -> u64 {
        self.dsp_samples.load(Ordering::Relaxed)
    }

    fn now_ms(&self) -> f64 {
        self.now() as f64 * 1000.0 / self.sample_rate as f64
    }

    fn tick(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        out.fill(0.0);

        if self.tone.is_some() {
            self.generate_tone(out, frames);
        } else {
            self.bed.clear();
            let processor = self.listener_snapshot();

            let mut queues = std::mem::take(&mut self.queues);
            for slot in queues.iter_mut().flatten() {
                self.tick_queue(&mut slot.1, frames, &processor);
            }
            self.queues = queues;

            let mut files = std::mem::take(&mut self.files);
            for slot in files.iter_mut().flatten() {
                self.tick_file(&mut slot.1, frames, &processor);
            }
            self.files = files;

            let mut objects = std::mem::take(&mut self.objects);
            for slot in objects.iter_mut().flatten() {
                self.tick_object(&mut slot.1, frames, &processor);
            }
            self.objects = objects;

            let mut virtualizers = std::mem::take(&mut self.virtualizers);
            for slot in virtualizers.iter_mut().flatten() {
                self.tick_virtualizer(&mut slot.1, frames);
            }
            self.virtualizers = virtualizers;

            self.field.binauralize(&self.bed, frames, out);
            self.bed.mix_head_locked_into(out, frames);
        }

        self.dsp_samples.fetch_add(frames as u64, Ordering::Relaxed);

        if let Some(observer) = &mut self.observer {
            observer(out, 2, frames);
        }
        if self.loudness.enabled() {
            if let Ok(mut meter) = self.loudness.meter.try_lock() {
                meter.process_interleaved(&out[..frames * 2]);
            }
        }
    }

    /// Listener pose for this tick. With positional tracking enabled, the
    /// effective position is the tracking origin plus the listener delta
    /// clamped to one unit per axis.
    fn listener_snapshot(&self) -> SpatialProcessor {
        let position = match self.tracking_origin {
            Some(origin) => {
                let delta = (self.listener_position - origin)
                    .clamp(Vec3::splat(-1.0), Vec3::splat(1.0));
                origin + delta
            }
            None => self.listener_position,
        };
        SpatialProcessor::new(position, self.listener_rotation)
    }

    fn generate_tone(&mut self, out: &mut [f32], frames: usize) {
        let Some(tone) = &mut self.tone else { return };
        let step = 2.0 * std::f32::consts::PI * tone.frequency / self.sample_rate as f32;
        for i in 0..frames {
            let sample = tone.phase.sin() * tone.gain;
            out[i * 2] = sample;
            out[i * 2 + 1] = sample;
            tone.phase += step;
            if tone.phase > 2.0 * std::f32::consts::PI {
                tone.phase -= 2.0 * std::f32::consts::PI;
            }
        }
    }

    fn tick_queue(&mut self, object: &mut SoundfieldObject, frames: usize, processor: &SpatialProcessor) {
        let now = self.now();
        if let Some(TransportOp::Stop) = object.transport.advance(now) {
            if let Some(consumer) = object.consumer.as_mut() {
                consumer.flush();
            }
            object.shared.set_elapsed_frames(0);
        }
        object.shared.set_play_state(object.transport.state());
        object.shared.set_volume(object.volume.value_at(now));
        if !object.transport.is_playing() {
            return;
        }
        if let Some(outcome) = self.mix_soundfield(object, frames, processor) {
            if outcome.ended {
                object.transport.request(TransportOp::Stop, TransportMode::Instant, now);
                object.shared.set_play_state(PlayState::Stopped);
            }
        }
    }

    fn tick_file(&mut self, file: &mut FileObject, frames: usize, processor: &SpatialProcessor) {
        let now = self.now();
        if let Some(TransportOp::Stop) = file.playback.transport.advance(now) {
            Self::rewind_file(file, &self.decode_tx);
        }
        file.playback.shared.set_play_state(file.playback.transport.state());
        file.playback.shared.set_volume(file.playback.volume.value_at(now));

        if !file.playback.transport.is_playing() || !file.has_asset() {
            return;
        }

        // External clock reconciliation before this tick's dequeue.
        let elapsed_ms =
            file.playback.shared.elapsed_frames() as f64 * 1000.0 / self.sample_rate as f64;
        let now_ms = self.now_ms();
        if let Some(target_ms) = file.sync.check(elapsed_ms, now_ms) {
            let frame = (target_ms * self.sample_rate as f64 / 1000.0) as u64;
            log::debug!(
                "{:?}: external clock drift, seeking to frame {frame}",
                file.playback.source
            );
            Self::seek_file(file, frame, &self.decode_tx);
        }

        if let Some(feed) = file.inline_feed.as_mut() {
            feed.service(&self.events);
        }

        if let Some(outcome) = self.mix_soundfield(&mut file.playback, frames, processor) {
            if outcome.ended {
                file.playback
                    .transport
                    .request(TransportOp::Stop, TransportMode::Instant, now);
                file.playback.shared.set_play_state(PlayState::Stopped);
            }
        }
    }

    /// Dequeue, spatialize and accumulate one soundfield stream. The
    /// transport must already be advanced and playing.
    fn mix_soundfield(
        &mut self,
        object: &mut SoundfieldObject,
        frames: usize,
        processor: &SpatialProcessor,
    ) -> Option<crate::rt::DequeueOutcome> {
        let now = self.now();
        let channels = object.layout.channel_count();
        let needed = frames * channels;
        let consumer = object.consumer.as_mut()?;
        let outcome = match consumer.dequeue_into(&mut self.interleave_scratch[..needed]) {
            Ok(outcome) => outcome,
            Err(_) => return None,
        };
        if outcome.starved {
            self.events.emit(EventKind::QueueStarvation, object.source);
        }
        if outcome.ended {
            self.events.emit(EventKind::EndOfStream, object.source);
        }
        object
            .shared
            .add_elapsed_frames((outcome.produced / channels) as u64);

        let transport_gain = object.transport.gain(now);
        let volume_gain = object.volume.value_at(now);
        let field_gain = transport_gain * volume_gain * processor.spatial_gain(&object.params);
        // Head-locked channels bypass attenuation and focus.
        let head_gain = transport_gain * volume_gain;

        let ambi_n = object.layout.ambisonic_channels().min(BED_CHANNELS);
        if ambi_n >= 4 {
            for ch in 0..ambi_n {
                for i in 0..frames {
                    self.planar[ch][i] = self.interleave_scratch[i * channels + ch];
                }
            }
            let rotation = processor.relative_rotation(object.params.rotation);
            self.field.rotate(rotation, &mut self.planar[..ambi_n], frames);
            self.bed.accumulate_ambi(&self.planar[..ambi_n], frames, field_gain);
        }

        let head_n = object.layout.head_locked_channels();
        let ambi_offset = object.layout.ambisonic_channels();
        for h in 0..head_n {
            for i in 0..frames {
                self.head_scratch[i] = self.interleave_scratch[i * channels + ambi_offset + h];
            }
            if head_n == 1 {
                self.bed.accumulate_head(0, &self.head_scratch, frames, head_gain);
                self.bed.accumulate_head(1, &self.head_scratch, frames, head_gain);
            } else {
                self.bed
                    .accumulate_head(h.min(1), &self.head_scratch, frames, head_gain);
            }
        }
        Some(outcome)
    }

    fn tick_object(&mut self, object: &mut PointObject, frames: usize, processor: &SpatialProcessor) {
        let now = self.now();
        if let Some(TransportOp::Stop) = object.transport.advance(now) {
            Self::rewind_object(object, &self.decode_tx);
        }
        object.shared.set_play_state(object.transport.state());
        object.shared.set_volume(object.volume.value_at(now));
        if !object.transport.is_playing() {
            return;
        }

        let channels = object.input.channels();
        if channels == 0 {
            return;
        }
        let needed = frames * channels;
        let mut ended = false;
        match &mut object.input {
            PointInput::None => return,
            PointInput::Callback { callback, channels } => {
                let buffer = &mut self.interleave_scratch[..needed];
                buffer.fill(0.0);
                callback(buffer, frames, *channels);
            }
            PointInput::Stream { consumer, .. } => {
                if let Some(feed) = object.inline_feed.as_mut() {
                    feed.service(&self.events);
                }
                match consumer.dequeue_into(&mut self.interleave_scratch[..needed]) {
                    Ok(outcome) => {
                        if outcome.starved {
                            self.events.emit(EventKind::QueueStarvation, object.source);
                        }
                        if outcome.ended {
                            self.events.emit(EventKind::EndOfStream, object.source);
                            ended = true;
                        }
                        object
                            .shared
                            .add_elapsed_frames((outcome.produced / channels) as u64);
                    }
                    Err(_) => return,
                }
            }
        }

        let transport_gain = object.transport.gain(now);
        let volume_gain = object.volume.value_at(now);
        object.shared.set_volume(volume_gain);
        let base_gain = transport_gain * volume_gain;

        if object.params.spatialize {
            let gain = base_gain * processor.spatial_gain(&object.params);
            // Fold the input to mono for encoding.
            let scale = 1.0 / channels as f32;
            for i in 0..frames {
                let mut acc = 0.0;
                for ch in 0..channels {
                    acc += self.interleave_scratch[i * channels + ch];
                }
                self.mono_scratch[i] = acc * scale;
            }
            match processor.relative_direction(object.params.position) {
                Some(direction) => {
                    let gains = encode_direction(direction);
                    for (ch, &g) in gains.iter().enumerate() {
                        self.bed
                            .accumulate_ambi_channel(ch, &self.mono_scratch, frames, g * gain);
                    }
                }
                None => {
                    // On the listener: render omnidirectional, W only.
                    self.bed.accumulate_ambi_channel(
                        0,
                        &self.mono_scratch,
                        frames,
                        std::f32::consts::FRAC_1_SQRT_2 * gain,
                    );
                }
            }
        } else {
            for h in 0..channels.min(2) {
                for i in 0..frames {
                    self.head_scratch[i] = self.interleave_scratch[i * channels + h];
                }
                if channels == 1 {
                    self.bed.accumulate_head(0, &self.head_scratch, frames, base_gain);
                    self.bed.accumulate_head(1, &self.head_scratch, frames, base_gain);
                } else {
                    self.bed.accumulate_head(h, &self.head_scratch, frames, base_gain);
                }
            }
        }

        if ended {
            object
                .transport
                .request(TransportOp::Stop, TransportMode::Instant, now);
            object.shared.set_play_state(PlayState::Stopped);
        }
    }

    fn tick_virtualizer(&mut self, virtualizer: &mut VirtualizerObject, frames: usize) {
        let now = self.now();
        if let Some(TransportOp::Stop) = virtualizer.transport.advance(now) {
            virtualizer.consumer.flush();
            virtualizer.shared.set_elapsed_frames(0);
        }
        virtualizer.shared.set_play_state(virtualizer.transport.state());
        virtualizer.shared.set_volume(virtualizer.volume.value_at(now));
        if !virtualizer.transport.is_playing() {
            return;
        }

        let channels = virtualizer.directions.len();
        let needed = frames * channels;
        let outcome = match virtualizer
            .consumer
            .dequeue_into(&mut self.interleave_scratch[..needed])
        {
            Ok(outcome) => outcome,
            Err(_) => return,
        };
        if outcome.starved {
            self.events
                .emit(EventKind::BufferUnderrun, virtualizer.source);
        }
        if outcome.ended {
            self.events.emit(EventKind::EndOfStream, virtualizer.source);
        }
        virtualizer
            .shared
            .add_elapsed_frames((outcome.produced / channels) as u64);

        let gain = virtualizer.transport.gain(now) * virtualizer.volume.value_at(now);
        for (speaker, direction) in virtualizer.directions.iter().enumerate() {
            for i in 0..frames {
                self.mono_scratch[i] = self.interleave_scratch[i * channels + speaker];
            }
            let gains = encode_direction(*direction);
            for (ch, &g) in gains.iter().enumerate() {
                self.bed
                    .accumulate_ambi_channel(ch, &self.mono_scratch, frames, g * gain);
            }
        }

        if outcome.ended {
            virtualizer
                .transport
                .request(TransportOp::Stop, TransportMode::Instant, now);
            virtualizer.shared.set_play_state(PlayState::Stopped);
        }
    }

    /// Rewind a file object to the start: flush the buffered stream, reset
    /// elapsed time and point the decoder back at frame zero.
    fn rewind_file(file: &mut FileObject, decode_tx: &Option<Sender<DecodeJob>>) {
        Self::seek_file(file, 0, decode_tx);
    }

    fn seek_file(file: &mut FileObject, frame: u64, decode_tx: &Option<Sender<DecodeJob>>) {
        if let Some(consumer) = file.playback.consumer.as_mut() {
            consumer.flush();
        }
        file.playback.shared.set_elapsed_frames(frame);
        if let Some(feed) = file.inline_feed.as_mut() {
            feed.seek(frame);
        } else if file.has_asset() {
            if let Some(tx) = decode_tx {
                let _ = tx.send(DecodeJob::Seek {
                    key: file.playback.source,
                    frame,
                });
            }
        }
    }

    fn rewind_object(object: &mut PointObject, decode_tx: &Option<Sender<DecodeJob>>) {
        Self::seek_object(object, 0, decode_tx);
    }

    fn seek_object(object: &mut PointObject, frame: u64, decode_tx: &Option<Sender<DecodeJob>>) {
        object.shared.set_elapsed_frames(frame);
        match &mut object.input {
            PointInput::Stream { consumer, .. } => {
                consumer.flush();
                if let Some(feed) = object.inline_feed.as_mut() {
                    feed.seek(frame);
                } else if let Some(tx) = decode_tx {
                    let _ = tx.send(DecodeJob::Seek {
                        key: object.source,
                        frame,
                    });
                }
            }
            _ => {}
        }
    }

    fn reclaim(&self, reclaimed: Reclaimed) {
        if self.reclaim_tx.try_send(reclaimed).is_err() {
            log::debug!("reclaim channel full, dropping state on the render thread");
        }
    }

    fn queue_mut(&mut self, id: QueueId) -> Option<&mut SoundfieldObject> {
        match self.queues.get_mut(id.slot) {
            Some(Some((generation, object))) if *generation == id.generation => Some(object),
            _ => None,
        }
    }

    fn file_mut(&mut self, id: FileId) -> Option<&mut FileObject> {
        match self.files.get_mut(id.slot) {
            Some(Some((generation, object))) if *generation == id.generation => Some(object),
            _ => None,
        }
    }

    fn object_mut(&mut self, id: ObjectId) -> Option<&mut PointObject> {
        match self.objects.get_mut(id.slot) {
            Some(Some((generation, object))) if *generation == id.generation => Some(object),
            _ => None,
        }
    }

    fn virtualizer_mut(&mut self, id: VirtualizerId) -> Option<&mut VirtualizerObject> {
        match self.virtualizers.get_mut(id.slot) {
            Some(Some((generation, object))) if *generation == id.generation => Some(object),
            _ => None,
        }
    }

    /// Transport, volume and mirror state of any object kind.
    fn common_mut(
        &mut self,
        target: EventSource,
    ) -> Option<(&mut Transport, &mut VolumeRamp, &Arc<crate::objects::PlaybackShared>)> {
        match target {
            EventSource::Queue(id) => self
                .queue_mut(id)
                .map(|o| (&mut o.transport, &mut o.volume, &o.shared)),
            EventSource::File(id) => self
                .file_mut(id)
                .map(|o| (&mut o.playback.transport, &mut o.playback.volume, &o.playback.shared)),
            EventSource::Object(id) => self
                .object_mut(id)
                .map(|o| (&mut o.transport, &mut o.volume, &o.shared)),
            EventSource::Virtualizer(id) => self
                .virtualizer_mut(id)
                .map(|o| (&mut o.transport, &mut o.volume, &o.shared)),
            EventSource::Engine => None,
        }
    }

    fn params_mut(&mut self, target: EventSource) -> Option<&mut crate::spatial::SpatialParams> {
        match target {
            EventSource::Queue(id) => self.queue_mut(id).map(|o| &mut o.params),
            EventSource::File(id) => self.file_mut(id).map(|o| &mut o.playback.params),
            EventSource::Object(id) => self.object_mut(id).map(|o| &mut o.params),
            _ => None,
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        let now = self.now();
        match command {
            Command::InstallQueue { id, object } => {
                if id.slot < self.queues.len() {
                    self.queues[id.slot] = Some((id.generation, object));
                }
            }
            Command::RemoveQueue { id } => {
                if self.queue_mut(id).is_some() {
                    if let Some((_, object)) = self.queues[id.slot].take() {
                        self.reclaim(Reclaimed::Queue(object));
                    }
                }
            }
            Command::InstallFile { id, object } => {
                if id.slot < self.files.len() {
                    self.files[id.slot] = Some((id.generation, object));
                }
            }
            Command::RemoveFile { id } => {
                if self.file_mut(id).is_some() {
                    if let Some((_, object)) = self.files[id.slot].take() {
                        self.reclaim(Reclaimed::File(object));
                    }
                }
            }
            Command::InstallObject { id, object } => {
                if id.slot < self.objects.len() {
                    self.objects[id.slot] = Some((id.generation, object));
                }
            }
            Command::RemoveObject { id } => {
                if self.object_mut(id).is_some() {
                    if let Some((_, object)) = self.objects[id.slot].take() {
                        self.reclaim(Reclaimed::Object(object));
                    }
                }
            }
            Command::InstallVirtualizer { id, object } => {
                if id.slot < self.virtualizers.len() {
                    self.virtualizers[id.slot] = Some((id.generation, object));
                }
            }
            Command::RemoveVirtualizer { id } => {
                if self.virtualizer_mut(id).is_some() {
                    if let Some((_, object)) = self.virtualizers[id.slot].take() {
                        self.reclaim(Reclaimed::Virtualizer(object));
                    }
                }
            }

            Command::AttachFileStream {
                id,
                layout,
                consumer,
                inline_feed,
                total_frames,
            } => {
                if let Some(file) = self.file_mut(id) {
                    let (old_consumer, old_feed) = file.detach();
                    file.playback.layout = layout;
                    file.playback.consumer = Some(consumer);
                    file.inline_feed = inline_feed;
                    file.total_frames = total_frames;
                    if old_consumer.is_some() || old_feed.is_some() {
                        self.reclaim(Reclaimed::Stream(old_consumer, old_feed));
                    }
                }
            }
            Command::DetachFileStream { id } => {
                if let Some(file) = self.file_mut(id) {
                    let (old_consumer, old_feed) = file.detach();
                    if old_consumer.is_some() || old_feed.is_some() {
                        self.reclaim(Reclaimed::Stream(old_consumer, old_feed));
                    }
                }
            }
            Command::AttachObjectStream {
                id,
                channels,
                consumer,
                inline_feed,
                total_frames,
            } => {
                if let Some(object) = self.object_mut(id) {
                    let old_input =
                        std::mem::replace(&mut object.input, PointInput::Stream { consumer, channels });
                    let old_feed = std::mem::replace(&mut object.inline_feed, inline_feed);
                    object.total_frames = total_frames;
                    object.shared.set_elapsed_frames(0);
                    if !matches!(old_input, PointInput::None) || old_feed.is_some() {
                        self.reclaim(Reclaimed::Input(old_input, old_feed));
                    }
                }
            }
            Command::SetObjectCallback {
                id,
                channels,
                callback,
            } => {
                if let Some(object) = self.object_mut(id) {
                    let old_input = std::mem::replace(
                        &mut object.input,
                        PointInput::Callback { callback, channels },
                    );
                    let old_feed = object.inline_feed.take();
                    object.total_frames = 0;
                    object.shared.set_elapsed_frames(0);
                    if !matches!(old_input, PointInput::None) || old_feed.is_some() {
                        self.reclaim(Reclaimed::Input(old_input, old_feed));
                    }
                }
            }
            Command::DetachObjectInput { id } => {
                if let Some(object) = self.object_mut(id) {
                    let old_input = std::mem::replace(&mut object.input, PointInput::None);
                    let old_feed = object.inline_feed.take();
                    object.total_frames = 0;
                    object.transport.reset();
                    object.shared.set_play_state(PlayState::Stopped);
                    object.shared.set_elapsed_frames(0);
                    if !matches!(old_input, PointInput::None) || old_feed.is_some() {
                        self.reclaim(Reclaimed::Input(old_input, old_feed));
                    }
                }
            }

            Command::Transport { target, op, mode } => {
                if let Some((transport, _, shared)) = self.common_mut(target) {
                    transport.request(op, mode, now);
                    shared.set_play_state(transport.state());
                }
                if op == TransportOp::Stop && matches!(mode, TransportMode::Instant) {
                    self.reset_playhead(target);
                }
            }
            Command::SetVolume {
                target,
                gain,
                ramp_ms,
                force_previous_ramp,
            } => {
                if let Some((_, volume, shared)) = self.common_mut(target) {
                    volume.set(gain, ramp_ms, force_previous_ramp, now);
                    shared.set_volume(volume.value_at(now));
                }
            }
            Command::VolumeFade {
                target,
                start,
                end,
                duration_ms,
            } => {
                if let Some((_, volume, shared)) = self.common_mut(target) {
                    volume.fade(start, end, duration_ms, now);
                    shared.set_volume(volume.value_at(now));
                }
            }
            Command::Seek { target, frame } => match target {
                EventSource::File(id) => {
                    let decode_tx = self.decode_tx.clone();
                    if let Some(file) = self.file_mut(id) {
                        Self::seek_file(file, frame, &decode_tx);
                    }
                }
                EventSource::Object(id) => {
                    let decode_tx = self.decode_tx.clone();
                    if let Some(object) = self.object_mut(id) {
                        Self::seek_object(object, frame, &decode_tx);
                    }
                }
                _ => {}
            },
            Command::SetLooping { target, looping } => match target {
                EventSource::File(id) => {
                    if let Some(file) = self.file_mut(id) {
                        file.looping.store(looping, Ordering::Relaxed);
                    }
                }
                EventSource::Object(id) => {
                    if let Some(object) = self.object_mut(id) {
                        object.looping.store(looping, Ordering::Relaxed);
                    }
                }
                _ => {}
            },
            Command::FlushQueue { id } => {
                if let Some(object) = self.queue_mut(id) {
                    if let Some(consumer) = object.consumer.as_mut() {
                        consumer.flush();
                    }
                }
            }

            Command::SetPosition { target, position } => {
                if let Some(params) = self.params_mut(target) {
                    params.position = position;
                }
            }
            Command::SetRotation { target, rotation } => {
                if let Some(params) = self.params_mut(target) {
                    params.rotation = rotation.normalize();
                }
            }
            Command::SetAttenuationMode { target, mode } => {
                if let Some(params) = self.params_mut(target) {
                    params.attenuation_mode = mode;
                }
            }
            Command::SetAttenuationProps { target, props } => {
                if let Some(params) = self.params_mut(target) {
                    params.attenuation = props;
                }
            }
            Command::SetFocus {
                target,
                enabled,
                follow_listener,
            } => {
                if let Some(params) = self.params_mut(target) {
                    params.focus.enabled = enabled;
                    params.focus.follow_listener = follow_listener;
                }
            }
            Command::SetOffFocusLevel { target, db } => {
                if let Some(params) = self.params_mut(target) {
                    params.focus.set_off_focus_level_db(db);
                }
            }
            Command::SetFocusWidth { target, degrees } => {
                if let Some(params) = self.params_mut(target) {
                    params.focus.set_width_degrees(degrees);
                }
            }
            Command::SetFocusOrientation {
                target,
                orientation,
            } => {
                if let Some(params) = self.params_mut(target) {
                    params.focus.orientation = orientation.normalize();
                }
            }
            Command::SetSpatialize { target, spatialize } => {
                if let Some(params) = self.params_mut(target) {
                    params.spatialize = spatialize;
                }
            }

            Command::SetListenerPosition { position } => {
                self.listener_position = position;
            }
            Command::SetListenerRotation { rotation } => {
                self.listener_rotation = rotation.normalize();
            }
            Command::SetTracking { enabled, origin } => {
                self.tracking_origin = enabled.then_some(origin);
            }

            Command::SetSyncMode { id, mode } => {
                if let Some(file) = self.file_mut(id) {
                    file.sync.set_mode(mode);
                }
            }
            Command::SetExternalClock { id, clock_ms } => {
                if let Some(file) = self.file_mut(id) {
                    file.sync.set_external_clock_ms(clock_ms);
                }
            }
            Command::SetFreewheel { id, ms } => {
                if let Some(file) = self.file_mut(id) {
                    file.sync.set_freewheel_ms(ms);
                }
            }
            Command::SetResyncThreshold { id, ms } => {
                if let Some(file) = self.file_mut(id) {
                    file.sync.set_resync_threshold_ms(ms);
                }
            }

            Command::TestTone {
                enabled,
                frequency,
                gain,
            } => {
                self.tone = enabled.then_some(ToneState {
                    frequency,
                    gain,
                    phase: 0.0,
                });
            }
            Command::SetMixObserver { observer } => {
                self.observer = observer;
            }
        }
    }

    /// Reset the playhead after an instant stop.
    fn reset_playhead(&mut self, target: EventSource) {
        match target {
            EventSource::Queue(id) => {
                if let Some(object) = self.queue_mut(id) {
                    if let Some(consumer) = object.consumer.as_mut() {
                        consumer.flush();
                    }
                    object.shared.set_elapsed_frames(0);
                }
            }
            EventSource::File(id) => {
                let decode_tx = self.decode_tx.clone();
                if let Some(file) = self.file_mut(id) {
                    Self::rewind_file(file, &decode_tx);
                }
            }
            EventSource::Object(id) => {
                let decode_tx = self.decode_tx.clone();
                if let Some(object) = self.object_mut(id) {
                    Self::rewind_object(object, &decode_tx);
                }
            }
            EventSource::Virtualizer(id) => {
                if let Some(virtualizer) = self.virtualizer_mut(id) {
                    virtualizer.consumer.flush();
                    virtualizer.shared.set_elapsed_frames(0);
                }
            }
            EventSource::Engine => {}
        }
    }
}
