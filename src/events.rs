//! Asynchronous engine events.
//!
//! Components that detect a condition on the real-time path (queue
//! starvation, an underrun, the end of a stream) report it by enqueueing an
//! event; the render tick itself never returns errors. The queue is bounded
//! and producers never block: when it overflows, the oldest unread event is
//! dropped.
//!
//! Delivery is fixed at engine construction: either a dedicated event
//! thread invokes the registered callbacks, or the client drains the queue
//! with [`AudioEngine::process_events`](crate::engine::AudioEngine::process_events)
//! from a thread of its choosing.

use crate::config::EVENT_QUEUE_CAPACITY;
use crate::error::{EngineError, Result};
use crate::objects::{FileId, ObjectId, QueueId, VirtualizerId};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The mixer could not produce audio in time for the device.
    BufferUnderrun,
    /// A streaming queue ran dry mid-stream and silence was substituted.
    QueueStarvation,
    /// An opened asset is buffered and ready for playback.
    DecoderReady,
    /// A stream finished draining after its end was signalled.
    EndOfStream,
    /// A looping object wrapped around to the beginning.
    Looped,
}

/// Which object reported the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    Engine,
    Queue(QueueId),
    File(FileId),
    Object(ObjectId),
    Virtualizer(VirtualizerId),
}

impl From<QueueId> for EventSource {
    fn from(id: QueueId) -> Self {
        Self::Queue(id)
    }
}

impl From<FileId> for EventSource {
    fn from(id: FileId) -> Self {
        Self::File(id)
    }
}

impl From<ObjectId> for EventSource {
    fn from(id: ObjectId) -> Self {
        Self::Object(id)
    }
}

impl From<VirtualizerId> for EventSource {
    fn from(id: VirtualizerId) -> Self {
        Self::Virtualizer(id)
    }
}

/// An event record delivered to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub source: EventSource,
}

pub type EventCallback = Box<dyn Fn(EngineEvent) + Send + Sync + 'static>;

/// Non-blocking event producer handle, shared by the render tick and the
/// decode thread.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Sender<EngineEvent>,
    rx: Receiver<EngineEvent>,
}

impl EventSink {
    /// Enqueue an event without blocking; drops the oldest unread event
    /// when the queue is full.
    pub fn emit(&self, kind: EventKind, source: EventSource) {
        let event = EngineEvent { kind, source };
        if let Err(TrySendError::Full(event)) = self.tx.try_send(event) {
            let _ = self.rx.try_recv();
            if self.tx.try_send(event).is_err() {
                log::warn!("event queue full, dropped {:?}", event.kind);
            }
        }
    }
}

struct CallbackTable {
    global: Mutex<Option<EventCallback>>,
    per_source: Mutex<HashMap<EventSource, EventCallback>>,
}

impl CallbackTable {
    fn dispatch(&self, event: EngineEvent) {
        if let Ok(global) = self.global.lock() {
            if let Some(callback) = global.as_ref() {
                callback(event);
            }
        }
        if let Ok(per_source) = self.per_source.lock() {
            if let Some(callback) = per_source.get(&event.source) {
                callback(event);
            }
        }
    }
}

/// Owns the event queue and the configured delivery strategy.
pub(crate) struct EventDispatcher {
    sink: EventSink,
    rx: Receiver<EngineEvent>,
    callbacks: Arc<CallbackTable>,
    uses_thread: bool,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub fn new(use_event_thread: bool) -> Self {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        let sink = EventSink {
            tx,
            rx: rx.clone(),
        };
        let callbacks = Arc::new(CallbackTable {
            global: Mutex::new(None),
            per_source: Mutex::new(HashMap::new()),
        });

        let mut dispatcher = Self {
            sink,
            rx,
            callbacks,
            uses_thread: use_event_thread,
            shutdown_tx: None,
            thread: None,
        };
        if use_event_thread {
            dispatcher.spawn_thread();
        }
        dispatcher
    }

    fn spawn_thread(&mut self) {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let rx = self.rx.clone();
        let callbacks = self.callbacks.clone();
        let thread = std::thread::Builder::new()
            .name("orbisonic-events".into())
            .spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(rx) -> message => match message {
                            Ok(event) => callbacks.dispatch(event),
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })
            .expect("failed to spawn event thread");
        self.shutdown_tx = Some(shutdown_tx);
        self.thread = Some(thread);
    }

    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn set_callback(&self, callback: Option<EventCallback>) {
        if let Ok(mut global) = self.callbacks.global.lock() {
            *global = callback;
        }
    }

    pub fn set_source_callback(&self, source: EventSource, callback: Option<EventCallback>) {
        if let Ok(mut per_source) = self.callbacks.per_source.lock() {
            match callback {
                Some(callback) => {
                    per_source.insert(source, callback);
                }
                None => {
                    per_source.remove(&source);
                }
            }
        }
    }

    /// Drain pending events on the calling thread. Only supported when the
    /// engine was configured without an event thread.
    pub fn pump(&self) -> Result<usize> {
        if self.uses_thread {
            return Err(EngineError::NotSupported);
        }
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.callbacks.dispatch(event);
            delivered += 1;
        }
        Ok(delivered)
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue_source(slot: usize) -> EventSource {
        EventSource::Queue(QueueId {
            slot,
            generation: 0,
        })
    }

    #[test]
    fn test_pumped_delivery() {
        let dispatcher = EventDispatcher::new(false);
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        dispatcher.set_callback(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let sink = dispatcher.sink();
        sink.emit(EventKind::QueueStarvation, queue_source(0));
        sink.emit(EventKind::EndOfStream, queue_source(0));
        assert_eq!(dispatcher.pump().unwrap(), 2);
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.pump().unwrap(), 0);
    }

    #[test]
    fn test_pump_rejected_with_event_thread() {
        let dispatcher = EventDispatcher::new(true);
        assert!(matches!(
            dispatcher.pump(),
            Err(EngineError::NotSupported)
        ));
    }

    #[test]
    fn test_threaded_delivery() {
        let dispatcher = EventDispatcher::new(true);
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        dispatcher.set_callback(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        dispatcher.sink().emit(EventKind::BufferUnderrun, EventSource::Engine);
        for _ in 0..100 {
            if delivered.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let dispatcher = EventDispatcher::new(false);
        let sink = dispatcher.sink();
        for i in 0..EVENT_QUEUE_CAPACITY + 10 {
            sink.emit(EventKind::QueueStarvation, queue_source(i));
        }
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        dispatcher.set_callback(Some(Box::new(move |event| {
            log.lock().unwrap().push(event.source);
        })));
        let delivered = dispatcher.pump().unwrap();
        assert_eq!(delivered, EVENT_QUEUE_CAPACITY);
        // The oldest events were displaced; the newest survived.
        let received = received.lock().unwrap();
        assert_eq!(*received.last().unwrap(), queue_source(EVENT_QUEUE_CAPACITY + 9));
        assert_eq!(*received.first().unwrap(), queue_source(10));
    }

    #[test]
    fn test_per_source_callback_filtering() {
        let dispatcher = EventDispatcher::new(false);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        dispatcher.set_source_callback(
            queue_source(1),
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let sink = dispatcher.sink();
        sink.emit(EventKind::QueueStarvation, queue_source(0));
        sink.emit(EventKind::QueueStarvation, queue_source(1));
        dispatcher.pump().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        dispatcher.set_source_callback(queue_source(1), None);
        sink.emit(EventKind::QueueStarvation, queue_source(1));
        dispatcher.pump().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
