//! Single-consumer event dispatch.
//!
//! The dispatcher pairs an unbounded channel with one dedicated worker
//! thread. Producers enqueue from any thread in a short, bounded critical
//! section; the worker pops one event at a time and runs the handler
//! registered for its tag to completion before popping the next. This is the
//! mutation path: handler code runs single-threaded and needs no internal
//! locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::error::{DispatchError, DispatchResult};

/// An event that can cross the dispatcher, identified by a tag from a closed
/// catalog.
pub trait Dispatchable: Send + 'static {
    type Tag: Copy + Eq + std::hash::Hash + std::fmt::Debug + Send + 'static;

    fn tag(&self) -> Self::Tag;
}

/// Handler invoked on the worker thread for one event tag.
pub type Handler<S, E> = Box<dyn FnMut(&mut S, E) + Send>;

/// The closed set of event kinds a dispatcher executes, declared at
/// construction. An event arriving with a tag missing from this table is a
/// wiring defect.
pub struct HandlerTable<S, E: Dispatchable> {
    handlers: HashMap<E::Tag, Handler<S, E>>,
}

impl<S, E: Dispatchable> HandlerTable<S, E> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `tag`, replacing any previous registration.
    pub fn register<F>(&mut self, tag: E::Tag, handler: F)
    where
        F: FnMut(&mut S, E) + Send + 'static,
    {
        self.handlers.insert(tag, Box::new(handler));
    }

    pub fn is_registered(&self, tag: E::Tag) -> bool {
        self.handlers.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S, E: Dispatchable> Default for HandlerTable<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

enum Envelope<E> {
    Event(E),
    Stop,
}

/// How teardown treats events still in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Process every already-queued event to completion, then stop.
    Drain,
    /// Drop already-queued events unprocessed.
    Discard,
}

/// Ordered, single-consumer event dispatcher.
///
/// Events from one producer retain their relative order; across producers the
/// order is arrival order into the shared queue. Once shutdown begins, no new
/// enqueues are accepted.
pub struct EventDispatcher<E: Dispatchable> {
    sender: mpsc::UnboundedSender<Envelope<E>>,
    accepting: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl<E: Dispatchable> EventDispatcher<E> {
    /// Spawn the worker thread. The worker owns `state` and runs every
    /// handler against it; `state` is dropped when the worker exits.
    pub fn spawn<S: Send + 'static>(
        name: &str,
        state: S,
        mut handlers: HandlerTable<S, E>,
    ) -> DispatchResult<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope<E>>();
        let accepting = Arc::new(AtomicBool::new(true));
        let discard = Arc::new(AtomicBool::new(false));

        let worker_discard = Arc::clone(&discard);
        let worker = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut state = state;
            while let Some(envelope) = receiver.blocking_recv() {
                let event = match envelope {
                    Envelope::Event(event) => event,
                    Envelope::Stop => break,
                };
                if worker_discard.load(Ordering::Acquire) {
                    tracing::trace!(tag = ?event.tag(), "discarding queued event on shutdown");
                    continue;
                }
                match handlers.handlers.get_mut(&event.tag()) {
                    Some(handler) => handler(&mut state, event),
                    None => {
                        // Wiring defect: the catalog is closed at construction.
                        let error =
                            DispatchError::UnregisteredTag(format!("{:?}", event.tag()));
                        debug_assert!(false, "{error}");
                        tracing::error!(%error, "dropping event");
                    }
                }
            }
        })?;

        Ok(Self {
            sender,
            accepting,
            discard,
            worker: Some(worker),
        })
    }

    /// Enqueue an event from any thread. Never blocks on the consumer.
    pub fn enqueue(&self, event: E) -> DispatchResult<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }
        self.sender.send(Envelope::Event(event)).map_err(|_| DispatchError::WorkerGone)
    }

    /// Whether the dispatcher still accepts events.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stop intake and tear down the worker.
    ///
    /// Already-queued events are either drained to completion or discarded,
    /// never partially processed. Idempotent; the second call is a no-op.
    pub fn shutdown(&mut self, mode: ShutdownMode) {
        self.accepting.store(false, Ordering::Release);
        if mode == ShutdownMode::Discard {
            self.discard.store(true, Ordering::Release);
        }
        // The stop marker queues behind any events still to be drained.
        let _ = self.sender.send(Envelope::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("dispatcher worker panicked during shutdown");
            }
        }
    }
}

impl<E: Dispatchable> Drop for EventDispatcher<E> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown(ShutdownMode::Discard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Mutex;

    #[derive(Debug)]
    enum TestEvent {
        Record(u32),
        Gate,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestTag {
        Record,
        Gate,
    }

    impl Dispatchable for TestEvent {
        type Tag = TestTag;

        fn tag(&self) -> TestTag {
            match self {
                TestEvent::Record(_) => TestTag::Record,
                TestEvent::Gate => TestTag::Gate,
            }
        }
    }

    type Seen = Arc<Mutex<Vec<u32>>>;

    fn recording_table(seen: &Seen) -> HandlerTable<(), TestEvent> {
        let mut table = HandlerTable::new();
        let seen = Arc::clone(seen);
        table.register(TestTag::Record, move |_state, event| {
            if let TestEvent::Record(value) = event {
                seen.lock().unwrap().push(value);
            }
        });
        table
    }

    #[test]
    fn test_drain_processes_all_events_in_order() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher =
            EventDispatcher::spawn("test-drain", (), recording_table(&seen)).unwrap();

        for value in 0..100 {
            dispatcher.enqueue(TestEvent::Record(value)).unwrap();
        }
        dispatcher.shutdown(ShutdownMode::Drain);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 100);
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_discard_drops_queued_events() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = std_mpsc::channel::<()>();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();

        let mut table = recording_table(&seen);
        table.register(TestTag::Gate, move |_state, _event| {
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        let mut dispatcher = EventDispatcher::spawn("test-discard", (), table).unwrap();
        dispatcher.enqueue(TestEvent::Gate).unwrap();
        // Hold the worker inside the gate handler so the rest stays queued.
        entered_rx.recv().unwrap();
        for value in 0..50 {
            dispatcher.enqueue(TestEvent::Record(value)).unwrap();
        }

        let releaser = std::thread::spawn(move || {
            release_tx.send(()).unwrap();
        });
        dispatcher.shutdown(ShutdownMode::Discard);
        releaser.join().unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_enqueue_rejected_after_shutdown() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher =
            EventDispatcher::spawn("test-closed", (), recording_table(&seen)).unwrap();
        dispatcher.shutdown(ShutdownMode::Drain);

        assert!(!dispatcher.is_accepting());
        assert!(matches!(
            dispatcher.enqueue(TestEvent::Record(1)),
            Err(DispatchError::ShuttingDown)
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher =
            EventDispatcher::spawn("test-idem", (), recording_table(&seen)).unwrap();
        dispatcher.enqueue(TestEvent::Record(7)).unwrap();
        dispatcher.shutdown(ShutdownMode::Drain);
        dispatcher.shutdown(ShutdownMode::Drain);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_cross_thread_enqueue_keeps_per_producer_order() {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Arc::new(
            EventDispatcher::spawn("test-producers", (), recording_table(&seen)).unwrap(),
        );

        let producers: Vec<_> = (0..4u32)
            .map(|producer| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    for step in 0..25u32 {
                        dispatcher.enqueue(TestEvent::Record(producer * 100 + step)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut dispatcher = Arc::into_inner(dispatcher).unwrap();
        dispatcher.shutdown(ShutdownMode::Drain);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 100);
        // Per-producer relative order survives interleaving.
        for producer in 0..4u32 {
            let steps: Vec<_> =
                seen.iter().filter(|v| **v / 100 == producer).map(|v| *v % 100).collect();
            assert_eq!(steps, (0..25).collect::<Vec<_>>());
        }
    }
}
