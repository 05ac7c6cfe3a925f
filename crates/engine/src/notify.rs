//! Ordered delivery of change-list events to listeners
//!
//! Events are queued in publication order and delivered on one dispatcher
//! thread, so every listener observes the same order. A panicking listener
//! is logged and skipped.

use crate::error::{EngineError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, warn};
use vcsync_model::ChangeListEvent;

/// Subscriber to change-list events
pub trait ChangeListListener: Send + Sync {
    fn on_event(&self, event: &ChangeListEvent);
}

impl<F> ChangeListListener for F
where
    F: Fn(&ChangeListEvent) + Send + Sync,
{
    fn on_event(&self, event: &ChangeListEvent) {
        self(event)
    }
}

/// Handle returned by [`Notifier::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listeners = Arc<RwLock<Vec<(ListenerId, Arc<dyn ChangeListListener>)>>>;

enum Message {
    Event(ChangeListEvent),
    Flush(Sender<()>),
}

/// Single-thread event dispatcher
pub struct Notifier {
    listeners: Listeners,
    next_id: AtomicU64,
    sender: Mutex<Option<Sender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: Option<ThreadId>,
}

impl Notifier {
    /// Start the dispatcher thread
    pub fn start() -> Result<Self> {
        let listeners: Listeners = Arc::new(RwLock::new(Vec::new()));
        let (sender, receiver) = unbounded();

        let thread_listeners = listeners.clone();
        let handle = thread::Builder::new()
            .name("vcsync-notify".to_string())
            .spawn(move || dispatch_loop(receiver, thread_listeners))
            .map_err(|e| EngineError::Internal(format!("Failed to spawn notifier: {}", e)))?;

        Ok(Self {
            listeners,
            next_id: AtomicU64::new(1),
            sender: Mutex::new(Some(sender)),
            worker_id: Some(handle.thread().id()),
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Queue `event` for delivery
    pub fn publish(&self, event: ChangeListEvent) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                let _ = sender.send(Message::Event(event));
            }
            None => debug!("Notifier shut down, dropping {:?}", event),
        }
    }

    /// Queue `events` for delivery, keeping their order
    pub fn publish_all(&self, events: impl IntoIterator<Item = ChangeListEvent>) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        for event in events {
            let _ = sender.send(Message::Event(event));
        }
    }

    /// Wait until every event queued before this call has been delivered
    ///
    /// Returns false if `timeout` elapses first. Called from a listener it
    /// returns immediately.
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.worker_id == Some(thread::current().id()) {
            return true;
        }

        let (tx, rx) = bounded(1);
        {
            let sender = self.sender.lock();
            let Some(sender) = sender.as_ref() else {
                return true;
            };
            if sender.send(Message::Flush(tx)).is_err() {
                return true;
            }
        }

        match rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(_) => {
                warn!("Event delivery did not drain within {:?}", timeout);
                false
            }
        }
    }

    /// Deliver what is queued, then stop the dispatcher thread
    pub fn shutdown(&self) {
        // Dropping the sender ends the loop once the queue is drained
        if self.sender.lock().take().is_none() {
            return;
        }
        if self.worker_id == Some(thread::current().id()) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Notifier thread panicked");
            }
        }
        debug!("Notifier shut down");
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(receiver: Receiver<Message>, listeners: Listeners) {
    for message in receiver {
        match message {
            Message::Event(event) => {
                // Snapshot so listeners may (un)subscribe while being called
                let snapshot: Vec<Arc<dyn ChangeListListener>> = listeners
                    .read()
                    .iter()
                    .map(|(_, listener)| listener.clone())
                    .collect();
                for listener in snapshot {
                    if catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))).is_err() {
                        error!("Change list listener panicked on {:?}", event);
                    }
                }
            }
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
