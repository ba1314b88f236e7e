//! Progress events of a dispatch session
//!
//! Consumers either register callbacks per [`EventKind`] with
//! [`EventNotifier::on`] or take an ordered stream with
//! [`EventNotifier::subscribe`]. Both see the same sequence.
//!
//! Within one dispatch call every index gets at most one terminal event
//! (`Confirmation`, `Error` or `Timeout`), `FinishSending` follows the last
//! tracker, and `Finally` always comes last.

use crate::error::DispatchError;
use crate::types::Signature;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// A progress event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// The network accepted the initial broadcast of transaction `index`
    Sent {
        signature: Signature,
        index: usize,
        total: usize,
    },
    /// Transaction `index` reached a successful terminal status
    Confirmation {
        index: usize,
        signature: Signature,
        slot: u64,
    },
    /// A transaction failed (`index` set) or the whole call aborted (`None`)
    Error {
        index: Option<usize>,
        error: DispatchError,
    },
    /// No terminal status for transaction `index` before the local timeout
    Timeout { index: usize, error: DispatchError },
    /// Every tracker of the call has finished
    FinishSending,
    /// The call is over, successfully or not
    Finally,
}

/// Discriminant of [`DispatchEvent`], used to register callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Sent,
    Confirmation,
    Error,
    Timeout,
    FinishSending,
    Finally,
}

impl DispatchEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Sent { .. } => EventKind::Sent,
            Self::Confirmation { .. } => EventKind::Confirmation,
            Self::Error { .. } => EventKind::Error,
            Self::Timeout { .. } => EventKind::Timeout,
            Self::FinishSending => EventKind::FinishSending,
            Self::Finally => EventKind::Finally,
        }
    }

    /// Record index the event refers to
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Sent { index, .. }
            | Self::Confirmation { index, .. }
            | Self::Timeout { index, .. } => Some(*index),
            Self::Error { index, .. } => *index,
            Self::FinishSending | Self::Finally => None,
        }
    }

    /// Whether this event resolves its index
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmation { .. } | Self::Timeout { .. } | Self::Error { index: Some(_), .. }
        )
    }
}

type Handler = Arc<dyn Fn(&DispatchEvent) + Send + Sync>;

/// Fan-out of dispatch events to callbacks and stream subscribers
pub struct EventNotifier {
    sender: broadcast::Sender<DispatchEvent>,
    handlers: Mutex<Vec<(EventKind, Handler)>>,
    resolved: Mutex<HashSet<usize>>,
}

impl EventNotifier {
    /// `capacity` bounds how many events a slow stream subscriber may lag behind
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            handlers: Mutex::new(Vec::new()),
            resolved: Mutex::new(HashSet::new()),
        }
    }

    /// Call `handler` for every event of `kind`
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        lock(&self.handlers).push((kind, Arc::new(handler)));
    }

    /// Ordered stream of all events emitted from now on
    ///
    /// Use `recv().await` from async code or `blocking_recv()` from a plain thread.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Start a new dispatch call
    pub(crate) fn begin(&self) {
        lock(&self.resolved).clear();
    }

    pub(crate) fn sent(&self, signature: Signature, index: usize, total: usize) {
        self.emit(DispatchEvent::Sent {
            signature,
            index,
            total,
        });
    }

    pub(crate) fn confirmation(&self, index: usize, signature: Signature, slot: u64) {
        self.emit(DispatchEvent::Confirmation {
            index,
            signature,
            slot,
        });
    }

    /// Report an error; `index` is `None` for errors that abort the whole call
    pub(crate) fn error(&self, index: Option<usize>, error: DispatchError) {
        self.emit(DispatchEvent::Error { index, error });
    }

    pub(crate) fn timeout(&self, index: usize) {
        self.emit(DispatchEvent::Timeout {
            index,
            error: DispatchError::DispatchTimeout { index },
        });
    }

    pub(crate) fn finish_sending(&self) {
        self.emit(DispatchEvent::FinishSending);
    }

    pub(crate) fn finally(&self) {
        self.emit(DispatchEvent::Finally);
    }

    fn emit(&self, event: DispatchEvent) {
        if event.is_terminal() {
            if let Some(index) = event.index() {
                if !lock(&self.resolved).insert(index) {
                    tracing::debug!("Dropping duplicate terminal event for index {}", index);
                    return;
                }
            }
        }

        // handlers may register more handlers; call them without holding the lock
        let kind = event.kind();
        let handlers: Vec<Handler> = lock(&self.handlers)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(&event);
        }

        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
