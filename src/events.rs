use crate::error::QueueError;
use crate::model::{QueueSnapshot, SavedQueue, TrackRef};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Typed notifications published to the transport, persistence and UI layers.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    QueueChanged(QueueSnapshot),
    TrackAdvanced(Arc<TrackRef>),
    ShuffleChanged(bool),
    PersistenceFailed { attempts: u32, error: QueueError },
}

/// Fan-out of queue events over channels. Clones share the subscriber list.
#[derive(Debug, Clone, Default)]
pub struct EventBridge {
    subscribers: Arc<Mutex<Vec<Sender<QueueEvent>>>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<QueueEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber and forgets the ones whose
    /// receiver has been dropped.
    pub fn publish(&self, event: QueueEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Holds inbound state echoes back while a local update is being applied so
/// a stale echo cannot overwrite it.
#[derive(Debug, Default)]
pub struct EchoGate {
    updating: bool,
    staged: Option<SavedQueue>,
}

impl EchoGate {
    pub fn begin_update(&mut self) {
        self.updating = true;
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    /// Returns the echo when it can be reconciled right away, otherwise stages
    /// it. Only the newest staged echo is kept.
    pub fn offer(&mut self, echo: SavedQueue) -> Option<SavedQueue> {
        if !self.updating {
            return Some(echo);
        }
        match &self.staged {
            Some(staged) if staged.revision >= echo.revision => {
                debug!(revision = echo.revision, "discarding older staged echo");
            }
            _ => self.staged = Some(echo),
        }
        None
    }

    /// Ends the update and hands back whatever echo arrived meanwhile.
    pub fn finish_update(&mut self) -> Option<SavedQueue> {
        self.updating = false;
        self.staged.take()
    }
}

/// An echo is stale unless it carries a revision newer than the local one.
pub fn is_stale(echo: &SavedQueue, local_revision: u64) -> bool {
    echo.revision <= local_revision
}
