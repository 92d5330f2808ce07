use crate::config;
use crate::error::QueueError;
use crate::events::{EventBridge, QueueEvent};
use crate::model::SavedQueue;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Saves queue snapshots and returns the last one at startup.
pub trait SnapshotStore: Send {
    fn load(&mut self) -> Result<Option<SavedQueue>>;
    fn save(&mut self, saved: &SavedQueue) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `queue.json` in the configuration directory.
    pub fn in_config_dir() -> Result<Self> {
        Ok(Self::new(config::queue_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<SavedQueue>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read queue file {}", self.path.display()))?;
        let saved: SavedQueue = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse queue file {}", self.path.display()))?;
        Ok(Some(saved))
    }

    fn save(&mut self, saved: &SavedQueue) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(saved)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory slot. Clones share the slot, so a caller can keep one to look
/// at what was saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<SavedQueue>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_saved(saved: SavedQueue) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(saved))),
        }
    }

    pub fn latest(&self) -> Option<SavedQueue> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&mut self) -> Result<Option<SavedQueue>> {
        Ok(self.latest())
    }

    fn save(&mut self, saved: &SavedQueue) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(saved.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Background writer. Snapshots are saved off the queue thread; a backlog is
/// collapsed to the newest snapshot before each write.
pub struct Persister {
    tx: Option<Sender<SavedQueue>>,
    worker: Option<JoinHandle<()>>,
}

impl Persister {
    pub fn spawn(store: Box<dyn SnapshotStore>, policy: RetryPolicy, bridge: EventBridge) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(String::from("queue-persister"))
            .spawn(move || persist_loop(store, rx, policy, bridge));

        match worker {
            Ok(worker) => Self {
                tx: Some(tx),
                worker: Some(worker),
            },
            Err(err) => {
                error!(error = %err, "failed to start persister thread, snapshots will not be saved");
                Self {
                    tx: None,
                    worker: None,
                }
            }
        }
    }

    /// Queues a snapshot for saving without waiting for the write.
    pub fn submit(&self, saved: SavedQueue) {
        if let Some(tx) = &self.tx
            && tx.send(saved).is_err()
        {
            warn!("persister thread is gone, snapshot dropped");
        }
    }

    /// Lets the writer drain what is queued, then joins it.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("persister thread panicked");
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn persist_loop(
    mut store: Box<dyn SnapshotStore>,
    rx: Receiver<SavedQueue>,
    policy: RetryPolicy,
    bridge: EventBridge,
) {
    while let Ok(mut saved) = rx.recv() {
        while let Ok(newer) = rx.try_recv() {
            saved = newer;
        }

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match store.save(&saved) {
                Ok(()) => {
                    debug!(revision = saved.revision, attempt, "queue snapshot saved");
                    break;
                }
                Err(err) if attempt < max_attempts => {
                    let reason = format!("{err:#}");
                    warn!(attempt, error = %reason, "saving queue snapshot failed, retrying");
                    thread::sleep(policy.backoff * attempt);
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    error!(attempts = attempt, error = %reason, "giving up on queue snapshot");
                    bridge.publish(QueueEvent::PersistenceFailed {
                        attempts: attempt,
                        error: QueueError::PersistenceFailure(reason),
                    });
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LoopMode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct FlakyStore {
        failures_left: Arc<AtomicU32>,
        inner: MemoryStore,
    }

    impl SnapshotStore for FlakyStore {
        fn load(&mut self) -> Result<Option<SavedQueue>> {
            self.inner.load()
        }

        fn save(&mut self, saved: &SavedQueue) -> Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("disk full");
            }
            self.inner.save(saved)
        }
    }

    fn saved(revision: u64) -> SavedQueue {
        SavedQueue {
            revision,
            loop_mode: LoopMode::One,
            ..SavedQueue::default()
        }
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn json_store_round_trip() {
        let dir = tempdir().expect("tempdir");
        let mut store = JsonFileStore::new(dir.path().join("nested").join("queue.json"));
        assert_eq!(store.load().expect("load"), None);

        store.save(&saved(4)).expect("save");
        assert_eq!(store.load().expect("load"), Some(saved(4)));
    }

    #[test]
    fn json_store_reports_corrupt_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("queue.json");
        fs::write(&path, "{not json").expect("write");

        let err = JsonFileStore::new(&path).load().expect_err("corrupt");
        assert!(format!("{err:#}").contains("failed to parse queue file"));
    }

    #[test]
    fn persister_retries_then_saves() {
        let memory = MemoryStore::new();
        let failures = Arc::new(AtomicU32::new(2));
        let store = FlakyStore {
            failures_left: Arc::clone(&failures),
            inner: memory.clone(),
        };

        let mut persister = Persister::spawn(Box::new(store), quick_policy(3), EventBridge::new());
        persister.submit(saved(9));
        persister.shutdown();

        assert_eq!(memory.latest().map(|saved| saved.revision), Some(9));
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn persister_reports_exhausted_retries() {
        let bridge = EventBridge::new();
        let events = bridge.subscribe();
        let store = FlakyStore {
            failures_left: Arc::new(AtomicU32::new(10)),
            inner: MemoryStore::new(),
        };

        let mut persister = Persister::spawn(Box::new(store), quick_policy(2), bridge);
        persister.submit(saved(1));
        persister.shutdown();

        match events.try_recv() {
            Ok(QueueEvent::PersistenceFailed { attempts, error }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(error, QueueError::PersistenceFailure(reason) if reason.contains("disk full")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
