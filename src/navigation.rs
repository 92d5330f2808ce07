use crate::error::{QueueError, Result};
use crate::history::{DEFAULT_HISTORY_LIMIT, HistoryStack};
use crate::model::{ItemId, LoopMode, PlaybackState, QueueItem, SavedQueue, TrackRef, WrapPolicy};
use crate::queue::QueueStore;
use crate::shuffle::ShuffleEngine;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_RESTART_THRESHOLD: Duration = Duration::from_secs(3);

/// Result of a navigation call, telling the transport what to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Navigation {
    /// Start playing this track from the beginning.
    Advanced(Arc<TrackRef>),
    /// Seek the current track back to zero without changing position.
    Restarted(Arc<TrackRef>),
    /// Ran off the end with loop disabled; playback halts.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct NavigationSettings {
    pub history_limit: usize,
    pub restart_threshold: Duration,
    pub wrap_policy: WrapPolicy,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            restart_threshold: DEFAULT_RESTART_THRESHOLD,
            wrap_policy: WrapPolicy::CurrentOrder,
        }
    }
}

/// next/previous/jump and loop wraparound on top of the queue, shuffle and
/// history. Owns all three so no caller can mutate them behind its back.
#[derive(Debug)]
pub struct NavigationController {
    store: QueueStore,
    shuffle: ShuffleEngine,
    history: HistoryStack,
    settings: NavigationSettings,
    state: PlaybackState,
}

impl NavigationController {
    pub fn new(settings: NavigationSettings, shuffle: ShuffleEngine) -> Self {
        Self {
            store: QueueStore::new(),
            shuffle,
            history: HistoryStack::new(settings.history_limit),
            settings,
            state: PlaybackState::Stopped,
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut QueueStore {
        &mut self.store
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn settings(&self) -> &NavigationSettings {
        &self.settings
    }

    pub fn current_track(&self) -> Option<Arc<TrackRef>> {
        self.store.current_item().map(|item| Arc::clone(&item.track))
    }

    pub fn add(&mut self, tracks: Vec<Arc<TrackRef>>, position: Option<usize>) -> Vec<ItemId> {
        self.store.add(tracks, position)
    }

    pub fn remove(&mut self, index: usize) -> Result<QueueItem> {
        let removed = self.store.remove(index)?;
        if self.store.is_empty() {
            self.state = PlaybackState::Stopped;
        }
        Ok(removed)
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        self.store.reorder(from, to)
    }

    pub fn clear(&mut self) {
        self.store.clear();
        self.history.clear();
        self.state = PlaybackState::Stopped;
    }

    pub fn set_loop(&mut self, mode: LoopMode) {
        self.store.set_loop_mode(mode);
    }

    /// Toggles shuffle without touching what is playing. On an empty queue the
    /// flag is still recorded but `EmptyQueue` is reported.
    pub fn set_shuffle(&mut self, enabled: bool) -> Result<bool> {
        let changed = if enabled {
            self.shuffle.enable(&mut self.store)
        } else {
            self.shuffle.disable(&mut self.store, &mut self.history)
        };
        if self.store.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        Ok(changed)
    }

    /// Begins playback at the current position.
    pub fn start(&mut self) -> Result<Navigation> {
        let track = self.current_track().ok_or(QueueError::EmptyQueue)?;
        self.state = PlaybackState::Playing;
        Ok(Navigation::Advanced(track))
    }

    pub fn next(&mut self) -> Result<Navigation> {
        let current = self.store.current_index().ok_or(QueueError::EmptyQueue)?;
        let len = self.store.len();

        let target = if current + 1 < len {
            Some(current + 1)
        } else {
            match self.store.loop_mode() {
                LoopMode::All => Some(self.wrap_target()),
                LoopMode::One => Some(current),
                LoopMode::None => None,
            }
        };

        let Some(target) = target else {
            debug!(current, "end of queue, stopping");
            self.state = PlaybackState::Stopped;
            return Ok(Navigation::Stopped);
        };

        if target != current {
            self.history.push_before(self.store.items(), Some(current));
        }
        self.store.set_current(target)?;
        self.state = PlaybackState::Playing;
        debug!(from = current, to = target, "advanced");
        self.current_track()
            .map(Navigation::Advanced)
            .ok_or(QueueError::EmptyQueue)
    }

    /// The current track played to its end. Loop-one replays it; otherwise
    /// this is `next`.
    pub fn track_finished(&mut self) -> Result<Navigation> {
        if self.store.loop_mode() != LoopMode::One {
            return self.next();
        }
        let track = self.current_track().ok_or(QueueError::EmptyQueue)?;
        self.state = PlaybackState::Playing;
        debug!(current = ?self.store.current_index(), "replaying finished track");
        Ok(Navigation::Restarted(track))
    }

    /// Restarts the current track when more than the restart threshold has
    /// played, otherwise retraces history.
    pub fn previous(&mut self, elapsed: Option<Duration>) -> Result<Navigation> {
        let current = self.store.current_index().ok_or(QueueError::EmptyQueue)?;

        if elapsed.is_some_and(|elapsed| elapsed > self.settings.restart_threshold) {
            let track = self.current_track().ok_or(QueueError::EmptyQueue)?;
            self.state = PlaybackState::Playing;
            debug!(current, "restarting current track");
            return Ok(Navigation::Restarted(track));
        }

        let fallback = current.saturating_sub(1);
        let target = match self.history.pop() {
            Some(entry) => entry.resolve(self.store.items()).unwrap_or(fallback),
            None => fallback,
        };
        self.store.set_current(target)?;
        self.state = PlaybackState::Playing;
        debug!(from = current, to = target, "stepped back");
        self.current_track()
            .map(Navigation::Advanced)
            .ok_or(QueueError::EmptyQueue)
    }

    pub fn jump(&mut self, index: usize) -> Result<Navigation> {
        if self.store.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        self.store.set_current(index)?;
        self.history.clear();
        self.state = PlaybackState::Playing;
        self.current_track()
            .map(Navigation::Advanced)
            .ok_or(QueueError::EmptyQueue)
    }

    /// Replaces the state with a saved snapshot. Positional history is
    /// meaningless afterwards; playback continues only if the same item is
    /// still current.
    pub fn rehydrate(&mut self, saved: SavedQueue) {
        let playing = self.store.current_item().map(|item| item.id);
        self.store.rehydrate(saved);
        self.history.clear();
        if self.store.current_item().map(|item| item.id) != playing || playing.is_none() {
            self.state = PlaybackState::Stopped;
        }
    }

    fn wrap_target(&self) -> usize {
        match self.settings.wrap_policy {
            WrapPolicy::CurrentOrder => 0,
            WrapPolicy::NaturalOrder => self
                .store
                .items()
                .iter()
                .enumerate()
                .min_by_key(|(_, item)| (item.track.natural_key(), item.inserted_at))
                .map(|(index, _)| index)
                .unwrap_or(0),
        }
    }
}
