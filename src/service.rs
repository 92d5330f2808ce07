use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{self, EchoGate, EventBridge, QueueEvent};
use crate::guard::{self, Command, GuardedState, Outcome, QueueHandle, RateLimit, TransportControl};
use crate::model::{ItemId, PlaybackState, QueueSnapshot, SavedQueue, TrackRef};
use crate::navigation::{Navigation, NavigationController};
use crate::persistence::{Persister, RetryPolicy, SnapshotStore};
use crate::shuffle::ShuffleEngine;
use crate::transport::Transport;
use anyhow::Context;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Owns the guard thread and everything behind it. Dropping the service
/// flushes pending work and waits for the persister to drain.
pub struct QueueService {
    handle: QueueHandle,
    worker: Option<JoinHandle<()>>,
}

impl QueueService {
    pub fn spawn(
        config: &EngineConfig,
        store: Box<dyn SnapshotStore>,
        transport: Box<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let bridge = EventBridge::new();
        let mut state = EngineState::new(config, store, transport, bridge.clone());
        let limit = RateLimit {
            interval: config.coalesce_interval(),
            max_delay: config.coalesce_max_delay(),
        };

        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(String::from("queue-guard"))
            .spawn(move || {
                guard::run(&mut state, rx, limit);
                state.shutdown();
            })
            .context("failed to start queue guard thread")?;
        info!("queue service started");

        Ok(Self {
            handle: QueueHandle::new(tx, bridge),
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.handle.shutdown();
        if worker.join().is_err() {
            error!("queue guard thread panicked");
        }
        info!("queue service stopped");
    }
}

impl Drop for QueueService {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Observed {
    current: Option<ItemId>,
    shuffle: bool,
}

/// The state the guard serializes access to: navigation, transport, event
/// fan-out, persistence and echo staging.
struct EngineState {
    nav: NavigationController,
    transport: Box<dyn Transport>,
    bridge: EventBridge,
    persister: Persister,
    echoes: EchoGate,
}

impl EngineState {
    fn new(
        config: &EngineConfig,
        mut store: Box<dyn SnapshotStore>,
        transport: Box<dyn Transport>,
        bridge: EventBridge,
    ) -> Self {
        let shuffle = match config.shuffle_seed {
            Some(seed) => ShuffleEngine::seeded(seed),
            None => ShuffleEngine::from_os_rng(),
        };
        let mut nav = NavigationController::new(config.navigation(), shuffle);

        match store.load() {
            Ok(Some(saved)) => {
                info!(items = saved.items.len(), revision = saved.revision, "restoring saved queue");
                nav.rehydrate(saved);
                nav.store_mut().take_dirty();
            }
            Ok(None) => debug!("no saved queue"),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(error = %reason, "could not load saved queue, starting empty");
            }
        }

        let policy = RetryPolicy {
            max_attempts: config.persist_max_attempts,
            backoff: config.persist_backoff(),
        };
        let persister = Persister::spawn(store, policy, bridge.clone());

        Self {
            nav,
            transport,
            bridge,
            persister,
            echoes: EchoGate::default(),
        }
    }

    /// Runs one state change with echoes held back, then publishes it and
    /// reconciles whatever echo arrived meanwhile.
    fn update(&mut self, change: impl FnOnce(&mut Self) -> Result<Outcome>) -> Result<Outcome> {
        self.echoes.begin_update();
        let before = self.observe();
        let result = change(self);
        self.publish(&before, result.as_ref().ok());

        if let Some(echo) = self.echoes.finish_update() {
            self.reconcile(echo);
        }
        result
    }

    fn observe(&self) -> Observed {
        let store = self.nav.store();
        Observed {
            current: store.current_item().map(|item| item.id),
            shuffle: store.shuffle(),
        }
    }

    fn execute(&mut self, command: &Command, repeat: usize) -> Result<Outcome> {
        match command {
            Command::Add { tracks, position } => {
                Ok(Outcome::Added(self.nav.add(tracks.clone(), *position)))
            }
            Command::Remove(index) => self.nav.remove(*index).map(Outcome::Removed),
            Command::Reorder { from, to } => {
                self.nav.reorder(*from, *to).map(|()| Outcome::Applied)
            }
            Command::Clear => {
                self.nav.clear();
                Ok(Outcome::Applied)
            }
            Command::SetShuffle(enabled) => self.nav.set_shuffle(*enabled).map(Outcome::ShuffleSet),
            Command::SetLoop(mode) => {
                self.nav.set_loop(*mode);
                Ok(Outcome::Applied)
            }
            Command::Next => self.advance(repeat).map(Outcome::Navigated),
            Command::Previous => self.retreat(repeat).map(Outcome::Navigated),
            Command::Jump(index) => self.nav.jump(*index).map(Outcome::Navigated),
            Command::Start => self.nav.start().map(Outcome::Navigated),
        }
    }

    fn advance(&mut self, steps: usize) -> Result<Navigation> {
        let mut last = self.nav.next()?;
        for _ in 1..steps {
            if last == Navigation::Stopped {
                break;
            }
            last = self.nav.next()?;
        }
        Ok(last)
    }

    // Only the first step looks at the elapsed position; once it restarted
    // the track, further presses walk back through history.
    fn retreat(&mut self, steps: usize) -> Result<Navigation> {
        let mut last = self.nav.previous(self.transport.position())?;
        for _ in 1..steps {
            last = self.nav.previous(None)?;
        }
        Ok(last)
    }

    fn publish(&mut self, before: &Observed, outcome: Option<&Outcome>) {
        let store = self.nav.store_mut();
        if store.take_dirty() {
            store.bump_revision();
            let snapshot = store.snapshot();
            let saved = store.saved();
            self.bridge.publish(QueueEvent::QueueChanged(snapshot));
            self.persister.submit(saved);
        }

        let shuffle = self.nav.store().shuffle();
        if shuffle != before.shuffle {
            self.bridge.publish(QueueEvent::ShuffleChanged(shuffle));
        }

        match outcome {
            Some(Outcome::Navigated(Navigation::Advanced(track))) => self.play(track),
            Some(Outcome::Navigated(Navigation::Restarted(_))) => self.transport.restart(),
            Some(Outcome::Navigated(Navigation::Stopped)) => self.transport.stop(),
            _ => self.follow_current(before.current),
        }
    }

    /// Keeps the transport on the current item after structural edits, e.g.
    /// when the playing entry was removed.
    fn follow_current(&mut self, before: Option<ItemId>) {
        let current = self
            .nav
            .store()
            .current_item()
            .map(|item| (item.id, Arc::clone(&item.track)));
        match current {
            None if before.is_some() => self.transport.stop(),
            Some((id, track))
                if Some(id) != before && self.nav.state() == PlaybackState::Playing =>
            {
                self.play(&track)
            }
            _ => {}
        }
    }

    fn play(&mut self, track: &Arc<TrackRef>) {
        if let Err(err) = self.transport.play(track) {
            let reason = format!("{err:#}");
            warn!(track = %track.id, error = %reason, "transport refused track");
        }
        self.bridge
            .publish(QueueEvent::TrackAdvanced(Arc::clone(track)));
    }

    fn reconcile(&mut self, echo: SavedQueue) {
        let local = self.nav.store().revision();
        if events::is_stale(&echo, local) {
            debug!(echo = echo.revision, local, "dropping stale echo");
            return;
        }

        info!(from = local, to = echo.revision, "applying external queue state");
        let before = self.observe();
        self.nav.rehydrate(echo);
        let store = self.nav.store_mut();
        store.take_dirty();
        self.bridge
            .publish(QueueEvent::QueueChanged(store.snapshot()));

        let after = self.observe();
        if after.shuffle != before.shuffle {
            self.bridge
                .publish(QueueEvent::ShuffleChanged(after.shuffle));
        }
        if after.current != before.current && before.current.is_some() {
            self.transport.stop();
        }
    }

    fn shutdown(&mut self) {
        self.persister.shutdown();
    }
}

impl GuardedState for EngineState {
    fn apply(&mut self, command: &Command, repeat: usize) -> Result<Outcome> {
        let result = self.update(|state| state.execute(command, repeat));
        if let Err(err) = &result {
            debug!(command = ?command, error = %err, "command rejected");
        }
        result
    }

    fn begin_update(&mut self) {
        self.echoes.begin_update();
    }

    fn offer_echo(&mut self, echo: SavedQueue) {
        if let Some(echo) = self.echoes.offer(echo) {
            self.reconcile(echo);
        }
    }

    fn control(&mut self, control: TransportControl) -> Option<Duration> {
        match control {
            TransportControl::Pause => self.transport.pause(),
            TransportControl::Resume => self.transport.resume(),
            TransportControl::Seek(position) => {
                if let Err(err) = self.transport.seek_to(position) {
                    let reason = format!("{err:#}");
                    warn!(error = %reason, "seek failed");
                }
            }
        }
        self.transport.position()
    }

    fn tick(&mut self) {
        if self.nav.state() == PlaybackState::Playing
            && !self.transport.is_paused()
            && self.transport.is_finished()
        {
            debug!("track finished");
            let result = self.update(|state| state.nav.track_finished().map(Outcome::Navigated));
            if let Err(err) = result {
                debug!(error = %err, "could not move past finished track");
            }
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        self.nav.store().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LoopMode;
    use crate::persistence::MemoryStore;
    use crate::transport::NullTransport;

    fn config() -> EngineConfig {
        EngineConfig {
            coalesce_interval_ms: 0,
            shuffle_seed: Some(11),
            ..EngineConfig::default()
        }
    }

    fn tracks(names: &[&str]) -> Vec<Arc<TrackRef>> {
        names
            .iter()
            .map(|name| {
                Arc::new(TrackRef::new(
                    *name,
                    format!("{name}.mp3"),
                    Some(Duration::from_secs(30)),
                ))
            })
            .collect()
    }

    fn state_with(store: MemoryStore) -> EngineState {
        EngineState::new(
            &config(),
            Box::new(store),
            Box::new(NullTransport::new()),
            EventBridge::new(),
        )
    }

    #[test]
    fn mutations_bump_revision_and_publish() {
        let mut state = state_with(MemoryStore::new());
        let events = state.bridge.subscribe();

        state
            .apply(&Command::Add { tracks: tracks(&["a", "b"]), position: None }, 1)
            .expect("add");
        assert_eq!(state.snapshot().revision, 1);
        assert!(matches!(events.try_recv(), Ok(QueueEvent::QueueChanged(snapshot)) if snapshot.items.len() == 2));

        state.apply(&Command::Start, 1).expect("start");
        assert!(matches!(events.try_recv(), Ok(QueueEvent::TrackAdvanced(track)) if track.id.as_str() == "a"));
        assert_eq!(state.transport.current_track().map(|id| id.as_str()), Some("a"));
    }

    #[test]
    fn shuffle_toggle_does_not_announce_a_new_track() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a", "b", "c"]), position: None }, 1)
            .expect("add");
        state.apply(&Command::Jump(1), 1).expect("jump");
        let events = state.bridge.subscribe();

        state.apply(&Command::SetShuffle(true), 1).expect("shuffle");
        let seen: Vec<_> = events.try_iter().collect();
        assert!(seen.iter().any(|event| *event == QueueEvent::ShuffleChanged(true)));
        assert!(!seen.iter().any(|event| matches!(event, QueueEvent::TrackAdvanced(_))));
        assert_eq!(state.transport.current_track().map(|id| id.as_str()), Some("b"));
    }

    #[test]
    fn removing_the_playing_item_moves_transport_along() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a", "b", "c"]), position: None }, 1)
            .expect("add");
        state.apply(&Command::Start, 1).expect("start");

        state.apply(&Command::Remove(0), 1).expect("remove");
        assert_eq!(state.transport.current_track().map(|id| id.as_str()), Some("b"));

        state.apply(&Command::Clear, 1).expect("clear");
        assert_eq!(state.transport.current_track(), None);
    }

    #[test]
    fn stale_echo_is_ignored_and_newer_echo_applies() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a", "b"]), position: None }, 1)
            .expect("add");
        let stale = state.nav.store().saved();
        state.apply(&Command::SetLoop(LoopMode::All), 1).expect("loop");

        state.offer_echo(stale);
        assert_eq!(state.snapshot().loop_mode, LoopMode::All);

        let mut newer = state.nav.store().saved();
        newer.loop_mode = LoopMode::One;
        newer.revision += 5;
        state.offer_echo(newer);
        assert_eq!(state.snapshot().loop_mode, LoopMode::One);
        assert_eq!(state.snapshot().revision, 7);
    }

    #[test]
    fn echo_during_burst_waits_for_the_burst() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a", "b", "c"]), position: None }, 1)
            .expect("add");
        let mut echo = state.nav.store().saved();
        echo.revision += 1;
        echo.loop_mode = LoopMode::One;

        state.begin_update();
        state.offer_echo(echo);
        assert_eq!(state.snapshot().loop_mode, LoopMode::None);

        // The burst's own revision bump makes the staged echo stale.
        state.apply(&Command::Next, 2).expect("next");
        assert_eq!(state.snapshot().loop_mode, LoopMode::None);
        assert_eq!(state.snapshot().current_index, Some(2));
    }

    #[test]
    fn starts_from_saved_snapshot() {
        let mut seed = state_with(MemoryStore::new());
        seed.apply(&Command::Add { tracks: tracks(&["a", "b", "c"]), position: None }, 1)
            .expect("add");
        seed.apply(&Command::Jump(2), 1).expect("jump");
        let saved = seed.nav.store().saved();

        let state = state_with(MemoryStore::with_saved(saved));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.items.len(), 3);
        assert_eq!(snapshot.current_index, Some(2));
        assert_eq!(state.nav.state(), PlaybackState::Stopped);
    }

    #[test]
    fn tick_advances_finished_track() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a", "b"]), position: None }, 1)
            .expect("add");
        state.apply(&Command::Start, 1).expect("start");
        state.control(TransportControl::Seek(Duration::from_secs(31)));

        state.tick();
        assert_eq!(state.snapshot().current_index, Some(1));
        assert_eq!(state.transport.current_track().map(|id| id.as_str()), Some("b"));
    }

    #[test]
    fn tick_replays_finished_track_under_loop_one() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a", "b", "c"]), position: None }, 1)
            .expect("add");
        state.apply(&Command::SetLoop(LoopMode::One), 1).expect("loop");
        state.apply(&Command::Start, 1).expect("start");
        state.control(TransportControl::Seek(Duration::from_secs(31)));
        assert!(state.transport.is_finished());

        state.tick();
        assert_eq!(state.snapshot().current_index, Some(0));
        assert_eq!(state.transport.current_track().map(|id| id.as_str()), Some("a"));
        assert!(!state.transport.is_finished());
        assert!(state.transport.position() < Some(Duration::from_secs(1)));
    }

    #[test]
    fn tick_on_last_track_without_loop_stops() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a"]), position: None }, 1)
            .expect("add");
        state.apply(&Command::Start, 1).expect("start");
        state.control(TransportControl::Seek(Duration::from_secs(31)));

        state.tick();
        assert_eq!(state.nav.state(), PlaybackState::Stopped);
        assert_eq!(state.transport.current_track(), None);
    }

    #[test]
    fn previous_burst_restarts_then_walks_back() {
        let mut state = state_with(MemoryStore::new());
        state
            .apply(&Command::Add { tracks: tracks(&["a", "b", "c"]), position: None }, 1)
            .expect("add");
        state.apply(&Command::Start, 1).expect("start");
        state.apply(&Command::Next, 2).expect("next");
        state.control(TransportControl::Seek(Duration::from_secs(10)));

        state.apply(&Command::Previous, 2).expect("previous");
        assert_eq!(state.snapshot().current_index, Some(1));
    }
}
