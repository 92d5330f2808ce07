use crate::catalog::{self, Catalog};
use crate::error::{QueueError, Result};
use crate::events::{EventBridge, QueueEvent};
use crate::model::{ItemId, LoopMode, QueueItem, QueueSnapshot, SavedQueue, TrackId, TrackRef};
use crate::navigation::Navigation;
use std::mem;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Every mutating entry point of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add {
        tracks: Vec<Arc<TrackRef>>,
        position: Option<usize>,
    },
    Remove(usize),
    Reorder {
        from: usize,
        to: usize,
    },
    Clear,
    SetShuffle(bool),
    SetLoop(LoopMode),
    Next,
    Previous,
    Jump(usize),
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coalesce {
    /// Each call in a burst is one step, applied together.
    Accumulate,
    /// Only the last call in a burst matters.
    LastWins,
}

impl Command {
    fn coalesce(&self) -> Option<Coalesce> {
        match self {
            Self::Next | Self::Previous => Some(Coalesce::Accumulate),
            Self::Jump(_) | Self::SetShuffle(_) | Self::SetLoop(_) => Some(Coalesce::LastWins),
            _ => None,
        }
    }

    fn same_kind(&self, other: &Command) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Added(Vec<ItemId>),
    Removed(QueueItem),
    Navigated(Navigation),
    ShuffleSet(bool),
    Applied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportControl {
    Pause,
    Resume,
    Seek(Duration),
}

type Reply = Sender<Result<Outcome>>;

pub(crate) enum Message {
    Command {
        command: Command,
        reply: Option<Reply>,
    },
    Transport {
        control: TransportControl,
        reply: Sender<Option<Duration>>,
    },
    Tick,
    Echo(SavedQueue),
    Snapshot(Sender<QueueSnapshot>),
    Shutdown,
}

/// Trailing-edge limiter settings. A zero interval turns coalescing off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub interval: Duration,
    pub max_delay: Duration,
}

impl RateLimit {
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

/// The single-writer state behind the guard. Only the guard thread calls it.
pub(crate) trait GuardedState {
    fn apply(&mut self, command: &Command, repeat: usize) -> Result<Outcome>;
    /// A burst opened; inbound echoes must be held until it is applied.
    fn begin_update(&mut self);
    fn offer_echo(&mut self, echo: SavedQueue);
    fn control(&mut self, control: TransportControl) -> Option<Duration>;
    fn tick(&mut self);
    fn snapshot(&self) -> QueueSnapshot;
}

struct Burst {
    command: Command,
    repeat: usize,
    replies: Vec<Reply>,
    opened: Instant,
    last: Instant,
}

impl Burst {
    fn open(command: Command, reply: Option<Reply>) -> Self {
        let now = Instant::now();
        Self {
            command,
            repeat: 1,
            replies: reply.into_iter().collect(),
            opened: now,
            last: now,
        }
    }

    fn absorb(&mut self, command: Command, reply: Option<Reply>) {
        match command.coalesce() {
            Some(Coalesce::Accumulate) => self.repeat += 1,
            _ => self.command = command,
        }
        self.replies.extend(reply);
        self.last = Instant::now();
    }

    fn deadline(&self, limit: &RateLimit) -> Instant {
        (self.last + limit.interval).min(self.opened + limit.max_delay)
    }
}

/// Serializes every message into one timeline. Runs until shutdown or until
/// every handle is gone.
pub(crate) fn run<S: GuardedState>(state: &mut S, rx: Receiver<Message>, limit: RateLimit) {
    let mut burst: Option<Burst> = None;

    loop {
        let message = match &burst {
            Some(open) => {
                let wait = open.deadline(&limit).saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => {
                        flush(state, burst.take());
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        flush(state, burst.take());
                        break;
                    }
                }
            }
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Command { command, reply } => {
                if let Some(open) = burst.as_mut()
                    && open.command.same_kind(&command)
                {
                    open.absorb(command, reply);
                    continue;
                }
                flush(state, burst.take());

                if command.coalesce().is_some() && limit.enabled() {
                    state.begin_update();
                    burst = Some(Burst::open(command, reply));
                } else {
                    let result = state.apply(&command, 1);
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
            }
            Message::Echo(echo) => state.offer_echo(echo),
            Message::Transport { control, reply } => {
                flush(state, burst.take());
                let _ = reply.send(state.control(control));
            }
            // The pending burst is about to change the track anyway.
            Message::Tick if burst.is_some() => trace!("burst open, skipping tick"),
            Message::Tick => state.tick(),
            Message::Snapshot(reply) => {
                flush(state, burst.take());
                let _ = reply.send(state.snapshot());
            }
            Message::Shutdown => {
                flush(state, burst.take());
                break;
            }
        }
    }
    debug!("queue guard stopped");
}

fn flush<S: GuardedState>(state: &mut S, burst: Option<Burst>) {
    let Some(burst) = burst else {
        return;
    };
    trace!(command = ?burst.command, repeat = burst.repeat, "flushing burst");
    let result = state.apply(&burst.command, burst.repeat);
    for reply in burst.replies {
        let _ = reply.send(result.clone());
    }
}

/// Cloneable entry point to the serialized queue. Blocking calls wait for
/// their command to be applied; `dispatch` does not.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tx: Sender<Message>,
    bridge: EventBridge,
}

impl QueueHandle {
    pub(crate) fn new(tx: Sender<Message>, bridge: EventBridge) -> Self {
        Self { tx, bridge }
    }

    pub fn subscribe(&self) -> Receiver<QueueEvent> {
        self.bridge.subscribe()
    }

    /// Submits without waiting. Suited to raw UI input such as key repeats.
    pub fn dispatch(&self, command: Command) -> Result<()> {
        self.send(Message::Command {
            command,
            reply: None,
        })
    }

    pub fn add(&self, tracks: Vec<Arc<TrackRef>>, position: Option<usize>) -> Result<Vec<ItemId>> {
        self.call(Command::Add { tracks, position }, |outcome| match outcome {
            Outcome::Added(ids) => Some(ids),
            _ => None,
        })
    }

    pub fn add_from_catalog(
        &self,
        catalog: &dyn Catalog,
        ids: &[TrackId],
        position: Option<usize>,
    ) -> Result<Vec<ItemId>> {
        self.add(catalog::resolve_all(catalog, ids), position)
    }

    pub fn remove(&self, index: usize) -> Result<QueueItem> {
        self.call(Command::Remove(index), |outcome| match outcome {
            Outcome::Removed(item) => Some(item),
            _ => None,
        })
    }

    pub fn reorder(&self, from: usize, to: usize) -> Result<()> {
        self.call(Command::Reorder { from, to }, applied)
    }

    pub fn clear(&self) -> Result<()> {
        self.call(Command::Clear, applied)
    }

    /// Returns whether the flag changed.
    pub fn set_shuffle(&self, enabled: bool) -> Result<bool> {
        self.call(Command::SetShuffle(enabled), |outcome| match outcome {
            Outcome::ShuffleSet(changed) => Some(changed),
            _ => None,
        })
    }

    pub fn set_loop(&self, mode: LoopMode) -> Result<()> {
        self.call(Command::SetLoop(mode), applied)
    }

    pub fn next(&self) -> Result<Navigation> {
        self.call(Command::Next, navigated)
    }

    pub fn previous(&self) -> Result<Navigation> {
        self.call(Command::Previous, navigated)
    }

    pub fn jump(&self, index: usize) -> Result<Navigation> {
        self.call(Command::Jump(index), navigated)
    }

    pub fn start(&self) -> Result<Navigation> {
        self.call(Command::Start, navigated)
    }

    /// Applies any pending burst first, so the snapshot reflects every call
    /// made before it. Polling this faster than the coalescing interval cuts
    /// bursts short.
    pub fn snapshot(&self) -> Result<QueueSnapshot> {
        let (reply, rx) = mpsc::channel();
        self.send(Message::Snapshot(reply))?;
        rx.recv().map_err(|_| QueueError::ServiceStopped)
    }

    /// Hands in state reported back by the persistence layer.
    pub fn push_echo(&self, echo: SavedQueue) -> Result<()> {
        self.send(Message::Echo(echo))
    }

    /// Advances when the transport reports the current track finished. Ticks
    /// that arrive while a burst is pending are skipped, so polling does not
    /// defeat coalescing.
    pub fn tick(&self) -> Result<()> {
        self.send(Message::Tick)
    }

    pub fn pause(&self) -> Result<Option<Duration>> {
        self.control(TransportControl::Pause)
    }

    pub fn resume(&self) -> Result<Option<Duration>> {
        self.control(TransportControl::Resume)
    }

    pub fn seek(&self, position: Duration) -> Result<Option<Duration>> {
        self.control(TransportControl::Seek(position))
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }

    fn control(&self, control: TransportControl) -> Result<Option<Duration>> {
        let (reply, rx) = mpsc::channel();
        self.send(Message::Transport { control, reply })?;
        rx.recv().map_err(|_| QueueError::ServiceStopped)
    }

    // The guard answers each command with the outcome variant of that command,
    // so `extract` only fails if the guard is gone.
    fn call<T>(&self, command: Command, extract: fn(Outcome) -> Option<T>) -> Result<T> {
        let (reply, rx) = mpsc::channel();
        self.send(Message::Command {
            command,
            reply: Some(reply),
        })?;
        let outcome = rx.recv().map_err(|_| QueueError::ServiceStopped)??;
        extract(outcome).ok_or(QueueError::ServiceStopped)
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| QueueError::ServiceStopped)
    }
}

fn applied(outcome: Outcome) -> Option<()> {
    matches!(outcome, Outcome::Applied).then_some(())
}

fn navigated(outcome: Outcome) -> Option<Navigation> {
    match outcome {
        Outcome::Navigated(navigation) => Some(navigation),
        _ => None,
    }
}
