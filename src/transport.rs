use crate::model::{TrackId, TrackRef};
use anyhow::Result;
use std::time::{Duration, Instant};

/// The decoder/output side. The engine tells it which track is current and
/// reads back the elapsed position for the previous-restarts check.
pub trait Transport: Send {
    fn play(&mut self, track: &TrackRef) -> Result<()>;
    fn restart(&mut self);
    fn stop(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn is_paused(&self) -> bool;
    fn current_track(&self) -> Option<&TrackId>;
    fn position(&self) -> Option<Duration>;
    fn seek_to(&mut self, position: Duration) -> Result<()>;
    fn is_finished(&self) -> bool;
}

/// Elapsed time of the loaded track: a frozen offset plus wall time since
/// the last resume.
#[derive(Debug, Clone, Copy, Default)]
struct PlayClock {
    offset: Duration,
    running_since: Option<Instant>,
}

impl PlayClock {
    fn at(offset: Duration, running: bool) -> Self {
        Self {
            offset,
            running_since: running.then(Instant::now),
        }
    }

    fn elapsed(&self) -> Duration {
        self.running_since
            .map_or(self.offset, |since| self.offset.saturating_add(since.elapsed()))
    }

    fn is_running(&self) -> bool {
        self.running_since.is_some()
    }
}

/// Clock-driven stand-in used when no audio backend is attached.
#[derive(Debug, Default)]
pub struct NullTransport {
    loaded: Option<(TrackId, Option<Duration>)>,
    clock: PlayClock,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn length(&self) -> Option<Duration> {
        self.loaded.as_ref().and_then(|(_, length)| *length)
    }

    fn clamp(&self, position: Duration) -> Duration {
        self.length().map_or(position, |length| position.min(length))
    }

    /// Moves the clock to `position`, keeping it running or frozen as it was.
    fn reposition(&mut self, position: Duration) {
        self.clock = PlayClock::at(self.clamp(position), self.clock.is_running());
    }
}

impl Transport for NullTransport {
    fn play(&mut self, track: &TrackRef) -> Result<()> {
        self.loaded = Some((track.id.clone(), track.duration));
        self.clock = PlayClock::at(Duration::ZERO, true);
        Ok(())
    }

    fn restart(&mut self) {
        if self.loaded.is_some() {
            self.reposition(Duration::ZERO);
        }
    }

    fn stop(&mut self) {
        self.loaded = None;
        self.clock = PlayClock::default();
    }

    fn pause(&mut self) {
        let position = self.clamp(self.clock.elapsed());
        self.clock = PlayClock::at(position, false);
    }

    fn resume(&mut self) {
        if self.loaded.is_some() && !self.clock.is_running() {
            self.clock = PlayClock::at(self.clock.elapsed(), true);
        }
    }

    fn is_paused(&self) -> bool {
        self.loaded.is_some() && !self.clock.is_running()
    }

    fn current_track(&self) -> Option<&TrackId> {
        self.loaded.as_ref().map(|(id, _)| id)
    }

    fn position(&self) -> Option<Duration> {
        self.loaded
            .as_ref()
            .map(|_| self.clamp(self.clock.elapsed()))
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if self.loaded.is_none() {
            anyhow::bail!("nothing is playing");
        }
        self.reposition(position);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        match (self.position(), self.length()) {
            (Some(position), Some(length)) => position >= length,
            _ => false,
        }
    }
}
