use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Stable catalog identifier of a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one queue entry. The same track may be queued twice under
/// two different item ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only reference into the external catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: TrackId,
    pub path: PathBuf,
    #[serde(default)]
    pub duration: Option<Duration>,
}

impl TrackRef {
    pub fn new(id: impl Into<TrackId>, path: impl Into<PathBuf>, duration: Option<Duration>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            duration,
        }
    }

    /// Builds a reference whose id is the path itself, for callers without a catalog.
    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy().to_string(), path, None)
    }

    pub fn title(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Key used for the catalog's natural order.
    pub fn natural_key(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| self.id.as_str().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub track: Arc<TrackRef>,
    pub inserted_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LoopMode {
    #[default]
    None,
    All,
    One,
}

impl LoopMode {
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::All,
            Self::All => Self::One,
            Self::One => Self::None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::All => "all",
            Self::One => "one",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "all" | "loop" => Some(Self::All),
            "one" | "single" => Some(Self::One),
            _ => None,
        }
    }
}

/// Where loop=All restarts once navigation runs past the end of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WrapPolicy {
    /// Position 0 of the current, possibly shuffled, ordering.
    #[default]
    CurrentOrder,
    /// The item that sorts first in the catalog's natural order.
    NaturalOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
}

/// Immutable view handed to consumers. `current_index == None` is the empty
/// queue's `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub current_index: Option<usize>,
    pub shuffle: bool,
    pub loop_mode: LoopMode,
    pub revision: u64,
}

impl QueueSnapshot {
    pub fn current(&self) -> Option<&QueueItem> {
        self.items.get(self.current_index?)
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.items.iter().map(|item| item.track.id.clone()).collect()
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.iter().map(|item| item.id).collect()
    }
}

/// What the persistence collaborator saves and later hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SavedQueue {
    pub items: Vec<QueueItem>,
    pub current_index: Option<usize>,
    pub shuffle: bool,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default)]
    pub original_order: Vec<ItemId>,
    #[serde(default)]
    pub revision: u64,
}
