use crate::model::{ItemId, QueueItem, TrackId};
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Where playback was before an advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub index: usize,
    pub track_id: TrackId,
    pub item_id: ItemId,
}

/// Bounded LIFO of previously active positions. The oldest entry is dropped
/// once the limit is reached.
#[derive(Debug, Clone)]
pub struct HistoryStack {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl HistoryStack {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT)),
            limit,
        }
    }

    /// Records `index` if it points at an existing item. Returns whether an
    /// entry was pushed.
    pub fn push_before(&mut self, items: &[QueueItem], index: Option<usize>) -> bool {
        if self.limit == 0 {
            return false;
        }
        let Some((index, item)) = index.and_then(|idx| items.get(idx).map(|item| (idx, item)))
        else {
            return false;
        };

        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            index,
            track_id: item.track.id.clone(),
            item_id: item.id,
        });
        true
    }

    pub fn pop(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_back()
    }

    pub fn peek(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryEntry {
    /// Resolves the entry against the current ordering: the recorded index
    /// while it still holds the same item, otherwise wherever that item moved.
    pub fn resolve(&self, items: &[QueueItem]) -> Option<usize> {
        if items.get(self.index).is_some_and(|item| item.id == self.item_id) {
            return Some(self.index);
        }
        items.iter().position(|item| item.id == self.item_id)
    }
}
