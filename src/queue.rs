use crate::error::{QueueError, Result};
use crate::model::{ItemId, LoopMode, QueueItem, QueueSnapshot, SavedQueue, TrackRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ordered queue entries plus the authoritative current position.
///
/// Every mutation keeps `current == None` exactly when `items` is empty and
/// otherwise `current < items.len()`.
#[derive(Debug, Default)]
pub struct QueueStore {
    items: Vec<QueueItem>,
    current: Option<usize>,
    shuffle: bool,
    loop_mode: LoopMode,
    original_order: Vec<ItemId>,
    next_item_id: u64,
    next_insert_seq: u64,
    revision: u64,
    dirty: bool,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `tracks` at `position`, clamped to the end of the queue.
    /// Returns the ids allocated for the new entries.
    pub fn add(&mut self, tracks: Vec<Arc<TrackRef>>, position: Option<usize>) -> Vec<ItemId> {
        if tracks.is_empty() {
            return Vec::new();
        }

        let at = position.unwrap_or(self.items.len()).min(self.items.len());
        let count = tracks.len();
        let new_items: Vec<QueueItem> = tracks
            .into_iter()
            .map(|track| self.allocate(track))
            .collect();
        let ids = new_items.iter().map(|item| item.id).collect();
        self.items.splice(at..at, new_items);

        self.current = match self.current {
            None => Some(0),
            Some(current) if at <= current => Some(current + count),
            Some(current) => Some(current),
        };
        debug!(count, at, current = ?self.current, "queued tracks");
        self.dirty = true;
        ids
    }

    pub fn remove(&mut self, index: usize) -> Result<QueueItem> {
        let len = self.items.len();
        if index >= len {
            return Err(QueueError::IndexOutOfRange { index, len });
        }

        let removed = self.items.remove(index);
        self.original_order.retain(|id| *id != removed.id);
        self.current = match self.current {
            _ if self.items.is_empty() => None,
            Some(current) if index < current => Some(current - 1),
            Some(current) => Some(current.min(self.items.len() - 1)),
            None => Some(0),
        };
        debug!(index, item = %removed.id, current = ?self.current, "removed queue item");
        self.dirty = true;
        Ok(removed)
    }

    /// Moves one item. The current pointer follows the item it referenced
    /// before the move.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.items.len();
        for index in [from, to] {
            if index >= len {
                return Err(QueueError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(());
        }

        let current_id = self.current_item().map(|item| item.id);
        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.current = current_id.and_then(|id| self.position_of(id));
        debug!(from, to, current = ?self.current, "reordered queue");
        self.dirty = true;
        Ok(())
    }

    /// Empties the queue and forgets the pre-shuffle order. The caller owns
    /// history and clears it alongside.
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
        self.original_order.clear();
        self.dirty = true;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.clone(),
            current_index: self.current,
            shuffle: self.shuffle,
            loop_mode: self.loop_mode,
            revision: self.revision,
        }
    }

    pub fn saved(&self) -> SavedQueue {
        SavedQueue {
            items: self.items.clone(),
            current_index: self.current,
            shuffle: self.shuffle,
            loop_mode: self.loop_mode,
            original_order: self.original_order.clone(),
            revision: self.revision,
        }
    }

    /// Replaces the whole state with a saved snapshot, repairing anything that
    /// would break the queue invariants.
    pub fn rehydrate(&mut self, saved: SavedQueue) {
        let mut seen = HashSet::with_capacity(saved.items.len());
        let incoming = saved.items.len();
        let items: Vec<QueueItem> = saved
            .items
            .into_iter()
            .filter(|item| seen.insert(item.id))
            .collect();
        if items.len() != incoming {
            warn!(
                dropped = incoming - items.len(),
                "saved queue contained duplicate item ids"
            );
        }

        let original_order = saved
            .original_order
            .into_iter()
            .filter(|id| seen.contains(id))
            .collect();
        let (items, original_order) = renumber_if_exhausted(items, original_order);
        self.next_item_id = next_counter(items.iter().map(|item| item.id.0));
        self.next_insert_seq = next_counter(items.iter().map(|item| item.inserted_at));
        self.current = match saved.current_index {
            _ if items.is_empty() => None,
            Some(index) => Some(index.min(items.len() - 1)),
            None => Some(0),
        };
        self.original_order = original_order;
        self.items = items;
        self.shuffle = saved.shuffle;
        self.loop_mode = saved.loop_mode;
        self.revision = saved.revision;
        self.dirty = true;
        debug!(len = self.items.len(), current = ?self.current, "rehydrated queue");
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.items.get(self.current?)
    }

    pub fn get(&self, index: usize) -> Option<&QueueItem> {
        self.items.get(index)
    }

    pub fn position_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        if self.loop_mode != mode {
            self.loop_mode = mode;
            self.dirty = true;
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn bump_revision(&mut self) -> u64 {
        self.revision = self.revision.saturating_add(1);
        self.revision
    }

    /// Returns and resets the changed-since-last-publish flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// True when the pointer and identity invariants hold. Used by tests and fuzzing.
    pub fn invariants_hold(&self) -> bool {
        let index_ok = match self.current {
            None => self.items.is_empty(),
            Some(index) => index < self.items.len(),
        };
        let mut seen = HashSet::with_capacity(self.items.len());
        index_ok && self.items.iter().all(|item| seen.insert(item.id))
    }

    pub(crate) fn set_current(&mut self, index: usize) -> Result<()> {
        let len = self.items.len();
        if index >= len {
            return Err(QueueError::IndexOutOfRange { index, len });
        }
        if self.current != Some(index) {
            self.current = Some(index);
            self.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn set_shuffle_flag(&mut self, enabled: bool) {
        if self.shuffle != enabled {
            self.shuffle = enabled;
            self.dirty = true;
        }
    }

    pub(crate) fn original_order(&self) -> &[ItemId] {
        &self.original_order
    }

    pub(crate) fn save_original_order(&mut self) {
        self.original_order = self.items.iter().map(|item| item.id).collect();
    }

    pub(crate) fn forget_original_order(&mut self) {
        self.original_order.clear();
    }

    /// Installs a permutation of the current items. Callers guarantee `items`
    /// holds exactly the same ids.
    pub(crate) fn replace_order(&mut self, items: Vec<QueueItem>, current: Option<usize>) {
        debug_assert_eq!(items.len(), self.items.len());
        self.current = match current {
            _ if items.is_empty() => None,
            Some(index) => Some(index.min(items.len() - 1)),
            None => Some(0),
        };
        self.items = items;
        self.dirty = true;
    }

    pub(crate) fn take_items(&mut self) -> Vec<QueueItem> {
        std::mem::take(&mut self.items)
    }

    fn allocate(&mut self, track: Arc<TrackRef>) -> QueueItem {
        let item = QueueItem {
            id: ItemId(self.next_item_id),
            track,
            inserted_at: self.next_insert_seq,
        };
        self.next_item_id = self.next_item_id.saturating_add(1);
        self.next_insert_seq = self.next_insert_seq.saturating_add(1);
        item
    }
}

/// Counters past this point are renumbered on rehydrate so new items never
/// run out of fresh ids.
const COUNTER_LIMIT: u64 = u64::MAX / 2;

fn next_counter(values: impl Iterator<Item = u64>) -> u64 {
    values
        .map(|value| value.saturating_add(1))
        .max()
        .unwrap_or(0)
}

/// Reassigns item ids by position and insertion sequence numbers by their
/// previous order when either came in near the top of the range.
fn renumber_if_exhausted(
    mut items: Vec<QueueItem>,
    original_order: Vec<ItemId>,
) -> (Vec<QueueItem>, Vec<ItemId>) {
    let exhausted = items
        .iter()
        .any(|item| item.id.0 >= COUNTER_LIMIT || item.inserted_at >= COUNTER_LIMIT);
    if !exhausted {
        return (items, original_order);
    }
    warn!(len = items.len(), "saved queue ids near the end of their range, renumbering");

    let mut by_insertion: Vec<usize> = (0..items.len()).collect();
    by_insertion.sort_by_key(|&index| (items[index].inserted_at, index));
    for (seq, index) in by_insertion.into_iter().enumerate() {
        items[index].inserted_at = seq as u64;
    }

    let mut renamed = HashMap::with_capacity(items.len());
    for (next, item) in items.iter_mut().enumerate() {
        let id = ItemId(next as u64);
        renamed.insert(item.id, id);
        item.id = id;
    }
    let original_order = original_order
        .into_iter()
        .filter_map(|id| renamed.get(&id).copied())
        .collect();
    (items, original_order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;

    fn tracks(names: &[&str]) -> Vec<Arc<TrackRef>> {
        names
            .iter()
            .map(|name| Arc::new(TrackRef::new(*name, format!("{name}.mp3"), None)))
            .collect()
    }

    fn names(store: &QueueStore) -> Vec<String> {
        store
            .items()
            .iter()
            .map(|item| item.track.id.to_string())
            .collect()
    }

    #[test]
    fn first_add_points_at_head() {
        let mut store = QueueStore::new();
        assert_eq!(store.current_index(), None);
        store.add(tracks(&["a", "b"]), None);
        assert_eq!(store.current_index(), Some(0));
        assert_eq!(names(&store), vec!["a", "b"]);
    }

    #[test]
    fn insert_before_current_shifts_pointer() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b", "c"]), None);
        store.set_current(1).expect("current");

        store.add(tracks(&["x", "y"]), Some(0));
        assert_eq!(store.current_index(), Some(3));
        assert_eq!(store.current_item().map(|item| item.track.id.as_str()), Some("b"));

        store.add(tracks(&["z"]), Some(4));
        assert_eq!(store.current_index(), Some(3));
    }

    #[test]
    fn insert_position_is_clamped_to_end() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a"]), None);
        store.add(tracks(&["b"]), Some(99));
        assert_eq!(names(&store), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_tracks_get_distinct_item_ids() {
        let mut store = QueueStore::new();
        let ids = store.add(tracks(&["a", "a"]), None);
        assert_ne!(ids[0], ids[1]);
        assert!(store.invariants_hold());
    }

    #[test]
    fn remove_before_current_decrements() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b", "c"]), None);
        store.set_current(2).expect("current");

        store.remove(0).expect("remove");
        assert_eq!(store.current_index(), Some(1));
        assert_eq!(store.current_item().map(|item| item.track.id.as_str()), Some("c"));
    }

    #[test]
    fn remove_current_moves_to_following_item() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b", "c"]), None);
        store.set_current(1).expect("current");

        store.remove(1).expect("remove");
        assert_eq!(store.current_index(), Some(1));
        assert_eq!(store.current_item().map(|item| item.track.id.as_str()), Some("c"));
    }

    #[test]
    fn remove_current_last_item_steps_back() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b", "c"]), None);
        store.set_current(2).expect("current");

        store.remove(2).expect("remove");
        assert_eq!(store.current_index(), Some(1));
    }

    #[test]
    fn removing_everything_resets_pointer() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a"]), None);
        store.remove(0).expect("remove");
        assert_eq!(store.current_index(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn remove_out_of_range_leaves_state_untouched() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b"]), None);
        store.take_dirty();

        let err = store.remove(2).expect_err("out of range");
        assert_eq!(err, QueueError::IndexOutOfRange { index: 2, len: 2 });
        assert_eq!(store.len(), 2);
        assert!(!store.take_dirty());
    }

    #[test]
    fn reorder_tracks_current_by_identity() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b", "c", "d"]), None);
        store.set_current(1).expect("current");

        store.reorder(0, 3).expect("reorder");
        assert_eq!(names(&store), vec!["b", "c", "d", "a"]);
        assert_eq!(store.current_index(), Some(0));

        store.reorder(0, 2).expect("reorder");
        assert_eq!(names(&store), vec!["c", "d", "b", "a"]);
        assert_eq!(store.current_index(), Some(2));
    }

    #[test]
    fn reorder_rejects_bad_indices() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b"]), None);
        assert!(matches!(
            store.reorder(0, 5),
            Err(QueueError::IndexOutOfRange { index: 5, len: 2 })
        ));
        assert_eq!(names(&store), vec!["a", "b"]);
    }

    #[test]
    fn clear_resets_everything_positional() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a", "b"]), None);
        store.save_original_order();
        store.clear();

        assert_eq!(store.current_index(), None);
        assert!(store.original_order().is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_storage() {
        let mut store = QueueStore::new();
        store.add(tracks(&["a"]), None);
        let snapshot = store.snapshot();
        store.add(tracks(&["b"]), None);

        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn rehydrate_renumbers_ids_at_the_end_of_the_range() {
        let mut picked = tracks(&["a", "b"]);
        let saved = SavedQueue {
            items: vec![
                QueueItem {
                    id: ItemId(u64::MAX),
                    track: picked.remove(0),
                    inserted_at: u64::MAX,
                },
                QueueItem {
                    id: ItemId(3),
                    track: picked.remove(0),
                    inserted_at: 2,
                },
            ],
            current_index: Some(0),
            shuffle: true,
            original_order: vec![ItemId(3), ItemId(u64::MAX)],
            ..SavedQueue::default()
        };

        let mut store = QueueStore::new();
        store.rehydrate(saved);
        let added = store.add(tracks(&["c"]), None);

        assert!(store.invariants_hold());
        assert_eq!(store.snapshot().item_ids(), vec![ItemId(0), ItemId(1), ItemId(2)]);
        assert_eq!(added, vec![ItemId(2)]);
        assert_eq!(store.original_order(), &[ItemId(1), ItemId(0)]);
        let inserted: Vec<u64> = store.items().iter().map(|item| item.inserted_at).collect();
        assert_eq!(inserted, vec![1, 0, 2]);
    }

    #[test]
    fn rehydrate_repairs_duplicates_and_bad_index() {
        let track = tracks(&["a"]).remove(0);
        let item = QueueItem {
            id: ItemId(7),
            track,
            inserted_at: 3,
        };
        let saved = SavedQueue {
            items: vec![item.clone(), item],
            current_index: Some(9),
            shuffle: true,
            loop_mode: LoopMode::All,
            original_order: vec![ItemId(7), ItemId(42)],
            revision: 11,
        };

        let mut store = QueueStore::new();
        store.rehydrate(saved);
        assert_eq!(store.len(), 1);
        assert_eq!(store.current_index(), Some(0));
        assert_eq!(store.original_order(), &[ItemId(7)]);
        assert_eq!(store.revision(), 11);
        assert!(store.shuffle());

        let ids = store.add(tracks(&["b"]), None);
        assert_eq!(ids, vec![ItemId(8)]);
    }

    proptest::proptest! {
        #[test]
        fn invariants_hold_after_random_ops(ops in proptest::collection::vec((0u8..5, 0usize..12, 0usize..12), 1..200)) {
            let mut store = QueueStore::new();
            for (op, a, b) in ops {
                match op {
                    0 => {
                        store.add(tracks(&["x", "y"]), Some(a));
                    }
                    1 => {
                        let _ = store.remove(a);
                    }
                    2 => {
                        let _ = store.reorder(a, b);
                    }
                    3 => {
                        let _ = store.set_current(a);
                    }
                    _ => {
                        if a % 4 == 0 {
                            store.clear();
                        } else {
                            store.add(tracks(&["z"]), None);
                        }
                    }
                }

                prop_assert!(store.invariants_hold());
                prop_assert!(store.current_index().is_none() == store.is_empty());
            }
        }
    }
}
