use crate::history::HistoryStack;
use crate::model::QueueItem;
use crate::queue::QueueStore;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Reversible randomized ordering of the queue. The random source is
/// injected so tests can pin the permutation with a seed.
pub struct ShuffleEngine {
    rng: Box<dyn RngCore + Send>,
}

impl ShuffleEngine {
    pub fn from_os_rng() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self { rng: Box::new(rng) }
    }

    /// Fisher–Yates: every permutation of `items` is equally likely.
    pub fn permute<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.rng.random_range(0..=i);
            items.swap(i, j);
        }
    }

    /// Turns shuffle on. The current item moves to the front exactly once and
    /// keeps playing; the rest is permuted behind it. Returns whether the flag
    /// changed.
    pub fn enable(&mut self, store: &mut QueueStore) -> bool {
        if store.shuffle() {
            return false;
        }
        store.set_shuffle_flag(true);
        if store.len() < 2 {
            return true;
        }

        if store.original_order().is_empty() {
            store.save_original_order();
        }

        let current = store.current_index();
        let mut others = store.take_items();
        let head = current.map(|index| others.remove(index));
        self.permute(&mut others);

        let order = match head {
            Some(item) => {
                let mut order = Vec::with_capacity(others.len() + 1);
                order.push(item);
                order.extend(others);
                order
            }
            None => others,
        };
        debug!(len = order.len(), "shuffle enabled");
        store.replace_order(order, current.map(|_| 0));
        true
    }

    /// Turns shuffle off, restoring the saved order. Items queued while
    /// shuffled follow the restored ones in their current relative order.
    /// History is cleared because its indices describe the shuffled order.
    pub fn disable(&mut self, store: &mut QueueStore, history: &mut HistoryStack) -> bool {
        if !store.shuffle() {
            return false;
        }
        store.set_shuffle_flag(false);
        if store.len() < 2 {
            store.forget_original_order();
            return true;
        }

        let current_id = store.current_item().map(|item| item.id);
        let rank: HashMap<_, _> = store
            .original_order()
            .iter()
            .enumerate()
            .map(|(rank, id)| (*id, rank))
            .collect();

        let items = store.take_items();
        let (mut restored, added): (Vec<QueueItem>, Vec<QueueItem>) = items
            .into_iter()
            .partition(|item| rank.contains_key(&item.id));
        restored.sort_by_key(|item| rank.get(&item.id).copied().unwrap_or(usize::MAX));
        restored.extend(added);

        let current = current_id
            .and_then(|id| restored.iter().position(|item| item.id == id))
            .or(Some(0));
        debug!(len = restored.len(), current = ?current, "shuffle disabled");
        store.replace_order(restored, current);
        store.forget_original_order();
        history.clear();
        true
    }
}

impl Default for ShuffleEngine {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

impl fmt::Debug for ShuffleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShuffleEngine").finish_non_exhaustive()
    }
}
