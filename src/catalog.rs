use crate::model::{TrackId, TrackRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Read-only lookup into the track catalog owned outside the engine.
pub trait Catalog {
    fn lookup(&self, id: &TrackId) -> Option<Arc<TrackRef>>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    tracks: HashMap<TrackId, Arc<TrackRef>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, track: TrackRef) -> Arc<TrackRef> {
        let track = Arc::new(track);
        self.tracks.insert(track.id.clone(), Arc::clone(&track));
        track
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl FromIterator<TrackRef> for MemoryCatalog {
    fn from_iter<I: IntoIterator<Item = TrackRef>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for track in iter {
            catalog.insert(track);
        }
        catalog
    }
}

impl Catalog for MemoryCatalog {
    fn lookup(&self, id: &TrackId) -> Option<Arc<TrackRef>> {
        self.tracks.get(id).cloned()
    }
}

/// Resolves ids in order, skipping the ones the catalog does not know.
pub fn resolve_all(catalog: &dyn Catalog, ids: &[TrackId]) -> Vec<Arc<TrackRef>> {
    ids.iter()
        .filter_map(|id| {
            let found = catalog.lookup(id);
            if found.is_none() {
                warn!(track = %id, "track not in catalog, skipping");
            }
            found
        })
        .collect()
}
