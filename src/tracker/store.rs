//! Per-source track storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use image::RgbImage;
use parking_lot::{Mutex, RwLock};

use crate::frame::SourceId;
use crate::tracker::rect::Rect;
use crate::tracker::track::{SingleTargetTracker, Track};

/// All live tracks of one source.
///
/// Tracks are kept in ascending id order, which is also creation order, so
/// every scan over the store is deterministic.
#[derive(Debug)]
pub struct TrackStore {
    source_id: SourceId,
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
}

impl TrackStore {
    pub fn new(source_id: impl Into<SourceId>) -> Self {
        Self {
            source_id: source_id.into(),
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, track_id: u64) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn contains(&self, track_id: u64) -> bool {
        self.tracks.contains_key(&track_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    /// Ids and boxes of all tracks, in scan order.
    pub fn snapshot(&self) -> (Vec<u64>, Vec<Rect>) {
        self.tracks
            .values()
            .map(|t| (t.track_id, t.rect()))
            .unzip()
    }

    /// Start a new track and return its id.
    pub fn insert(
        &mut self,
        bbox: Rect,
        image: &RgbImage,
        tracker: Box<dyn SingleTargetTracker>,
        frame_id: u64,
    ) -> u64 {
        let track_id = self.next_id;
        self.next_id += 1;
        let track = Track::start(track_id, bbox, image, tracker, frame_id);
        self.tracks.insert(track_id, track);
        track_id
    }

    /// Remove a track, releasing its tracker.
    pub fn remove(&mut self, track_id: u64) -> Option<Track> {
        self.tracks.remove(&track_id)
    }
}

/// Shared handle to one source's store. The mutex is held for a whole
/// association or update pass.
pub type SharedTrackStore = Arc<Mutex<TrackStore>>;

/// Maps each source to its independently locked [`TrackStore`].
#[derive(Debug, Default)]
pub struct TrackRegistry {
    stores: RwLock<HashMap<SourceId, SharedTrackStore>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source_id: &str) -> Option<SharedTrackStore> {
        self.stores.read().get(source_id).cloned()
    }

    /// Fetch the store for `source_id`, creating an empty one if needed.
    /// The flag is `true` when this call created it.
    pub fn get_or_create(&self, source_id: &str) -> (SharedTrackStore, bool) {
        if let Some(store) = self.get(source_id) {
            return (store, false);
        }
        let mut stores = self.stores.write();
        if let Some(store) = stores.get(source_id) {
            return (store.clone(), false);
        }
        let store = Arc::new(Mutex::new(TrackStore::new(source_id)));
        stores.insert(source_id.to_string(), store.clone());
        (store, true)
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.stores.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }
}
