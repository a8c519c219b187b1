//! Detection-to-track association and the per-frame track update pass.

use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, warn};

use crate::tracker::matching::{self, AssignmentResult};
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::store::TrackRegistry;
use crate::tracker::track::TrackerFactory;

/// Configuration for the TrackerEngine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A detection matches a track only when IoU is strictly above this.
    pub iou_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { iou_threshold: 0.5 }
    }
}

/// Outcome of one association pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationReport {
    pub detections: usize,
    /// Degenerate boxes dropped before matching.
    pub discarded: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub tracks_before: usize,
    pub tracks_after: usize,
}

/// Outcome of one update pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub tracks_before: usize,
    pub lost: usize,
    pub remaining: usize,
}

/// Maintains the tracks of every source.
///
/// Each pass locks only the store of the source it works on, so different
/// sources proceed in parallel.
pub struct TrackerEngine {
    registry: TrackRegistry,
    factory: Arc<dyn TrackerFactory>,
    config: EngineConfig,
}

impl TrackerEngine {
    pub fn new(factory: Arc<dyn TrackerFactory>, config: EngineConfig) -> Self {
        Self {
            registry: TrackRegistry::new(),
            factory,
            config,
        }
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    /// Current `(track_id, box)` pairs of a source, in scan order.
    pub fn tracks(&self, source_id: &str) -> Vec<(u64, Rect)> {
        match self.registry.get(source_id) {
            Some(store) => {
                let (ids, rects) = store.lock().snapshot();
                ids.into_iter().zip(rects).collect()
            }
            None => Vec::new(),
        }
    }

    /// Reconcile a batch of detections against the live tracks of `source_id`.
    ///
    /// Matched tracks are replaced wholesale by a new track initialised on the
    /// detection; unmatched detections start new tracks; unmatched tracks are
    /// left alone.
    pub fn associate(
        &self,
        source_id: &str,
        frame_id: u64,
        image: &RgbImage,
        detections: &[Rect],
    ) -> AssociationReport {
        let (store, created) = self.registry.get_or_create(source_id);
        let mut store = store.lock();

        let boxes: Vec<Rect> = detections.iter().copied().filter(Rect::is_valid).collect();
        let discarded = detections.len() - boxes.len();
        if discarded > 0 {
            warn!(source = source_id, frame = frame_id, discarded, "dropping degenerate detection boxes");
        }

        let tracks_before = store.len();
        let (track_ids, track_rects) = store.snapshot();
        let ious = iou_batch(&track_rects, &boxes);

        let AssignmentResult {
            matches,
            unmatched_detections,
            ..
        } = matching::greedy_assignment(&ious, self.config.iou_threshold);

        for &(itrack, idet) in &matches {
            store.remove(track_ids[itrack]);
            store.insert(boxes[idet], image, self.factory.create(), frame_id);
        }

        for &idet in &unmatched_detections {
            store.insert(boxes[idet], image, self.factory.create(), frame_id);
        }

        if created {
            debug!(source = source_id, frame = frame_id, tracks = store.len(), "tracker added");
        } else {
            debug!(
                source = source_id,
                frame = frame_id,
                matched = matches.len(),
                unmatched = unmatched_detections.len(),
                "detections associated"
            );
        }

        AssociationReport {
            detections: detections.len(),
            discarded,
            matched: matches.len(),
            unmatched: unmatched_detections.len(),
            tracks_before,
            tracks_after: store.len(),
        }
    }

    /// Advance every live track of `source_id` by one frame, dropping the
    /// ones whose tracker lost its target. Never creates tracks.
    pub fn update_all(&self, source_id: &str, frame_id: u64, image: &RgbImage) -> UpdateReport {
        let Some(store) = self.registry.get(source_id) else {
            debug!(source = source_id, frame = frame_id, "tracking not found");
            return UpdateReport::default();
        };
        let mut store = store.lock();

        let tracks_before = store.len();
        let lost: Vec<u64> = store
            .iter_mut()
            .filter_map(|track| (!track.advance(image)).then_some(track.track_id))
            .collect();
        for track_id in &lost {
            store.remove(*track_id);
        }

        debug!(
            source = source_id,
            frame = frame_id,
            lost = lost.len(),
            total = tracks_before,
            "tracks updated"
        );

        UpdateReport {
            tracks_before,
            lost: lost.len(),
            remaining: store.len(),
        }
    }
}
