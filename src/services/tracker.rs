//! Tracker server: raw frames advance the tracks, detections re-anchor them.

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::frame::{DetectionMetadata, FrameMetadata, decode_image, now_timestamp};
use crate::metrics::MetricsSink;
use crate::rpc::{FrameData, PipelineService, Reply};
use crate::snapshot::Snapshots;
use crate::tracker::{Rect, TrackerEngine};

pub const ASSOCIATION_STAGE: &str = "association";
pub const UPDATE_STAGE: &str = "track_update";

pub struct TrackerService {
    engine: Arc<TrackerEngine>,
    metrics: Arc<dyn MetricsSink>,
    track_snapshots: Option<Snapshots>,
    detection_snapshots: Option<Snapshots>,
}

impl TrackerService {
    pub fn new(engine: Arc<TrackerEngine>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            engine,
            metrics,
            track_snapshots: None,
            detection_snapshots: None,
        }
    }

    /// Save every n-th tracked frame with the live tracks drawn.
    pub fn with_track_snapshots(mut self, snapshots: Option<Snapshots>) -> Self {
        self.track_snapshots = snapshots;
        self
    }

    /// Save every n-th frame that carried detections, after association.
    pub fn with_detection_snapshots(mut self, snapshots: Option<Snapshots>) -> Self {
        self.detection_snapshots = snapshots;
        self
    }

    pub fn engine(&self) -> &Arc<TrackerEngine> {
        &self.engine
    }
}

fn parse_metadata<T: DeserializeOwned>(raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!("malformed metadata: {e}");
            None
        }
    }
}

fn snapshot(snapshots: Option<&Snapshots>, engine: &TrackerEngine, source_id: &str, frame_id: u64, image: &RgbImage) {
    let Some(snapshots) = snapshots else {
        return;
    };
    if !snapshots.is_due(frame_id) {
        return;
    }
    let boxes: Vec<Rect> = engine.tracks(source_id).into_iter().map(|(_, bbox)| bbox).collect();
    if let Err(e) = snapshots.capture(image, frame_id, &boxes) {
        warn!(source = %source_id, frame = frame_id, "failed to write snapshot: {e}");
    }
}

impl PipelineService for TrackerService {
    async fn submit_frame(&self, request: FrameData) -> Reply {
        let received = now_timestamp();
        let Some(metadata) = parse_metadata::<FrameMetadata>(&request.metadata) else {
            return Reply::ok(request.sent_timestamp, received);
        };

        let engine = self.engine.clone();
        let metrics = self.metrics.clone();
        let snapshots = self.track_snapshots.clone();
        let frame = request.frame;
        tokio::task::spawn_blocking(move || {
            let image = match decode_image(&frame) {
                Ok(image) => image,
                Err(e) => {
                    warn!(source = %metadata.source_id, frame = metadata.frame_id, "undecodable frame: {e}");
                    return;
                }
            };
            let started = Instant::now();
            engine.update_all(&metadata.source_id, metadata.frame_id, &image);
            metrics.processing_ms(UPDATE_STAGE, started.elapsed().as_secs_f64() * 1e3);
            snapshot(snapshots.as_ref(), &engine, &metadata.source_id, metadata.frame_id, &image);
        });

        Reply::ok(request.sent_timestamp, received)
    }

    async fn submit_detections(&self, request: FrameData) -> Reply {
        let received = now_timestamp();
        let Some(metadata) = parse_metadata::<DetectionMetadata>(&request.metadata) else {
            return Reply::ok(request.sent_timestamp, received);
        };

        let engine = self.engine.clone();
        let metrics = self.metrics.clone();
        let snapshots = self.detection_snapshots.clone();
        let frame = request.frame;
        tokio::task::spawn_blocking(move || {
            let DetectionMetadata { frame: meta, boxes } = metadata;
            let image = match decode_image(&frame) {
                Ok(image) => image,
                Err(e) => {
                    warn!(source = %meta.source_id, frame = meta.frame_id, "undecodable frame: {e}");
                    return;
                }
            };
            let started = Instant::now();
            engine.associate(&meta.source_id, meta.frame_id, &image, &boxes);
            metrics.processing_ms(ASSOCIATION_STAGE, started.elapsed().as_secs_f64() * 1e3);
            snapshot(snapshots.as_ref(), &engine, &meta.source_id, meta.frame_id, &image);
        });

        Reply::ok(request.sent_timestamp, received)
    }
}
