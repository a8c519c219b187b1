//! Detector server: runs detection on each submitted frame and forwards the
//! boxes to the tracker.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::frame::{DetectionMetadata, FrameMetadata, decode_image, now_timestamp};
use crate::ingest::TRACKER_SERVICE;
use crate::integration::Detector;
use crate::metrics::MetricsSink;
use crate::rpc::{FrameData, PipelineService, Reply, RpcClient, observe_call};
use crate::snapshot::Snapshots;
use crate::tracker::Rect;

pub const DETECTION_STAGE: &str = "detection";

pub struct DetectorService<D> {
    detector: Arc<Mutex<D>>,
    tracker: Arc<ConnectionHandle<RpcClient>>,
    metrics: Arc<dyn MetricsSink>,
    snapshots: Option<Snapshots>,
}

impl<D: Detector> DetectorService<D> {
    pub fn new(detector: D, tracker: Arc<ConnectionHandle<RpcClient>>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
            tracker,
            metrics,
            snapshots: None,
        }
    }

    /// Save every n-th frame with its detections drawn.
    pub fn with_snapshots(mut self, snapshots: Option<Snapshots>) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Decode and detect on a blocking thread. Gives the encoded frame back
    /// for forwarding.
    async fn detect(&self, frame_id: u64, frame: Vec<u8>) -> Result<(Vec<Rect>, Vec<u8>)> {
        let detector = self.detector.clone();
        let metrics = self.metrics.clone();
        let snapshots = self.snapshots.clone();
        tokio::task::spawn_blocking(move || {
            let image = decode_image(&frame)?;
            let started = Instant::now();
            let boxes = detector
                .lock()
                .detect(&image)
                .map_err(|e| Error::Detector(e.to_string()))?;
            metrics.processing_ms(DETECTION_STAGE, started.elapsed().as_secs_f64() * 1e3);
            if let Some(snapshots) = &snapshots {
                if let Err(e) = snapshots.capture(&image, frame_id, &boxes) {
                    warn!(frame = frame_id, "failed to write snapshot: {e}");
                }
            }
            Ok((boxes, frame))
        })
        .await
        .map_err(|e| Error::Detector(format!("detection task failed: {e}")))?
    }
}

impl<D: Detector> PipelineService for DetectorService<D> {
    async fn submit_frame(&self, request: FrameData) -> Reply {
        let received = now_timestamp();
        let FrameData {
            frame,
            metadata,
            sent_timestamp,
        } = request;

        let metadata: FrameMetadata = match serde_json::from_str(&metadata) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("malformed frame metadata: {e}");
                return Reply::ok(sent_timestamp, received);
            }
        };

        match self.detect(metadata.frame_id, frame).await {
            Ok((boxes, frame)) => {
                debug!(
                    source = %metadata.source_id,
                    frame = metadata.frame_id,
                    detections = boxes.len(),
                    "frame processed"
                );
                let detections = DetectionMetadata { frame: metadata, boxes };
                tokio::spawn(forward(self.tracker.clone(), self.metrics.clone(), detections, frame));
            }
            Err(e) => error!(source = %metadata.source_id, frame = metadata.frame_id, "{e}"),
        }
        Reply::ok(sent_timestamp, received)
    }
}

async fn forward(
    tracker: Arc<ConnectionHandle<RpcClient>>,
    metrics: Arc<dyn MetricsSink>,
    detections: DetectionMetadata,
    frame: Vec<u8>,
) {
    let source = &detections.frame.source_id;
    let frame_id = detections.frame.frame_id;
    let Some(client) = tracker.load() else {
        warn!(service = TRACKER_SERVICE, %source, frame = frame_id, "client not initialized, detections dropped");
        return;
    };
    match client.submit_detections(&detections, frame).await {
        Ok(outcome) => {
            let rt = observe_call(metrics.as_ref(), TRACKER_SERVICE, &outcome);
            debug!(
                %source,
                frame = frame_id,
                transit_ms = rt.map(|rt| rt.transit_ms),
                "detections forwarded"
            );
        }
        Err(e) => warn!(service = TRACKER_SERVICE, %source, frame = frame_id, "forward failed: {e}"),
    }
}
