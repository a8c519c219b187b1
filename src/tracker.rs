//! Multi-object tracking: IoU association of detections with live tracks,
//! each track followed by its own single-target tracker.

mod engine;
mod kalman_filter;
mod matching;
mod rect;
mod store;
mod template;
mod track;

pub use engine::{AssociationReport, EngineConfig, TrackerEngine, UpdateReport};
pub use kalman_filter::{KalmanFilter, KalmanState};
pub use matching::{AssignmentResult, greedy_assignment};
pub use rect::{Rect, iou_batch};
pub use store::{SharedTrackStore, TrackRegistry, TrackStore};
pub use template::{TemplateConfig, TemplateTracker};
pub use track::{SingleTargetTracker, Track, TrackerFactory};
