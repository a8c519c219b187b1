//! A single tracked object and the single-target tracker capability behind it.

use std::fmt;

use image::RgbImage;

use crate::tracker::rect::Rect;

/// Single-object visual tracker: initialised once on a box, then asked to
/// follow that object frame by frame.
pub trait SingleTargetTracker: Send {
    /// Start following the object inside `bbox` on `image`.
    fn init(&mut self, image: &RgbImage, bbox: Rect);

    /// Locate the object in the next frame. `None` means the target is lost.
    fn update(&mut self, image: &RgbImage) -> Option<Rect>;
}

/// Creates a fresh tracker instance for every new track.
pub trait TrackerFactory: Send + Sync {
    fn create(&self) -> Box<dyn SingleTargetTracker>;
}

impl<F, T> TrackerFactory for F
where
    F: Fn() -> T + Send + Sync,
    T: SingleTargetTracker + 'static,
{
    fn create(&self) -> Box<dyn SingleTargetTracker> {
        Box::new(self())
    }
}

/// Single object track.
///
/// Owns its tracker instance; dropping the track releases it.
pub struct Track {
    /// Identifier, unique within the owning source
    pub track_id: u64,
    /// Frame on which the track was (re)created
    pub start_frame: u64,
    /// Number of successful updates since creation
    pub tracklet_len: u32,
    bbox: Rect,
    tracker: Box<dyn SingleTargetTracker>,
}

impl Track {
    /// Create a track on `bbox` and initialise its tracker against `image`.
    pub fn start(
        track_id: u64,
        bbox: Rect,
        image: &RgbImage,
        mut tracker: Box<dyn SingleTargetTracker>,
        frame_id: u64,
    ) -> Self {
        tracker.init(image, bbox);
        Self {
            track_id,
            start_frame: frame_id,
            tracklet_len: 0,
            bbox,
            tracker,
        }
    }

    /// Current bounding box.
    pub fn rect(&self) -> Rect {
        self.bbox
    }

    /// Advance the track by one frame. Returns `false` when the target was
    /// lost; the stored box is left unchanged in that case.
    pub fn advance(&mut self, image: &RgbImage) -> bool {
        match self.tracker.update(image) {
            Some(bbox) if bbox.is_valid() => {
                self.bbox = bbox;
                self.tracklet_len += 1;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("track_id", &self.track_id)
            .field("start_frame", &self.start_frame)
            .field("tracklet_len", &self.tracklet_len)
            .field("bbox", &self.bbox)
            .finish_non_exhaustive()
    }
}
