//! Debug snapshots: every n-th frame is written to disk as a JPEG with the
//! current boxes drawn on it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use tracing::debug;

use crate::error::Result;
use crate::frame::encode_jpeg;
use crate::tracker::Rect;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const SNAPSHOT_QUALITY: u8 = 90;

/// Writes `<unix_nanos>_f<frame>_<label>.jpg` into a directory every
/// `frequency` frames.
#[derive(Debug, Clone)]
pub struct Snapshots {
    dir: PathBuf,
    frequency: u64,
    label: &'static str,
}

impl Snapshots {
    pub fn new(dir: impl Into<PathBuf>, frequency: u64, label: &'static str) -> Self {
        Self {
            dir: dir.into(),
            frequency,
            label,
        }
    }

    /// `None` when no directory is given or the frequency is zero.
    pub fn from_options(dir: Option<&Path>, frequency: u64, label: &'static str) -> Option<Self> {
        match dir {
            Some(dir) if frequency > 0 => Some(Self::new(dir, frequency, label)),
            _ => None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_due(&self, frame_id: u64) -> bool {
        self.frequency > 0 && frame_id % self.frequency == 0
    }

    /// Draw `boxes` on a copy of `image` and write it if `frame_id` is due.
    /// Returns the path written.
    pub fn capture(&self, image: &RgbImage, frame_id: u64, boxes: &[Rect]) -> Result<Option<PathBuf>> {
        if !self.is_due(frame_id) {
            return Ok(None);
        }
        let mut canvas = image.clone();
        draw_boxes(&mut canvas, boxes);
        let jpeg = encode_jpeg(&canvas, SNAPSHOT_QUALITY)?;

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = self.dir.join(format!("{nanos}_f{frame_id}_{}.jpg", self.label));
        std::fs::write(&path, jpeg)?;
        debug!(frame = frame_id, boxes = boxes.len(), path = %path.display(), "snapshot written");
        Ok(Some(path))
    }
}

/// Outline each box, clipped to the image. Degenerate boxes are skipped.
pub fn draw_boxes(image: &mut RgbImage, boxes: &[Rect]) {
    let (width, height) = image.dimensions();
    for bbox in boxes {
        let clipped = bbox.clamp_to(width, height);
        for inset in 0..BOX_THICKNESS {
            let inset = inset as f32;
            let x = (clipped.x1 + inset).round();
            let y = (clipped.y1 + inset).round();
            let w = (clipped.width() - 2.0 * inset).round();
            let h = (clipped.height() - 2.0 * inset).round();
            if w < 1.0 || h < 1.0 {
                break;
            }
            let outline = imageproc::rect::Rect::at(x as i32, y as i32).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, outline, BOX_COLOR);
        }
    }
}
