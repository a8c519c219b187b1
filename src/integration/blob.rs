//! Threshold and connected-components detector.
//!
//! Finds bright (or, inverted, dark) blobs against a plain background. It
//! needs no model file, which makes it the default backend of the detector
//! binary and a predictable stand-in in tests.

use std::collections::BTreeMap;
use std::convert::Infallible;

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{Connectivity, connected_components};

use super::Detector;
use crate::tracker::Rect;

#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Fixed foreground threshold; `None` picks one per frame with Otsu.
    pub threshold: Option<u8>,
    /// Treat dark pixels as foreground.
    pub invert: bool,
    /// Blobs with fewer pixels are ignored.
    pub min_area: u32,
    pub max_detections: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            invert: false,
            min_area: 64,
            max_detections: 200,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlobDetector {
    config: BlobConfig,
}

struct Extent {
    x_min: u32,
    y_min: u32,
    x_max: u32,
    y_max: u32,
    pixels: u32,
}

impl BlobDetector {
    pub fn new(config: BlobConfig) -> Self {
        Self { config }
    }

    fn foreground(&self, gray: &GrayImage) -> GrayImage {
        let level = self.config.threshold.unwrap_or_else(|| otsu_level(gray));
        let invert = self.config.invert;
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let v = gray.get_pixel(x, y)[0];
            let on = if invert { v < level } else { v > level };
            Luma([if on { 255 } else { 0 }])
        })
    }
}

impl Detector for BlobDetector {
    type Error = Infallible;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Rect>, Self::Error> {
        let gray = imageops::grayscale(image);
        let mask = self.foreground(&gray);
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        let mut extents: BTreeMap<u32, Extent> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let e = extents.entry(label).or_insert(Extent {
                x_min: x,
                y_min: y,
                x_max: x,
                y_max: y,
                pixels: 0,
            });
            e.x_min = e.x_min.min(x);
            e.y_min = e.y_min.min(y);
            e.x_max = e.x_max.max(x);
            e.y_max = e.y_max.max(y);
            e.pixels += 1;
        }

        Ok(extents
            .into_values()
            .filter(|e| e.pixels >= self.config.min_area)
            .take(self.config.max_detections)
            .map(|e| {
                Rect::new(
                    e.x_min as f32,
                    e.y_min as f32,
                    (e.x_max + 1) as f32,
                    (e.y_max + 1) as f32,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn fill(image: &mut RgbImage, r: Rect) {
        for y in r.y1 as u32..r.y2 as u32 {
            for x in r.x1 as u32..r.x2 as u32 {
                image.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
    }

    #[test]
    fn test_finds_two_blobs() {
        let mut image = RgbImage::new(120, 80);
        let a = Rect::new(10.0, 10.0, 30.0, 25.0);
        let b = Rect::new(60.0, 40.0, 100.0, 70.0);
        fill(&mut image, a);
        fill(&mut image, b);

        let mut detector = BlobDetector::new(BlobConfig {
            threshold: Some(128),
            ..Default::default()
        });
        let boxes = detector.detect(&image).unwrap();
        assert_eq!(boxes, vec![a, b]);
    }

    #[test]
    fn test_small_blobs_ignored() {
        let mut image = RgbImage::new(50, 50);
        fill(&mut image, Rect::new(5.0, 5.0, 8.0, 8.0));

        let mut detector = BlobDetector::new(BlobConfig {
            threshold: Some(128),
            min_area: 16,
            ..Default::default()
        });
        assert!(detector.detect(&image).unwrap().is_empty());
    }

    #[test]
    fn test_blank_frame_has_no_detections() {
        let mut detector = BlobDetector::default();
        assert!(detector.detect(&RgbImage::new(32, 32)).unwrap().is_empty());
    }
}
