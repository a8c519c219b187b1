//! Trait for object detection backends.

use image::RgbImage;

use crate::tracker::Rect;

/// Object detection capability: given an image, return boxes.
///
/// Implement this trait to plug any detection model into the detector
/// service.
///
/// # Example
///
/// ```ignore
/// use detrack::{Detector, Rect};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl Detector for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, image: &image::RgbImage) -> Result<Vec<Rect>, Self::Error> {
///         // Run inference and return boxes in image coordinates
///         Ok(vec![])
///     }
/// }
/// ```
pub trait Detector: Send + 'static {
    /// Error type for detection failures.
    type Error: std::fmt::Display + Send;

    /// Run inference on one decoded frame and return boxes in TLBR format.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Rect>, Self::Error>;
}
