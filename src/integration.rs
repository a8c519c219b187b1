//! Object detection backends.
//!
//! The detector service runs any [`Detector`]; [`BlobDetector`] is the
//! built-in one.

mod blob;
mod detector;

pub use blob::{BlobConfig, BlobDetector};
pub use detector::Detector;
