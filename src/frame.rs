//! Frames and the metadata that travels with them.

use chrono::{DateTime, SecondsFormat, Utc};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tracker::Rect;

/// Identifies one live video source across all stages.
pub type SourceId = String;

/// Wall-clock timestamp in the wire format: RFC 3339, nanosecond precision, UTC.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// JPEG-encode `image` at `quality` (1..=100).
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}

/// Decode any supported image format into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// A captured frame. Owned by exactly one stage at a time; dropping it
/// releases the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub source_id: SourceId,
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            source_id: self.source_id.clone(),
            frame_id: self.frame_id,
            timestamp: format_timestamp(self.timestamp),
        }
    }
}

/// Metadata attached to every `SubmitFrame` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub source_id: SourceId,
    pub frame_id: u64,
    pub timestamp: String,
}

/// Metadata attached to `SubmitDetections`: the frame's metadata plus the
/// boxes the detector found in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionMetadata {
    #[serde(flatten)]
    pub frame: FrameMetadata,
    #[serde(default)]
    pub boxes: Vec<Rect>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_wire_shape() {
        let meta = FrameMetadata {
            source_id: "rtsp://10.0.0.5:9000/stream".into(),
            frame_id: 7,
            timestamp: "2024-01-01T00:00:00.000000001Z".into(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["sourceId"], "rtsp://10.0.0.5:9000/stream");
        assert_eq!(json["frameId"], 7);
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00.000000001Z");
    }

    #[test]
    fn test_detection_metadata_flattens_frame() {
        let raw = r#"{"sourceId":"cam","frameId":3,"timestamp":"t","boxes":[{"x1":1,"y1":2,"x2":3,"y2":4}]}"#;
        let meta: DetectionMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.frame.frame_id, 3);
        assert_eq!(meta.boxes, vec![Rect::new(1.0, 2.0, 3.0, 4.0)]);
    }

    #[test]
    fn test_jpeg_keeps_dimensions() {
        let image = RgbImage::from_pixel(64, 48, image::Rgb([200, 10, 10]));
        let jpeg = encode_jpeg(&image, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let back = decode_image(&jpeg).unwrap();
        assert_eq!(back.dimensions(), (64, 48));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_image(b"not an image").is_err());
    }

    #[test]
    fn test_timestamp_has_nanoseconds() {
        let ts = DateTime::parse_from_rfc3339("2024-05-06T07:08:09.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(ts), "2024-05-06T07:08:09.123456789Z");
    }
}
