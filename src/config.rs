//! Runtime configuration shared by the library and the binaries.
//!
//! Every struct has a usable `Default` and can be partially overridden from a
//! JSON file; missing fields keep their defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Load a configuration struct from a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Per-source ingestion settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Target frames per second for the reader loop.
    pub frame_rate: f64,
    /// Capacity of the frame queue between reader and sender.
    pub queue_size: usize,
    /// Stop reading after this many frames; 0 means unlimited.
    pub max_frames: u64,
    /// Every n-th frame goes to the detector.
    pub detection_frequency: u64,
    /// Route frame 1 to the detector regardless of `detection_frequency`.
    pub first_frame_to_detector: bool,
    pub image_width: u32,
    pub image_height: u32,
    pub jpeg_quality: u8,
    /// Consecutive failed reads before the pipeline shuts itself down.
    pub empty_frame_limit: u32,
    pub empty_retry_delay_ms: u64,
    /// How long shutdown waits for in-flight sends.
    pub send_grace_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            frame_rate: 10.0,
            queue_size: 120,
            max_frames: 0,
            detection_frequency: 20,
            first_frame_to_detector: true,
            image_width: 640,
            image_height: 360,
            jpeg_quality: 90,
            empty_frame_limit: 10,
            empty_retry_delay_ms: 500,
            send_grace_ms: 2_000,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(invalid("frame_rate", "must be a positive number"));
        }
        if Duration::try_from_secs_f64(self.frame_rate.recip()).is_err() {
            return Err(invalid("frame_rate", "too small, the frame period does not fit a duration"));
        }
        if self.queue_size == 0 {
            return Err(invalid("queue_size", "must be at least 1"));
        }
        if self.detection_frequency == 0 {
            return Err(invalid("detection_frequency", "must be at least 1"));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(invalid("image_width", "frame dimensions must be non-zero"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(invalid("jpeg_quality", "must be within 1..=100"));
        }
        if self.empty_frame_limit == 0 {
            return Err(invalid("empty_frame_limit", "must be at least 1"));
        }
        Ok(())
    }

    /// Target duration of one reader iteration. Saturates for rates too
    /// small to represent.
    pub fn frame_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.frame_rate.recip()).unwrap_or(Duration::MAX)
    }

    pub fn empty_retry_delay(&self) -> Duration {
        Duration::from_millis(self.empty_retry_delay_ms)
    }

    pub fn send_grace(&self) -> Duration {
        Duration::from_millis(self.send_grace_ms)
    }
}

/// Settings for the outbound connection monitor and RPC calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub monitor_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 5_000,
            probe_timeout_ms: 3_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor_interval_ms == 0 {
            return Err(invalid("monitor_interval_ms", "must be non-zero"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(invalid("probe_timeout_ms", "must be non-zero"));
        }
        if self.call_timeout_ms == 0 {
            return Err(invalid("call_timeout_ms", "must be non-zero"));
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        IngestConfig::default().validate().unwrap();
        ConnectionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_frame_period() {
        let cfg = IngestConfig {
            frame_rate: 10.0,
            ..Default::default()
        };
        assert_eq!(cfg.frame_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_rejects_unrepresentable_frame_period() {
        let cfg = IngestConfig {
            frame_rate: 1e-30,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
        assert_eq!(cfg.frame_period(), Duration::MAX);

        let slow = IngestConfig {
            frame_rate: 0.5,
            ..Default::default()
        };
        slow.validate().unwrap();
        assert_eq!(slow.frame_period(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_zero_frequency() {
        let cfg = IngestConfig {
            detection_frequency: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "detection_frequency",
                ..
            })
        ));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: IngestConfig = serde_json::from_str(r#"{"queue_size": 4}"#).unwrap();
        assert_eq!(cfg.queue_size, 4);
        assert_eq!(cfg.detection_frequency, 20);
    }
}
