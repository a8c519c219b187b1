//! Distributed detection and tracking pipeline.
//!
//! An ingest stage captures frames and routes them over RPC either to a
//! detector or straight to a tracker. The detector forwards its boxes to the
//! tracker, which associates them with live tracks by IoU and advances every
//! track on each raw frame it receives.

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod integration;
pub mod metrics;
pub mod rpc;
pub mod services;
pub mod snapshot;
pub mod telemetry;
pub mod tracker;

pub use config::{ConfigError, ConnectionConfig, IngestConfig};
pub use connection::{ConnectionHandle, ConnectionMonitor, Connector, Readiness, TcpConnector};
pub use error::{Error, Result};
pub use frame::{DetectionMetadata, Frame, FrameMetadata, SourceId};
pub use integration::{BlobConfig, BlobDetector, Detector};
pub use metrics::{MetricsSink, NullSink, Registry};
pub use snapshot::Snapshots;
pub use tracker::{Rect, SingleTargetTracker, TrackerEngine};
