//! The RPC services run by the binaries.

pub mod detector;
pub mod ingest;
pub mod tracker;

pub use detector::DetectorService;
pub use ingest::{IngestService, parse_endpoint};
pub use tracker::TrackerService;
