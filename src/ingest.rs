//! Frame ingestion: capture, queue, pace and route frames to the remote
//! stages.

pub mod announcer;
pub mod dispatch;
pub mod pacer;
pub mod pipeline;
pub mod queue;
pub mod source;

pub use announcer::Announcer;
pub use dispatch::{DETECTOR_SERVICE, Dispatcher, FrameClient, InFlight, Route, RoutingPolicy, TRACKER_SERVICE};
pub use pacer::Pacer;
pub use pipeline::{IngestHandle, IngestPipeline, IngestReport, ShutdownSignal, StopReason};
pub use queue::{FrameReceiver, FrameSender, frame_queue};
pub use source::{DirSourceFactory, FrameSource, ImageDirSource, SourceFactory, stream_url};
