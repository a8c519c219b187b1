pub mod client;
pub mod codec;
pub mod message;
pub mod server;
pub mod timing;

pub use client::{CallOutcome, RpcClient};
pub use message::{Ack, Call, Data, FrameData, FrameHeader, Reply, STATUS_OK};
pub use server::{PipelineService, bind, serve};
pub use timing::{RoundTrip, TimingError, measure, observe_call};
