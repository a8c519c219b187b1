//! Messages exchanged between pipeline services.

use serde::{Deserialize, Serialize};

use crate::frame::now_timestamp;

/// Status string carried by every successful acknowledgement.
pub const STATUS_OK: &str = "ok";

/// Payload of `RegisterSource`: a `host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub payload: String,
    pub sent_timestamp: String,
}

/// Header part of `SubmitFrame` and `SubmitDetections`; the encoded image
/// travels as the message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// JSON-encoded `FrameMetadata` or `DetectionMetadata`.
    pub metadata: String,
    pub sent_timestamp: String,
}

/// A frame submission as seen by a service handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameData {
    pub frame: Vec<u8>,
    pub metadata: String,
    pub sent_timestamp: String,
}

impl FrameData {
    pub fn new(header: FrameHeader, frame: Vec<u8>) -> Self {
        Self {
            frame,
            metadata: header.metadata,
            sent_timestamp: header.sent_timestamp,
        }
    }
}

/// One RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Call {
    RegisterSource(Data),
    SubmitFrame(FrameHeader),
    SubmitDetections(FrameHeader),
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Call::RegisterSource(_) => "RegisterSource",
            Call::SubmitFrame(_) => "SubmitFrame",
            Call::SubmitDetections(_) => "SubmitDetections",
        }
    }
}

/// Acknowledgement returned by every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
    /// The caller's `sent_timestamp`, echoed back.
    pub original_sent_timestamp: String,
    /// When the receiver got the call.
    pub received_timestamp: String,
    /// When the receiver sent this reply.
    pub ack_sent_timestamp: String,
}

impl Ack {
    /// Successful ack; `ack_sent_timestamp` is stamped now.
    pub fn ok(original_sent_timestamp: impl Into<String>, received_timestamp: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            original_sent_timestamp: original_sent_timestamp.into(),
            received_timestamp: received_timestamp.into(),
            ack_sent_timestamp: now_timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ack(Ack),
    Error { message: String },
}

impl Reply {
    pub fn ok(original_sent_timestamp: impl Into<String>, received_timestamp: impl Into<String>) -> Self {
        Reply::Ack(Ack::ok(original_sent_timestamp, received_timestamp))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }

    pub fn unimplemented(method: &str) -> Self {
        Reply::error(format!("method {method} not implemented"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub id: u64,
    pub call: Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub id: u64,
    pub reply: Reply,
}
