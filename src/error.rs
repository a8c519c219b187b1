//! Crate-wide error type.

use thiserror::Error;

/// Errors produced by the pipeline stages and the RPC layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registration payload was not `host:port`.
    #[error("invalid payload format: {0:?}")]
    InvalidPayload(String),

    #[error("message of {0} bytes exceeds the frame limit")]
    MessageTooLarge(usize),

    /// The remote answered with an error reply.
    #[error("remote error: {0}")]
    Remote(String),

    /// The connection went away before a reply arrived.
    #[error("connection closed")]
    Disconnected,

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("client for {0} is not initialized")]
    NotConnected(String),

    #[error("frame source error: {0}")]
    Source(String),

    #[error("detector error: {0}")]
    Detector(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
