use std::time::Duration;

use thiserror::Error;

/// Everything that can end a message, a swap, or a whole session.
///
/// Per-message errors are logged and the message discarded; everything
/// else tears the session down, except [`SourceError::TypeDetectionFailed`]
/// and [`SourceError::SwapAborted`], which return to the direct-streaming
/// caller and leave the live session running.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("malformed parameter body: {0}")]
    Malformed(#[from] wfdcast_protocol::MessageError),
    #[error(transparent)]
    Rtsp(#[from] wfdcast_protocol::RtspError),
    #[error("negotiation failed: {0}")]
    NegotiationFailed(#[from] wfdcast_protocol::NegotiationError),
    #[error("sink answered {step} with status {status}")]
    SinkRejected { step: &'static str, status: u16 },
    #[error("pipeline build failed: {0:#}")]
    BuildFailed(anyhow::Error),
    #[error("no usable source/demuxer detected for {uri}")]
    TypeDetectionFailed { uri: String },
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
    #[error("keepalive response missed its budget")]
    KeepaliveTimeout,
    #[error("no response to {step} within {timeout:?}")]
    RequestTimeout {
        step: &'static str,
        timeout: Duration,
    },
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error("hot-swap aborted: {0}")]
    SwapAborted(String),
}
