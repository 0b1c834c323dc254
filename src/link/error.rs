use std::io;
use thiserror::Error;

/// Failures raised by the protocol layer.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Fewer bytes than requested arrived before the deadline. Buffered bytes are kept.
    #[error("timed out after {waited_ms}ms waiting for {wanted} bytes ({available} buffered)")]
    Timeout {
        wanted: usize,
        available: usize,
        waited_ms: u64,
    },

    /// Bytes arrived but did not form a valid envelope.
    #[error("protocol violation: {0}")]
    Violation(String),

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    TransportIo(#[from] io::Error),

    /// Cooperative shutdown was requested.
    #[error("cancelled")]
    Cancelled,

    /// The handshake failed repeatedly.
    #[error("handshake abandoned after {attempts} attempts")]
    SyncExhausted { attempts: u32 },
}

impl LinkError {
    pub fn violation(msg: impl Into<String>) -> Self {
        LinkError::Violation(msg.into())
    }

    /// Timeouts and malformed envelopes are recovered from locally with NAK/retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkError::Timeout { .. } | LinkError::Violation(_))
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
