// RTMP client error taxonomy

use std::io;

/// Result alias used throughout this crate
pub type Result<T> = std::result::Result<T, RtmpError>;

/// All the ways a session, a command, or a media pull can fail
#[derive(Debug, thiserror::Error)]
pub enum RtmpError {
    /// The socket could not be reached, was closed by the peer, or a read/write timed out
    #[error("transport error: {0}")]
    TransportError(#[from] io::Error),

    /// The handshake failed: version mismatch or echo mismatch
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed header, reserved chunk-stream-id, invalid format-type transition, or
    /// an unknown message whose effect cannot be safely ignored
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A command or data payload could not be decoded as AMF0/AMF3
    #[error("AMF decode error: {0}")]
    AmfDecodeError(String),

    /// The server rejected a command; `code` is the `NetStatusType` string it sent
    #[error("command rejected: {code}")]
    CommandRejected {
        /// The `code` property of the `onStatus`/`_error` payload
        code: String,
    },

    /// The caller supplied invalid parameters
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation was attempted on a session that is already closed, or a pending
    /// operation was abandoned because the session closed underneath it
    #[error("session closed")]
    SessionClosed,

    /// A media pull was attempted after the session closed and the queue drained
    #[error("end of stream")]
    EndOfStream,
}

impl RtmpError {
    /// True for errors that mean the underlying connection is gone and the session
    /// should tear itself down, as opposed to recoverable command-level failures
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RtmpError::CommandRejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_rejected_is_not_fatal() {
        let err = RtmpError::CommandRejected {
            code: "NetConnection.Connect.Rejected".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn transport_error_is_fatal() {
        let err = RtmpError::TransportError(io::Error::other("boom"));
        assert!(err.is_fatal());
    }
}
