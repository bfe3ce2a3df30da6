use thiserror::Error;

use crate::peer::message::MessageId;

/// Errors raised on a single peer connection.
///
/// None of these escape the worker that owns the connection; the scheduler
/// only ever sees [`crate::peer::client::DownloadError`].
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The stream ended in the middle of a frame.
    #[error("truncated frame: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),

    #[error("info hash mismatch")]
    InfoHashMismatch,

    /// A complete frame was read but its id is not one we know.
    #[error("unknown message id {0}")]
    UnknownMessageId(u8),

    #[error("expected {expected:?} message, got {actual:?}")]
    UnexpectedMessage {
        expected: MessageId,
        actual: MessageId,
    },

    #[error("expected {0:?} message, got keep-alive")]
    UnexpectedKeepAlive(MessageId),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("dropped after {0} consecutive failed pieces")]
    TooManyFailures(usize),
}
