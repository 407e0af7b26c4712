//! The `error` module defines the error types used across the channel core.
//!
//! Every failure that can resolve a completion handle or close a channel is a
//! [`ChannelError`]. It is `Clone` so that one closing cause can be handed to
//! every pending completion and to the handler's close notification.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::transport::message::ConnectReturnCode;

/// The cause of a channel failure or of a completion that did not succeed.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Socket-level failure. Always fatal to the channel.
    #[error("i/o failure: {0}")]
    Io(Arc<io::Error>),

    /// Malformed frame or a message the channel did not expect in its current state.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The remote side answered the handshake with a non-accepting return code.
    #[error("connection rejected: {0:?}")]
    Rejected(ConnectReturnCode),

    /// The channel was closed in an orderly way, or was already closed.
    #[error("channel closed")]
    Closed,

    /// The pending command was cancelled by the caller.
    #[error("command cancelled")]
    Cancelled,

    /// Nothing was received from the remote side within the silence window.
    #[error("no traffic received for {0} ms")]
    Timeout(i64),

    /// Every message identifier is currently in use on this channel.
    #[error("no free message identifier")]
    IdentifiersExhausted,
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        ChannelError::Io(Arc::new(err))
    }
}

impl From<DecodeError> for ChannelError {
    fn from(err: DecodeError) -> Self {
        ChannelError::Protocol(err.to_string())
    }
}

/// Wire-format failures raised while building, assembling or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("remaining length field is longer than 4 bytes")]
    MalformedLength,

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("invalid QoS bits {0}")]
    InvalidQos(u8),

    #[error("{0} body is truncated")]
    Truncated(&'static str),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("{field} of {len} bytes does not fit a 16-bit length prefix")]
    StringTooLong { field: &'static str, len: usize },
}
