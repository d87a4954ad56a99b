// src/core/errors.rs

//! Defines the primary error type for the entire crate.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures a caller can observe.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The socket is unavailable and reconnection is disabled or exhausted.
    #[error("connection closed")]
    ConnectionClosed,

    /// A non-pub/sub command was issued on a subscribed connection, or a
    /// second subscription was attempted on an already-subscribed connection.
    #[error("connection is serving a subscription")]
    SubscribedConnection,

    /// A multi-key command whose keys hash to different slots.
    #[error("CROSSSLOT Keys in request don't hash to the same slot")]
    CrossSlot,

    /// Any `-PREFIX message` reply from the server, prefix exposed separately.
    #[error("{prefix} {message}")]
    Server { prefix: String, message: String },

    /// Malformed RESP framing. The connection that produced it is unusable.
    #[error("protocol error: {0}")]
    Decode(String),

    /// Lock acquisition did not succeed within the wait timeout.
    #[error("lock '{0}' unavailable within the wait timeout")]
    LockUnavailable(String),

    /// Internal invariant violation on the socket state.
    #[error("invalid socket state: {0}")]
    InvalidSocket(String),

    /// A well-formed reply whose shape does not match the command.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl ClientError {
    /// Builds a typed server error from the text of a `-` reply line,
    /// splitting off the leading prefix token (`ERR`, `MOVED`, `NOAUTH`, ...).
    pub fn from_error_line(line: &str) -> Self {
        match line.split_once(' ') {
            Some((prefix, message)) => ClientError::Server {
                prefix: prefix.to_string(),
                message: message.to_string(),
            },
            None => ClientError::Server {
                prefix: line.to_string(),
                message: String::new(),
            },
        }
    }

    /// True for transport-class failures. The subscription engine uses this
    /// to decide between "leave the connection broken" and "reconnect".
    pub fn is_io_class(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::ConnectionClosed | ClientError::Decode(_)
        )
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}
