//! Error taxonomy for the file-sync protocol engine.
//!
//! Mirrors the hand-rolled `ChannelError` style used elsewhere in the
//! connection stack: a plain enum with manual `Display`, no `thiserror`.

use std::fmt;

/// Errors surfaced to façade callers.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// A decoded frame did not match any known shape, or a command received
    /// an event type that cannot terminate it.
    Protocol(String),

    /// A pending command was interrupted by the channel closing before a
    /// terminal event arrived.
    ConnectionClosed,

    /// The server sent an `error` event correlated to a pending command.
    Remote {
        /// Server-supplied message, carried verbatim.
        message: String,
        /// Optional path the error refers to.
        path: Option<String>,
    },

    /// A caller misused the API: double iteration of a `FileStream`, or a
    /// write to a file that has already been closed.
    Usage(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Remote { message, path: Some(path) } => {
                write!(f, "remote error on {path}: {message}")
            }
            Self::Remote { message, path: None } => write!(f, "remote error: {message}"),
            Self::Usage(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl SyncError {
    /// Construct a protocol error from a decode or correlation failure.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Construct a usage error for synchronous misuse (double iteration,
    /// write-after-close).
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }
}
