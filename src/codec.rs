//! Wire-format encoding and decoding.
//!
//! Commands and events are tagged-record JSON frames, one object per text
//! frame. See spec §6 for the exact field shapes.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A handle rendered as a decimal string, per spec §3.
pub type HandleId = String;

/// Outbound command shapes (client → server).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Open a path, assigning it the given client-allocated handle.
    OpenFile {
        /// Server path. May carry the `@` snapshot-sigil prefix.
        path: String,
        /// Client-allocated handle.
        handle: HandleId,
    },
    /// Best-effort close of a previously opened handle.
    CloseFile {
        /// The handle to close.
        handle: HandleId,
    },
    /// Write new content, with the client's last observed content for
    /// merge context.
    WriteFile {
        /// The handle being written.
        handle: HandleId,
        /// The client's last observed content.
        last_content: String,
        /// The desired new content.
        new_content: String,
    },
    /// Repository-level commit.
    Commit {
        /// Commit message.
        message: String,
    },
}

/// Inbound event shapes (server → client).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Delivered exactly once per stream, in response to `open_file` (or
    /// synthesized/normalized by the engine on reconnect).
    FileOpened {
        /// The handle this event concerns.
        handle: HandleId,
        /// Server content at open time.
        content: String,
    },
    /// Terminal response to `close_file`.
    FileClosed {
        /// The handle this event concerns.
        handle: HandleId,
    },
    /// Unsolicited content update. Never terminal.
    FileUpdated {
        /// The handle this event concerns.
        handle: HandleId,
        /// Updated content.
        content: String,
    },
    /// Terminal response to `write_file`; also fanned out to the handle's
    /// stream.
    FileWritten {
        /// The handle this event concerns.
        handle: HandleId,
        /// Server-merged content.
        content: String,
    },
    /// Terminal response to `commit`.
    Committed,
    /// Server-side error, optionally correlated to a pending command via
    /// FIFO order, optionally naming a path.
    Error {
        /// Server-supplied message.
        message: String,
        /// Optional path the error concerns.
        #[serde(default)]
        path: Option<String>,
    },
}

impl Event {
    /// Returns the handle this event is addressed to, if any.
    ///
    /// `Committed` and `Error` are not handle-scoped.
    pub fn handle(&self) -> Option<&str> {
        match self {
            Self::FileOpened { handle, .. }
            | Self::FileClosed { handle }
            | Self::FileUpdated { handle, .. }
            | Self::FileWritten { handle, .. } => Some(handle.as_str()),
            Self::Committed | Self::Error { .. } => None,
        }
    }

    /// Whether this event kind consumes one entry from the command FIFO.
    ///
    /// `FileUpdated` is the sole non-terminal kind (spec invariant 3).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::FileUpdated { .. })
    }
}

/// Encode a command as a single-line JSON text frame.
pub fn encode(command: &Command) -> Result<String, SyncError> {
    serde_json::to_string(command)
        .map_err(|e| SyncError::protocol(format!("failed to encode command: {e}")))
}

/// Decode a text frame into an `Event`.
///
/// Returns `SyncError::Protocol` if the frame is not valid JSON or does not
/// match any known event shape (spec §4.1).
pub fn decode(frame: &str) -> Result<Event, SyncError> {
    serde_json::from_str(frame)
        .map_err(|e| SyncError::protocol(format!("failed to decode frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_open_file_with_tag() {
        let cmd = Command::OpenFile {
            path: "TASKS.md".into(),
            handle: "1".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&encode(&cmd).unwrap()).unwrap();
        assert_eq!(json["type"], "open_file");
        assert_eq!(json["path"], "TASKS.md");
        assert_eq!(json["handle"], "1");
    }

    #[test]
    fn encodes_write_file_fields() {
        let cmd = Command::WriteFile {
            handle: "1".into(),
            last_content: "a".into(),
            new_content: "b".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&encode(&cmd).unwrap()).unwrap();
        assert_eq!(json["last_content"], "a");
        assert_eq!(json["new_content"], "b");
    }

    #[test]
    fn decodes_file_opened() {
        let frame = r#"{"type":"file_opened","handle":"1","content":"hello"}"#;
        let event = decode(frame).unwrap();
        assert_eq!(
            event,
            Event::FileOpened {
                handle: "1".into(),
                content: "hello".into(),
            }
        );
        assert!(event.is_terminal());
        assert_eq!(event.handle(), Some("1"));
    }

    #[test]
    fn decodes_file_updated_as_non_terminal() {
        let frame = r#"{"type":"file_updated","handle":"2","content":"x"}"#;
        let event = decode(frame).unwrap();
        assert!(!event.is_terminal());
    }

    #[test]
    fn decodes_committed_with_no_handle() {
        let event = decode(r#"{"type":"committed"}"#).unwrap();
        assert_eq!(event, Event::Committed);
        assert_eq!(event.handle(), None);
        assert!(event.is_terminal());
    }

    #[test]
    fn decodes_error_with_optional_path() {
        let event = decode(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(
            event,
            Event::Error {
                message: "boom".into(),
                path: None,
            }
        );

        let event = decode(r#"{"type":"error","message":"boom","path":"a.txt"}"#).unwrap();
        assert_eq!(
            event,
            Event::Error {
                message: "boom".into(),
                path: Some("a.txt".into()),
            }
        );
    }

    #[test]
    fn rejects_invalid_frame() {
        let err = decode(r#"{"type":"not_a_real_event"}"#).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));

        let err = decode("not json at all").unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }
}
