//! Per-instance handle allocation and event routing.
//!
//! Grounded in `client/registry.rs`'s `ClientRegistry` (a `HashMap`-backed
//! CRUD registry), narrowed to this crate's handle semantics: handles are
//! decimal strings allocated by a monotonic counter (spec §3) rather than
//! the teacher's `ClientId` enum, and routing applies the reconnect
//! normalization rules from spec §4.4 instead of client dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::{Event, HandleId};
use crate::stream::{self, FileStream, StreamSender};

/// State the registry keeps per open handle (spec §3, "OpenFile record").
pub(crate) struct OpenFile {
    pub(crate) path: String,
    pub(crate) last_content: Option<String>,
    pub(crate) has_been_opened: bool,
    sink: StreamSender,
}

/// Outcome of routing one handle-scoped event through normalization.
pub(crate) enum Routed {
    /// The event (possibly rewritten) was delivered to the handle's stream.
    Delivered,
    /// The event was suppressed — content unchanged from `last_content`.
    Suppressed,
    /// No handle exists for the event's target; the caller should drop it.
    UnknownHandle,
}

/// Allocates handles and routes inbound handle-scoped events to their
/// `FileStream`, applying reconnect normalization (spec §4.4).
#[derive(Default)]
pub(crate) struct HandleRegistry {
    next_handle: AtomicU64,
    files: HashMap<HandleId, OpenFile>,
}

impl HandleRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            files: HashMap::new(),
        }
    }

    /// Allocate a fresh handle for `path` and create its `OpenFile` entry.
    ///
    /// Returns the handle id and the `FileStream` the caller should hand to
    /// `File::get_events`.
    pub(crate) fn allocate(&mut self, path: String) -> (HandleId, FileStream) {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst).to_string();
        let (sink, stream) = stream::channel();
        self.files.insert(
            id.clone(),
            OpenFile {
                path,
                last_content: None,
                has_been_opened: false,
                sink,
            },
        );
        (id, stream)
    }

    pub(crate) fn get(&self, handle: &str) -> Option<&OpenFile> {
        self.files.get(handle)
    }

    pub(crate) fn contains(&self, handle: &str) -> bool {
        self.files.contains_key(handle)
    }

    /// Whether at least one `OpenFile` exists — the supervisor's signal for
    /// choosing `RECONNECT_WAIT` over `DISCONNECTED` on connection loss
    /// (spec §4.6).
    pub(crate) fn has_open_files(&self) -> bool {
        !self.files.is_empty()
    }

    /// Surface a connection-loss failure directly on a handle's stream —
    /// used when the handle's `open_file` command never completed before
    /// the connection dropped (spec §4.7's "fails if iteration is started
    /// while the file has not successfully opened"). A no-op for handles
    /// that have already opened or no longer exist.
    pub(crate) fn notify_open_failed(&mut self, handle: &str) {
        if let Some(file) = self.files.get(handle) {
            if !file.has_been_opened {
                file.sink.enqueue(Event::Error {
                    message: "connection closed before the file finished opening".into(),
                    path: Some(file.path.clone()),
                });
            }
        }
    }

    /// Every handle that has completed its first `file_opened` — the set
    /// the supervisor re-establishes on reconnect (spec §4.6).
    pub(crate) fn opened_handles(&self) -> Vec<HandleId> {
        self.files
            .iter()
            .filter(|(_, f)| f.has_been_opened)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove the handle's entry, closing its stream if present.
    pub(crate) fn forget(&mut self, handle: &str) {
        if let Some(mut file) = self.files.remove(handle) {
            file.sink.close();
        }
    }

    /// Route a handle-scoped event to its stream, applying spec §4.4
    /// normalization:
    ///
    /// 1. A post-reconnect `file_opened` (`has_been_opened == true`) is
    ///    rewritten to `file_updated`.
    /// 2. The (possibly rewritten) `file_updated` is suppressed if its
    ///    content equals `last_content`.
    /// 3. Otherwise `last_content` is updated and the event is delivered;
    ///    the first delivered `file_opened` sets `has_been_opened = true`.
    pub(crate) fn route(&mut self, event: Event) -> Routed {
        let Some(handle) = event.handle().map(str::to_owned) else {
            return Routed::UnknownHandle;
        };

        let Some(file) = self.files.get_mut(&handle) else {
            return Routed::UnknownHandle;
        };

        let normalized = match event {
            Event::FileOpened { handle, content } if file.has_been_opened => {
                Event::FileUpdated { handle, content }
            }
            other => other,
        };

        if let Event::FileUpdated { content, .. } = &normalized {
            if file.last_content.as_deref() == Some(content.as_str()) {
                return Routed::Suppressed;
            }
        }

        let content = match &normalized {
            Event::FileOpened { content, .. }
            | Event::FileUpdated { content, .. }
            | Event::FileWritten { content, .. } => Some(content.clone()),
            Event::FileClosed { .. } => None,
            Event::Committed | Event::Error { .. } => None,
        };
        if let Some(content) = content {
            file.last_content = Some(content);
        }
        if matches!(normalized, Event::FileOpened { .. }) {
            file.has_been_opened = true;
        }

        file.sink.enqueue(normalized);
        Routed::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_assigns_monotonic_decimal_handles() {
        let mut registry = HandleRegistry::new();
        let (h1, _) = registry.allocate("a.txt".into());
        let (h2, _) = registry.allocate("b.txt".into());
        assert_eq!(h1, "1");
        assert_eq!(h2, "2");
    }

    #[tokio::test]
    async fn first_file_opened_is_delivered_and_marks_opened() {
        let mut registry = HandleRegistry::new();
        let (h1, mut stream) = registry.allocate("a.txt".into());

        let routed = registry.route(Event::FileOpened {
            handle: h1.clone(),
            content: "v1".into(),
        });
        assert!(matches!(routed, Routed::Delivered));
        assert!(registry.get(&h1).unwrap().has_been_opened);
        assert_eq!(
            stream.next().await,
            Some(Event::FileOpened {
                handle: h1,
                content: "v1".into(),
            })
        );
    }

    #[tokio::test]
    async fn reconnect_open_with_unchanged_content_is_suppressed() {
        let mut registry = HandleRegistry::new();
        let (h1, mut stream) = registry.allocate("a.txt".into());
        registry.route(Event::FileOpened {
            handle: h1.clone(),
            content: "v1".into(),
        });
        stream.next().await;

        let routed = registry.route(Event::FileOpened {
            handle: h1.clone(),
            content: "v1".into(),
        });
        assert!(matches!(routed, Routed::Suppressed));
    }

    #[tokio::test]
    async fn reconnect_open_with_changed_content_becomes_single_update() {
        let mut registry = HandleRegistry::new();
        let (h1, mut stream) = registry.allocate("a.txt".into());
        registry.route(Event::FileOpened {
            handle: h1.clone(),
            content: "v1".into(),
        });
        stream.next().await;

        let routed = registry.route(Event::FileOpened {
            handle: h1.clone(),
            content: "v2".into(),
        });
        assert!(matches!(routed, Routed::Delivered));
        assert_eq!(
            stream.next().await,
            Some(Event::FileUpdated {
                handle: h1,
                content: "v2".into(),
            })
        );
    }

    #[tokio::test]
    async fn event_for_unknown_handle_is_dropped() {
        let mut registry = HandleRegistry::new();
        let routed = registry.route(Event::FileUpdated {
            handle: "999".into(),
            content: "x".into(),
        });
        assert!(matches!(routed, Routed::UnknownHandle));
    }

    #[tokio::test]
    async fn notify_open_failed_delivers_error_before_first_open() {
        let mut registry = HandleRegistry::new();
        let (h1, mut stream) = registry.allocate("a.txt".into());

        registry.notify_open_failed(&h1);

        match stream.next().await {
            Some(Event::Error { path, .. }) => assert_eq!(path.as_deref(), Some("a.txt")),
            other => panic!("expected Error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notify_open_failed_is_a_no_op_once_opened() {
        let mut registry = HandleRegistry::new();
        let (h1, mut stream) = registry.allocate("a.txt".into());
        registry.route(Event::FileOpened {
            handle: h1.clone(),
            content: "v1".into(),
        });
        stream.next().await;

        registry.notify_open_failed(&h1);
        registry.forget(&h1);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn forget_closes_the_stream() {
        let mut registry = HandleRegistry::new();
        let (h1, mut stream) = registry.allocate("a.txt".into());
        registry.forget(&h1);
        assert_eq!(stream.next().await, None);
    }
}
