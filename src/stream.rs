//! Per-handle lazy event sequence.
//!
//! Grounded in `ChannelReceiverHandle` (`channel/action_cable.rs`): a thin
//! wrapper around an async mpsc receiver, `recv`-style rather than a
//! `futures::Stream` impl, matching the teacher's own receiver handles.
//!
//! Unbounded and without backpressure, per spec §4.5/§5: producers
//! (`StreamSender`, held by the registry) never block on a slow consumer.

use tokio::sync::mpsc;

use crate::codec::Event;

/// Producer side of a `FileStream`, held by `HandleRegistry`.
///
/// `close` drops the underlying sender, which lets the paired `FileStream`
/// drain whatever is already buffered and then observe end-of-stream —
/// idempotent, since dropping an already-dropped sender is a no-op.
pub(crate) struct StreamSender {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl StreamSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Enqueue an event. Silently dropped if the stream has been closed or
    /// its consumer has gone away — producers never block or fail loudly
    /// here (spec §4.5: "producers append without bound").
    pub(crate) fn enqueue(&self, event: Event) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Close the stream. Idempotent.
    pub(crate) fn close(&mut self) {
        self.tx = None;
    }
}

/// Consumer side of a per-handle event sequence, returned once by
/// `File::get_events`.
///
/// Iteration is `next().await` in a loop; it suspends while the buffer is
/// empty and the stream is open, and returns `None` once the stream has
/// been closed and fully drained.
#[derive(Debug)]
pub struct FileStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl FileStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { rx }
    }

    /// Await the next event. Returns `None` once the handle has closed and
    /// every buffered event has been delivered.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Construct a connected `(StreamSender, FileStream)` pair for a newly
/// allocated handle.
pub(crate) fn channel() -> (StreamSender, FileStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StreamSender::new(tx), FileStream::new(rx))
}
