//! FIFO correlation between unanswered commands and terminal server events.
//!
//! There are no sequence numbers on the wire (spec §9): the single
//! invariant is that the N-th terminal event answers the N-th submitted
//! command, in order. `CommandQueue` is exactly that invariant, pulled out
//! as its own type so `supervisor` can reason about it without also
//! reasoning about transport or registry concerns.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::codec::Event;
use crate::error::SyncError;

/// A single outstanding command awaiting its terminal event.
struct PendingCommand {
    resolve: oneshot::Sender<Result<Event, SyncError>>,
    /// The handle an `open_file` command was submitted for, if any — used
    /// to let the engine surface a connection-loss failure on that
    /// handle's stream when the open never completed (spec §4.7, "Fails if
    /// iteration is started while the file has not successfully opened and
    /// the connection is lost before re-establishment").
    for_handle: Option<crate::codec::HandleId>,
}

/// Strict FIFO of pending commands.
///
/// Unsolicited `file_updated` events never touch this queue (spec
/// invariant 3); callers must check `Event::is_terminal` before routing
/// here.
#[derive(Default)]
pub(crate) struct CommandQueue {
    pending: VecDeque<PendingCommand>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Register a new pending command at the tail of the FIFO.
    pub(crate) fn submit(&mut self, resolve: oneshot::Sender<Result<Event, SyncError>>) {
        self.pending.push_back(PendingCommand {
            resolve,
            for_handle: None,
        });
    }

    /// Register a pending `open_file` command, tagged with the handle it
    /// was submitted for.
    pub(crate) fn submit_open(
        &mut self,
        resolve: oneshot::Sender<Result<Event, SyncError>>,
        handle: crate::codec::HandleId,
    ) {
        self.pending.push_back(PendingCommand {
            resolve,
            for_handle: Some(handle),
        });
    }

    /// Reject the head of the queue directly with a `SyncError` (spec §7,
    /// "Decode failure" / "Unexpected terminal type" rows, which reject the
    /// head pending command without a server-shaped `Event` to carry).
    pub(crate) fn reject_head(&mut self, err: SyncError) -> bool {
        let Some(pending) = self.pending.pop_front() else {
            log::warn!("terminal-shaped failure arrived with no pending command: {err}");
            return false;
        };
        let _ = pending.resolve.send(Err(err));
        true
    }

    /// Resolve or reject the head of the queue with a terminal event.
    ///
    /// Returns `false` (and logs) if the queue was empty — spec §7, "`error`
    /// event with empty queue": logged and dropped, generalized here to any
    /// terminal event with no pending command (e.g. an unsolicited
    /// `file_closed`, spec §9 open question).
    pub(crate) fn resolve_head(&mut self, event: Event) -> bool {
        let Some(pending) = self.pending.pop_front() else {
            log::warn!("terminal event arrived with no pending command: {event:?}");
            return false;
        };

        let result = match event {
            Event::Error { message, path } => Err(SyncError::Remote { message, path }),
            other => Ok(other),
        };
        let _ = pending.resolve.send(result);
        true
    }

    /// Reject every pending command with `ConnectionClosed` and empty the
    /// queue (spec §7, channel close row). Returns the handles of any
    /// still-opening `open_file` commands that were interrupted, so the
    /// engine can surface the failure on those handles' streams.
    pub(crate) fn fail_all_connection_lost(&mut self) -> Vec<crate::codec::HandleId> {
        let mut interrupted_opens = Vec::new();
        for pending in self.pending.drain(..) {
            if let Some(handle) = pending.for_handle {
                interrupted_opens.push(handle);
            }
            let _ = pending.resolve.send(Err(SyncError::ConnectionClosed));
        }
        interrupted_opens
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
