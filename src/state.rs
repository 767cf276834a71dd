//! Connection state and its listener broadcast.
//!
//! Grounded in `channel/mod.rs`'s `ConnectionState`/`SharedConnectionState`,
//! narrowed to the four states spec §3 actually names (the teacher's
//! richer `Reconnecting { attempt, next_retry_ms }` and `Error(String)`
//! variants aren't part of this protocol's state machine) and extended
//! with the listener-registration semantics spec §4.7/§8 require:
//! immediate delivery of the current state on subscribe, synchronous
//! delivery on every transition, and swallowed (logged) listener panics
//! (spec §5, "listener errors are swallowed... so one listener cannot
//! break another").

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Connection lifecycle state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and no reconnection attempt is scheduled.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// A live connection is established.
    Connected,
    /// Disconnected, waiting for a backoff timer before retrying.
    ReconnectWait,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Identifies a registered state listener, for later unsubscription.
pub type ListenerId = u64;

type Listener = Box<dyn Fn(ConnectionState) + Send>;

/// Broadcasts connection-state transitions to subscribers, delivering the
/// current state immediately on subscribe (spec §4.7's `addStateListener`
/// contract).
#[derive(Default)]
pub(crate) struct StateEventBus {
    state: ConnectionState,
    next_id: ListenerId,
    listeners: Vec<(ListenerId, Listener)>,
}

impl StateEventBus {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.state
    }

    /// Register a listener. It is invoked immediately with the current
    /// state, then again on every subsequent transition, until
    /// unsubscribed.
    pub(crate) fn subscribe(&mut self, listener: Listener) -> ListenerId {
        Self::invoke(&listener, self.state);
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Idempotent: unsubscribing an id that is absent (already removed, or
    /// never valid) is a no-op.
    pub(crate) fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Drive a state transition, notifying every live listener in
    /// registration order. A no-op if `new_state` equals the current
    /// state — spec §3 guarantees subscribers observe only real
    /// transitions, never a repeated announcement of the state they are
    /// already in (e.g. `disconnect()` called on an already-`Disconnected`
    /// client must not fire a second `Disconnected` notification).
    pub(crate) fn transition(&mut self, new_state: ConnectionState) {
        if new_state == self.state {
            return;
        }
        self.state = new_state;
        for (_, listener) in &self.listeners {
            Self::invoke(listener, new_state);
        }
    }

    fn invoke(listener: &Listener, state: ConnectionState) {
        if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
            log::error!("state listener panicked; continuing to notify remaining listeners");
        }
    }
}
