//! Reconnect backoff and post-loss state decision (spec §4.6).
//!
//! Pulled out as a pure, synchronous helper so the backoff sequence and the
//! "stay disconnected when idle" rule can be unit-tested without a live
//! transport. The actual connecting, re-establishment, and event dispatch
//! live in `client`'s engine task, which calls into this type for the
//! numbers and decisions spec §4.6 prescribes — grounded in the backoff
//! arithmetic of `channel/reliable.rs`'s `ReliableSender::calculate_timeout`
//! (exponential, capped) translated from retransmit timeouts to connection
//! attempts.

use std::time::Duration;

use crate::config::ClientConfig;
use crate::state::ConnectionState;

/// Tracks consecutive connection failures and derives the next backoff
/// delay and post-loss state.
pub(crate) struct ReconnectSupervisor {
    config: ClientConfig,
    consecutive_failures: u32,
}

impl ReconnectSupervisor {
    pub(crate) fn new(config: ClientConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    /// The delay to wait before the next connection attempt, given the
    /// number of consecutive failures so far. Geometric, base
    /// `initial_backoff`, multiplier `backoff_multiplier`, capped at
    /// `max_backoff` (spec §4.6, §8 boundary sequence 5s,10s,20s,...,300s).
    pub(crate) fn backoff_delay(&self) -> Duration {
        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let factor = self.config.backoff_multiplier.powi(self.consecutive_failures as i32);
        let capped = (base_ms * factor).min(self.config.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Record a failed connection attempt, advancing the backoff sequence.
    pub(crate) fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Record a successful `CONNECTED` transition, resetting backoff to
    /// its initial value (spec §4.6, "Reset to the initial value on any
    /// successful CONNECTED transition").
    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// The state to enter after a connection is lost or an attempt fails:
    /// `ReconnectWait` iff at least one handle is open, else
    /// `Disconnected` (spec §4.6, "(*) Choice on loss").
    pub(crate) fn state_after_loss(has_open_handles: bool) -> ConnectionState {
        if has_open_handles {
            ConnectionState::ReconnectWait
        } else {
            ConnectionState::Disconnected
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}
