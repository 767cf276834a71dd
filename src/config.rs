//! Client configuration.
//!
//! Spec §6: the endpoint URL is the only required input; the three backoff
//! knobs are recognized configurable options with the stated defaults.
//! Modeled as a plain struct, the way `channel/mod.rs`'s `ChannelConfig` is
//! a plain struct passed to `connect` rather than a parsed config file.

use std::time::Duration;

/// Default initial backoff delay (spec §4.6): 5 seconds.
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 5_000;
/// Default backoff cap (spec §4.6): 5 minutes.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 300_000;
/// Default backoff multiplier (spec §4.6): doubling.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for a `FileSystemClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The server endpoint to connect to (e.g. `wss://example.com/sync`).
    pub endpoint: String,
    /// Initial reconnect delay. Default 5,000 ms.
    pub initial_backoff: Duration,
    /// Reconnect delay cap. Default 300,000 ms.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each consecutive failed
    /// attempt. Default 2.0.
    pub backoff_multiplier: f64,
}

impl ClientConfig {
    /// A config with every backoff knob at its spec-mandated default.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}
