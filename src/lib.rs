//! A client-side, bidirectional file-synchronization protocol engine.
//!
//! Sits between UI code and a remote file server reached over a persistent
//! duplex WebSocket connection. Owns connection lifecycle with
//! exponential-backoff reconnection, strict request/response-vs-update
//! ordering on a single channel without wire sequence numbers, per-handle
//! lazy event streams, and silent re-establishment of open handles on
//! reconnect.
//!
//! ```no_run
//! use filesync_client::{ClientConfig, FileSystemClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FileSystemClient::new(ClientConfig::new("wss://example.com/sync"));
//! let mut file = client.open_file("TASKS.md").await;
//! let mut events = file.get_events()?;
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod codec;
mod config;
mod error;
mod queue;
mod registry;
mod state;
mod stream;
mod supervisor;
mod transport;

pub use client::{File, FileSystemClient, StateSubscription};
pub use codec::{Event, HandleId};
pub use config::ClientConfig;
pub use error::SyncError;
pub use state::ConnectionState;
pub use stream::FileStream;
pub use transport::{Connector, Transport, TransportClosed, WebSocketConnector, WebSocketTransport};
