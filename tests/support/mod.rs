//! A bespoke in-memory `Transport`/`Connector` pair for exercising the
//! engine's ordering and reconnect logic without a live socket.
//!
//! Shaped like the crate's own `client/registry.rs` test doubles in the
//! teacher: a small hand-written stand-in rather than a generic mocking
//! framework, since nothing in the ecosystem mocks a duplex frame channel
//! directly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use filesync_client::{Connector, Transport, TransportClosed};
use tokio::sync::mpsc;

enum ConnectOutcome {
    Succeed,
    Fail(String),
}

struct Shared {
    outcomes: VecDeque<ConnectOutcome>,
    /// The currently live connection's inbound sender (server -> client).
    /// Dropping it simulates the server closing the connection.
    inbound_tx: Option<mpsc::UnboundedSender<String>>,
    sending_fails: bool,
}

/// The server side of a mock connection, held by the test.
#[derive(Clone)]
pub struct MockServer {
    shared: Arc<Mutex<Shared>>,
}

impl MockServer {
    /// Queue one successful connection attempt.
    pub fn queue_connect_success(&self) {
        self.shared
            .lock()
            .expect("mock server mutex poisoned")
            .outcomes
            .push_back(ConnectOutcome::Succeed);
    }

    /// Queue one failed connection attempt with the given message.
    pub fn queue_connect_failure(&self, message: impl Into<String>) {
        self.shared
            .lock()
            .expect("mock server mutex poisoned")
            .outcomes
            .push_back(ConnectOutcome::Fail(message.into()));
    }

    /// Push a raw text frame to whichever transport is currently live.
    /// A no-op if nothing is connected.
    pub fn push_frame(&self, frame: impl Into<String>) {
        let shared = self.shared.lock().expect("mock server mutex poisoned");
        if let Some(tx) = &shared.inbound_tx {
            let _ = tx.send(frame.into());
        }
    }

    /// Simulate the server dropping the connection: the live transport's
    /// `recv` will return `None` on its next poll.
    pub fn drop_connection(&self) {
        self.shared.lock().expect("mock server mutex poisoned").inbound_tx = None;
    }

    /// Make the next `send` on the live transport fail, as if the
    /// connection had just dropped out from under it.
    pub fn fail_next_send(&self) {
        self.shared.lock().expect("mock server mutex poisoned").sending_fails = true;
    }
}

/// The client side: implements `Connector`, producing `MockTransport`s.
#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
    sent_tx: mpsc::UnboundedSender<String>,
}

/// Build a connected mock pair: `(connector, server, sent_frames)`, where
/// `sent_frames` yields every frame the engine sends, across reconnects, in
/// order.
pub fn mock_pair() -> (MockConnector, MockServer, mpsc::UnboundedReceiver<String>) {
    let shared = Arc::new(Mutex::new(Shared {
        outcomes: VecDeque::new(),
        inbound_tx: None,
        sending_fails: false,
    }));
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let connector = MockConnector {
        shared: shared.clone(),
        sent_tx,
    };
    let server = MockServer { shared };
    (connector, server, sent_rx)
}

pub struct MockTransport {
    inbound_rx: mpsc::UnboundedReceiver<String>,
    sent_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Mutex<Shared>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportClosed> {
        if self.shared.lock().expect("mock server mutex poisoned").sending_fails {
            return Err(TransportClosed::Error("mock send failure".into()));
        }
        self.sent_tx
            .send(frame)
            .map_err(|_| TransportClosed::Closed)
    }

    async fn recv(&mut self) -> Option<String> {
        self.inbound_rx.recv().await
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _endpoint: &str) -> Result<Self::Transport, String> {
        let outcome = {
            let mut shared = self.shared.lock().expect("mock server mutex poisoned");
            shared.outcomes.pop_front()
        };
        match outcome.unwrap_or(ConnectOutcome::Succeed) {
            ConnectOutcome::Fail(message) => Err(message),
            ConnectOutcome::Succeed => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let mut shared = self.shared.lock().expect("mock server mutex poisoned");
                shared.inbound_tx = Some(inbound_tx);
                shared.sending_fails = false;
                Ok(MockTransport {
                    inbound_rx,
                    sent_tx: self.sent_tx.clone(),
                    shared: self.shared.clone(),
                })
            }
        }
    }
}
