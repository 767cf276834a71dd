//! The public façade and the single engine task behind it.
//!
//! Grounded in `hub/command_channel.rs`'s `CommandChannelHandle`: a public
//! handle type holding only an `mpsc::Sender`, backed by one spawned task
//! that owns all mutable connection state and is reached exclusively
//! through that channel. Here the background task (`Engine::run`) is the
//! Rust rendering of spec §5's "single serialized dispatcher" note: every
//! façade call becomes one `EngineRequest`, so two calls never interleave
//! their effects on `CommandQueue`, `HandleRegistry`, or the connection
//! state machine even when invoked concurrently.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::codec::{self, Command, Event, HandleId};
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::queue::CommandQueue;
use crate::registry::HandleRegistry;
use crate::state::{ConnectionState, ListenerId, StateEventBus};
use crate::stream::FileStream;
use crate::supervisor::ReconnectSupervisor;
use crate::transport::{Connector, Transport, TransportClosed, WebSocketConnector};

type StateListener = Box<dyn Fn(ConnectionState) + Send>;

/// One message from the façade to the engine task.
enum EngineRequest {
    OpenFile {
        path: String,
        reply: oneshot::Sender<(HandleId, FileStream)>,
    },
    WriteFile {
        handle: HandleId,
        old_content: String,
        new_content: String,
        reply: oneshot::Sender<Result<Event, SyncError>>,
    },
    CloseFile {
        handle: HandleId,
    },
    Commit {
        message: String,
        reply: oneshot::Sender<Result<Event, SyncError>>,
    },
    ConnectNow {
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    GetState {
        reply: oneshot::Sender<ConnectionState>,
    },
    AddStateListener {
        listener: StateListener,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveStateListener {
        id: ListenerId,
    },
}

/// A client-allocated view of one server path (spec §4.7).
///
/// `get_events` may be called at most once; `write_file` fails once the
/// file has been closed; `close` is idempotent and fire-and-forget.
#[derive(Debug)]
pub struct File {
    path: String,
    handle: HandleId,
    requests: mpsc::UnboundedSender<EngineRequest>,
    stream: Option<FileStream>,
    closed: bool,
}

impl File {
    /// The path this handle was opened for.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Take the handle's event sequence. Fails with `SyncError::Usage` if
    /// called more than once (spec §4.5, "double iteration ... fails with a
    /// misuse error").
    pub fn get_events(&mut self) -> Result<FileStream, SyncError> {
        self.stream
            .take()
            .ok_or_else(|| SyncError::usage("get_events called more than once on this file"))
    }

    /// Submit a write, returning the server-merged content. Fails with
    /// `SyncError::Usage` if the file has already been closed.
    pub async fn write_file(
        &self,
        old_content: impl Into<String>,
        new_content: impl Into<String>,
    ) -> Result<String, SyncError> {
        if self.closed {
            return Err(SyncError::usage("write to a closed file"));
        }

        let (reply, rx) = oneshot::channel();
        if self
            .requests
            .send(EngineRequest::WriteFile {
                handle: self.handle.clone(),
                old_content: old_content.into(),
                new_content: new_content.into(),
                reply,
            })
            .is_err()
        {
            return Err(SyncError::ConnectionClosed);
        }

        match rx.await {
            Ok(Ok(Event::FileWritten { content, .. })) => Ok(content),
            Ok(Ok(other)) => Err(SyncError::protocol(format!(
                "unexpected terminal event for write_file: {other:?}"
            ))),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SyncError::ConnectionClosed),
        }
    }

    /// Fire-and-forget close: marks the stream closed locally immediately
    /// and removes the handle from the registry regardless of outcome
    /// (spec §4.7). Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.requests.send(EngineRequest::CloseFile {
            handle: self.handle.clone(),
        });
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.close();
    }
}

/// A live state-listener registration. Call `unsubscribe` to stop receiving
/// transitions; dropping without unsubscribing leaves the listener active.
#[derive(Debug)]
pub struct StateSubscription {
    id: ListenerId,
    requests: mpsc::UnboundedSender<EngineRequest>,
}

impl StateSubscription {
    pub fn unsubscribe(self) {
        let _ = self.requests.send(EngineRequest::RemoveStateListener { id: self.id });
    }
}

/// Public façade over the file-sync protocol engine.
#[derive(Debug)]
pub struct FileSystemClient {
    requests: mpsc::UnboundedSender<EngineRequest>,
}

impl FileSystemClient {
    /// Build a client backed by a real WebSocket transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, WebSocketConnector)
    }

    /// Build a client over a custom `Connector` — the seam tests substitute
    /// a mock transport through (spec §1a test tooling).
    pub fn with_connector<C>(config: ClientConfig, connector: C) -> Self
    where
        C: Connector + Clone + 'static,
        C::Transport: 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Engine::new(config, connector);
        tokio::spawn(engine.run(rx));
        Self { requests: tx }
    }

    /// Non-blocking: allocates a handle and returns immediately. The
    /// underlying `open_file` command is sent once connected; callers only
    /// observe that latency on iteration (spec §4.7).
    pub async fn open_file(&self, path: impl Into<String>) -> File {
        let path = path.into();
        let (reply, rx) = oneshot::channel();
        let _ = self.requests.send(EngineRequest::OpenFile {
            path: path.clone(),
            reply,
        });
        let (handle, stream) = rx.await.expect("engine task ended unexpectedly");
        File {
            path,
            handle,
            requests: self.requests.clone(),
            stream: Some(stream),
            closed: false,
        }
    }

    /// Submit a repository-level commit. Resolves on `committed`.
    pub async fn commit(&self, message: impl Into<String>) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        if self
            .requests
            .send(EngineRequest::Commit {
                message: message.into(),
                reply,
            })
            .is_err()
        {
            return Err(SyncError::ConnectionClosed);
        }

        match rx.await {
            Ok(Ok(Event::Committed)) => Ok(()),
            Ok(Ok(other)) => Err(SyncError::protocol(format!(
                "unexpected terminal event for commit: {other:?}"
            ))),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SyncError::ConnectionClosed),
        }
    }

    /// Request an immediate connection attempt, bypassing any pending
    /// backoff timer. Resolves on `CONNECTED`, rejects if the attempt
    /// fails.
    pub async fn connect_now(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(EngineRequest::ConnectNow { reply }).is_err() {
            return Err(SyncError::ConnectionClosed);
        }
        rx.await.unwrap_or(Err(SyncError::ConnectionClosed))
    }

    /// Tear down the connection and transition to `DISCONNECTED`
    /// regardless of open handles (spec §4.6). Awaits the engine's
    /// acknowledgment so a subsequent `state()` call observes the result.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(EngineRequest::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// The current connection state.
    pub async fn state(&self) -> ConnectionState {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(EngineRequest::GetState { reply }).is_err() {
            return ConnectionState::Disconnected;
        }
        rx.await.unwrap_or(ConnectionState::Disconnected)
    }

    /// Register a state listener. Invoked immediately with the current
    /// state, then on every subsequent transition (spec §4.7).
    pub async fn add_state_listener<F>(&self, listener: F) -> StateSubscription
    where
        F: Fn(ConnectionState) + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let _ = self.requests.send(EngineRequest::AddStateListener {
            listener: Box::new(listener),
            reply,
        });
        let id = rx.await.unwrap_or(0);
        StateSubscription {
            id,
            requests: self.requests.clone(),
        }
    }
}

/// The single task owning all mutable protocol state.
struct Engine<C: Connector> {
    connector: C,
    supervisor: ReconnectSupervisor,
    registry: HandleRegistry,
    queue: CommandQueue,
    state_bus: StateEventBus,
    transport: Option<Box<dyn Transport>>,
    connect_in_flight: Option<oneshot::Receiver<Result<Box<dyn Transport>, String>>>,
    pending_sends: VecDeque<(Command, Option<HandleId>, oneshot::Sender<Result<Event, SyncError>>)>,
    connect_now_waiters: VecDeque<oneshot::Sender<Result<(), SyncError>>>,
    reconnect_deadline: Option<Instant>,
}

async fn recv_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<String> {
    match transport {
        Some(t) => t.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_connect_result(
    rx: &mut Option<oneshot::Receiver<Result<Box<dyn Transport>, String>>>,
) -> Result<Box<dyn Transport>, String> {
    match rx {
        Some(r) => r
            .await
            .unwrap_or_else(|_| Err("connector task ended without a result".into())),
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: &mut Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until((*d).into()).await,
        None => std::future::pending().await,
    }
}

impl<C> Engine<C>
where
    C: Connector + Clone + 'static,
    C::Transport: 'static,
{
    fn new(config: ClientConfig, connector: C) -> Self {
        Self {
            connector,
            supervisor: ReconnectSupervisor::new(config),
            registry: HandleRegistry::new(),
            queue: CommandQueue::new(),
            state_bus: StateEventBus::new(),
            transport: None,
            connect_in_flight: None,
            pending_sends: VecDeque::new(),
            connect_now_waiters: VecDeque::new(),
            reconnect_deadline: None,
        }
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<EngineRequest>) {
        loop {
            tokio::select! {
                maybe_request = requests.recv() => {
                    match maybe_request {
                        Some(request) => self.handle_request(request).await,
                        None => break,
                    }
                }
                frame = recv_frame(&mut self.transport) => {
                    match frame {
                        Some(frame) => self.handle_frame(frame).await,
                        None => self.handle_connection_loss().await,
                    }
                }
                result = recv_connect_result(&mut self.connect_in_flight) => {
                    self.connect_in_flight = None;
                    self.handle_connect_result(result).await;
                }
                _ = sleep_until_deadline(&mut self.reconnect_deadline) => {
                    self.reconnect_deadline = None;
                    self.ensure_connecting();
                }
            }
        }
    }

    /// A reply sink for a command whose terminal result nobody awaits.
    /// Logging still happens — a dropped `oneshot::Receiver` would
    /// otherwise make a server-reported failure vanish with no trace,
    /// which spec §7 explicitly forbids for re-establishment and
    /// `close_file` errors.
    fn discard_reply(context: &'static str) -> oneshot::Sender<Result<Event, SyncError>> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Ok(Err(err)) = rx.await {
                log::warn!("{context}: {err}");
            }
        });
        tx
    }

    async fn handle_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::OpenFile { path, reply } => {
                let (handle, stream) = self.registry.allocate(path.clone());
                let _ = reply.send((handle.clone(), stream));

                let discard = Self::discard_reply("open_file failed");
                self.enqueue_open(Command::OpenFile { path, handle: handle.clone() }, handle, discard)
                    .await;
            }
            EngineRequest::WriteFile {
                handle,
                old_content,
                new_content,
                reply,
            } => {
                if !self.registry.contains(&handle) {
                    let _ = reply.send(Err(SyncError::usage("write to a closed file")));
                    return;
                }
                self.enqueue_or_send(
                    Command::WriteFile {
                        handle,
                        last_content: old_content,
                        new_content,
                    },
                    reply,
                )
                .await;
            }
            EngineRequest::CloseFile { handle } => self.handle_close_file(handle).await,
            EngineRequest::Commit { message, reply } => {
                self.enqueue_or_send(Command::Commit { message }, reply).await;
            }
            EngineRequest::ConnectNow { reply } => self.handle_connect_now(reply),
            EngineRequest::Disconnect { reply } => {
                self.handle_disconnect();
                let _ = reply.send(());
            }
            EngineRequest::GetState { reply } => {
                let _ = reply.send(self.state_bus.current());
            }
            EngineRequest::AddStateListener { listener, reply } => {
                let id = self.state_bus.subscribe(listener);
                let _ = reply.send(id);
            }
            EngineRequest::RemoveStateListener { id } => self.state_bus.unsubscribe(id),
        }
    }

    async fn handle_close_file(&mut self, handle: HandleId) {
        let has_been_opened = self.registry.get(&handle).map(|f| f.has_been_opened).unwrap_or(false);
        self.registry.forget(&handle);

        if has_been_opened {
            let discard = Self::discard_reply("close_file reported an error, ignoring");
            self.enqueue_or_send(Command::CloseFile { handle }, discard).await;
        }
        // Else: the open_file for this handle never completed. The server
        // never learned the handle, so there is nothing to tell it to
        // close (spec §4.7, close is fire-and-forget and ignores errors).
    }

    /// Submit a command that is not tied to a particular handle's open
    /// lifecycle, sending now if connected or deferring until the next
    /// successful connection.
    async fn enqueue_or_send(
        &mut self,
        command: Command,
        reply: oneshot::Sender<Result<Event, SyncError>>,
    ) {
        self.enqueue_tagged(command, None, reply).await;
    }

    /// Like `enqueue_or_send`, but tags the pending command with `handle`
    /// so a connection loss before the reply arrives can be surfaced on
    /// that handle's stream.
    async fn enqueue_open(
        &mut self,
        command: Command,
        handle: HandleId,
        reply: oneshot::Sender<Result<Event, SyncError>>,
    ) {
        self.enqueue_tagged(command, Some(handle), reply).await;
    }

    async fn enqueue_tagged(
        &mut self,
        command: Command,
        for_handle: Option<HandleId>,
        reply: oneshot::Sender<Result<Event, SyncError>>,
    ) {
        if self.transport.is_some() && matches!(self.state_bus.current(), ConnectionState::Connected) {
            self.send_now(command, for_handle, reply).await;
        } else {
            self.pending_sends.push_back((command, for_handle, reply));
            self.ensure_connecting();
        }
    }

    async fn send_now(
        &mut self,
        command: Command,
        for_handle: Option<HandleId>,
        reply: oneshot::Sender<Result<Event, SyncError>>,
    ) {
        let frame = match codec::encode(&command) {
            Ok(frame) => frame,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        match for_handle {
            Some(handle) => self.queue.submit_open(reply, handle),
            None => self.queue.submit(reply),
        }

        let result = match self.transport.as_mut() {
            Some(transport) => transport.send(frame).await,
            None => Err(TransportClosed::Closed),
        };
        if result.is_err() {
            self.handle_connection_loss().await;
        }
    }

    async fn handle_frame(&mut self, frame: String) {
        let event = match codec::decode(&frame) {
            Ok(event) => event,
            Err(err) => {
                self.queue.reject_head(err);
                return;
            }
        };

        if event.is_terminal() {
            self.queue.resolve_head(event.clone());
        }

        if event.handle().is_some() {
            self.registry.route(event);
        }
    }

    async fn handle_connection_loss(&mut self) {
        if self.transport.is_none() && self.connect_in_flight.is_none() {
            return;
        }
        log::info!("connection lost");
        self.enter_post_loss_state();
    }

    async fn handle_connect_result(&mut self, result: Result<Box<dyn Transport>, String>) {
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.supervisor.record_success();
                self.state_bus.transition(ConnectionState::Connected);
                for waiter in self.connect_now_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.reestablish_open_handles().await;
                self.flush_pending_sends().await;
            }
            Err(message) => {
                log::warn!("connection attempt failed: {message}");
                self.supervisor.record_failure();
                for waiter in self.connect_now_waiters.drain(..) {
                    let _ = waiter.send(Err(SyncError::ConnectionClosed));
                }
                self.fail_pending_sends();
                self.enter_post_loss_state();
            }
        }
    }

    async fn reestablish_open_handles(&mut self) {
        for handle in self.registry.opened_handles() {
            let Some(path) = self.registry.get(&handle).map(|f| f.path.clone()) else {
                continue;
            };
            let discard = Self::discard_reply("re-establishing handle after reconnect failed");
            self.send_now(
                Command::OpenFile { path, handle: handle.clone() },
                Some(handle),
                discard,
            )
            .await;
        }
    }

    async fn flush_pending_sends(&mut self) {
        let pending = std::mem::take(&mut self.pending_sends);
        for (command, for_handle, reply) in pending {
            self.send_now(command, for_handle, reply).await;
        }
    }

    fn fail_pending_sends(&mut self) {
        for (_, _, reply) in self.pending_sends.drain(..) {
            let _ = reply.send(Err(SyncError::ConnectionClosed));
        }
    }

    fn enter_post_loss_state(&mut self) {
        self.transport = None;
        let interrupted_opens = self.queue.fail_all_connection_lost();
        for handle in interrupted_opens {
            self.registry.notify_open_failed(&handle);
        }

        let next = ReconnectSupervisor::state_after_loss(self.registry.has_open_files());
        self.state_bus.transition(next);
        if next == ConnectionState::ReconnectWait {
            self.reconnect_deadline = Some(Instant::now() + self.supervisor.backoff_delay());
        }
    }

    fn handle_connect_now(&mut self, reply: oneshot::Sender<Result<(), SyncError>>) {
        if matches!(self.state_bus.current(), ConnectionState::Connected) {
            let _ = reply.send(Ok(()));
            return;
        }
        self.connect_now_waiters.push_back(reply);
        self.ensure_connecting();
    }

    fn handle_disconnect(&mut self) {
        self.reconnect_deadline = None;
        self.connect_in_flight = None;
        self.transport = None;
        self.queue.fail_all_connection_lost();
        self.fail_pending_sends();
        for waiter in self.connect_now_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::ConnectionClosed));
        }
        self.state_bus.transition(ConnectionState::Disconnected);
    }

    /// Start a connection attempt if one isn't already in flight or
    /// already connected, bypassing any pending backoff timer (spec §4.6,
    /// `connectNow`'s bypass rule generalized to every connect trigger).
    fn ensure_connecting(&mut self) {
        if self.connect_in_flight.is_some() {
            return;
        }
        if matches!(self.state_bus.current(), ConnectionState::Connected) {
            return;
        }
        self.reconnect_deadline = None;
        self.state_bus.transition(ConnectionState::Connecting);

        let connector = self.connector.clone();
        let endpoint = self.supervisor.endpoint().to_string();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = connector
                .connect(&endpoint)
                .await
                .map(|transport| Box::new(transport) as Box<dyn Transport>);
            let _ = tx.send(result);
        });
        self.connect_in_flight = Some(rx);
    }
}
