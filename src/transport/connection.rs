//! WebSocket connection and event loop.
//!
//! One [`Connection`] owns one physical WebSocket to a browser endpoint.
//! A spawned tokio task is the sole reader of the socket and the single
//! writer (commands funnel through an internal channel), so many logical
//! callers can have commands in flight concurrently without contending on
//! the stream.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming frames, classified as responses (correlated by id) or events
//!   (fanned out through the [`EventDispatcher`])
//! - Outgoing commands from callers
//! - Correlation-table cleanup on timeout
//!
//! Malformed frames and responses with no matching pending command are
//! logged and dropped; neither kills the loop. A dropped connection fails
//! every pending command with [`Error::ConnectionClosed`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::events::EventDispatcher;
use crate::identifiers::{CommandId, SessionId};
use crate::protocol::{Command, IncomingMessage, ProtocolCall, Response, classify};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending commands before rejecting new ones.
const MAX_PENDING_COMMANDS: usize = 256;

// ============================================================================
// Types
// ============================================================================

/// Map of command IDs to response channels.
type PendingMap = FxHashMap<CommandId, oneshot::Sender<Result<Response>>>;

/// Client-side WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// LoopCommand
// ============================================================================

/// Internal commands for the event loop.
enum LoopCommand {
    /// Send a command frame and park the caller for its response.
    Send {
        frame: Command,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Remove a timed-out correlation entry.
    RemovePending(CommandId),
    /// Shutdown the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to a browser endpoint.
///
/// Handles command/response correlation and event routing. Multiple logical
/// targets may share one connection via `sessionId` (flattened mode), or a
/// target may own a dedicated connection; both route through [`execute`].
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the same
/// physical socket and event loop.
///
/// [`execute`]: Connection::execute
pub struct Connection {
    /// Channel into the event loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    /// Correlation map (shared with event loop).
    pending: Arc<Mutex<PendingMap>>,
    /// Event fan-out registry (shared with event loop).
    dispatcher: Arc<EventDispatcher>,
    /// Monotonic command ID allocator.
    next_id: Arc<AtomicU64>,
    /// Flips to `true` when the event loop terminates.
    closed: watch::Receiver<bool>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            pending: Arc::clone(&self.pending),
            dispatcher: Arc::clone(&self.dispatcher),
            next_id: Arc::clone(&self.next_id),
            closed: self.closed.clone(),
        }
    }
}

impl Connection {
    /// Dials a browser WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEndpoint`] if the URL scheme is not `ws`/`wss`
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds 30s
    /// - [`Error::WebSocket`] on handshake failure
    pub async fn connect(endpoint: &Url, dispatcher: Arc<EventDispatcher>) -> Result<Self> {
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::invalid_endpoint(endpoint.as_str()));
        }

        debug!(endpoint = %endpoint, "Connecting to browser endpoint");

        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(endpoint.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(CONNECT_TIMEOUT.as_millis() as u64))??;

        Ok(Self::from_stream(ws_stream, dispatcher))
    }

    /// Wraps an established stream and spawns the event loop.
    pub(crate) fn from_stream(ws_stream: WsStream, dispatcher: Arc<EventDispatcher>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(PendingMap::default()));
        let (closed_tx, closed) = watch::channel(false);

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&pending),
            Arc::clone(&dispatcher),
            closed_tx,
        ));

        Self {
            command_tx,
            pending,
            dispatcher,
            next_id: Arc::new(AtomicU64::new(1)),
            closed,
        }
    }

    /// Returns the dispatcher fed by this connection's receive loop.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Returns `true` once the event loop has terminated.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Returns a watch handle resolving when the connection closes.
    ///
    /// Target sessions bound to this connection use it to invalidate
    /// themselves when the transport drops.
    #[must_use]
    pub fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Executes a command with the default 30s timeout.
    ///
    /// See [`execute_with_timeout`](Self::execute_with_timeout).
    pub async fn execute(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&SessionId>,
    ) -> Result<Value> {
        self.execute_with_timeout(method, params, session_id, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Executes a command and suspends the caller until its response.
    ///
    /// Allocates a strictly increasing id, registers the pending call,
    /// sends, and parks only the issuing task; the receive loop and other
    /// callers keep making progress. Responses are matched by id, never by
    /// arrival order.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandTimeout`] if no response arrives by the deadline.
    ///   No cancellation is sent; the remote outcome is unknown.
    /// - [`Error::CommandFailed`] if the remote end answered with an error
    /// - [`Error::ConnectionClosed`] if the connection dropped
    /// - [`Error::Protocol`] if the pending table is full
    pub async fn execute_with_timeout(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&SessionId>,
        command_timeout: Duration,
    ) -> Result<Value> {
        let id = CommandId(self.next_id.fetch_add(1, Ordering::Relaxed));

        {
            let pending = self.pending.lock();
            if pending.len() >= MAX_PENDING_COMMANDS {
                warn!(
                    pending = pending.len(),
                    max = MAX_PENDING_COMMANDS,
                    "Too many pending commands"
                );
                return Err(Error::protocol(format!(
                    "Too many pending commands: {}/{}",
                    pending.len(),
                    MAX_PENDING_COMMANDS
                )));
            }
        }

        let frame = Command::new(id, method, params, session_id.cloned());
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(LoopCommand::Send { frame, response_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(command_timeout, response_rx).await {
            Ok(Ok(result)) => result?.into_result(),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                // Deadline elapsed; drop the correlation entry so a late
                // response is discarded instead of resolving a dead waiter.
                let _ = self.command_tx.send(LoopCommand::RemovePending(id));

                Err(Error::command_timeout(id, command_timeout.as_millis() as u64))
            }
        }
    }

    /// Executes a typed command with the default timeout.
    pub async fn call<C: ProtocolCall>(
        &self,
        command: &C,
        session_id: Option<&SessionId>,
    ) -> Result<Value> {
        let (method, params) = command.call()?;
        self.execute(&method, params, session_id).await
    }

    /// Returns the number of pending commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(LoopCommand::Shutdown);
    }

    /// Event loop that owns WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        pending: Arc<Mutex<PendingMap>>,
        dispatcher: Arc<EventDispatcher>,
        closed_tx: watch::Sender<bool>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from the browser
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_frame(&text, &pending, &dispatcher);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from callers
                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send { frame, response_tx }) => {
                            Self::handle_send_command(
                                frame,
                                response_tx,
                                &mut ws_write,
                                &pending,
                            ).await;
                        }

                        Some(LoopCommand::RemovePending(id)) => {
                            pending.lock().remove(&id);
                            debug!(%id, "Removed timed-out pending command");
                        }

                        Some(LoopCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        Self::fail_pending_commands(&pending);
        let _ = closed_tx.send(true);

        debug!("Event loop terminated");
    }

    /// Classifies and routes one incoming text frame.
    fn handle_incoming_frame(
        text: &str,
        pending: &Arc<Mutex<PendingMap>>,
        dispatcher: &Arc<EventDispatcher>,
    ) {
        match classify(text) {
            Ok(IncomingMessage::Response(response)) => {
                let tx = pending.lock().remove(&response.id);

                if let Some(tx) = tx {
                    let _ = tx.send(Ok(response));
                } else {
                    // Protocol error: never delivered to an arbitrary caller.
                    warn!(id = %response.id, "Response for unknown command");
                }
            }

            Ok(IncomingMessage::Event(event)) => {
                trace!(method = %event.method, "Event received");
                dispatcher.dispatch(&event);
            }

            Err(e) => {
                warn!(error = %e, "Dropped malformed frame");
            }
        }
    }

    /// Serializes and writes one command frame.
    async fn handle_send_command(
        frame: Command,
        response_tx: oneshot::Sender<Result<Response>>,
        ws_write: &mut SplitSink<WsStream, Message>,
        pending: &Arc<Mutex<PendingMap>>,
    ) {
        let id = frame.id;

        let json = match to_string(&frame) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Register correlation before the write hits the wire.
        pending.lock().insert(id, response_tx);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await
            && let Some(tx) = pending.lock().remove(&id)
        {
            let _ = tx.send(Err(Error::connection(e.to_string())));
        }

        trace!(%id, method = %frame.method, "Command sent");
    }

    /// Fails every pending command with `ConnectionClosed`.
    fn fail_pending_commands(pending: &Arc<Mutex<PendingMap>>) {
        let drained: Vec<_> = pending.lock().drain().collect();
        let count = drained.len();

        for (_, tx) in drained {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending commands on close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
