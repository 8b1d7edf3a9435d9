//! Scripted WebSocket endpoint standing in for a browser.
//!
//! Tests bind a local server, hand it a responder closure that maps each
//! incoming command frame to zero or more reply frames (sent in order),
//! and connect the crate's [`Connection`] to it. Server-initiated frames
//! (events) are injected through a channel; aborting the endpoint drops
//! the socket to simulate a dying browser.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;
use url::Url;

use chromium_cdp::{Connection, EventDispatcher};

/// A bound endpoint serving one scripted connection.
pub struct MockEndpoint {
    url: Url,
    inject_tx: mpsc::UnboundedSender<String>,
    handle: JoinHandle<()>,
}

impl MockEndpoint {
    /// Binds on a random port and serves one connection with `responder`.
    pub async fn spawn<F>(mut responder: F) -> anyhow::Result<Self>
    where
        F: FnMut(&Value) -> Vec<Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock endpoint")?;
        let port = listener.local_addr()?.port();
        let url = Url::parse(&format!("ws://127.0.0.1:{port}"))?;

        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<String>();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("ws upgrade");

            loop {
                tokio::select! {
                    message = ws.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                let frame: Value =
                                    serde_json::from_str(&text).expect("client sent valid JSON");
                                for reply in responder(&frame) {
                                    let _ = ws
                                        .send(Message::Text(reply.to_string().into()))
                                        .await;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => break,
                        }
                    }
                    injected = inject_rx.recv() => {
                        match injected {
                            Some(text) => {
                                let _ = ws.send(Message::Text(text.into())).await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(Self {
            url,
            inject_tx,
            handle,
        })
    }

    /// The endpoint's WebSocket URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Pushes a server-initiated frame (typically an event).
    pub fn inject(&self, frame: Value) {
        self.inject_tx
            .send(frame.to_string())
            .expect("endpoint alive");
    }

    /// Pushes raw text, bypassing JSON. For malformed-frame tests.
    pub fn inject_raw(&self, text: impl Into<String>) {
        self.inject_tx.send(text.into()).expect("endpoint alive");
    }

    /// Kills the endpoint, dropping the socket mid-flight.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Initialize tracing for tests.
///
/// Controlled by `RUST_LOG`; quiet by default. Safe to call from every
/// test, only the first call installs the subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chromium_cdp=warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Connects a `Connection` with a fresh dispatcher to the endpoint.
pub async fn connect(endpoint: &MockEndpoint) -> anyhow::Result<(Connection, Arc<EventDispatcher>)> {
    init_logging();
    let dispatcher = Arc::new(EventDispatcher::new());
    let connection = Connection::connect(endpoint.url(), Arc::clone(&dispatcher)).await?;
    Ok((connection, dispatcher))
}

/// Builds a success response frame.
pub fn response(id: u64, result: Value) -> Value {
    json!({ "id": id, "result": result })
}

/// Builds an error response frame.
pub fn error_response(id: u64, code: i64, message: &str) -> Value {
    json!({ "id": id, "error": { "code": code, "message": message } })
}

/// Builds an event frame, optionally session-scoped.
pub fn event(method: &str, params: Value, session_id: Option<&str>) -> Value {
    match session_id {
        Some(session) => json!({ "method": method, "params": params, "sessionId": session }),
        None => json!({ "method": method, "params": params }),
    }
}

/// Shared recorder of every frame the endpoint saw, for assertions.
pub type FrameLog = Arc<Mutex<Vec<Value>>>;

/// Creates an empty frame log.
pub fn frame_log() -> FrameLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Frames in the log whose `method` equals `method`.
pub fn frames_with_method(log: &FrameLog, method: &str) -> Vec<Value> {
    log.lock()
        .iter()
        .filter(|f| f.get("method").and_then(|m| m.as_str()) == Some(method))
        .cloned()
        .collect()
}
