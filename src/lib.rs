//! Transport and target-routing core for the Chrome DevTools Protocol.
//!
//! This library multiplexes command/response pairs and asynchronous event
//! notifications over one or more WebSocket connections, tracks which
//! logical target (page, frame, out-of-process iframe) a command belongs
//! to, and resolves the frame/execution-context state needed to address
//! commands at a specific frame, including frames rendered in a separate
//! process (OOPIFs).
//!
//! # Architecture
//!
//! - One receive loop per [`Connection`] is the sole reader of that socket;
//!   many concurrent callers await their own correlated responses.
//! - Responses match pending commands by id, never by arrival order.
//! - Events fan out through an [`EventDispatcher`]; async callbacks are
//!   spawned independently so a slow one cannot stall delivery.
//! - Targets attach through a [`TargetRegistry`] (flattened `sessionId`
//!   routing or dedicated connections), and iframe elements resolve to a
//!   [`FrameContext`] that pins every subsequent command to one session.
//!
//! # Quick Start
//!
//! ```no_run
//! use chromium_cdp::{Client, Result};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let endpoint = Url::parse("ws://127.0.0.1:9222/devtools/browser/abc")?;
//!     let client = Client::connect(&endpoint).await?;
//!
//!     let targets = client.list_targets().await?;
//!     let page = client.attach_page(&targets[0].target_id).await?;
//!     page.enable_domain("Page").await?;
//!
//!     if let Some(iframe) = page.query_selector("#checkout-frame").await? {
//!         let context = iframe.ensure_frame_context().await?;
//!         println!("iframe routes via session {:?}", context.session().session_id());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Handles: [`Page`], [`Element`], [`FrameContext`] |
//! | [`client`] | [`Client`], target registry, domain flags |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Event callback registry and fan-out |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frames and typed command builders |
//! | [`transport`] | WebSocket connection and correlation |
//!
//! # Scope
//!
//! Process lifecycle, selector syntax, and typed coverage of the full
//! protocol surface are deliberately out of scope; everything here is a
//! primitive (`execute`, `register`, `ensure_frame_context`,
//! `resolve_routing`) for those layers to build on. Nothing retries:
//! failures are explicit and immediate.

// ============================================================================
// Modules
// ============================================================================

/// Browser handles: pages, elements, frame contexts.
pub mod browser;

/// Scoped client owning connection, dispatcher, and registry.
pub mod client;

/// Error types and result aliases.
pub mod error;

/// Event callback registry and fan-out.
pub mod events;

/// Type-safe identifiers for protocol entities.
pub mod identifiers;

/// Wire protocol message types.
pub mod protocol;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Handle types
pub use browser::{Element, ElementFactory, FrameContext, Page, Routing};

// Client types
pub use client::{Client, DomainTracker, TargetRegistry, TargetSession};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{EventCallback, EventDispatcher};

// Identifier types
pub use identifiers::{
    BackendNodeId, CallbackId, CommandId, ExecutionContextId, FrameId, RemoteObjectId, SessionId,
    TargetId,
};

// Protocol types
pub use protocol::{Command, Event, Response, TargetInfo};

// Transport types
pub use transport::Connection;
