//! Wire protocol message types.
//!
//! This module defines the JSON frame formats exchanged with the browser
//! endpoint and the typed command builders the routing core issues.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Command`] | Local → Browser | Correlated request |
//! | [`Response`] | Browser → Local | Correlated reply (`id` present) |
//! | [`Event`] | Browser → Local | Notification (`method`, no `id`) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Wire frames and classification |
//! | `command` | Typed per-domain command builders |

// ============================================================================
// Submodules
// ============================================================================

/// Typed command builders by protocol domain.
pub mod command;

/// Wire frames and frame classification.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{
    DomCommand, Frame, FrameTree, NodeDescription, PageCommand, ProtocolCall, RemoteObject,
    RuntimeCommand, TargetCommand, TargetInfo, extract,
};
pub use message::{Command, Event, IncomingMessage, Response, ResponseError, classify};
