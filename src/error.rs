//! Error types for the CDP transport core.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::CommandFailed`], [`Error::CommandTimeout`] |
//! | Resolution | [`Error::UnresolvedFrame`], [`Error::ContextCreationFailed`], [`Error::DocumentAnchorFailed`] |
//! | Routing | [`Error::StaleFrameContext`], [`Error::TargetNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! Connection-level failures are broadcast to every pending command on the
//! affected transport; resolution failures stay local to the resolving call.
//! Nothing in this crate retries on its own.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{CommandId, FrameId, TargetId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the connection cannot be established or a write fails.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection establishment timed out.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed.
    ///
    /// Broadcast to every pending command on the affected transport; also
    /// invalidates every target session bound to it.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The endpoint URL is not a usable WebSocket URL.
    #[error("Invalid endpoint: {endpoint}")]
    InvalidEndpoint {
        /// The rejected endpoint string.
        endpoint: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unclassifiable frame.
    ///
    /// Malformed incoming frames are logged and dropped by the receive
    /// loop; this variant surfaces only for locally detected violations.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// The remote end answered a command with an error object.
    ///
    /// Never auto-retried; surfaced to the issuing caller only.
    #[error("Command failed (code {code}): {message}")]
    CommandFailed {
        /// Remote error code.
        code: i64,
        /// Remote error message.
        message: String,
    },

    /// No response arrived before the command deadline.
    ///
    /// No cancellation is sent to the remote end, so the command's remote
    /// outcome is unknown, not reverted.
    #[error("Command {id} timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The command ID that timed out.
        id: CommandId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Frame Resolution Errors
    // ========================================================================
    /// The OOPIF pipeline exhausted every branch without a match.
    #[error("Unresolved frame: {reason}")]
    UnresolvedFrame {
        /// Why resolution failed (no candidates, ambiguous ownership, ...).
        reason: String,
    },

    /// Creating an isolated execution context on the resolved frame failed.
    #[error("Context creation failed for frame {frame_id}")]
    ContextCreationFailed {
        /// Frame the isolated world was requested for.
        frame_id: FrameId,
    },

    /// Evaluating the document anchor expression failed.
    #[error("Document anchor failed for frame {frame_id}")]
    DocumentAnchorFailed {
        /// Frame whose document could not be anchored.
        frame_id: FrameId,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// Use of a frame context whose backing session was torn down.
    ///
    /// Detected lazily at use time; commands fail explicitly rather than
    /// silently rerouting to the wrong document.
    #[error("Stale frame context: session for target {target_id} is gone")]
    StaleFrameContext {
        /// Target whose session backed the stale context.
        target_id: TargetId,
    },

    /// Target not present in the registry.
    #[error("Target not found: {target_id}")]
    TargetNotFound {
        /// The missing target ID.
        target_id: TargetId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an invalid endpoint error.
    #[inline]
    pub fn invalid_endpoint(endpoint: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a command failed error from a remote error object.
    #[inline]
    pub fn command_failed(code: i64, message: impl Into<String>) -> Self {
        Self::CommandFailed {
            code,
            message: message.into(),
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(id: CommandId, timeout_ms: u64) -> Self {
        Self::CommandTimeout { id, timeout_ms }
    }

    /// Creates an unresolved frame error.
    #[inline]
    pub fn unresolved_frame(reason: impl Into<String>) -> Self {
        Self::UnresolvedFrame {
            reason: reason.into(),
        }
    }

    /// Creates a context creation failure.
    #[inline]
    pub fn context_creation_failed(frame_id: FrameId) -> Self {
        Self::ContextCreationFailed { frame_id }
    }

    /// Creates a document anchor failure.
    #[inline]
    pub fn document_anchor_failed(frame_id: FrameId) -> Self {
        Self::DocumentAnchorFailed { frame_id }
    }

    /// Creates a stale frame context error.
    #[inline]
    pub fn stale_frame_context(target_id: TargetId) -> Self {
        Self::StaleFrameContext { target_id }
    }

    /// Creates a target not found error.
    #[inline]
    pub fn target_not_found(target_id: TargetId) -> Self {
        Self::TargetNotFound { target_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::CommandTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is a frame resolution error.
    #[inline]
    #[must_use]
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedFrame { .. }
                | Self::ContextCreationFailed { .. }
                | Self::DocumentAnchorFailed { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry at a higher layer; this
    /// crate itself never retries.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::CommandTimeout { .. }
                | Self::StaleFrameContext { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
