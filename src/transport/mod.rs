//! WebSocket transport layer.
//!
//! One [`Connection`] per physical WebSocket: single-reader receive loop,
//! single-writer send path, command/response correlation by monotonic id.
//! Browser-level and per-target endpoints both go through the same type;
//! flattened routing adds a `sessionId` per command instead of a second
//! socket.

// ============================================================================
// Submodules
// ============================================================================

/// Connection, correlation, and the receive loop.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, DEFAULT_COMMAND_TIMEOUT};
