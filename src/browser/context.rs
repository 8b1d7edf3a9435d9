//! Resolved frame contexts and command routing.
//!
//! A [`FrameContext`] is the end product of the frame-resolution pipeline:
//! the frame id, the isolated execution context created on it, the anchored
//! document handle, and the session every command through the context must
//! route over. Once built it is read-only; descendants found inside the
//! frame share it by reference.
//!
//! [`Routing`] is the tagged variant distinguishing a root handle from a
//! frame-relative one. Routing resolution is pure over cached state: no
//! I/O, no probing for optional attributes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::client::TargetSession;
use crate::error::{Error, Result};
use crate::identifiers::{ExecutionContextId, FrameId, RemoteObjectId, SessionId};
use crate::protocol::ProtocolCall;
use crate::transport::Connection;

// ============================================================================
// FrameContext
// ============================================================================

/// Resolved routing and execution state for one frame.
///
/// Session-consistent: every command issued through this context carries
/// the same `sessionId` (or its absence) for the context's lifetime. Use
/// after the backing session is torn down fails with
/// [`Error::StaleFrameContext`]; staleness is detected lazily at use
/// time, never by silent rerouting.
pub struct FrameContext {
    /// The resolved frame.
    frame_id: FrameId,
    /// Document URL observed at resolution time.
    document_url: Option<String>,
    /// Isolated world created on the frame.
    execution_context_id: ExecutionContextId,
    /// Anchored handle to the frame's root document node.
    document_object_id: RemoteObjectId,
    /// Session all commands through this context route over.
    session: Arc<TargetSession>,
}

impl FrameContext {
    /// Builds a completed context. Only the resolver constructs these.
    pub(crate) fn new(
        frame_id: FrameId,
        document_url: Option<String>,
        execution_context_id: ExecutionContextId,
        document_object_id: RemoteObjectId,
        session: Arc<TargetSession>,
    ) -> Self {
        Self {
            frame_id,
            document_url,
            execution_context_id,
            document_object_id,
            session,
        }
    }

    /// Returns the resolved frame ID.
    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> &FrameId {
        &self.frame_id
    }

    /// Returns the document URL observed at resolution time.
    #[inline]
    #[must_use]
    pub fn document_url(&self) -> Option<&str> {
        self.document_url.as_deref()
    }

    /// Returns the isolated execution context ID.
    #[inline]
    #[must_use]
    pub fn execution_context_id(&self) -> ExecutionContextId {
        self.execution_context_id
    }

    /// Returns the anchored document handle.
    #[inline]
    #[must_use]
    pub fn document_object_id(&self) -> &RemoteObjectId {
        &self.document_object_id
    }

    /// Returns the session this context routes through.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Arc<TargetSession> {
        &self.session
    }

    /// Returns `true` once the backing session is gone.
    #[inline]
    #[must_use]
    pub fn is_stale(&self) -> bool {
        !self.session.is_alive()
    }

    /// Executes a command routed through this context's session.
    ///
    /// # Errors
    ///
    /// - [`Error::StaleFrameContext`] if the backing session was torn down
    /// - transport errors from the underlying execute
    pub async fn execute(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_fresh()?;
        self.session.execute(method, params).await
    }

    /// Executes a command with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.ensure_fresh()?;
        self.session.execute_with_timeout(method, params, timeout).await
    }

    /// Executes a typed command routed through this context's session.
    pub async fn call<C: ProtocolCall>(&self, command: &C) -> Result<Value> {
        self.ensure_fresh()?;
        self.session.call(command).await
    }

    fn ensure_fresh(&self) -> Result<()> {
        if self.is_stale() {
            Err(Error::stale_frame_context(self.session.target_id().clone()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("frame_id", &self.frame_id)
            .field("execution_context_id", &self.execution_context_id)
            .field("session_id", &self.session.session_id())
            .field("stale", &self.is_stale())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Where a handle's commands route: the target root or a resolved frame.
///
/// Modeled as an explicit tagged variant; a handle's kind is never inferred
/// by probing optional fields at runtime.
#[derive(Clone)]
pub enum Routing {
    /// Commands route through the target's root session.
    Root {
        /// The owning target session.
        session: Arc<TargetSession>,
    },
    /// Commands route through a resolved frame context.
    FrameRelative {
        /// The shared frame context.
        context: Arc<FrameContext>,
    },
}

impl Routing {
    /// Returns the session this routing resolves to.
    #[must_use]
    pub fn session(&self) -> &Arc<TargetSession> {
        match self {
            Self::Root { session } => session,
            Self::FrameRelative { context } => context.session(),
        }
    }

    /// Returns the frame context, if frame-relative.
    #[must_use]
    pub fn frame_context(&self) -> Option<&Arc<FrameContext>> {
        match self {
            Self::Root { .. } => None,
            Self::FrameRelative { context } => Some(context),
        }
    }

    /// Resolves the `(transport, sessionId)` pair for this handle.
    ///
    /// Pure and deterministic over cached state; performs no I/O.
    #[must_use]
    pub fn resolve(&self) -> (&Connection, Option<&SessionId>) {
        let session = self.session();
        (session.connection(), session.session_id())
    }

    /// Executes a command over the resolved routing.
    ///
    /// # Errors
    ///
    /// [`Error::StaleFrameContext`] for a stale frame-relative handle;
    /// otherwise the session's errors.
    pub async fn execute(&self, method: &str, params: Value) -> Result<Value> {
        match self {
            Self::Root { session } => session.execute(method, params).await,
            Self::FrameRelative { context } => context.execute(method, params).await,
        }
    }
}

impl std::fmt::Debug for Routing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Root { session } => f
                .debug_struct("Routing::Root")
                .field("target_id", session.target_id())
                .finish(),
            Self::FrameRelative { context } => f
                .debug_struct("Routing::FrameRelative")
                .field("frame_id", context.frame_id())
                .finish(),
        }
    }
}
