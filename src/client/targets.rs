//! Target sessions and the attach registry.
//!
//! A [`TargetSession`] binds one protocol target to the transport and
//! session id its commands route through. The [`TargetRegistry`] guarantees
//! exactly one session per target id, deduping concurrent attach attempts,
//! and tears sessions down when the browser reports the target gone.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, TargetId};
use crate::protocol::{ProtocolCall, TargetCommand, TargetInfo, extract};
use crate::transport::Connection;

use super::domains::DomainTracker;

// ============================================================================
// TargetSession
// ============================================================================

/// Routing state for one attached target.
///
/// Flattened mode: shares the browser connection and carries a `sessionId`
/// on every command. Dedicated mode: owns its own connection, no session id.
/// Created on attach, invalidated when the target is destroyed or the
/// transport drops; invalidation makes every frame context referencing this
/// session stale.
pub struct TargetSession {
    /// The target this session addresses.
    target_id: TargetId,
    /// Flattened-routing session id, `None` for dedicated connections.
    session_id: Option<SessionId>,
    /// Transport the session's commands go through.
    connection: Connection,
    /// Enabled protocol domains, scoped to this session.
    domains: DomainTracker,
    /// Cleared on target destruction.
    alive: AtomicBool,
}

impl TargetSession {
    /// Creates a session over a shared or dedicated connection.
    pub(crate) fn new(
        target_id: TargetId,
        session_id: Option<SessionId>,
        connection: Connection,
    ) -> Self {
        Self {
            target_id,
            session_id,
            connection,
            domains: DomainTracker::new(),
            alive: AtomicBool::new(true),
        }
    }

    /// Returns the target ID.
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    /// Returns the flattened-routing session ID, if any.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Returns the transport this session routes through.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns `true` while the session is usable.
    ///
    /// A dropped transport makes every session bound to it dead.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.connection.is_closed()
    }

    /// Marks the session dead and clears its domain flags.
    ///
    /// Subsequent commands through this session or any frame context
    /// referencing it fail explicitly; nothing silently reroutes.
    pub fn invalidate(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            debug!(target_id = %self.target_id, "Target session invalidated");
            self.domains.clear();
        }
    }

    /// Executes a command routed through this session.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetNotFound`] if the session was invalidated
    /// - transport errors from [`Connection::execute`]
    pub async fn execute(&self, method: &str, params: Value) -> Result<Value> {
        self.ensure_alive()?;
        self.connection
            .execute(method, params, self.session_id.as_ref())
            .await
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
        self.ensure_alive()?;
        self.connection
            .execute_with_timeout(method, params, self.session_id.as_ref(), timeout)
            .await
    }

    /// Executes a typed command routed through this session.
    pub async fn call<C: ProtocolCall>(&self, command: &C) -> Result<Value> {
        self.ensure_alive()?;
        self.connection
            .call(command, self.session_id.as_ref())
            .await
    }

    /// Enables a protocol domain on this session, idempotently.
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.ensure_alive()?;
        self.domains
            .enable(domain, &self.connection, self.session_id.as_ref())
            .await
    }

    /// Disables a protocol domain on this session.
    pub async fn disable_domain(&self, domain: &str) -> Result<()> {
        self.ensure_alive()?;
        self.domains
            .disable(domain, &self.connection, self.session_id.as_ref())
            .await
    }

    /// Returns whether a domain is enabled. No round trip.
    #[must_use]
    pub fn is_domain_enabled(&self, domain: &str) -> bool {
        self.domains.is_enabled(domain)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::target_not_found(self.target_id.clone()))
        }
    }
}

impl std::fmt::Debug for TargetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSession")
            .field("target_id", &self.target_id)
            .field("session_id", &self.session_id)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TargetRegistry
// ============================================================================

/// Singleton map of `target id -> session` over one browser connection.
///
/// Concurrent [`get_or_attach`](Self::get_or_attach) calls for the same
/// target serialize behind one async mutex rather than racing into two
/// sessions.
pub struct TargetRegistry {
    /// Browser-level connection attaches go through.
    browser: Connection,
    /// Live sessions by target id.
    sessions: RwLock<FxHashMap<TargetId, Arc<TargetSession>>>,
    /// Serializes attach round trips.
    attach_lock: tokio::sync::Mutex<()>,
}

impl TargetRegistry {
    /// Creates a registry over the browser-level connection.
    #[must_use]
    pub fn new(browser: Connection) -> Self {
        Self {
            browser,
            sessions: RwLock::new(FxHashMap::default()),
            attach_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the session for a target, attaching if necessary.
    ///
    /// Attaches in flattened mode (`Target.attachToTarget` with
    /// `flatten: true`), sharing the browser connection. Exactly one
    /// session exists per target id; a concurrent attach for the same id
    /// waits and receives the first caller's session.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from the attach command.
    pub async fn get_or_attach(&self, target_id: &TargetId) -> Result<Arc<TargetSession>> {
        if let Some(session) = self.get(target_id) {
            return Ok(session);
        }

        let _guard = self.attach_lock.lock().await;

        // A concurrent caller may have attached while we waited.
        if let Some(session) = self.get(target_id) {
            return Ok(session);
        }

        debug!(target_id = %target_id, "Attaching to target");

        let result = self
            .browser
            .call(
                &TargetCommand::AttachToTarget {
                    target_id: target_id.clone(),
                    flatten: true,
                },
                None,
            )
            .await?;
        let session_id: SessionId = extract(&result, "sessionId")?;

        let session = Arc::new(TargetSession::new(
            target_id.clone(),
            Some(session_id),
            self.browser.clone(),
        ));
        self.sessions
            .write()
            .insert(target_id.clone(), Arc::clone(&session));

        Ok(session)
    }

    /// Inserts a session that owns a dedicated connection.
    ///
    /// Used for per-target endpoints that do not multiplex; commands carry
    /// no `sessionId`. Replacing an existing session invalidates it first.
    pub fn insert_dedicated(
        &self,
        target_id: TargetId,
        connection: Connection,
    ) -> Arc<TargetSession> {
        let session = Arc::new(TargetSession::new(target_id.clone(), None, connection));
        if let Some(previous) = self
            .sessions
            .write()
            .insert(target_id, Arc::clone(&session))
        {
            warn!(target_id = %previous.target_id(), "Replaced existing dedicated session");
            previous.invalidate();
        }
        session
    }

    /// Returns the live session for a target, if attached.
    #[must_use]
    pub fn get(&self, target_id: &TargetId) -> Option<Arc<TargetSession>> {
        self.sessions.read().get(target_id).cloned()
    }

    /// Removes and invalidates a target's session.
    ///
    /// Called on an observed target-destroyed signal. Frame contexts
    /// referencing the removed session fail on next use.
    pub fn remove(&self, target_id: &TargetId) {
        if let Some(session) = self.sessions.write().remove(target_id) {
            debug!(target_id = %target_id, "Target removed from registry");
            session.invalidate();
        }
    }

    /// Removes and invalidates the session carrying a given session id.
    ///
    /// Used for `Target.detachedFromTarget`, which reports the session
    /// rather than the target.
    pub fn remove_by_session(&self, session_id: &SessionId) {
        let target_id = self
            .sessions
            .read()
            .values()
            .find(|s| s.session_id() == Some(session_id))
            .map(|s| s.target_id().clone());

        if let Some(target_id) = target_id {
            self.remove(&target_id);
        }
    }

    /// Invalidates every session. Called when the transport drops.
    pub fn invalidate_all(&self) {
        let sessions: Vec<_> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.invalidate();
        }
        if !sessions.is_empty() {
            debug!(count = sessions.len(), "Invalidated all target sessions");
        }
    }

    /// Lists attachable targets as reported by the browser.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from `Target.getTargets`.
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let result = self.browser.call(&TargetCommand::GetTargets {}, None).await?;
        extract(&result, "targetInfos")
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no sessions are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
