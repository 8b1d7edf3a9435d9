//! Per-session protocol domain enable/disable tracking.
//!
//! Protocol feature domains (`Page`, `DOM`, `Network`, ...) deliver events
//! only after an explicit `<Domain>.enable`. The tracker makes that toggle
//! idempotent per session: repeated enables issue the wire command at most
//! once, and the current state is queryable without a round trip.
//!
//! Observers must not assume delivery of a domain's events unless that
//! domain is currently enabled on the session they care about.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::identifiers::SessionId;
use crate::transport::Connection;

// ============================================================================
// DomainTracker
// ============================================================================

/// Idempotent enable/disable flags for one session's protocol domains.
///
/// State reads are synchronous; enable/disable round trips serialize on an
/// internal async mutex so two concurrent `enable("Page")` calls still
/// issue exactly one wire command.
pub struct DomainTracker {
    /// Currently enabled domains.
    enabled: Mutex<FxHashSet<String>>,
    /// Serializes in-flight toggles.
    toggle_lock: tokio::sync::Mutex<()>,
}

impl Default for DomainTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainTracker {
    /// Creates a tracker with no enabled domains.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: Mutex::new(FxHashSet::default()),
            toggle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Enables a domain on the session, at most once.
    ///
    /// Already-enabled domains return `Ok` without touching the wire.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from the underlying `<Domain>.enable`;
    /// the flag is only set after the command succeeds.
    pub async fn enable(
        &self,
        domain: &str,
        connection: &Connection,
        session_id: Option<&SessionId>,
    ) -> Result<()> {
        let _guard = self.toggle_lock.lock().await;

        if self.enabled.lock().contains(domain) {
            return Ok(());
        }

        connection
            .execute(&format!("{domain}.enable"), json!({}), session_id)
            .await?;

        self.enabled.lock().insert(domain.to_string());
        debug!(domain, "Domain enabled");
        Ok(())
    }

    /// Disables a domain on the session.
    ///
    /// A no-op for domains that are not enabled.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from the underlying `<Domain>.disable`.
    pub async fn disable(
        &self,
        domain: &str,
        connection: &Connection,
        session_id: Option<&SessionId>,
    ) -> Result<()> {
        let _guard = self.toggle_lock.lock().await;

        if !self.enabled.lock().contains(domain) {
            return Ok(());
        }

        connection
            .execute(&format!("{domain}.disable"), json!({}), session_id)
            .await?;

        self.enabled.lock().remove(domain);
        debug!(domain, "Domain disabled");
        Ok(())
    }

    /// Returns whether a domain is currently enabled. No round trip.
    #[must_use]
    pub fn is_enabled(&self, domain: &str) -> bool {
        self.enabled.lock().contains(domain)
    }

    /// Clears every flag. Called on session teardown.
    pub fn clear(&self) {
        let mut enabled = self.enabled.lock();
        if !enabled.is_empty() {
            debug!(count = enabled.len(), "Cleared domain flags");
            enabled.clear();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
