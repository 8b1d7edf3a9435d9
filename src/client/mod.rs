//! Scoped client owning the shared registries.
//!
//! The [`Client`] is the explicit owner of the state the rest of the crate
//! routes through: the browser-level [`Connection`], the
//! [`EventDispatcher`], and the [`TargetRegistry`]. Nothing here is a
//! global; each test or embedding instantiates its own client.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Connection + dispatcher + registry, one scope |
//! | [`TargetSession`] | Routing state for one attached target |
//! | [`TargetRegistry`] | Attach dedupe and teardown |
//! | [`DomainTracker`] | Per-session domain enable flags |

// ============================================================================
// Submodules
// ============================================================================

/// Per-session protocol domain flags.
pub mod domains;

/// Target sessions and the attach registry.
pub mod targets;

// ============================================================================
// Re-exports
// ============================================================================

pub use domains::DomainTracker;
pub use targets::{TargetRegistry, TargetSession};

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::browser::Page;
use crate::error::Result;
use crate::events::{EventCallback, EventDispatcher};
use crate::identifiers::{CallbackId, SessionId, TargetId};
use crate::protocol::{ProtocolCall, TargetCommand, TargetInfo};
use crate::transport::Connection;

// ============================================================================
// Client
// ============================================================================

/// A CDP client scope: one browser connection plus its registries.
///
/// # Example
///
/// ```no_run
/// use chromium_cdp::{Client, Result};
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let endpoint = Url::parse("ws://127.0.0.1:9222/devtools/browser/abc")?;
///     let client = Client::connect(&endpoint).await?;
///
///     for target in client.list_targets().await? {
///         if target.target_type == "page" {
///             let page = client.attach_page(&target.target_id).await?;
///             page.enable_domain("Page").await?;
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct Client {
    /// Browser-level connection.
    connection: Connection,
    /// Event fan-out shared with the receive loop.
    dispatcher: Arc<EventDispatcher>,
    /// Attached target sessions.
    targets: Arc<TargetRegistry>,
    /// Teardown callbacks, removed on drop.
    teardown_callbacks: Vec<CallbackId>,
}

impl Client {
    /// Dials a browser endpoint and wires target-teardown handling.
    ///
    /// # Errors
    ///
    /// Propagates connection errors from [`Connection::connect`].
    pub async fn connect(endpoint: &Url) -> Result<Self> {
        let dispatcher = Arc::new(EventDispatcher::new());
        let connection = Connection::connect(endpoint, Arc::clone(&dispatcher)).await?;
        Ok(Self::from_connection(connection))
    }

    /// Builds a client over an already-established connection.
    ///
    /// The connection's dispatcher becomes the client's; target-destroyed
    /// and detach notifications immediately invalidate affected sessions.
    #[must_use]
    pub fn from_connection(connection: Connection) -> Self {
        let dispatcher = Arc::clone(connection.dispatcher());
        let targets = Arc::new(TargetRegistry::new(connection.clone()));

        let mut teardown_callbacks = Vec::new();

        {
            let targets = Arc::clone(&targets);
            teardown_callbacks.push(dispatcher.register(
                "Target.targetDestroyed",
                EventCallback::sync(move |event| {
                    match event.params.get("targetId").and_then(|v| v.as_str()) {
                        Some(id) => targets.remove(&TargetId::new(id)),
                        None => warn!("targetDestroyed without targetId"),
                    }
                }),
                false,
            ));
        }
        {
            let targets = Arc::clone(&targets);
            teardown_callbacks.push(dispatcher.register(
                "Target.detachedFromTarget",
                EventCallback::sync(move |event| {
                    match event.params.get("sessionId").and_then(|v| v.as_str()) {
                        Some(id) => targets.remove_by_session(&SessionId::new(id)),
                        None => warn!("detachedFromTarget without sessionId"),
                    }
                }),
                false,
            ));
        }

        // Transport death invalidates every session bound to it.
        {
            let targets = Arc::clone(&targets);
            let mut closed = connection.closed_watch();
            tokio::spawn(async move {
                while closed.changed().await.is_ok() {
                    if *closed.borrow() {
                        debug!("Connection closed; invalidating sessions");
                        targets.invalidate_all();
                        break;
                    }
                }
            });
        }

        Self {
            connection,
            dispatcher,
            targets,
            teardown_callbacks,
        }
    }

    /// Returns the browser-level connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the event dispatcher.
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Returns the target registry.
    #[inline]
    #[must_use]
    pub fn targets(&self) -> &Arc<TargetRegistry> {
        &self.targets
    }

    /// Lists attachable targets.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from `Target.getTargets`.
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        self.targets.list_targets().await
    }

    /// Toggles target discovery notifications.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from `Target.setDiscoverTargets`.
    pub async fn set_discover_targets(&self, discover: bool) -> Result<()> {
        let command = TargetCommand::SetDiscoverTargets { discover };
        let (method, params) = command.call()?;
        self.connection.execute(&method, params, None).await?;
        Ok(())
    }

    /// Attaches to a page target and returns its root handle.
    ///
    /// # Errors
    ///
    /// Propagates attach errors from the registry.
    pub async fn attach_page(&self, target_id: &TargetId) -> Result<Page> {
        let session = self.targets.get_or_attach(target_id).await?;
        Ok(Page::new(session, Arc::clone(&self.targets)))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for id in self.teardown_callbacks.drain(..) {
            self.dispatcher.unregister(id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
