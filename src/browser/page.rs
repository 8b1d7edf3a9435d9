//! Root page handle.
//!
//! A [`Page`] wraps one attached target session and is the entry point for
//! element lookup and event subscription on that target. Commands through
//! the page route over the session's `(connection, sessionId)` pair.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::client::{TargetRegistry, TargetSession};
use crate::error::Result;
use crate::events::EventCallback;
use crate::identifiers::CallbackId;
use crate::protocol::{ProtocolCall, RemoteObject, RuntimeCommand, extract};

use super::context::Routing;
use super::element::{Element, ElementFactory};

// ============================================================================
// Page
// ============================================================================

/// A handle to an attached page target.
#[derive(Clone)]
pub struct Page {
    /// The target session commands route through.
    session: Arc<TargetSession>,
    /// Factory for minting element handles.
    factory: ElementFactory,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("target_id", self.session.target_id())
            .field("session_id", &self.session.session_id())
            .finish_non_exhaustive()
    }
}

impl Page {
    /// Creates a page handle over a session.
    #[must_use]
    pub fn new(session: Arc<TargetSession>, registry: Arc<TargetRegistry>) -> Self {
        Self {
            session,
            factory: ElementFactory::new(registry),
        }
    }

    /// Returns the underlying target session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Arc<TargetSession> {
        &self.session
    }

    /// Executes a raw command routed through this page's session.
    ///
    /// # Errors
    ///
    /// Transport errors from the session.
    pub async fn execute(&self, method: &str, params: Value) -> Result<Value> {
        self.session.execute(method, params).await
    }

    /// Executes a typed command routed through this page's session.
    pub async fn call<C: ProtocolCall>(&self, command: &C) -> Result<Value> {
        self.session.call(command).await
    }

    /// Enables a protocol domain on this page's session, idempotently.
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.session.enable_domain(domain).await
    }

    /// Disables a protocol domain on this page's session.
    pub async fn disable_domain(&self, domain: &str) -> Result<()> {
        self.session.disable_domain(domain).await
    }

    /// Returns whether a domain is enabled. No round trip.
    #[must_use]
    pub fn is_domain_enabled(&self, domain: &str) -> bool {
        self.session.is_domain_enabled(domain)
    }

    /// Registers an event callback on the session's connection.
    ///
    /// Events arrive only for domains currently enabled on the sessions
    /// emitting them; callers filter by `sessionId` if they care about
    /// this page specifically.
    pub fn on(
        &self,
        event_name: impl Into<String>,
        callback: EventCallback,
        temporary: bool,
    ) -> CallbackId {
        self.session
            .connection()
            .dispatcher()
            .register(event_name, callback, temporary)
    }

    /// Removes an event callback registration.
    pub fn off(&self, id: CallbackId) {
        self.session.connection().dispatcher().unregister(id);
    }

    /// Returns a handle to the page's root document.
    ///
    /// # Errors
    ///
    /// Transport errors from `Runtime.evaluate`.
    pub async fn document(&self) -> Result<Element> {
        let result = self
            .session
            .call(&RuntimeCommand::Evaluate {
                expression: "document".to_string(),
                context_id: None,
            })
            .await?;

        let object: RemoteObject = extract(&result, "result")?;
        let object_id = object
            .object_id
            .ok_or_else(|| crate::error::Error::protocol("document evaluated to no object"))?;

        Ok(self.factory.element(
            object_id,
            Routing::Root {
                session: Arc::clone(&self.session),
            },
        ))
    }

    /// Finds an element by raw selector passthrough from the document.
    ///
    /// # Errors
    ///
    /// Transport errors from the lookup.
    pub async fn query_selector(&self, selector: &str) -> Result<Option<Element>> {
        self.document().await?.query_selector(selector).await
    }

    /// Evaluates an expression in the page's default context.
    ///
    /// # Errors
    ///
    /// Transport errors from `Runtime.evaluate`.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .session
            .call(&RuntimeCommand::Evaluate {
                expression: expression.to_string(),
                context_id: None,
            })
            .await?;
        let object: RemoteObject = extract(&result, "result")?;
        Ok(object.value.unwrap_or(json!(null)))
    }
}
