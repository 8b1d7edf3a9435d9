//! DOM element handles.
//!
//! An [`Element`] is an opaque remote-object reference plus the routing its
//! commands go through. Frame-owning elements (iframes) resolve a
//! [`FrameContext`](super::context::FrameContext) lazily, exactly once;
//! elements found inside that frame share the resolved context by
//! reference.
//!
//! Handles are constructed through an [`ElementFactory`] so finder code
//! (pages, other elements) can mint handles without owning the registry
//! wiring themselves.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::TargetRegistry;
use crate::error::Result;
use crate::identifiers::RemoteObjectId;
use crate::protocol::{RemoteObject, RuntimeCommand, extract};

use super::context::{FrameContext, Routing};
use super::frame::resolve_frame_context;

// ============================================================================
// ElementFactory
// ============================================================================

/// Mints element handles bound to the target registry.
///
/// Passed by reference into finder code; finders construct elements, and
/// the elements they construct can find further elements through the same
/// factory.
#[derive(Clone)]
pub struct ElementFactory {
    registry: Arc<TargetRegistry>,
}

impl ElementFactory {
    /// Creates a factory over a registry.
    #[must_use]
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        Self { registry }
    }

    /// Builds an element handle with the given routing.
    #[must_use]
    pub fn element(&self, object_id: RemoteObjectId, routing: Routing) -> Element {
        Element {
            inner: Arc::new(ElementInner {
                object_id,
                routing,
                factory: self.clone(),
                frame_context: OnceCell::new(),
            }),
        }
    }
}

// ============================================================================
// Element
// ============================================================================

/// Internal shared state for an element.
struct ElementInner {
    /// Remote object reference of the node.
    object_id: RemoteObjectId,

    /// Where this element's commands route.
    routing: Routing,

    /// Factory for constructing child handles.
    factory: ElementFactory,

    /// Lazily resolved context for frame-owning elements.
    ///
    /// Single-flight: concurrent first access runs the resolution pipeline
    /// once; failures are not cached and a later access retries.
    frame_context: OnceCell<Arc<FrameContext>>,
}

/// A handle to a DOM node in a target.
///
/// Cloning shares state; the resolved frame context (if any) is shared
/// with every clone and descendant.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("object_id", &self.inner.object_id)
            .field("routing", &self.inner.routing)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Element - Accessors
// ============================================================================

impl Element {
    /// Returns the remote object reference.
    #[inline]
    #[must_use]
    pub fn object_id(&self) -> &RemoteObjectId {
        &self.inner.object_id
    }

    /// Returns this element's routing.
    #[inline]
    #[must_use]
    pub fn routing(&self) -> &Routing {
        &self.inner.routing
    }
}

// ============================================================================
// Element - Frame Context
// ============================================================================

impl Element {
    /// Resolves and caches the frame context this element owns.
    ///
    /// For an `<iframe>` handle this runs the resolution pipeline on first
    /// call and returns the cached context afterwards (an O(1) read).
    /// Concurrent first calls share one pipeline run. There is no
    /// re-resolution on navigation; a context whose session died fails
    /// explicitly at use time.
    ///
    /// # Errors
    ///
    /// Resolution errors from the pipeline; never partially cached.
    pub async fn ensure_frame_context(&self) -> Result<Arc<FrameContext>> {
        let context = self
            .inner
            .frame_context
            .get_or_try_init(|| async {
                debug!(object_id = %self.inner.object_id, "Resolving frame context");
                resolve_frame_context(
                    &self.inner.object_id,
                    &self.inner.routing,
                    &self.inner.factory.registry,
                )
                .await
                .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(context))
    }

    /// Returns the cached frame context without resolving.
    #[must_use]
    pub fn frame_context(&self) -> Option<Arc<FrameContext>> {
        self.inner.frame_context.get().cloned()
    }
}

// ============================================================================
// Element - Remote Calls
// ============================================================================

impl Element {
    /// Calls a function with this element as `this`, over its routing.
    ///
    /// # Errors
    ///
    /// Transport errors, or `StaleFrameContext` for a frame-relative
    /// element whose session was torn down.
    pub async fn call_function(&self, declaration: &str, arguments: Vec<Value>) -> Result<Value> {
        let command = RuntimeCommand::CallFunctionOn {
            function_declaration: declaration.to_string(),
            object_id: self.inner.object_id.clone(),
            arguments,
        };
        let (method, params) = crate::protocol::ProtocolCall::call(&command)?;
        self.inner.routing.execute(&method, params).await
    }

    /// Finds a descendant of this element by raw selector passthrough.
    ///
    /// The selector string goes to the remote `querySelector` verbatim;
    /// building selector syntax is a higher layer's concern. The returned
    /// element inherits this element's routing, so everything found inside
    /// a resolved frame keeps routing through that frame's session.
    ///
    /// # Errors
    ///
    /// Transport or staleness errors from the underlying call.
    pub async fn query_selector(&self, selector: &str) -> Result<Option<Element>> {
        let result = self
            .call_function(
                "function(sel) { return this.querySelector(sel); }",
                vec![json!({ "value": selector })],
            )
            .await?;

        let object: RemoteObject = extract(&result, "result")?;
        Ok(object
            .object_id
            .map(|id| self.inner.factory.element(id, self.inner.routing.clone())))
    }

    /// Finds an element inside the frame this element owns.
    ///
    /// Resolves the frame context if needed, queries relative to the
    /// anchored document in the isolated world, and returns a handle that
    /// routes through the resolved session. A frame-owning descendant
    /// found this way inherits only the routing needed to re-run
    /// resolution relative to this frame.
    ///
    /// # Errors
    ///
    /// Resolution errors, transport errors, or `StaleFrameContext`.
    pub async fn query_selector_in_frame(&self, selector: &str) -> Result<Option<Element>> {
        let context = self.ensure_frame_context().await?;

        let command = RuntimeCommand::CallFunctionOn {
            function_declaration: "function(sel) { return this.querySelector(sel); }".to_string(),
            object_id: context.document_object_id().clone(),
            arguments: vec![json!({ "value": selector })],
        };
        let result = context.call(&command).await?;

        let object: RemoteObject = extract(&result, "result")?;
        Ok(object.object_id.map(|id| {
            self.inner.factory.element(
                id,
                Routing::FrameRelative {
                    context: Arc::clone(&context),
                },
            )
        }))
    }
}
