//! Browser entities: pages, elements, frame contexts.
//!
//! This module provides the handle types over the transport core:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Page`] | Root handle over an attached target session |
//! | [`Element`] | Remote DOM node with lazy frame resolution |
//! | [`FrameContext`] | Resolved routing for one frame |
//! | [`Routing`] | Tagged root vs frame-relative routing |
//! | [`ElementFactory`] | Mints element handles for finder code |
//!
//! # Example
//!
//! ```no_run
//! use chromium_cdp::{Client, Result};
//! use url::Url;
//!
//! # async fn example() -> Result<()> {
//! let endpoint = Url::parse("ws://127.0.0.1:9222/devtools/browser/abc")?;
//! let client = Client::connect(&endpoint).await?;
//!
//! let targets = client.list_targets().await?;
//! let page = client.attach_page(&targets[0].target_id).await?;
//!
//! if let Some(iframe) = page.query_selector("iframe").await? {
//!     // Resolves the frame (attaching across processes if needed),
//!     // then finds inside it through the isolated world.
//!     let button = iframe.query_selector_in_frame("button").await?;
//!     let _ = button;
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Frame contexts and routing.
pub mod context;

/// DOM element handles.
pub mod element;

/// The frame-resolution pipeline.
pub mod frame;

/// Root page handle.
pub mod page;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{FrameContext, Routing};
pub use element::{Element, ElementFactory};
pub use page::Page;
