//! Typed command builders organized by protocol domain.
//!
//! The transport itself is parametric over payloads (any `Domain.method`
//! string plus a params object goes through [`crate::transport::Connection::execute`]);
//! these enums cover the methods the target-routing core issues itself.
//!
//! | Domain | Commands |
//! |--------|----------|
//! | `Target` | Discovery, attach, detach |
//! | `Page` | Domain toggle, frame tree, isolated worlds |
//! | `DOM` | Node description, frame ownership |
//! | `Runtime` | Evaluation, remote function calls |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{
    BackendNodeId, ExecutionContextId, FrameId, RemoteObjectId, SessionId, TargetId,
};

// ============================================================================
// ProtocolCall
// ============================================================================

/// A typed command that lowers to a `(method, params)` pair.
///
/// Implemented by the per-domain command enums below; the default body
/// relies on their adjacently-tagged serde representation.
pub trait ProtocolCall: Serialize {
    /// Splits the command into its wire method and params.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the command does not serialize to a
    /// tagged object (a bug in the enum definition, not runtime input).
    fn call(&self) -> Result<(String, Value)> {
        let value = serde_json::to_value(self)?;
        let method = value
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| Error::protocol("command without method tag"))?
            .to_string();
        let params = value
            .get("params")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok((method, params))
    }
}

// ============================================================================
// Target Commands
// ============================================================================

/// Target domain commands for discovery and attachment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum TargetCommand {
    /// List all attachable targets.
    #[serde(rename = "Target.getTargets")]
    GetTargets {},

    /// Attach to a target, optionally in flattened mode.
    #[serde(rename = "Target.attachToTarget")]
    AttachToTarget {
        /// Target to attach to.
        #[serde(rename = "targetId")]
        target_id: TargetId,
        /// Route the session over this connection via `sessionId`.
        flatten: bool,
    },

    /// Detach an attached session.
    #[serde(rename = "Target.detachFromTarget")]
    DetachFromTarget {
        /// Session to detach.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// Toggle target discovery notifications.
    #[serde(rename = "Target.setDiscoverTargets")]
    SetDiscoverTargets {
        /// Whether to emit created/destroyed events.
        discover: bool,
    },
}

impl ProtocolCall for TargetCommand {}

// ============================================================================
// Page Commands
// ============================================================================

/// Page domain commands for frame-tree inspection and isolated worlds.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum PageCommand {
    /// Enable Page domain events.
    #[serde(rename = "Page.enable")]
    Enable {},

    /// Disable Page domain events.
    #[serde(rename = "Page.disable")]
    Disable {},

    /// Fetch the target's frame tree.
    #[serde(rename = "Page.getFrameTree")]
    GetFrameTree {},

    /// Create an isolated execution context on a frame.
    ///
    /// The world shares the frame's DOM but not its global scope, so page
    /// scripts cannot observe or interfere with it.
    #[serde(rename = "Page.createIsolatedWorld")]
    CreateIsolatedWorld {
        /// Frame to host the world.
        #[serde(rename = "frameId")]
        frame_id: FrameId,
        /// World name, unique per resolution.
        #[serde(rename = "worldName")]
        world_name: String,
        /// Grant cross-origin access within the world.
        #[serde(rename = "grantUniveralAccess")]
        grant_universal_access: bool,
    },
}

impl ProtocolCall for PageCommand {}

// ============================================================================
// DOM Commands
// ============================================================================

/// DOM domain commands for node metadata and frame ownership.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum DomCommand {
    /// Enable DOM domain events.
    #[serde(rename = "DOM.enable")]
    Enable {},

    /// Disable DOM domain events.
    #[serde(rename = "DOM.disable")]
    Disable {},

    /// Describe a node by remote object reference.
    #[serde(rename = "DOM.describeNode")]
    DescribeNode {
        /// Remote object reference of the node.
        #[serde(rename = "objectId")]
        object_id: RemoteObjectId,
    },

    /// Query the owning node of a frame.
    #[serde(rename = "DOM.getFrameOwner")]
    GetFrameOwner {
        /// Frame whose owner element is queried.
        #[serde(rename = "frameId")]
        frame_id: FrameId,
    },
}

impl ProtocolCall for DomCommand {}

// ============================================================================
// Runtime Commands
// ============================================================================

/// Runtime domain commands for script evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum RuntimeCommand {
    /// Enable Runtime domain events.
    #[serde(rename = "Runtime.enable")]
    Enable {},

    /// Disable Runtime domain events.
    #[serde(rename = "Runtime.disable")]
    Disable {},

    /// Evaluate an expression in a given execution context.
    #[serde(rename = "Runtime.evaluate")]
    Evaluate {
        /// Expression source.
        expression: String,
        /// Execution context to evaluate in; default context if absent.
        #[serde(rename = "contextId", skip_serializing_if = "Option::is_none")]
        context_id: Option<ExecutionContextId>,
    },

    /// Call a function with a remote object as `this`.
    #[serde(rename = "Runtime.callFunctionOn")]
    CallFunctionOn {
        /// Function declaration source.
        #[serde(rename = "functionDeclaration")]
        function_declaration: String,
        /// Receiver object.
        #[serde(rename = "objectId")]
        object_id: RemoteObjectId,
        /// Call arguments.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        arguments: Vec<Value>,
    },
}

impl ProtocolCall for RuntimeCommand {}

// ============================================================================
// Response Payloads
// ============================================================================

/// Metadata for one attachable target.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    /// Target ID.
    #[serde(rename = "targetId")]
    pub target_id: TargetId,

    /// Target type (`page`, `iframe`, `worker`, ...).
    #[serde(rename = "type")]
    pub target_type: String,

    /// Current document URL.
    #[serde(default)]
    pub url: String,

    /// Whether a session is already attached.
    #[serde(default)]
    pub attached: bool,

    /// Declared parent frame, present for out-of-process iframes.
    #[serde(rename = "parentFrameId", default)]
    pub parent_frame_id: Option<FrameId>,
}

impl TargetInfo {
    /// Returns `true` for target types that can host frames.
    #[inline]
    #[must_use]
    pub fn is_frame_target(&self) -> bool {
        matches!(self.target_type.as_str(), "page" | "iframe")
    }
}

/// One frame within a target's frame tree.
#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    /// Frame ID.
    pub id: FrameId,

    /// Parent frame ID (absent for the root frame).
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<FrameId>,

    /// Document URL.
    #[serde(default)]
    pub url: String,
}

/// Hierarchical frame structure of one target.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameTree {
    /// This node's frame.
    pub frame: Frame,

    /// Child subtrees.
    #[serde(rename = "childFrames", default)]
    pub child_frames: Vec<FrameTree>,
}

impl FrameTree {
    /// Iterates the tree depth-first, root first.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        let mut frames = Vec::new();
        self.collect(&mut frames);
        frames.into_iter()
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Frame>) {
        out.push(&self.frame);
        for child in &self.child_frames {
            child.collect(out);
        }
    }
}

/// Node metadata returned by `DOM.describeNode`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDescription {
    /// Stable backend identity of the node.
    #[serde(rename = "backendNodeId")]
    pub backend_node_id: BackendNodeId,

    /// Owning-document frame, present only for same-process nodes.
    #[serde(rename = "frameId", default)]
    pub frame_id: Option<FrameId>,

    /// Document URL of the owning document.
    #[serde(rename = "documentURL", default)]
    pub document_url: Option<String>,
}

/// A remote JavaScript value or object reference.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteObject {
    /// Object reference, absent for primitive values.
    #[serde(rename = "objectId", default)]
    pub object_id: Option<RemoteObjectId>,

    /// Primitive value, if the result was serializable.
    #[serde(default)]
    pub value: Option<Value>,
}

// ============================================================================
// Payload Extraction
// ============================================================================

/// Deserializes a field of a result object into a typed payload.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the field is missing or ill-shaped.
pub fn extract<T: serde::de::DeserializeOwned>(result: &Value, field: &str) -> Result<T> {
    let value = result
        .get(field)
        .ok_or_else(|| Error::protocol(format!("missing field `{field}` in result")))?;
    serde_json::from_value(value.clone()).map_err(Error::from)
}

// ============================================================================
// Tests
// ============================================================================
