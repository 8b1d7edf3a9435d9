//! Frame resolution: mapping an element to a routed frame context.
//!
//! Given an element believed to own a frame (an `<iframe>` handle), the
//! resolver produces a [`FrameContext`] through a linear pipeline with
//! fallback branches:
//!
//! 1. **Describe** the node; a frame id in the description means the
//!    content document is same-process and resolution can skip straight to
//!    isolation.
//! 2. **Resolve by owner** within the current target's frame tree, matching
//!    each frame's owning node against the element's backend node id.
//! 3. **Resolve across processes**: enumerate sub-targets, prefer those
//!    declaring the current frame as parent, attach and confirm ownership
//!    by node identity. Ownership confirmation is authoritative; parent
//!    linkage is the fallback; URL heuristics are never trusted over
//!    either. Two simultaneous ownership matches are an error, not a
//!    tie to break.
//! 4. **Isolate**: create a fresh execution context on the resolved frame,
//!    separate from the page's own script world.
//! 5. **Anchor**: materialize a stable handle to the frame's document.
//!
//! Resolution runs at most once per element (the caller caches the result
//! and single-flights concurrent first access). There is no automatic
//! re-resolution on navigation; a stale context fails explicitly at use.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::client::{TargetRegistry, TargetSession};
use crate::error::{Error, Result};
use crate::identifiers::{BackendNodeId, ExecutionContextId, FrameId, RemoteObjectId};
use crate::protocol::{
    DomCommand, FrameTree, NodeDescription, PageCommand, RemoteObject, RuntimeCommand, extract,
};

use super::context::{FrameContext, Routing};

// ============================================================================
// Constants
// ============================================================================

/// Isolated world name allocator; a fresh name per resolution keeps worlds
/// from colliding when the same frame is resolved by different elements.
static WORLD_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_world_name() -> String {
    let n = WORLD_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("__cdp_isolated_{n}")
}

// ============================================================================
// Pipeline Entry
// ============================================================================

/// Resolves the frame owned by `object_id` into a routed context.
///
/// `routing` supplies the session and frame the owning element lives in;
/// nested out-of-process iframes therefore resolve relative to their
/// parent's session, never the root session.
///
/// # Errors
///
/// - [`Error::UnresolvedFrame`] when every branch is exhausted or
///   ownership is ambiguous
/// - [`Error::ContextCreationFailed`] / [`Error::DocumentAnchorFailed`]
///   from the isolation and anchoring steps
/// - transport errors, propagated as-is
pub(crate) async fn resolve_frame_context(
    object_id: &RemoteObjectId,
    routing: &Routing,
    registry: &Arc<TargetRegistry>,
) -> Result<FrameContext> {
    let session = routing.session();

    // Step 1: Describe.
    let node = describe_node(session, object_id).await?;

    if let Some(frame_id) = &node.frame_id {
        trace!(frame_id = %frame_id, "Content document is same-process");
        return complete(Arc::clone(session), frame_id.clone(), node.document_url).await;
    }

    // One tree fetch serves both the current-frame lookup and the owner walk.
    let tree = frame_tree(session).await?;
    let current_frame = match routing {
        Routing::FrameRelative { context } => context.frame_id().clone(),
        Routing::Root { .. } => tree.frame.id.clone(),
    };

    // Step 2: Resolve by owner within the current target.
    for frame in tree.iter() {
        if frame.id == current_frame {
            continue;
        }
        if owner_matches(session, &frame.id, node.backend_node_id).await? {
            debug!(frame_id = %frame.id, "Frame resolved by in-process ownership");
            return complete(Arc::clone(session), frame.id.clone(), Some(frame.url.clone()))
                .await;
        }
    }

    // Step 3: Resolve across processes.
    let (child_session, frame_id, url) =
        resolve_oopif(session, &current_frame, node.backend_node_id, registry).await?;
    complete(child_session, frame_id, Some(url)).await
}

// ============================================================================
// Cross-Process Resolution
// ============================================================================

/// Attach-and-confirm search over sub-targets.
async fn resolve_oopif(
    parent: &Arc<TargetSession>,
    current_frame: &FrameId,
    owner_id: BackendNodeId,
    registry: &Arc<TargetRegistry>,
) -> Result<(Arc<TargetSession>, FrameId, String)> {
    let targets = registry.list_targets().await?;

    let candidates: Vec<_> = targets
        .iter()
        .filter(|t| t.is_frame_target() && t.parent_frame_id.as_ref() == Some(current_frame))
        .collect();

    // Fast path: a single declared child needs no disambiguation.
    if let [only] = candidates.as_slice() {
        debug!(target_id = %only.target_id, "Single OOPIF candidate, attaching directly");
        let child = registry.get_or_attach(&only.target_id).await?;
        let child_tree = frame_tree(&child).await?;
        return Ok((
            child,
            child_tree.frame.id,
            child_tree.frame.url,
        ));
    }

    // Disambiguation: attach to each declared child and confirm ownership
    // of its root frame in the parent's DOM.
    if !candidates.is_empty() {
        let mut matched: Option<(Arc<TargetSession>, FrameTree)> = None;
        for candidate in &candidates {
            let Some((child, child_tree)) =
                attach_and_inspect(registry, &candidate.target_id).await?
            else {
                continue;
            };

            if owner_matches(parent, &child_tree.frame.id, owner_id).await? {
                if matched.is_some() {
                    return Err(Error::unresolved_frame(
                        "ambiguous ownership: multiple sibling sub-targets match the owner node",
                    ));
                }
                matched = Some((child, child_tree));
            }
        }
        if let Some((child, tree)) = matched {
            debug!(frame_id = %tree.frame.id, "OOPIF resolved by owner disambiguation");
            return Ok((child, tree.frame.id, tree.frame.url));
        }
    }

    // Exhaustive fallback: parent linkage told us nothing; scan every
    // frame-type sub-target and match by ownership first, parent-frame
    // linkage second.
    let mut owner_match: Option<(Arc<TargetSession>, FrameId, String)> = None;
    let mut parent_match: Option<(Arc<TargetSession>, FrameId, String)> = None;

    for info in targets.iter().filter(|t| t.is_frame_target()) {
        if &info.target_id == parent.target_id() {
            continue;
        }
        let Some((child, child_tree)) = attach_and_inspect(registry, &info.target_id).await?
        else {
            continue;
        };

        if owner_matches(parent, &child_tree.frame.id, owner_id).await? {
            if owner_match.is_some() {
                return Err(Error::unresolved_frame(
                    "ambiguous ownership: multiple sub-targets match the owner node",
                ));
            }
            owner_match = Some((
                Arc::clone(&child),
                child_tree.frame.id.clone(),
                child_tree.frame.url.clone(),
            ));
            continue;
        }

        if parent_match.is_none()
            && let Some(frame) = child_tree
                .iter()
                .find(|f| f.parent_id.as_ref() == Some(current_frame))
        {
            parent_match = Some((Arc::clone(&child), frame.id.clone(), frame.url.clone()));
        }
    }

    // Ownership confirmation is authoritative over linkage.
    if let Some(found) = owner_match {
        debug!(frame_id = %found.1, "OOPIF resolved by exhaustive ownership scan");
        return Ok(found);
    }
    if let Some(found) = parent_match {
        debug!(frame_id = %found.1, "OOPIF resolved by parent-frame linkage");
        return Ok(found);
    }

    Err(Error::unresolved_frame(format!(
        "exhausted sub-targets without a match for parent frame {current_frame}"
    )))
}

/// Attaches to a sub-target and fetches its frame tree.
///
/// Remote-side failures (the target died mid-scan) skip the candidate;
/// connection-level failures abort the whole resolution.
async fn attach_and_inspect(
    registry: &Arc<TargetRegistry>,
    target_id: &crate::identifiers::TargetId,
) -> Result<Option<(Arc<TargetSession>, FrameTree)>> {
    let child = match registry.get_or_attach(target_id).await {
        Ok(child) => child,
        Err(e) if e.is_connection_error() => return Err(e),
        Err(e) => {
            warn!(target_id = %target_id, error = %e, "Skipping unattachable sub-target");
            return Ok(None);
        }
    };

    match frame_tree(&child).await {
        Ok(tree) => Ok(Some((child, tree))),
        Err(e) if e.is_connection_error() => Err(e),
        Err(e) => {
            warn!(target_id = %target_id, error = %e, "Skipping sub-target without frame tree");
            Ok(None)
        }
    }
}

// ============================================================================
// Pipeline Steps
// ============================================================================

/// Step 1: node metadata for the owning element.
async fn describe_node(
    session: &Arc<TargetSession>,
    object_id: &RemoteObjectId,
) -> Result<NodeDescription> {
    let result = session
        .call(&DomCommand::DescribeNode {
            object_id: object_id.clone(),
        })
        .await?;
    extract(&result, "node")
}

/// Fetches a session's frame tree.
async fn frame_tree(session: &Arc<TargetSession>) -> Result<FrameTree> {
    let result = session.call(&PageCommand::GetFrameTree {}).await?;
    extract(&result, "frameTree")
}

/// Queries a frame's owning node and compares it to the expected identity.
///
/// A remote error (frames without owners, roots of the tree) counts as a
/// non-match; connection failures propagate.
async fn owner_matches(
    session: &Arc<TargetSession>,
    frame_id: &FrameId,
    expected: BackendNodeId,
) -> Result<bool> {
    let result = session
        .call(&DomCommand::GetFrameOwner {
            frame_id: frame_id.clone(),
        })
        .await;

    match result {
        Ok(value) => {
            let owner: BackendNodeId = extract(&value, "backendNodeId")?;
            Ok(owner == expected)
        }
        Err(e) if e.is_connection_error() => Err(e),
        Err(_) => Ok(false),
    }
}

/// Steps 4 and 5: isolate an execution context and anchor the document.
async fn complete(
    session: Arc<TargetSession>,
    frame_id: FrameId,
    document_url: Option<String>,
) -> Result<FrameContext> {
    let execution_context_id = create_isolated_world(&session, &frame_id).await?;
    let document_object_id =
        anchor_document(&session, &frame_id, execution_context_id).await?;

    debug!(
        frame_id = %frame_id,
        context_id = %execution_context_id,
        session_id = ?session.session_id(),
        "Frame context resolved"
    );

    Ok(FrameContext::new(
        frame_id,
        document_url,
        execution_context_id,
        document_object_id,
        session,
    ))
}

/// Step 4: fresh isolated world on the resolved frame.
///
/// The world shares the frame's DOM but not its global scope, so page
/// scripts cannot observe it; universal access lets it reach cross-origin
/// content inside the frame.
async fn create_isolated_world(
    session: &Arc<TargetSession>,
    frame_id: &FrameId,
) -> Result<ExecutionContextId> {
    let result = session
        .call(&PageCommand::CreateIsolatedWorld {
            frame_id: frame_id.clone(),
            world_name: next_world_name(),
            grant_universal_access: true,
        })
        .await;

    match result {
        Ok(value) => extract(&value, "executionContextId"),
        Err(Error::CommandFailed { .. }) => {
            Err(Error::context_creation_failed(frame_id.clone()))
        }
        Err(e) => Err(e),
    }
}

/// Step 5: stable handle to the frame's root document node.
async fn anchor_document(
    session: &Arc<TargetSession>,
    frame_id: &FrameId,
    context_id: ExecutionContextId,
) -> Result<RemoteObjectId> {
    let result = session
        .call(&RuntimeCommand::Evaluate {
            expression: "document".to_string(),
            context_id: Some(context_id),
        })
        .await;

    let value = match result {
        Ok(value) => value,
        Err(Error::CommandFailed { .. }) => {
            return Err(Error::document_anchor_failed(frame_id.clone()));
        }
        Err(e) => return Err(e),
    };

    let object: RemoteObject = extract(&value, "result")?;
    object
        .object_id
        .ok_or_else(|| Error::document_anchor_failed(frame_id.clone()))
}

// ============================================================================
// Tests
// ============================================================================
