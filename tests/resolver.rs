//! Frame-resolution pipeline against scripted browser topologies.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::sleep;

use chromium_cdp::{
    Client, Error, ExecutionContextId, FrameId, Page, SessionId, TargetId, TargetRegistry,
};
use common::{FrameLog, MockEndpoint, connect, event, frame_log, frames_with_method, response};

fn session_of(frame: &Value) -> &str {
    frame.get("sessionId").and_then(|s| s.as_str()).unwrap_or("")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

/// Single page target whose iframe content document is same-process:
/// `DOM.describeNode` reports the frame id directly.
fn same_process_browser(log: FrameLog) -> impl FnMut(&Value) -> Vec<Value> + Send + 'static {
    move |frame| {
        log.lock().push(frame.clone());
        let id = frame["id"].as_u64().expect("command id");
        let params = &frame["params"];
        match frame["method"].as_str().expect("method") {
            "Target.attachToTarget" => vec![response(id, json!({ "sessionId": "SESS-ROOT" }))],
            "Runtime.evaluate" if params.get("contextId").is_none() => {
                vec![response(id, json!({ "result": { "objectId": "doc-root" } }))]
            }
            "Runtime.evaluate" => {
                vec![response(id, json!({ "result": { "objectId": "frame-doc" } }))]
            }
            "Runtime.callFunctionOn" => {
                vec![response(id, json!({ "result": { "objectId": "iframe-el" } }))]
            }
            "DOM.describeNode" => vec![response(
                id,
                json!({ "node": {
                    "backendNodeId": 7,
                    "frameId": "F-CHILD",
                    "documentURL": "https://inner.test/"
                } }),
            )],
            "Page.createIsolatedWorld" => {
                vec![response(id, json!({ "executionContextId": 42 }))]
            }
            _ => vec![response(id, json!({}))],
        }
    }
}

#[tokio::test]
async fn same_process_frame_takes_the_short_path() -> anyhow::Result<()> {
    let log = frame_log();
    let endpoint = MockEndpoint::spawn(same_process_browser(Arc::clone(&log))).await?;
    let (connection, _dispatcher) = connect(&endpoint).await?;
    let client = Client::from_connection(connection);

    let page = client.attach_page(&TargetId::new("T1")).await?;
    let iframe = page
        .query_selector("#payframe")
        .await?
        .expect("iframe found");

    let context = iframe.ensure_frame_context().await?;

    assert_eq!(context.frame_id(), &FrameId::new("F-CHILD"));
    assert_eq!(context.execution_context_id(), ExecutionContextId(42));
    assert_eq!(context.document_url(), Some("https://inner.test/"));
    assert!(Arc::ptr_eq(context.session(), page.session()));

    // Same-process resolution never consults the target list or the tree.
    assert!(frames_with_method(&log, "Target.getTargets").is_empty());
    assert!(frames_with_method(&log, "Page.getFrameTree").is_empty());

    // Isolation parameters, including the protocol's misspelled grant flag.
    let worlds = frames_with_method(&log, "Page.createIsolatedWorld");
    assert_eq!(worlds.len(), 1);
    assert_eq!(worlds[0]["params"]["frameId"], "F-CHILD");
    assert_eq!(worlds[0]["params"]["grantUniveralAccess"], true);
    assert!(
        worlds[0]["params"]["worldName"]
            .as_str()
            .expect("world name")
            .starts_with("__cdp_isolated_")
    );

    // Session consistency: everything after the attach rode SESS-ROOT.
    for frame in log.lock().iter() {
        if frame["method"] != "Target.attachToTarget" {
            assert_eq!(frame["sessionId"], "SESS-ROOT", "frame: {frame}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn repeat_resolution_reads_the_cache() -> anyhow::Result<()> {
    let log = frame_log();
    let endpoint = MockEndpoint::spawn(same_process_browser(Arc::clone(&log))).await?;
    let (connection, _dispatcher) = connect(&endpoint).await?;
    let client = Client::from_connection(connection);

    let page = client.attach_page(&TargetId::new("T1")).await?;
    let iframe = page.query_selector("#payframe").await?.expect("iframe");

    assert!(iframe.frame_context().is_none());

    // Concurrent first access shares one pipeline run.
    let (a, b) = tokio::join!(iframe.ensure_frame_context(), iframe.ensure_frame_context());
    let (a, b) = (a?, b?);
    assert!(Arc::ptr_eq(&a, &b));

    let describes = frames_with_method(&log, "DOM.describeNode").len();
    let worlds = frames_with_method(&log, "Page.createIsolatedWorld").len();
    assert_eq!((describes, worlds), (1, 1));

    // A later call is a pure cache read: no new wire traffic.
    let again = iframe.ensure_frame_context().await?;
    assert!(Arc::ptr_eq(&a, &again));
    assert_eq!(frames_with_method(&log, "DOM.describeNode").len(), describes);
    Ok(())
}

/// Root page plus two sibling out-of-process iframe targets, both declaring
/// the root frame as parent. Ownership of backend node 7 belongs to T-B.
fn sibling_oopif_browser(
    log: FrameLog,
    owner_of_a: u64,
    owner_of_b: u64,
) -> impl FnMut(&Value) -> Vec<Value> + Send + 'static {
    move |frame| {
        log.lock().push(frame.clone());
        let id = frame["id"].as_u64().expect("command id");
        let session = session_of(frame).to_string();
        let params = frame["params"].clone();
        match frame["method"].as_str().expect("method") {
            "Target.attachToTarget" => {
                let session = match params["targetId"].as_str().expect("targetId") {
                    "T-ROOT" => "SESS-ROOT",
                    "T-A" => "SESS-A",
                    "T-B" => "SESS-B",
                    other => panic!("unexpected attach to {other}"),
                };
                vec![response(id, json!({ "sessionId": session }))]
            }
            "Runtime.evaluate" if params.get("contextId").is_none() => {
                vec![response(id, json!({ "result": { "objectId": "doc-root" } }))]
            }
            "Runtime.evaluate" => {
                vec![response(id, json!({ "result": { "objectId": format!("anchored-{session}") } }))]
            }
            "Runtime.callFunctionOn" => {
                let object = if session == "SESS-B" { "btn-1" } else { "iframe-el" };
                vec![response(id, json!({ "result": { "objectId": object } }))]
            }
            // Out-of-process content document: no frame id here.
            "DOM.describeNode" => vec![response(id, json!({ "node": { "backendNodeId": 7 } }))],
            "Page.getFrameTree" => {
                let root = match session.as_str() {
                    "SESS-ROOT" => "F-ROOT",
                    "SESS-A" => "F-A",
                    "SESS-B" => "F-B",
                    other => panic!("frame tree on unknown session {other}"),
                };
                vec![response(
                    id,
                    json!({ "frameTree": { "frame": {
                        "id": root,
                        "url": format!("https://{root}.test/")
                    } } }),
                )]
            }
            "Target.getTargets" => vec![response(
                id,
                json!({ "targetInfos": [
                    { "targetId": "T-ROOT", "type": "page",
                      "url": "https://root.test/", "attached": true },
                    { "targetId": "T-A", "type": "iframe",
                      "url": "https://a.test/", "attached": false,
                      "parentFrameId": "F-ROOT" },
                    { "targetId": "T-B", "type": "iframe",
                      "url": "https://b.test/", "attached": false,
                      "parentFrameId": "F-ROOT" },
                ] }),
            )],
            "DOM.getFrameOwner" => {
                let owner = match params["frameId"].as_str().expect("frameId") {
                    "F-A" => owner_of_a,
                    "F-B" => owner_of_b,
                    other => panic!("owner query for unknown frame {other}"),
                };
                vec![response(id, json!({ "backendNodeId": owner }))]
            }
            "Page.createIsolatedWorld" => {
                vec![response(id, json!({ "executionContextId": 77 }))]
            }
            _ => vec![response(id, json!({}))],
        }
    }
}

#[tokio::test]
async fn sibling_oopifs_disambiguate_by_owner_node() -> anyhow::Result<()> {
    let log = frame_log();
    let endpoint =
        MockEndpoint::spawn(sibling_oopif_browser(Arc::clone(&log), 3, 7)).await?;
    let (connection, _dispatcher) = connect(&endpoint).await?;
    let client = Client::from_connection(connection);

    let page = client.attach_page(&TargetId::new("T-ROOT")).await?;
    let iframe = page.query_selector("#payframe").await?.expect("iframe");

    let context = iframe.ensure_frame_context().await?;

    // The context pins everything to the owning sibling's session.
    assert_eq!(context.frame_id(), &FrameId::new("F-B"));
    assert_eq!(context.session().session_id(), Some(&SessionId::new("SESS-B")));
    assert_eq!(context.execution_context_id(), ExecutionContextId(77));

    // Ownership was confirmed against the parent's DOM, once per sibling.
    let owner_queries = frames_with_method(&log, "DOM.getFrameOwner");
    assert_eq!(owner_queries.len(), 2);
    for query in &owner_queries {
        assert_eq!(query["sessionId"], "SESS-ROOT");
    }

    // One root tree fetch serves both the current-frame lookup and the
    // owner walk.
    let root_trees: Vec<_> = frames_with_method(&log, "Page.getFrameTree")
        .into_iter()
        .filter(|f| f["sessionId"] == "SESS-ROOT")
        .collect();
    assert_eq!(root_trees.len(), 1);

    // Both siblings were attached during disambiguation.
    assert_eq!(frames_with_method(&log, "Target.attachToTarget").len(), 3);
    assert_eq!(client.targets().len(), 3);

    // Isolation and anchoring happened on the resolved child session.
    let worlds = frames_with_method(&log, "Page.createIsolatedWorld");
    assert_eq!(worlds.len(), 1);
    assert_eq!(worlds[0]["sessionId"], "SESS-B");

    // Finds inside the frame route through the resolved context.
    let button = iframe
        .query_selector_in_frame("button")
        .await?
        .expect("button found");
    let child_context = button.routing().frame_context().expect("frame-relative");
    assert!(Arc::ptr_eq(child_context, &context));

    let in_frame_calls: Vec<_> = frames_with_method(&log, "Runtime.callFunctionOn")
        .into_iter()
        .filter(|f| f["sessionId"] == "SESS-B")
        .collect();
    assert_eq!(in_frame_calls.len(), 1);
    assert_eq!(in_frame_calls[0]["params"]["objectId"], "anchored-SESS-B");
    Ok(())
}

#[tokio::test]
async fn ambiguous_ownership_is_an_error() -> anyhow::Result<()> {
    // Both siblings claim the owner node: resolution must refuse to guess.
    let log = frame_log();
    let endpoint =
        MockEndpoint::spawn(sibling_oopif_browser(Arc::clone(&log), 7, 7)).await?;
    let (connection, _dispatcher) = connect(&endpoint).await?;
    let client = Client::from_connection(connection);

    let page = client.attach_page(&TargetId::new("T-ROOT")).await?;
    let iframe = page.query_selector("#payframe").await?.expect("iframe");

    let err = iframe.ensure_frame_context().await.unwrap_err();
    assert!(matches!(err, Error::UnresolvedFrame { .. }));
    assert!(err.is_resolution_error());

    // The failure is not cached: the next attempt re-runs the pipeline.
    let before = frames_with_method(&log, "DOM.describeNode").len();
    let _ = iframe.ensure_frame_context().await.unwrap_err();
    assert_eq!(frames_with_method(&log, "DOM.describeNode").len(), before + 1);
    Ok(())
}

#[tokio::test]
async fn single_declared_child_attaches_without_owner_queries() -> anyhow::Result<()> {
    let log = frame_log();
    let endpoint = MockEndpoint::spawn({
        let log = Arc::clone(&log);
        move |frame| {
            log.lock().push(frame.clone());
            let id = frame["id"].as_u64().expect("command id");
            let session = session_of(frame).to_string();
            let params = frame["params"].clone();
            match frame["method"].as_str().expect("method") {
                "Target.attachToTarget" => {
                    let session = match params["targetId"].as_str().expect("targetId") {
                        "T-ROOT" => "SESS-ROOT",
                        "T-ONLY" => "SESS-ONLY",
                        other => panic!("unexpected attach to {other}"),
                    };
                    vec![response(id, json!({ "sessionId": session }))]
                }
                "Runtime.evaluate" if params.get("contextId").is_none() => {
                    vec![response(id, json!({ "result": { "objectId": "doc-root" } }))]
                }
                "Runtime.evaluate" => {
                    vec![response(id, json!({ "result": { "objectId": "anchored" } }))]
                }
                "Runtime.callFunctionOn" => {
                    vec![response(id, json!({ "result": { "objectId": "iframe-el" } }))]
                }
                "DOM.describeNode" => {
                    vec![response(id, json!({ "node": { "backendNodeId": 7 } }))]
                }
                "Page.getFrameTree" => {
                    let root = if session == "SESS-ONLY" { "F-ONLY" } else { "F-ROOT" };
                    vec![response(
                        id,
                        json!({ "frameTree": { "frame": {
                            "id": root,
                            "url": format!("https://{root}.test/")
                        } } }),
                    )]
                }
                "Target.getTargets" => vec![response(
                    id,
                    json!({ "targetInfos": [
                        { "targetId": "T-ROOT", "type": "page",
                          "url": "https://root.test/", "attached": true },
                        { "targetId": "T-ONLY", "type": "iframe",
                          "url": "https://only.test/", "attached": false,
                          "parentFrameId": "F-ROOT" },
                    ] }),
                )],
                "Page.createIsolatedWorld" => {
                    vec![response(id, json!({ "executionContextId": 11 }))]
                }
                _ => vec![response(id, json!({}))],
            }
        }
    })
    .await?;
    let (connection, _dispatcher) = connect(&endpoint).await?;
    let client = Client::from_connection(connection);

    let page = client.attach_page(&TargetId::new("T-ROOT")).await?;
    let iframe = page.query_selector("#payframe").await?.expect("iframe");

    let context = iframe.ensure_frame_context().await?;

    assert_eq!(context.frame_id(), &FrameId::new("F-ONLY"));
    assert_eq!(context.session().session_id(), Some(&SessionId::new("SESS-ONLY")));

    // One declared child needs no ownership confirmation.
    assert!(frames_with_method(&log, "DOM.getFrameOwner").is_empty());
    Ok(())
}

#[tokio::test]
async fn dedicated_connection_routes_without_session_ids() -> anyhow::Result<()> {
    // Browser endpoint backing the registry; nothing should reach it.
    let browser_log = frame_log();
    let browser = MockEndpoint::spawn({
        let log = Arc::clone(&browser_log);
        move |frame| {
            log.lock().push(frame.clone());
            let id = frame["id"].as_u64().expect("command id");
            vec![response(id, json!({}))]
        }
    })
    .await?;
    let (browser_connection, _dispatcher) = connect(&browser).await?;
    let registry = Arc::new(TargetRegistry::new(browser_connection));

    // The target owns its own endpoint; no session multiplexing.
    let log = frame_log();
    let endpoint = MockEndpoint::spawn({
        let log = Arc::clone(&log);
        move |frame| {
            log.lock().push(frame.clone());
            let id = frame["id"].as_u64().expect("command id");
            let params = &frame["params"];
            match frame["method"].as_str().expect("method") {
                "Runtime.evaluate" if params.get("contextId").is_none() => {
                    vec![response(id, json!({ "result": { "objectId": "doc-root" } }))]
                }
                "Runtime.evaluate" => {
                    vec![response(id, json!({ "result": { "objectId": "frame-doc" } }))]
                }
                "Runtime.callFunctionOn" => {
                    vec![response(id, json!({ "result": { "objectId": "iframe-el" } }))]
                }
                "DOM.describeNode" => vec![response(
                    id,
                    json!({ "node": { "backendNodeId": 7, "frameId": "F-CHILD" } }),
                )],
                "Page.createIsolatedWorld" => {
                    vec![response(id, json!({ "executionContextId": 21 }))]
                }
                _ => vec![response(id, json!({}))],
            }
        }
    })
    .await?;
    let (page_connection, _page_dispatcher) = connect(&endpoint).await?;

    let session = registry.insert_dedicated(TargetId::new("T-DEDICATED"), page_connection);
    assert!(session.session_id().is_none());

    let page = Page::new(session, Arc::clone(&registry));
    let iframe = page.query_selector("#payframe").await?.expect("iframe");
    let context = iframe.ensure_frame_context().await?;

    assert_eq!(context.frame_id(), &FrameId::new("F-CHILD"));
    assert_eq!(context.execution_context_id(), ExecutionContextId(21));
    assert!(context.session().session_id().is_none());
    assert!(Arc::ptr_eq(context.session(), page.session()));

    // Dedicated transport: no outgoing frame ever carries a sessionId.
    for frame in log.lock().iter() {
        assert!(frame.get("sessionId").is_none(), "frame: {frame}");
    }
    // And nothing leaked onto the browser connection.
    assert!(browser_log.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn torn_down_target_makes_the_context_stale() -> anyhow::Result<()> {
    let log = frame_log();
    let endpoint = MockEndpoint::spawn(same_process_browser(Arc::clone(&log))).await?;
    let (connection, _dispatcher) = connect(&endpoint).await?;
    let client = Client::from_connection(connection);

    let target = TargetId::new("T1");
    let page = client.attach_page(&target).await?;
    let iframe = page.query_selector("#payframe").await?.expect("iframe");
    let context = iframe.ensure_frame_context().await?;
    assert!(!context.is_stale());

    endpoint.inject(event(
        "Target.targetDestroyed",
        json!({ "targetId": "T1" }),
        None,
    ));
    wait_until(|| context.is_stale()).await;

    let err = context
        .execute("Runtime.evaluate", json!({ "expression": "1" }))
        .await
        .unwrap_err();
    match err {
        Error::StaleFrameContext { target_id } => assert_eq!(target_id, TargetId::new("T1")),
        other => panic!("expected StaleFrameContext, got {other:?}"),
    }

    // Elements holding the context fail the same way; nothing reroutes.
    let err = iframe
        .query_selector_in_frame("button")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StaleFrameContext { .. }));
    Ok(())
}
