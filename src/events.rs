//! Event callback registry and fan-out.
//!
//! The receive loop hands every classified [`Event`] to an
//! [`EventDispatcher`], which fans it out to the callbacks registered for
//! that event name. Callbacks for one name fire in registration order;
//! across names there is no ordering guarantee.
//!
//! Asynchronous callbacks are spawned as independent tasks per invocation
//! (fire and forget, no backpressure), so one slow callback cannot delay
//! delivery to the others or stall the receive loop.
//! Synchronous callbacks run inline and must be short.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::identifiers::CallbackId;
use crate::protocol::Event;

// ============================================================================
// EventCallback
// ============================================================================

/// A callback invoked for each matching event.
pub enum EventCallback {
    /// Runs inline on the dispatching task.
    Sync(Box<dyn Fn(Event) + Send + Sync>),
    /// Spawned as a detached task per invocation.
    Async(Box<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>),
}

impl EventCallback {
    /// Wraps a synchronous closure.
    pub fn sync<F>(callback: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        Self::Sync(Box::new(callback))
    }

    /// Wraps a future-producing closure.
    pub fn spawned<F>(callback: F) -> Self
    where
        F: Fn(Event) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self::Async(Box::new(callback))
    }
}

// ============================================================================
// Registration
// ============================================================================

/// One entry in the callback registry.
struct Registration {
    /// Handle returned to the registrant.
    id: CallbackId,
    /// The callback, shared so dispatch can run outside the lock.
    callback: Arc<EventCallback>,
    /// Removed after its first dispatch when set.
    temporary: bool,
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// Registry of `event name -> callbacks` with ordered fan-out.
///
/// Shared between the receive loop (dispatch side) and API consumers
/// (registration side). All operations are non-blocking; the registry lock
/// is never held across an `.await` or a callback invocation.
pub struct EventDispatcher {
    /// Callbacks keyed by event name, in registration order.
    registrations: Mutex<FxHashMap<String, Vec<Registration>>>,
    /// Reverse index for O(1) unregistration.
    index: Mutex<FxHashMap<CallbackId, String>>,
    /// Callback ID allocator.
    next_id: AtomicU64,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: Mutex::new(FxHashMap::default()),
            index: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a callback for an event name.
    ///
    /// A `temporary` registration fires at most once and removes itself.
    /// Returns a handle usable with [`unregister`](Self::unregister).
    pub fn register(
        &self,
        event_name: impl Into<String>,
        callback: EventCallback,
        temporary: bool,
    ) -> CallbackId {
        let event_name = event_name.into();
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.registrations
            .lock()
            .entry(event_name.clone())
            .or_default()
            .push(Registration {
                id,
                callback: Arc::new(callback),
                temporary,
            });
        self.index.lock().insert(id, event_name.clone());

        debug!(%id, event = %event_name, temporary, "Registered event callback");
        id
    }

    /// Removes a registration.
    ///
    /// A no-op for unknown handles, including temporaries that already
    /// removed themselves.
    pub fn unregister(&self, id: CallbackId) {
        let Some(event_name) = self.index.lock().remove(&id) else {
            return;
        };

        let mut registrations = self.registrations.lock();
        if let Some(entries) = registrations.get_mut(&event_name) {
            entries.retain(|r| r.id != id);
            if entries.is_empty() {
                registrations.remove(&event_name);
            }
        }

        debug!(%id, event = %event_name, "Unregistered event callback");
    }

    /// Returns the number of live registrations for an event name.
    #[must_use]
    pub fn callback_count(&self, event_name: &str) -> usize {
        self.registrations
            .lock()
            .get(event_name)
            .map_or(0, Vec::len)
    }

    /// Fans an event out to its registered callbacks.
    ///
    /// Temporary registrations are removed in the same critical section
    /// that snapshots the dispatch list, so a temporary fires at most once
    /// even when the same event is dispatched concurrently. Zero
    /// registrations is a no-op.
    pub fn dispatch(&self, event: &Event) {
        // Snapshot under the lock, invoke outside it.
        let callbacks: Vec<Arc<EventCallback>> = {
            let mut registrations = self.registrations.lock();
            let Some(entries) = registrations.get_mut(&event.method) else {
                trace!(method = %event.method, "Event with no registrations");
                return;
            };

            let snapshot: Vec<_> = entries.iter().map(|r| Arc::clone(&r.callback)).collect();

            let fired_temporaries: Vec<_> = entries
                .iter()
                .filter(|r| r.temporary)
                .map(|r| r.id)
                .collect();
            entries.retain(|r| !r.temporary);
            if entries.is_empty() {
                registrations.remove(&event.method);
            }

            if !fired_temporaries.is_empty() {
                let mut index = self.index.lock();
                for id in &fired_temporaries {
                    index.remove(id);
                }
            }

            snapshot
        };

        trace!(method = %event.method, count = callbacks.len(), "Dispatching event");

        for callback in callbacks {
            match &*callback {
                EventCallback::Sync(f) => f(event.clone()),
                EventCallback::Async(f) => {
                    let future = f(event.clone());
                    tokio::spawn(future);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    fn event(method: &str) -> Event {
        Event {
            method: method.to_string(),
            params: json!({}),
            session_id: None,
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            dispatcher.register(
                "Page.loadEventFired",
                EventCallback::sync(move |_| order.lock().push(label)),
                false,
            );
        }

        dispatcher.dispatch(&event("Page.loadEventFired"));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_temporary_fires_exactly_once() {
        let dispatcher = EventDispatcher::new();
        let temp_count = Arc::new(AtomicUsize::new(0));
        let perm_count = Arc::new(AtomicUsize::new(0));

        {
            let temp_count = Arc::clone(&temp_count);
            dispatcher.register(
                "DOM.documentUpdated",
                EventCallback::sync(move |_| {
                    temp_count.fetch_add(1, Ordering::SeqCst);
                }),
                true,
            );
        }
        {
            let perm_count = Arc::clone(&perm_count);
            dispatcher.register(
                "DOM.documentUpdated",
                EventCallback::sync(move |_| {
                    perm_count.fetch_add(1, Ordering::SeqCst);
                }),
                false,
            );
        }

        dispatcher.dispatch(&event("DOM.documentUpdated"));
        dispatcher.dispatch(&event("DOM.documentUpdated"));

        assert_eq!(temp_count.load(Ordering::SeqCst), 1);
        assert_eq!(perm_count.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.callback_count("DOM.documentUpdated"), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let id = dispatcher.register("Network.requestWillBeSent", EventCallback::sync(|_| {}), true);

        dispatcher.dispatch(&event("Network.requestWillBeSent"));
        assert_eq!(dispatcher.callback_count("Network.requestWillBeSent"), 0);

        // Temporary already removed itself; both calls are no-ops.
        dispatcher.unregister(id);
        dispatcher.unregister(id);
    }

    #[test]
    fn test_dispatch_with_no_registrations_is_noop() {
        let dispatcher = EventDispatcher::new();
        dispatcher.dispatch(&event("Page.frameNavigated"));
    }

    #[test]
    fn test_unregister_removes_only_target() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let keep = {
            let hits = Arc::clone(&hits);
            dispatcher.register(
                "Page.loadEventFired",
                EventCallback::sync(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
                false,
            )
        };
        let drop_me = dispatcher.register("Page.loadEventFired", EventCallback::sync(|_| {}), false);

        dispatcher.unregister(drop_me);
        dispatcher.dispatch(&event("Page.loadEventFired"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        dispatcher.unregister(keep);
        assert_eq!(dispatcher.callback_count("Page.loadEventFired"), 0);
    }

    #[tokio::test]
    async fn test_slow_async_callback_does_not_block_fast_one() {
        use tokio::sync::oneshot;
        use tokio::time::{Duration, sleep};

        let dispatcher = EventDispatcher::new();
        let (fast_tx, fast_rx) = oneshot::channel::<()>();
        let fast_tx = Arc::new(Mutex::new(Some(fast_tx)));

        dispatcher.register(
            "Runtime.consoleAPICalled",
            EventCallback::spawned(|_| {
                Box::pin(async {
                    // Never completes within the test window.
                    sleep(Duration::from_secs(60)).await;
                })
            }),
            false,
        );
        dispatcher.register(
            "Runtime.consoleAPICalled",
            EventCallback::spawned(move |_| {
                let fast_tx = Arc::clone(&fast_tx);
                Box::pin(async move {
                    if let Some(tx) = fast_tx.lock().take() {
                        let _ = tx.send(());
                    }
                })
            }),
            false,
        );

        dispatcher.dispatch(&event("Runtime.consoleAPICalled"));

        tokio::time::timeout(Duration::from_secs(1), fast_rx)
            .await
            .expect("fast callback should complete without waiting on the slow one")
            .expect("sender kept");
    }
}
