//! Subscriber registry and lifecycle callbacks.
//!
//! Handlers are keyed by message kind, kept in registration order, and
//! isolated from one another: a panicking handler is caught and logged
//! without aborting dispatch to the rest or to wildcard subscribers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use tracing::{trace, warn};

use huntboard_protocol::{Envelope, WILDCARD};

pub(crate) type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handle returned by every registration API.
///
/// `unsubscribe` is idempotent; dropping the handle without calling it
/// leaves the registration in place.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Removes the registration. Further calls are no-ops.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(f) = cancel {
            f();
        }
    }
}

/// Typed-message subscriber registry.
///
/// The wildcard key [`WILDCARD`] receives every dispatched envelope after
/// the exact-kind handlers have run.
#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    by_kind: HashMap<String, Vec<(u64, MessageHandler)>>,
}

impl Registry {
    /// Registers a handler for a message kind, returning its id.
    pub(crate) fn add(&self, kind: &str, handler: MessageHandler) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .by_kind
            .entry(kind.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes a handler by kind and id. Safe to call repeatedly.
    pub(crate) fn remove(&self, kind: &str, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handlers) = inner.by_kind.get_mut(kind) {
            handlers.retain(|(h_id, _)| *h_id != id);
            if handlers.is_empty() {
                inner.by_kind.remove(kind);
            }
        }
    }

    /// Dispatches an envelope to exact-kind handlers in registration order,
    /// then to wildcard handlers with the full envelope.
    pub(crate) fn dispatch(&self, envelope: &Envelope) {
        let (exact, wildcard) = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let snapshot = |kind: &str| -> Vec<MessageHandler> {
                inner
                    .by_kind
                    .get(kind)
                    .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default()
            };
            (snapshot(&envelope.kind), snapshot(WILDCARD))
        };

        trace!(
            kind = %envelope.kind,
            exact = exact.len(),
            wildcard = wildcard.len(),
            "dispatching message"
        );

        for handler in exact.iter().chain(wildcard.iter()) {
            invoke_isolated(&envelope.kind, || handler(envelope));
        }
    }
}

/// Runs a subscriber callback, containing any panic to that one handler.
pub(crate) fn invoke_isolated(context: &str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(context = %context, "subscriber callback panicked; continuing dispatch");
    }
}

/// Ordered list of lifecycle callbacks (connect/disconnect/error).
pub(crate) struct CallbackList<F: ?Sized> {
    inner: Mutex<(u64, Vec<(u64, Arc<F>)>)>,
}

impl<F: ?Sized> Default for CallbackList<F> {
    fn default() -> Self {
        Self {
            inner: Mutex::new((0, Vec::new())),
        }
    }
}

impl<F: ?Sized> CallbackList<F> {
    pub(crate) fn add(&self, callback: Arc<F>) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.0;
        inner.0 += 1;
        inner.1.push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.1.retain(|(cb_id, _)| *cb_id != id);
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.1.iter().map(|(_, cb)| cb.clone()).collect()
    }
}
