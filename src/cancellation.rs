//! # Cancellation
//!
//! Cooperative cancellation for long-running lifecycle operations.
//!
//! A [`CancellationTokenSource`] owns exactly one [`CancellationToken`]. Signalling the
//! source is idempotent and irreversible. Sources are created through the
//! [`CancellationTokenRegistry`] and addressed by a numeric handle, so UI commands can
//! refer to them across the control channel.
//!
//! Cancellation is advisory: nothing here interrupts running work. Operations observe
//! the token (poll [`CancellationToken::is_cancelled`], await
//! [`CancellationToken::cancelled`], or register a listener) and wind down on their own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::disposable::Disposable;

type Listener = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    pending: Vec<(u64, Listener)>,
}

/// Observable side of a cancellation source.
#[derive(Clone)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
    listeners: Arc<Mutex<Listeners>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            inner: tokio_util::sync::CancellationToken::new(),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    /// A token nobody can cancel. Used when a caller supplies no handle.
    pub fn none() -> Self {
        Self::new()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// Registers a callback fired exactly once on cancellation.
    ///
    /// Fires immediately when the token is already cancelled. Disposing the returned
    /// handle before cancellation unregisters the callback.
    pub fn on_cancellation<F>(&self, listener: F) -> Disposable
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = lock(&self.listeners);
        if self.inner.is_cancelled() {
            drop(guard);
            listener();
            return Disposable::noop();
        }
        let id = guard.next_id;
        guard.next_id += 1;
        guard.pending.push((id, Box::new(listener)));
        drop(guard);

        let listeners = self.listeners.clone();
        Disposable::new(move || {
            lock(&listeners).pending.retain(|(lid, _)| *lid != id);
        })
    }

    fn cancel(&self) -> bool {
        let fired = {
            let mut guard = lock(&self.listeners);
            if self.inner.is_cancelled() {
                return false;
            }
            self.inner.cancel();
            std::mem::take(&mut guard.pending)
        };
        for (_, listener) in fired {
            listener();
        }
        true
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn lock(listeners: &Mutex<Listeners>) -> std::sync::MutexGuard<'_, Listeners> {
    match listeners.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owner of a token; the only party able to signal it.
#[derive(Clone)]
pub struct CancellationTokenSource {
    id: u64,
    token: CancellationToken,
    sources: Arc<DashMap<u64, CancellationTokenSource>>,
}

impl CancellationTokenSource {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signals the token. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        if self.token.cancel() {
            debug!(token_id = self.id, "cancellation requested");
        } else {
            trace!(token_id = self.id, "token already cancelled");
        }
    }

    /// Removes the source from its registry, cancelling first when `propagate_cancel` is set.
    pub fn dispose(&self, propagate_cancel: bool) {
        if propagate_cancel {
            self.cancel();
        }
        if self.sources.remove(&self.id).is_some() {
            trace!(token_id = self.id, "cancellation source disposed");
        }
    }
}

impl fmt::Debug for CancellationTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationTokenSource")
            .field("id", &self.id)
            .field("token", &self.token)
            .finish()
    }
}

/// Numeric-handle registry of live cancellation sources.
pub struct CancellationTokenRegistry {
    next_id: AtomicU64,
    sources: Arc<DashMap<u64, CancellationTokenSource>>,
}

impl Default for CancellationTokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationTokenRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sources: Arc::new(DashMap::new()),
        }
    }

    /// Creates a source and returns its handle.
    pub fn create(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let source = CancellationTokenSource {
            id,
            token: CancellationToken::new(),
            sources: self.sources.clone(),
        };
        self.sources.insert(id, source);
        debug!(token_id = id, "cancellation source created");
        id
    }

    pub fn get(&self, id: u64) -> Option<CancellationTokenSource> {
        self.sources.get(&id).map(|entry| entry.value().clone())
    }

    pub fn has(&self, id: u64) -> bool {
        self.sources.contains_key(&id)
    }

    /// Token for a handle, or a never-cancelled token when the handle is absent or unknown.
    /// An unknown handle is logged: the operation it was meant for cannot be cancelled.
    pub fn token_or_none(&self, id: Option<u64>) -> CancellationToken {
        let Some(id) = id else {
            return CancellationToken::none();
        };
        match self.get(id) {
            Some(source) => source.token(),
            None => {
                warn!(token_id = id, "unknown cancellation token, operation runs without cancellation");
                CancellationToken::none()
            }
        }
    }

    /// Cancels the source behind `id`. Returns `false` when the handle is unknown.
    pub fn cancel(&self, id: u64) -> bool {
        match self.get(id) {
            Some(source) => {
                source.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_cancel_twice_is_noop() {
        let registry = CancellationTokenRegistry::new();
        let id = registry.create();
        let source = registry.get(id).unwrap();

        source.cancel();
        source.cancel();

        assert!(source.token().is_cancelled());
    }

    #[test]
    fn test_listener_fires_exactly_once() {
        let registry = CancellationTokenRegistry::new();
        let source = registry.get(registry.create()).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _listener = source.token().on_cancellation(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.cancel();
        source.cancel();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_on_cancelled_token_fires_immediately() {
        let registry = CancellationTokenRegistry::new();
        let source = registry.get(registry.create()).unwrap();
        source.cancel();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _listener = source.token().on_cancellation(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposed_listener_is_not_fired() {
        let registry = CancellationTokenRegistry::new();
        let source = registry.get(registry.create()).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let listener = source.token().on_cancellation(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listener.dispose();
        source.cancel();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispose_removes_source() {
        let registry = CancellationTokenRegistry::new();
        let id = registry.create();
        let source = registry.get(id).unwrap();

        source.dispose(false);

        assert!(registry.get(id).is_none());
        assert!(!source.token().is_cancelled());
    }

    #[test]
    fn test_dispose_with_propagation_cancels() {
        let registry = CancellationTokenRegistry::new();
        let id = registry.create();
        let token = registry.get(id).unwrap().token();

        registry.get(id).unwrap().dispose(true);

        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_handle() {
        let registry = CancellationTokenRegistry::new();
        assert!(!registry.cancel(42));
        assert!(!registry.token_or_none(Some(42)).is_cancelled());
        assert!(registry.get(42).is_none());
    }

    #[test]
    fn test_disposed_handle_yields_inert_token() {
        let registry = CancellationTokenRegistry::new();
        let id = registry.create();
        let live = registry.token_or_none(Some(id));
        registry.get(id).unwrap().dispose(false);

        let stale = registry.token_or_none(Some(id));
        assert!(!registry.cancel(id));
        assert!(!stale.is_cancelled());
        assert!(!live.is_cancelled());
        assert!(!registry.token_or_none(None).is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let registry = CancellationTokenRegistry::new();
        let id = registry.create();
        let token = registry.token_or_none(Some(id));

        let waiter = tokio::spawn(async move { token.cancelled().await });
        registry.cancel(id);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("token was not observed as cancelled")
            .unwrap();
    }
}
