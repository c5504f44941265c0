//! # Disposable
//!
//! A one-shot release capability. Every registration in this crate hands back a
//! [`Disposable`]; releasing it undoes the registration. Releasing more than once
//! is a no-op.
//!
//! Dropping a `Disposable` does not release it. Ownership of the release is explicit
//! and stays with the caller that performed the registration.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    released: AtomicBool,
    release: Mutex<Option<ReleaseFn>>,
}

/// Handle that releases a registration exactly once.
///
/// Cloning shares the underlying release; disposing any clone disposes them all.
#[must_use = "dropping a Disposable does not release the registration"]
#[derive(Clone)]
pub struct Disposable {
    inner: Arc<Inner>,
}

impl Disposable {
    /// Wraps a release closure.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                released: AtomicBool::new(false),
                release: Mutex::new(Some(Box::new(release))),
            }),
        }
    }

    /// A disposable with nothing to release.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Combines several disposables; releasing the result releases each of them in order.
    pub fn from_all(disposables: Vec<Disposable>) -> Self {
        Self::new(move || {
            for disposable in disposables {
                disposable.dispose();
            }
        })
    }

    /// Releases the registration. Subsequent calls do nothing.
    pub fn dispose(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let release = match self.inner.release.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
