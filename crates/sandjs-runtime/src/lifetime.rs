//! Tracking for guest-owned handles created outside the call/return frame.
//!
//! Host bridge functions hand out guest promises whose resolve/reject
//! functions must outlive the guest call that created them. Those handles are
//! parked here under an id and either taken back when the host settles the
//! promise, or dropped in bulk when the session tears down. Every entry is
//! disposed exactly once, and disposal must happen while the guest runtime is
//! still alive.

use std::collections::HashMap;

use parking_lot::Mutex;
use std::sync::Arc;

struct Inner<T> {
    next_id: u64,
    entries: HashMap<u64, T>,
    alive: bool,
}

/// Id-keyed arena of pending host-side handles.
///
/// Clones share the same registry; the session and the module loader each
/// hold one end.
pub struct LifetimeRegistry<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for LifetimeRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for LifetimeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LifetimeRegistry<T> {
    /// Create an empty, live registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                entries: HashMap::new(),
                alive: true,
            })),
        }
    }

    /// Park an entry and return its id, or `None` (dropping the entry) if
    /// the registry has already been disposed.
    pub fn register(&self, entry: T) -> Option<u64> {
        let mut inner = self.inner.lock();
        if !inner.alive {
            log::warn!("handle registered after lifetime registry disposal");
            return None;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(id, entry);
        Some(id)
    }

    /// Remove and return the entry for `id`, if still parked.
    pub fn take(&self, id: u64) -> Option<T> {
        self.inner.lock().entries.remove(&id)
    }

    /// Number of entries still parked.
    pub fn live(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Drain every remaining entry and mark the registry dead. Idempotent;
    /// later calls return nothing.
    pub fn dispose(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        inner.alive = false;
        inner.entries.drain().map(|(_, v)| v).collect()
    }
}
