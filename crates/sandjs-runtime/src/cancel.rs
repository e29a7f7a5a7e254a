//! Run-wide cancellation signal.
//!
//! One signal is shared by the budget checkpoints, the host bridge tasks,
//! and every step of result unpacking. Once raised it never resets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    notify: Notify,
}

/// Clonable one-shot cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    /// Create a fresh, un-raised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal, waking every pending [`CancelSignal::cancelled`].
    pub fn cancel(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is raised.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before re-checking the flag to avoid losing
            // a notify between the check and the await.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
