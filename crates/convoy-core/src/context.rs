//! Cooperative cancellation for long-running searches and background work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cooperative-cancellation token backed by an [`AtomicBool`].
///
/// Clones share the same flag, so a token handed to a worker thread can be
/// cancelled from the consuming context.
#[derive(Clone, Debug)]
pub struct CancelToken {
    done: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// Request cancellation.
    #[inline]
    pub fn cancel(&self) {
        self.done.store(true, Ordering::Relaxed);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
