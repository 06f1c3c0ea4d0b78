//! Cooperative cancellation for in-flight investigations.
//!
//! A [`CancelToken`] is a cheap clonable flag shared between the caller and
//! the engine. The orchestrator and agent check it before every suspension
//! point (LLM call, tool execution, approval request) and stop with a
//! partial result when it has been raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clonable cancellation flag.
///
/// Cloning is shallow: all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
