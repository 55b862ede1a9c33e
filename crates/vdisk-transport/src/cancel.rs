use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token threaded through every blocking proxy call.
///
/// Replaces the ambient kernel cancel-event pointer of the original driver
/// with an explicit, cloneable handle: the upstream consumer holds one end
/// and signals it; the transport checks it at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
