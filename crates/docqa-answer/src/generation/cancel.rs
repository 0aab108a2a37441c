use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and an in-flight
/// generation. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.cancelled.store(true, Ordering::Relaxed); }

    pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Relaxed) }
}
