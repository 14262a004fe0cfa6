//! Process-wide cap on concurrent external model calls.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::CompletionError;

/// A fixed-capacity semaphore shared by every caller of the completion
/// model. Clones share the same permits.
///
/// The permit is released when it is dropped, so every exit path
/// (success, error, timeout, cancellation) gives it back.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, CompletionError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CompletionError::Unavailable("rate limiter closed".into()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
