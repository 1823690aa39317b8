//! Bounded worker pool for skill handlers

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Runs at most `capacity` tasks at once and rejects the rest immediately
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workers currently free
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn `task` on a free worker
    ///
    /// The task is dropped as soon as `cancel` fires, in which case the
    /// handle resolves to `None`. The worker is released when the task ends
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns `Error::WorkerPoolExhausted` without waiting if every worker
    /// is busy
    pub fn submit<F>(&self, cancel: CancellationToken, task: F) -> Result<JoinHandle<Option<F::Output>>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| Error::WorkerPoolExhausted {
                capacity: self.capacity,
            })?;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                output = task => Some(output),
            }
        }))
    }
}
