//! Outstanding-work accounting for lanes and published batches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rivulet_core::{Error, Result};
use tokio::sync::Notify;
use tracing::error;

/// Counts queued and running jobs; wakes waiters when the count hits zero.
#[derive(Default)]
pub(crate) struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    pub(crate) fn enter(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn leave(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.count.load(Ordering::SeqCst) == 0
    }

    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a leave() in between is not missed.
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Every job caused by one publish or action, including internal cascades
/// and refresh clears. Awaited batches keep the first error for the caller;
/// detached batches log theirs.
pub(crate) struct Batch {
    pending: Pending,
    error: Mutex<Option<Error>>,
    detached: bool,
}

impl Batch {
    pub(crate) fn awaited() -> Arc<Self> {
        Arc::new(Self {
            pending: Pending::default(),
            error: Mutex::new(None),
            detached: false,
        })
    }

    pub(crate) fn detached() -> Arc<Self> {
        Arc::new(Self {
            pending: Pending::default(),
            error: Mutex::new(None),
            detached: true,
        })
    }

    pub(crate) fn enter(&self) {
        self.pending.enter();
    }

    pub(crate) fn leave(&self, executor: &str, result: Result<()>) {
        if let Err(e) = result {
            if self.detached {
                error!(executor, error = %e, "Background processing failed");
            } else if let Ok(mut slot) = self.error.lock() {
                slot.get_or_insert(e);
            }
        }
        self.pending.leave();
    }

    /// Wait for every job of the batch, then surface the first failure.
    pub(crate) async fn wait(&self) -> Result<()> {
        self.pending.wait_idle().await;
        let first = self
            .error
            .lock()
            .map_err(|_| Error::Panicked("batch error slot poisoned".into()))?
            .take();
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_once_every_job_left() {
        let batch = Batch::awaited();
        batch.enter();
        batch.enter();

        let waiter = {
            let batch = batch.clone();
            tokio::spawn(async move { batch.wait().await })
        };
        batch.leave("test", Ok(()));
        batch.leave("test", Err(Error::Storage("disk".into())));

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn idle_counter_starts_idle() {
        let pending = Pending::default();
        assert!(pending.is_idle());
        pending.wait_idle().await;
    }
}
