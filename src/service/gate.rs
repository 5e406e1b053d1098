//! Search admission control: a bounded queue counter in front of a shared
//! pool of concurrency slots. The queue counter applies to searches only;
//! background rebuild and flush borrow slots from the same pool without
//! counting against queue depth.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{RagError, Result, RETRY_AFTER_SECONDS};

pub struct SearchGate {
    queue_size: usize,
    pending: Arc<Mutex<usize>>,
    slots: Arc<Semaphore>,
}

/// Holds one queue slot and one concurrency slot for the duration of a
/// search. Dropping the guard releases both, including when the caller is
/// cancelled while still waiting for a slot.
#[derive(Debug)]
pub struct QueueGuard {
    _permit: OwnedSemaphorePermit,
    _ticket: QueueTicket,
}

#[derive(Debug)]
struct QueueTicket {
    pending: Arc<Mutex<usize>>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
    }
}

impl SearchGate {
    pub fn new(queue_size: usize, concurrency: usize) -> Self {
        Self {
            queue_size,
            pending: Arc::new(Mutex::new(0)),
            slots: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Admit a search: reject with `queue-full` when the pending counter is
    /// at capacity, then wait for a concurrency slot.
    pub async fn begin_queued(&self, ctx: &CancellationToken) -> Result<QueueGuard> {
        {
            let mut pending = self.pending.lock().unwrap();
            if *pending >= self.queue_size {
                return Err(RagError::QueueFull {
                    retry_after_seconds: RETRY_AFTER_SECONDS,
                });
            }
            *pending += 1;
        }
        let ticket = QueueTicket {
            pending: Arc::clone(&self.pending),
        };

        let permit = tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => {
                permit.expect("slot semaphore is never closed")
            }
            _ = ctx.cancelled() => {
                // `ticket` drops here and releases the queue slot.
                return Err(RagError::Cancelled);
            }
        };

        Ok(QueueGuard {
            _permit: permit,
            _ticket: ticket,
        })
    }

    /// Borrow a concurrency slot for heavyweight background work (rebuild,
    /// flush) without touching the search queue counter.
    pub async fn acquire_slot(&self, ctx: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => {
                Ok(permit.expect("slot semaphore is never closed"))
            }
            _ = ctx.cancelled() => Err(RagError::Cancelled),
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        *self.pending.lock().unwrap()
    }
}
