use std::sync::{atomic::{AtomicUsize, Ordering}, Arc};

use alyx_base::AlyxError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A concurrency cap with a bounded queue (§4.E): up to `concurrency`
/// invocations run at once, up to `queue_capacity` more wait; beyond that,
/// `acquire` fails immediately with BACKPRESSURE instead of growing the
/// queue further.
pub struct BoundedConcurrency {
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    queue_capacity: usize,
}

impl BoundedConcurrency {
    pub fn new(concurrency: usize, queue_capacity: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(concurrency.max(1))), queued: AtomicUsize::new(0), queue_capacity }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AlyxError> {
        let prior = self.queued.fetch_add(1, Ordering::SeqCst);
        if prior >= self.queue_capacity {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(AlyxError::backpressure("function invocation queue is full"));
        }
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Ok(permit)
    }
}
