// Admission control in front of the sandbox: a fixed number of execution
// slots plus a bounded wait queue. Callers past the queue bound, or whose
// wait expires, get CapacityExceeded instead of spawning another process.
use crate::error::HarnessError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

pub struct ExecutionPool {
    slots: Semaphore,
    capacity: usize,
    max_waiting: usize,
    waiting: AtomicUsize,
    queue_timeout: Duration,
}

/// Decrements the waiting count however the wait ends
struct WaitTicket<'a>(&'a AtomicUsize);

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionPool {
    pub fn new(capacity: usize, max_waiting: usize, queue_timeout: Duration) -> Self {
        Self {
            slots: Semaphore::new(capacity),
            capacity,
            max_waiting,
            waiting: AtomicUsize::new(0),
            queue_timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Take a slot, queueing if none is free. The slot is released when the
    /// permit is dropped.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, HarnessError> {
        if let Ok(permit) = self.slots.try_acquire() {
            return Ok(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _ticket = WaitTicket(&self.waiting);
        if queued >= self.max_waiting {
            warn!(
                capacity = self.capacity,
                waiting = queued,
                "Execution queue full, rejecting run"
            );
            return Err(HarnessError::CapacityExceeded);
        }

        debug!(position = queued + 1, "Waiting for an execution slot");
        match tokio::time::timeout(self.queue_timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(HarnessError::CapacityExceeded),
            Err(_) => {
                warn!(
                    queue_timeout_ms = self.queue_timeout.as_millis() as u64,
                    "Timed out waiting for an execution slot"
                );
                Err(HarnessError::CapacityExceeded)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_slots_are_released_on_drop() {
        let pool = ExecutionPool::new(2, 0, Duration::from_millis(50));
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_immediately() {
        let pool = ExecutionPool::new(1, 0, Duration::from_secs(30));
        let _held = pool.acquire().await.unwrap();

        let started = std::time::Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, HarnessError::CapacityExceeded));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn test_queue_wait_times_out() {
        let pool = ExecutionPool::new(1, 4, Duration::from_millis(50));
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, HarnessError::CapacityExceeded));
        assert_eq!(pool.waiting(), 0);
    }

    #[tokio::test]
    async fn test_waiter_admitted_when_slot_frees() {
        let pool = Arc::new(ExecutionPool::new(1, 4, Duration::from_secs(5)));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()).is_ok() })
        };

        while pool.waiting() == 0 {
            tokio::task::yield_now().await;
        }
        drop(held);

        assert!(waiter.await.unwrap());
        assert_eq!(pool.waiting(), 0);
        assert_eq!(pool.available(), 1);
    }
}
