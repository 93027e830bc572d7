//! Process-wide ticket pool bounding simultaneous archive fetches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, IndexResult};

/// Default number of archive fetches allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 15;

static SHARED: OnceLock<Arc<FetchLimiter>> = OnceLock::new();

/// Counting limiter over archive fetches.
///
/// Backed by a fair semaphore, so waiters are served in the order they asked.
#[derive(Debug)]
pub struct FetchLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    queued: AtomicUsize,
}

/// One acquired fetch slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct FetchTicket {
    _permit: OwnedSemaphorePermit,
}

impl FetchLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            queued: AtomicUsize::new(0),
        }
    }

    /// The process-wide pool. Capacity is fixed by the first caller.
    pub fn shared(capacity: usize) -> Arc<Self> {
        let limiter = SHARED.get_or_init(|| Arc::new(Self::new(capacity)));
        if limiter.capacity != capacity.max(1) {
            tracing::warn!(
                "[fetcher] fetch limiter already initialized with {} slots, ignoring {capacity}",
                limiter.capacity
            );
        }
        Arc::clone(limiter)
    }

    /// Wait for a free slot.
    ///
    /// Fails with [`IndexError::Cancelled`] as soon as `cancel` fires, without
    /// consuming a slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> IndexResult<FetchTicket> {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let _queued = QueuedGuard::enter(&self.queued);
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IndexError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| IndexError::ChannelClosed("fetch limiter"))
            }
        }?;

        Ok(FetchTicket { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Callers currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

/// Keeps the waiter count accurate even when an `acquire` future is dropped.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_tickets_are_bounded_and_released() {
        let limiter = FetchLimiter::new(2);
        let cancel = CancellationToken::new();

        let first = limiter.acquire(&cancel).await.unwrap();
        let second = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.available(), 0);

        // Third caller has to wait until a ticket comes back.
        let pending = tokio::time::timeout(Duration::from_millis(50), limiter.acquire(&cancel));
        assert!(pending.await.is_err());

        drop(first);
        assert_eq!(limiter.available(), 1);
        let third = limiter.acquire(&cancel).await.unwrap();

        drop(second);
        drop(third);
        assert_eq!(limiter.available(), 2);
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_fails_without_consuming() {
        let limiter = Arc::new(FetchLimiter::new(1));
        let held = limiter.acquire(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(limiter.queued(), 1);
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(IndexError::Cancelled)));
        assert_eq!(limiter.queued(), 0);

        drop(held);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_waiters_served_in_arrival_order() {
        let limiter = Arc::new(FetchLimiter::new(1));
        let held = limiter.acquire(&CancellationToken::new()).await.unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut waiters = Vec::new();
        for id in 0..3 {
            let task_limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                let ticket = task_limiter.acquire(&CancellationToken::new()).await.unwrap();
                order.lock().push(id);
                tokio::time::sleep(Duration::from_millis(5)).await;
                drop(ticket);
            }));
            // Queue each waiter before spawning the next.
            while limiter.queued() < id + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_immediately() {
        let limiter = FetchLimiter::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            limiter.acquire(&cancel).await,
            Err(IndexError::Cancelled)
        ));
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(FetchLimiter::new(0).capacity(), 1);
    }
}
