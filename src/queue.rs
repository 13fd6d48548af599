//! Unbounded blocking FIFO with timed consumption.
//!
//! Items live in a lock-free `SegQueue`; a counting semaphore tracks how many
//! of them are available.  `enqueue` pushes the item first and then releases
//! one permit, so a consumer that acquires a permit is guaranteed to find an
//! item waiting.
//!
//! The queue is independent of [`ExpiringStore`](crate::ExpiringStore); the
//! two are meant to be combined by a higher layer, e.g. workers pulling jobs
//! from a queue and publishing results with a lifetime.

use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

/// A counting semaphore.
struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Semaphore {
            permits: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    fn release(&self) {
        *self.permits.lock() += 1;
        self.available.notify_one();
    }

    fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    fn try_acquire_until(&self, deadline: Instant) -> bool {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_until(&mut permits, deadline).timed_out() {
                if *permits == 0 {
                    return false;
                }
                break;
            }
        }
        *permits -= 1;
        true
    }
}

/// An unbounded multi-producer multi-consumer FIFO whose consumers can wait
/// for items with a timeout.
///
/// # Example
/// ```
/// use lungo::BlockingQueue;
/// use std::time::Duration;
///
/// let queue = BlockingQueue::new();
/// queue.enqueue("job-1");
/// assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)), Some("job-1"));
/// assert_eq!(queue.dequeue_timeout(Duration::from_millis(10)), None);
/// ```
pub struct BlockingQueue<T> {
    items: SegQueue<T>,
    semaphore: Semaphore,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        BlockingQueue {
            items: SegQueue::new(),
            semaphore: Semaphore::new(),
        }
    }

    /// Appends `item`.  Never blocks.
    pub fn enqueue(&self, item: T) {
        self.items.push(item);
        self.semaphore.release();
    }

    /// Removes the oldest item, blocking until one is available.
    pub fn dequeue(&self) -> T {
        self.semaphore.acquire();
        self.pop_claimed()
    }

    /// Removes the oldest item, blocking for at most `timeout`.
    ///
    /// Returns `None` if no item arrived in time.  A zero timeout never
    /// blocks.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let acquired = match Instant::now().checked_add(timeout) {
            Some(deadline) => self.semaphore.try_acquire_until(deadline),
            None => {
                self.semaphore.acquire();
                true
            }
        };
        if !acquired {
            tracing::trace!(timeout_ms = timeout.as_millis() as u64, "dequeue timed out");
            return None;
        }
        Some(self.pop_claimed())
    }

    /// Removes the oldest item if one is available right now.
    pub fn try_dequeue(&self) -> Option<T> {
        if self.semaphore.try_acquire() {
            Some(self.pop_claimed())
        } else {
            None
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pops the item backing a permit that was just acquired.
    fn pop_claimed(&self) -> T {
        // The producer pushed before releasing the permit, so the item is
        // there; the loop only covers the push becoming visible.
        loop {
            if let Some(item) = self.items.pop() {
                return item;
            }
            std::hint::spin_loop();
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let q = BlockingQueue::new();
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.len(), 5);
        let out: Vec<i32> = (0..5).map(|_| q.dequeue()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn timeout_on_empty_queue() {
        let q: BlockingQueue<u8> = BlockingQueue::new();
        let start = Instant::now();
        assert_eq!(q.dequeue_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn zero_timeout_does_not_block() {
        let q = BlockingQueue::new();
        assert_eq!(q.dequeue_timeout(Duration::ZERO), None);
        q.enqueue(1);
        assert_eq!(q.dequeue_timeout(Duration::ZERO), Some(1));
    }

    #[test]
    fn try_dequeue() {
        let q = BlockingQueue::new();
        assert_eq!(q.try_dequeue(), None);
        q.enqueue("x");
        assert_eq!(q.try_dequeue(), Some("x"));
        assert_eq!(q.try_dequeue(), None);
    }
}
