//! Deadline-ordered queue of pending single-shot timers.
//!
//! ## Algorithm
//!
//! Pending timers live in two structures:
//!
//! - a binary min-heap of `(deadline, id)` pairs, which yields the next
//!   timer to fire in `O(log n)`;
//! - an index (`AHashMap<TimerId, Pending<T>>`), which is the **source of
//!   truth** for each timer's current deadline and payload.
//!
//! Cancelling or rescheduling a timer only touches the index.  The old heap
//! entry is left in place and implicitly invalidated: when it reaches the
//! top of the heap its deadline no longer matches the index (or the id is
//! gone altogether) and it is silently discarded.
//!
//! Stale entries behind a far-off live deadline would otherwise pile up, so
//! once the heap holds more than twice as many entries as the index (plus
//! `COMPACT_SLACK`) it is rebuilt from the index.  Each rebuild is paid for
//! by the stale entries it drops, keeping `schedule` and `cancel` amortised
//! `O(log n)` and the heap within `2 * len + COMPACT_SLACK` entries.
//!
//! Timers with equal deadlines fire in ascending id order.  Ids are handed
//! out monotonically, so equal deadlines fire in the order they were
//! allocated.
//!
//! The queue is not thread-safe.  It is owned by exactly one scheduler
//! context and only ever touched from that context.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use ahash::AHashMap;

use crate::scheduler::TimerId;

/// Stale heap entries tolerated before a compaction is considered.
const COMPACT_SLACK: usize = 64;

struct Pending<T> {
    deadline: Instant,
    payload: T,
}

/// A deadline-ordered set of pending timers, each carrying a payload.
pub struct TimerQueue<T> {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    index: AHashMap<TimerId, Pending<T>>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        TimerQueue {
            heap: BinaryHeap::new(),
            index: AHashMap::new(),
        }
    }

    /// Schedules `id` to fire at `deadline`.
    ///
    /// If `id` was already pending, its previous deadline is superseded and
    /// the previous payload is returned.
    pub fn schedule(&mut self, id: TimerId, deadline: Instant, payload: T) -> Option<T> {
        self.heap.push(Reverse((deadline, id)));
        let previous = self
            .index
            .insert(id, Pending { deadline, payload })
            .map(|old| old.payload);
        if previous.is_some() {
            self.maybe_compact();
        }
        previous
    }

    /// Cancels `id`, returning its payload if it was still pending.
    ///
    /// The heap entry is discarded lazily.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let cancelled = self.index.remove(&id).map(|p| p.payload);
        if cancelled.is_some() {
            self.maybe_compact();
        }
        cancelled
    }

    /// Returns the earliest live deadline, discarding stale heap entries on
    /// the way.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.is_live(id, deadline) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns every timer whose deadline is `<= now`, in
    /// deadline order.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(TimerId, T)> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if !self.is_live(id, deadline) {
                // Stale or cancelled.
                continue;
            }
            if let Some(pending) = self.index.remove(&id) {
                expired.push((id, pending.payload));
            }
        }
        expired
    }

    /// Drops every pending timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    /// Returns the number of live timers (O(1)).
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if no timers are pending.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Rebuilds the heap from the index once stale entries outnumber live
    /// ones.
    fn maybe_compact(&mut self) {
        if self.heap.len() <= 2 * self.index.len() + COMPACT_SLACK {
            return;
        }
        let before = self.heap.len();
        self.heap = self
            .index
            .iter()
            .map(|(&id, p)| Reverse((p.deadline, id)))
            .collect();
        tracing::trace!(before, after = self.heap.len(), "timer heap compacted");
    }

    #[inline]
    fn is_live(&self, id: TimerId, deadline: Instant) -> bool {
        matches!(self.index.get(&id), Some(p) if p.deadline == deadline)
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn ids(out: Vec<(TimerId, &'static str)>) -> Vec<&'static str> {
        out.into_iter().map(|(_, p)| p).collect()
    }

    #[test]
    fn nothing_expires_before_deadline() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(TimerId::from_raw(1), t0 + ms(10), "a");
        assert!(q.pop_expired(t0 + ms(5)).is_empty());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn expires_at_deadline() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(TimerId::from_raw(1), t0 + ms(10), "a");
        assert_eq!(ids(q.pop_expired(t0 + ms(10))), vec!["a"]);
        assert!(q.is_empty());
    }

    #[test]
    fn multiple_timers_fire_in_deadline_order() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(TimerId::from_raw(1), t0 + ms(30), "late");
        q.schedule(TimerId::from_raw(2), t0 + ms(5), "early");
        q.schedule(TimerId::from_raw(3), t0 + ms(15), "middle");

        assert_eq!(ids(q.pop_expired(t0 + ms(20))), vec!["early", "middle"]);
        assert_eq!(ids(q.pop_expired(t0 + ms(35))), vec!["late"]);
    }

    #[test]
    fn equal_deadlines_fire_in_id_order() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(TimerId::from_raw(7), t0 + ms(5), "second");
        q.schedule(TimerId::from_raw(3), t0 + ms(5), "first");
        assert_eq!(ids(q.pop_expired(t0 + ms(5))), vec!["first", "second"]);
    }

    #[test]
    fn cancel_prevents_firing() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let id = TimerId::from_raw(1);
        q.schedule(id, t0 + ms(10), "a");
        assert_eq!(q.cancel(id), Some("a"));
        assert_eq!(q.cancel(id), None);
        assert!(q.pop_expired(t0 + ms(20)).is_empty());
        assert_eq!(q.next_deadline(), None, "stale heap entry must be skipped");
    }

    #[test]
    fn reschedule_uses_new_deadline() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let id = TimerId::from_raw(5);
        q.schedule(id, t0 + ms(10), "old");
        assert_eq!(q.schedule(id, t0 + ms(30), "new"), Some("old"));

        assert!(q.pop_expired(t0 + ms(15)).is_empty());
        assert_eq!(q.next_deadline(), Some(t0 + ms(30)));
        assert_eq!(ids(q.pop_expired(t0 + ms(30))), vec!["new"]);
    }

    #[test]
    fn reschedule_to_same_deadline_fires_once() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let id = TimerId::from_raw(1);
        q.schedule(id, t0 + ms(10), "a");
        q.schedule(id, t0 + ms(10), "b");
        assert_eq!(ids(q.pop_expired(t0 + ms(10))), vec!["b"]);
    }

    #[test]
    fn len_tracks_live_timers() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        assert_eq!(q.len(), 0);
        q.schedule(TimerId::from_raw(1), t0 + ms(10), ());
        q.schedule(TimerId::from_raw(2), t0 + ms(20), ());
        assert_eq!(q.len(), 2);
        q.cancel(TimerId::from_raw(1));
        assert_eq!(q.len(), 1);
        q.pop_expired(t0 + ms(25));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn rearm_churn_keeps_heap_bounded() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        // An early live timer keeps every stale entry away from the top.
        q.schedule(TimerId::from_raw(0), t0 + Duration::from_secs(10), 0u64);

        let mut previous = None;
        for i in 1..=100_000u64 {
            let id = TimerId::from_raw(i);
            q.schedule(id, t0 + Duration::from_secs(600), i);
            if let Some(prev) = previous.replace(id) {
                q.cancel(prev);
            }
            assert!(
                q.heap.len() <= 2 * q.len() + COMPACT_SLACK,
                "heap grew to {} with {} live timers",
                q.heap.len(),
                q.len()
            );
        }

        assert_eq!(q.len(), 2);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_secs(10)));
        let fired = ids_u64(q.pop_expired(t0 + Duration::from_secs(600)));
        assert_eq!(fired, vec![0, 100_000]);
    }

    #[test]
    fn rescheduling_one_id_keeps_heap_bounded() {
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        let id = TimerId::from_raw(1);
        for i in 0..10_000u64 {
            q.schedule(id, t0 + ms(1_000 + i), "a");
        }
        assert!(q.heap.len() <= 2 + COMPACT_SLACK);
        assert_eq!(q.next_deadline(), Some(t0 + ms(10_999)));
    }

    fn ids_u64(out: Vec<(TimerId, u64)>) -> Vec<u64> {
        out.into_iter().map(|(_, p)| p).collect()
    }

    proptest! {
        #[test]
        fn fires_every_live_timer_once_in_order(
            offsets in proptest::collection::vec(0u64..500, 1..64),
            cancel_mask in proptest::collection::vec(any::<bool>(), 64),
        ) {
            let t0 = Instant::now();
            let mut q = TimerQueue::new();
            for (i, off) in offsets.iter().enumerate() {
                q.schedule(TimerId::from_raw(i as u64), t0 + ms(*off), i);
            }
            let mut live = Vec::new();
            for i in 0..offsets.len() {
                if cancel_mask[i] {
                    q.cancel(TimerId::from_raw(i as u64));
                } else {
                    live.push(i);
                }
            }

            let fired = q.pop_expired(t0 + ms(1_000));
            prop_assert_eq!(fired.len(), live.len());
            prop_assert!(q.is_empty());

            let deadlines: Vec<u64> = fired.iter().map(|(_, i)| offsets[*i]).collect();
            prop_assert!(deadlines.windows(2).all(|w| w[0] <= w[1]));

            let mut seen: Vec<usize> = fired.into_iter().map(|(_, i)| i).collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, live);
        }
    }
}
