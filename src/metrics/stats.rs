use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by store operations.
pub struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    removals: AtomicU64,
}

impl StatsCounter {
    pub fn new() -> Self {
        StatsCounter {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            removals: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_removals(&self, count: u64) {
        self.removals.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub fn snapshot(&self) -> Metrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0_f64
        } else {
            hits as f64 / total as f64
        };
        Metrics {
            hits,
            misses,
            expirations: self.expirations.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of store statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// Lookups that found the key.
    pub hits: u64,
    /// Lookups that did not.
    pub misses: u64,
    /// Entries removed because their lifetime elapsed.
    pub expirations: u64,
    /// Entries removed by `remove`, `take` or `clear`.
    pub removals: u64,
    /// `hits / (hits + misses)`, or `0.0` if no lookups have been made.
    pub hit_rate: f64,
}

impl Metrics {
    pub fn request_count(&self) -> u64 {
        self.hits + self.misses
    }
}
