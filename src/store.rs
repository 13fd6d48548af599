use std::collections::hash_map;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::builder::StoreBuilder;
use crate::expiry::lifetime_from_millis;
use crate::expiry::registry::{SlotKey, TimerRegistry};
use crate::handler::{ExpirationHandler, FnHandler};
use crate::metrics::stats::{Metrics, StatsCounter};
use crate::scheduler::{Scheduler, Task, TimerId};

// ---------------------------------------------------------------------------
// Store interior
// ---------------------------------------------------------------------------

/// Everything guarded by the store lock.
///
/// Values, timer registrations and the handler always change together under
/// one write lock, so the map and the registry can never disagree.
struct State<K, V> {
    items: AHashMap<K, V>,
    timers: TimerRegistry<K>,
    handler: Option<Arc<dyn ExpirationHandler<K, V>>>,
}

/// Shared interior of an [`ExpiringStore`].
///
/// Tasks queued on the scheduler hold only a `Weak` reference, so a store
/// that is dropped with timers still pending is freed at once and its late
/// firings do nothing.
pub(crate) struct Inner<K, V> {
    state: RwLock<State<K, V>>,
    scheduler: Arc<dyn Scheduler>,
    metrics: StatsCounter,
}

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

/// A concurrent keyed store whose entries may carry a time-to-live.
///
/// Reads take a shared lock; writes take an exclusive lock for their whole
/// critical section.  Timers are never touched on the calling thread: arming
/// and disposal requests are queued onto the store's [`Scheduler`], and
/// expiry runs there too.
///
/// # Example
/// ```
/// use lungo::ExpiringStore;
/// use std::time::Duration;
///
/// let store: ExpiringStore<String, u32> = ExpiringStore::new().unwrap();
/// store.insert("permanent".to_string(), 1);
/// store.insert_with_lifetime("fleeting".to_string(), 2, Duration::from_millis(30));
///
/// assert_eq!(store.get(&"fleeting".to_string()), Some(2));
/// std::thread::sleep(Duration::from_millis(200));
/// assert!(!store.contains(&"fleeting".to_string()));
/// assert!(store.contains(&"permanent".to_string()));
/// ```
pub struct ExpiringStore<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ExpiringStore<K, V> {
    fn clone(&self) -> Self {
        ExpiringStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A non-owning handle to an [`ExpiringStore`].
///
/// Handlers that need to call back into their own store should capture one
/// of these rather than a clone: a handler holding a strong handle keeps the
/// store, and its scheduler thread, alive forever.
pub struct WeakStore<K, V> {
    inner: Weak<Inner<K, V>>,
}

impl<K, V> Clone for WeakStore<K, V> {
    fn clone(&self) -> Self {
        WeakStore {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K, V> WeakStore<K, V> {
    /// Returns a strong handle if the store is still alive.
    pub fn upgrade(&self) -> Option<ExpiringStore<K, V>> {
        self.inner.upgrade().map(|inner| ExpiringStore { inner })
    }
}

impl<K, V> ExpiringStore<K, V> {
    /// Returns a [`WeakStore`] that does not keep this store alive.
    pub fn downgrade(&self) -> WeakStore<K, V> {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<K, V> ExpiringStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn from_parts(
        initial_capacity: usize,
        scheduler: Arc<dyn Scheduler>,
        handler: Option<Arc<dyn ExpirationHandler<K, V>>>,
    ) -> Self {
        ExpiringStore {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    items: AHashMap::with_capacity(initial_capacity),
                    timers: TimerRegistry::new(),
                    handler,
                }),
                scheduler,
                metrics: StatsCounter::new(),
            }),
        }
    }

    /// Creates a store with default settings and its own scheduler thread.
    pub fn new() -> crate::Result<Self> {
        StoreBuilder::new().build()
    }

    /// Returns a [`StoreBuilder`] for constructing a new store.
    pub fn builder() -> StoreBuilder<K, V> {
        StoreBuilder::new()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Inserts `value` for `key` without a lifetime.
    ///
    /// Equivalent to `insert_with_lifetime(key, value, Duration::ZERO)`: an
    /// existing countdown for `key` keeps running.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_lifetime(key, value, Duration::ZERO);
    }

    /// Inserts `value` for `key`, replacing any previous value.
    ///
    /// A non-zero `lifetime` (re)starts the key's countdown from `lifetime`,
    /// superseding any earlier deadline.  A zero `lifetime` only updates the
    /// value: if the key is already counting down, that countdown is left
    /// running and will expire the new value.
    pub fn insert_with_lifetime(&self, key: K, value: V, lifetime: Duration) {
        let mut state = self.inner.state.write();
        if lifetime.is_zero() {
            state.items.insert(key, value);
            return;
        }
        let slot = state.timers.register(&key);
        state.items.insert(key, value);
        // Queued while still holding the lock so arm requests reach the
        // context in the same order the writes were applied.
        if !self.inner.request_arm(slot, lifetime) {
            state.timers.abandon(slot);
        }
    }

    /// Like [`insert_with_lifetime`](Self::insert_with_lifetime) with the
    /// lifetime given in milliseconds.  Zero or negative means no expiry.
    pub fn insert_with_lifetime_millis(&self, key: K, value: V, lifetime_ms: i64) {
        self.insert_with_lifetime(key, value, lifetime_from_millis(lifetime_ms));
    }

    /// Removes the entry for `key` and cancels its countdown.
    ///
    /// Returns `true` if an entry was present.  The expiration handler is
    /// not called.
    pub fn remove(&self, key: &K) -> bool {
        self.take(key).is_some()
    }

    /// Removes the entry for `key`, cancels its countdown and returns the
    /// value, or `None` if the key was absent.
    pub fn take(&self, key: &K) -> Option<V> {
        let mut state = self.inner.state.write();
        let value = state.items.remove(key);
        if let Some(slot) = state.timers.retire(key) {
            if !self.inner.request_dispose(vec![slot]) {
                state.timers.dispose(slot);
            }
        }
        if value.is_some() {
            self.inner.metrics.record_removals(1);
        }
        value
    }

    /// Removes every entry and cancels every countdown.
    pub fn clear(&self) {
        let mut state = self.inner.state.write();
        let removed = state.items.len() as u64;
        state.items.clear();
        let slots = state.timers.retire_all();
        if !slots.is_empty() && !self.inner.request_dispose(slots.clone()) {
            for slot in slots {
                state.timers.dispose(slot);
            }
        }
        self.inner.metrics.record_removals(removed);
    }

    // -----------------------------------------------------------------------
    // Expiration handler
    // -----------------------------------------------------------------------

    /// Installs `f` as the store-wide expiration handler, replacing any
    /// previous one.
    ///
    /// The handler applies to every entry that expires from now on,
    /// including entries inserted before it was installed.
    ///
    /// The store owns its handler.  A handler that captures a clone of this
    /// store forms a reference cycle and the store is never dropped; capture
    /// [`downgrade`](Self::downgrade) instead.
    pub fn set_expiration_handler<F>(&self, f: F)
    where
        F: Fn(&K, V) + Send + Sync + 'static,
    {
        self.set_expiration_handler_impl(FnHandler(f));
    }

    /// Installs an [`ExpirationHandler`] implementation.
    pub fn set_expiration_handler_impl<H: ExpirationHandler<K, V>>(&self, handler: H) {
        self.inner.state.write().handler = Some(Arc::new(handler));
    }

    /// Removes the expiration handler.  Entries keep expiring silently.
    pub fn clear_expiration_handler(&self) {
        self.inner.state.write().handler = None;
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.state.read().items.contains_key(key)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.read().items.is_empty()
    }

    /// Number of keys currently counting down.
    pub fn pending_timers(&self) -> usize {
        self.inner.state.read().timers.len()
    }

    /// Returns a read view holding the shared lock.
    ///
    /// Writers (including expiry) wait until the view is dropped.  Do not
    /// call a writing method on this store while holding one.
    ///
    /// ```
    /// use lungo::ExpiringStore;
    ///
    /// let store: ExpiringStore<u32, u32> = ExpiringStore::new().unwrap();
    /// store.insert(1, 10);
    /// store.insert(2, 20);
    ///
    /// let view = store.read();
    /// let total: u32 = view.iter().map(|(_, v)| *v).sum();
    /// assert_eq!(total, 30);
    /// ```
    pub fn read(&self) -> ReadGuard<'_, K, V> {
        ReadGuard {
            state: self.inner.state.read(),
        }
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub fn stats(&self) -> Metrics {
        self.inner.metrics.snapshot()
    }
}

impl<K, V> ExpiringStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns a clone of the value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.state.read().items.get(key).cloned();
        if value.is_some() {
            self.inner.metrics.record_hit();
        } else {
            self.inner.metrics.record_miss();
        }
        value
    }

    /// Returns the value for `key`, or `default` if absent.
    pub fn value_or(&self, key: &K, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    /// Returns all values, in no particular order.
    pub fn values(&self) -> Vec<V> {
        self.inner.state.read().items.values().cloned().collect()
    }

    /// Returns all keys, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.state.read().items.keys().cloned().collect()
    }

    /// Returns all entries, in no particular order.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.inner
            .state
            .read()
            .items
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K, V> ExpiringStore<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Default + Send + Sync + 'static,
{
    /// Returns the value for `key`, or `V::default()` if absent.
    pub fn value(&self, key: &K) -> V {
        self.get(key).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Timer protocol (runs on the scheduler context unless noted)
// ---------------------------------------------------------------------------

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Caller side: queues a (re)start of `slot` with `lifetime`.  Returns
    /// `false` if the context refused the request.
    fn request_arm(self: &Arc<Self>, slot: SlotKey, lifetime: Duration) -> bool {
        let weak = Arc::downgrade(self);
        let task: Task = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.start_timer(slot, lifetime);
            }
        });
        match self.scheduler.run_on_owner(task) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, ?slot, "could not queue timer start");
                false
            }
        }
    }

    /// Caller side: queues reclamation of retired slots.  Returns `false` if
    /// the context refused the request, in which case the caller reclaims
    /// them itself.
    fn request_dispose(self: &Arc<Self>, slots: Vec<SlotKey>) -> bool {
        let weak = Arc::downgrade(self);
        let count = slots.len();
        let task: Task = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.dispose_timers(slots);
            }
        });
        match self.scheduler.run_on_owner(task) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, count, "could not queue timer disposal");
                false
            }
        }
    }

    fn start_timer(self: &Arc<Self>, slot: SlotKey, lifetime: Duration) {
        let mut state = self.state.write();
        let Some(generation) = state.timers.begin_arm(slot) else {
            tracing::trace!(?slot, "start request for a retired timer ignored");
            return;
        };

        let fire = expiry_task(Arc::downgrade(self), slot, generation);
        match self.scheduler.schedule_once(lifetime, fire) {
            Ok(timer) => {
                if let Some(previous) = state.timers.set_armed(slot, timer) {
                    self.cancel_timer(previous);
                }
                tracing::debug!(
                    ?slot,
                    ?timer,
                    lifetime_ms = lifetime.as_millis() as u64,
                    "timer armed"
                );
            }
            Err(err) => {
                tracing::warn!(%err, ?slot, "could not schedule timer");
                if let Some(previous) = state.timers.abandon(slot) {
                    self.cancel_timer(previous);
                }
            }
        }
    }

    fn dispose_timers(&self, slots: Vec<SlotKey>) {
        let mut state = self.state.write();
        for slot in slots {
            if let Some(timer) = state.timers.dispose(slot) {
                self.cancel_timer(timer);
            }
        }
        tracing::trace!(allocated = state.timers.allocated(), "timers disposed");
    }

    fn cancel_timer(&self, timer: TimerId) {
        if let Err(err) = self.scheduler.cancel(timer) {
            tracing::warn!(%err, ?timer, "could not cancel timer");
        }
    }

    /// Evicts the entry behind an elapsed countdown and dispatches it to the
    /// handler once the lock is released.
    fn expire(&self, slot: SlotKey, generation: u64) {
        let (key, value, handler) = {
            let mut state = self.state.write();
            let Some(key) = state.timers.expire(slot, generation) else {
                tracing::trace!(?slot, generation, "stale timer firing ignored");
                return;
            };
            let value = state.items.remove(&key);
            (key, value, state.handler.clone())
        };

        let Some(value) = value else {
            tracing::debug!(?slot, "expired key was already gone");
            return;
        };
        self.metrics.record_expiration();
        tracing::debug!(?slot, handled = handler.is_some(), "entry expired");

        if let Some(handler) = handler {
            handler.on_expire(&key, value);
        }
    }
}

fn expiry_task<K, V>(weak: Weak<Inner<K, V>>, slot: SlotKey, generation: u64) -> Task
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    Box::new(move || {
        if let Some(inner) = weak.upgrade() {
            inner.expire(slot, generation);
        }
    })
}

// ---------------------------------------------------------------------------
// Read view
// ---------------------------------------------------------------------------

/// A shared-lock view over an [`ExpiringStore`], returned by
/// [`ExpiringStore::read`].
pub struct ReadGuard<'a, K, V> {
    state: RwLockReadGuard<'a, State<K, V>>,
}

impl<'a, K: Hash + Eq, V> ReadGuard<'a, K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.state.items.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.state.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.items.is_empty()
    }

    /// Iterates over all entries, in no particular order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.state.items.iter(),
        }
    }
}

impl<'g, 'a, K: Hash + Eq, V> IntoIterator for &'g ReadGuard<'a, K, V> {
    type Item = (&'g K, &'g V);
    type IntoIter = Iter<'g, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Forward iterator over the entries of a [`ReadGuard`].
pub struct Iter<'a, K, V> {
    inner: hash_map::Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

// ---------------------------------------------------------------------------
// Tests (deterministic, driven by a ManualScheduler)
// ---------------------------------------------------------------------------
