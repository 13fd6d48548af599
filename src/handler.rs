//! Expiration handler — a callback invoked whenever an entry expires.
//!
//! A store holds at most one handler.  Installing a new one replaces the
//! previous one; the handler in place when a timer elapses is the one that
//! is called, regardless of which handler (if any) was installed when the
//! entry was inserted.
//!
//! # Example
//! ```
//! use lungo::ExpiringStore;
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! let expired: Arc<Mutex<Vec<(u64, String)>>> = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&expired);
//!
//! let store: ExpiringStore<u64, String> = ExpiringStore::builder()
//!     .expiration_handler(move |key: &u64, value: String| {
//!         sink.lock().unwrap().push((*key, value));
//!     })
//!     .build()
//!     .unwrap();
//!
//! store.insert_with_lifetime(1, "one".to_string(), Duration::from_millis(20));
//! std::thread::sleep(Duration::from_millis(200));
//! assert_eq!(*expired.lock().unwrap(), vec![(1, "one".to_string())]);
//! ```

// ---------------------------------------------------------------------------
// ExpirationHandler trait
// ---------------------------------------------------------------------------

/// A callback invoked each time an entry is removed by expiry.
///
/// Explicit removal (`remove`, `take`, `clear`) never calls the handler.
///
/// The callback receives a reference to the key and the evicted value by
/// ownership.  It runs on the store's scheduler context **after** the store
/// lock has been released, so it may call back into the store freely,
/// including re-inserting the key that just expired.  It does, however,
/// hold up every other timer on the context while it runs.
///
/// The store owns its handler, so a handler must not own the store: reach
/// back into it through a [`WeakStore`](crate::WeakStore) from
/// [`ExpiringStore::downgrade`](crate::ExpiringStore::downgrade).  A strong
/// clone makes a cycle that keeps the store and its scheduler thread alive.
pub trait ExpirationHandler<K, V>: Send + Sync + 'static {
    fn on_expire(&self, key: &K, value: V);
}

/// An [`ExpirationHandler`] backed by a closure.
///
/// Created via [`StoreBuilder::expiration_handler`](crate::StoreBuilder::expiration_handler)
/// or [`ExpiringStore::set_expiration_handler`](crate::ExpiringStore::set_expiration_handler).
pub struct FnHandler<F>(pub F);

impl<K, V, F> ExpirationHandler<K, V> for FnHandler<F>
where
    F: Fn(&K, V) + Send + Sync + 'static,
{
    fn on_expire(&self, key: &K, value: V) {
        (self.0)(key, value)
    }
}
