use std::hash::Hash;
use std::sync::Arc;

use crate::error::Result;
use crate::handler::{ExpirationHandler, FnHandler};
use crate::scheduler::thread::DEFAULT_THREAD_NAME;
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::store::ExpiringStore;

/// Builder for configuring and constructing an [`ExpiringStore`].
///
/// # Example
/// ```
/// use lungo::StoreBuilder;
///
/// let store: lungo::ExpiringStore<String, String> = StoreBuilder::new()
///     .initial_capacity(1_000)
///     .thread_name("session-expiry")
///     .expiration_handler(|key: &String, _value: String| {
///         println!("session {key} expired");
///     })
///     .build()
///     .unwrap();
/// ```
pub struct StoreBuilder<K, V> {
    initial_capacity: usize,
    thread_name: String,
    scheduler: Option<Arc<dyn Scheduler>>,
    handler: Option<Arc<dyn ExpirationHandler<K, V>>>,
}

impl<K: 'static, V: 'static> StoreBuilder<K, V> {
    pub fn new() -> Self {
        StoreBuilder {
            initial_capacity: 0,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            scheduler: None,
            handler: None,
        }
    }

    /// Pre-allocate room for `n` entries (default: 0).
    pub fn initial_capacity(mut self, n: usize) -> Self {
        self.initial_capacity = n;
        self
    }

    /// Name of the scheduler thread spawned by [`build`](Self::build)
    /// (default: `"lungo-timers"`).  Ignored when a scheduler is injected.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Bind the store's timers to an existing scheduler context instead of
    /// spawning a dedicated thread.
    ///
    /// Several stores may share one context.
    pub fn scheduler<S: Scheduler>(mut self, scheduler: Arc<S>) -> Self {
        let scheduler: Arc<dyn Scheduler> = scheduler;
        self.scheduler = Some(scheduler);
        self
    }

    /// Register an expiration handler closure.
    ///
    /// The closure runs on the scheduler context after the store lock has
    /// been released, once per expired entry.
    pub fn expiration_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, V) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(FnHandler(f)));
        self
    }

    /// Register an expiration handler via the [`ExpirationHandler`] trait.
    pub fn expiration_handler_impl<H: ExpirationHandler<K, V>>(mut self, h: H) -> Self {
        self.handler = Some(Arc::new(h));
        self
    }
}

impl<K: 'static, V: 'static> Default for StoreBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> StoreBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Builds the store, spawning a scheduler thread unless one was
    /// injected.
    ///
    /// Fails only if the scheduler thread cannot be spawned.
    pub fn build(self) -> Result<ExpiringStore<K, V>> {
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => {
                let spawned = ThreadScheduler::spawn(self.thread_name)?;
                tracing::debug!(thread = spawned.name(), "spawned scheduler for store");
                Arc::new(spawned) as Arc<dyn Scheduler>
            }
        };
        Ok(ExpiringStore::from_parts(
            self.initial_capacity,
            scheduler,
            self.handler,
        ))
    }
}
