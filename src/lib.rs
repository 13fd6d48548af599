//! A concurrent keyed store whose entries can expire.
//!
//! Entries are inserted with an optional lifetime.  When a lifetime elapses
//! the entry is removed and handed to the store-wide expiration handler.
//! Every timer belongs to one single-threaded scheduler context, and expiry
//! is dispatched there with the store lock already released.
//!
//! ```
//! use lungo::ExpiringStore;
//! use std::time::Duration;
//!
//! let store: ExpiringStore<&'static str, u32> = ExpiringStore::builder()
//!     .expiration_handler(|key: &&'static str, value: u32| println!("{key} expired with {value}"))
//!     .build()
//!     .unwrap();
//!
//! store.insert_with_lifetime("token", 42, Duration::from_millis(20));
//! store.insert("config", 7);
//! ```

mod builder;
mod error;
mod metrics;
mod store;
pub mod expiry;
pub mod handler;
pub mod queue;
pub mod scheduler;

pub use builder::StoreBuilder;
pub use error::{Error, Result};
pub use handler::ExpirationHandler;
pub use metrics::stats::Metrics;
pub use queue::BlockingQueue;
pub use scheduler::{ManualScheduler, Scheduler, ThreadScheduler};
pub use store::{ExpiringStore, Iter, ReadGuard, WeakStore};
