//! The owning scheduler context.
//!
//! Every timer a store arms is bound to one single-threaded context.  Timers
//! are only ever started, cancelled and fired on that context; requests from
//! other threads are queued onto it instead of being carried out inline.
//!
//! [`Scheduler`] is the capability a store needs from its context.  Two
//! implementations ship with the crate:
//!
//! - [`ThreadScheduler`] spawns a dedicated thread with its own run loop.
//!   This is what [`StoreBuilder::build`](crate::StoreBuilder::build) uses
//!   unless told otherwise.
//! - [`ManualScheduler`] runs nothing on its own; whichever thread calls
//!   [`ManualScheduler::advance`] or [`ManualScheduler::run_pending`] acts
//!   as the owner.  Useful in tests and in hosts that already drive their
//!   own event loop.

pub mod manual;
pub mod thread;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::error::Result;

pub use manual::ManualScheduler;
pub use thread::ThreadScheduler;

/// A unit of work executed on the owning context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a single-shot timer scheduled on a context.
///
/// Ids are never reused by a context, so an id that has fired or been
/// cancelled can never refer to a newer timer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        TimerId(raw)
    }
}

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerId({})", self.0)
    }
}

/// Capability to run work on a single owning context.
///
/// All three methods may be called from any thread, including the owner
/// itself.  None of them blocks: each request is queued and carried out
/// later, in submission order, on the owner.
///
/// Implementations must guarantee that
///
/// - tasks and timer callbacks run one at a time, never concurrently;
/// - a timer whose `cancel` request is processed before its deadline is
///   reached never fires.
pub trait Scheduler: Send + Sync + 'static {
    /// Queues `task` to run on the owning context.
    fn run_on_owner(&self, task: Task) -> Result<()>;

    /// Queues a single-shot timer that runs `task` on the owning context
    /// once `delay` has elapsed.
    ///
    /// The countdown starts when the request is processed by the owner, not
    /// when this method is called.  The returned id is valid immediately and
    /// may be passed to [`cancel`](Scheduler::cancel) at once.
    fn schedule_once(&self, delay: Duration, task: Task) -> Result<TimerId>;

    /// Queues cancellation of `timer`.  Cancelling a timer that already
    /// fired or was already cancelled is a no-op.
    fn cancel(&self, timer: TimerId) -> Result<()>;
}

/// A request queued onto a context's run loop.
pub(crate) enum Command {
    Run(Task),
    Schedule {
        id: TimerId,
        delay: Duration,
        task: Task,
    },
    Cancel(TimerId),
    Shutdown,
}

/// Runs `task`, containing any panic so the run loop survives it.
pub(crate) fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        tracing::error!(panic = message, "scheduler task panicked");
    }
}
