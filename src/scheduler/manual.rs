//! A scheduler context driven explicitly by its caller.
//!
//! Nothing runs until [`ManualScheduler::run_pending`] or
//! [`ManualScheduler::advance`] is called; the thread making that call acts
//! as the owner for its duration.  Time is virtual: it only moves when
//! `advance` moves it, which makes expiry fully deterministic.
//!
//! # Example
//! ```
//! use lungo::scheduler::ManualScheduler;
//! use lungo::ExpiringStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let sched = Arc::new(ManualScheduler::new());
//! let store: ExpiringStore<&str, u32> = ExpiringStore::builder()
//!     .scheduler(Arc::clone(&sched))
//!     .build()
//!     .unwrap();
//!
//! store.insert_with_lifetime("k", 1, Duration::from_millis(50));
//! sched.advance(Duration::from_millis(49));
//! assert!(store.contains(&"k"));
//! sched.advance(Duration::from_millis(1));
//! assert!(!store.contains(&"k"));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{run_task, Command, Scheduler, Task, TimerId};
use crate::error::Result;
use crate::expiry::deadline_after;
use crate::expiry::timer_queue::TimerQueue;

struct State {
    now: Instant,
    queued: VecDeque<Command>,
    timers: TimerQueue<Task>,
}

/// A [`Scheduler`] with a virtual clock and no thread of its own.
///
/// The internal lock is never held while a task runs, so tasks are free to
/// submit further requests to the same scheduler.
pub struct ManualScheduler {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        ManualScheduler {
            state: Mutex::new(State {
                now: Instant::now(),
                queued: VecDeque::new(),
                timers: TimerQueue::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// The current virtual time.
    pub fn now(&self) -> Instant {
        self.state.lock().now
    }

    /// Number of timers scheduled and not yet fired or cancelled.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Number of requests waiting to be applied.
    pub fn queued(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Applies every queued request, including requests queued by the tasks
    /// it runs.  Does not move the clock.
    ///
    /// Returns the number of tasks executed.
    pub fn run_pending(&self) -> usize {
        let mut executed = 0;
        loop {
            let next = self.state.lock().queued.pop_front();
            let Some(cmd) = next else { return executed };
            match cmd {
                Command::Run(task) => {
                    run_task(task);
                    executed += 1;
                }
                Command::Schedule { id, delay, task } => {
                    let mut state = self.state.lock();
                    let deadline = deadline_after(state.now, delay);
                    state.timers.schedule(id, deadline, task);
                }
                Command::Cancel(id) => {
                    self.state.lock().timers.cancel(id);
                }
                Command::Shutdown => {
                    let mut state = self.state.lock();
                    state.timers.clear();
                    state.queued.clear();
                }
            }
        }
    }

    /// Moves the virtual clock forward by `by`, firing every timer that
    /// falls due on the way in deadline order.
    ///
    /// Queued requests are applied before the clock moves and again after
    /// each firing, so timers armed by a firing are honoured within the same
    /// call.  Returns the number of tasks executed.
    pub fn advance(&self, by: Duration) -> usize {
        let mut executed = self.run_pending();
        let target = deadline_after(self.now(), by);
        loop {
            let due = {
                let mut state = self.state.lock();
                match state.timers.next_deadline() {
                    Some(deadline) if deadline <= target => {
                        state.now = state.now.max(deadline);
                        let now = state.now;
                        state.timers.pop_expired(now)
                    }
                    _ => {
                        state.now = target;
                        break;
                    }
                }
            };
            for (id, task) in due {
                tracing::trace!(timer = ?id, "timer elapsed");
                run_task(task);
                executed += 1;
            }
            executed += self.run_pending();
        }
        executed
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn run_on_owner(&self, task: Task) -> Result<()> {
        self.state.lock().queued.push_back(Command::Run(task));
        Ok(())
    }

    fn schedule_once(&self, delay: Duration, task: Task) -> Result<TimerId> {
        let id = TimerId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state
            .lock()
            .queued
            .push_back(Command::Schedule { id, delay, task });
        Ok(id)
    }

    fn cancel(&self, timer: TimerId) -> Result<()> {
        self.state.lock().queued.push_back(Command::Cancel(timer));
        Ok(())
    }
}
