//! A scheduler context backed by a dedicated thread.
//!
//! The thread runs a single loop fed by an unbounded `crossbeam-channel`.
//! Between commands it sleeps in `recv_deadline` until either a new command
//! arrives or the earliest pending timer is due, so an idle context costs
//! nothing.
//!
//! ```text
//!  caller threads                 owner thread
//!  ──────────────                 ────────────
//!  run_on_owner ─┐
//!  schedule_once ├─► channel ───► loop { fire due timers
//!  cancel ───────┘                       recv_deadline(next deadline)
//!                                        apply command }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::{run_task, Command, Scheduler, Task, TimerId};
use crate::error::{Error, Result};
use crate::expiry::deadline_after;
use crate::expiry::timer_queue::TimerQueue;

/// Default name of the thread spawned by [`ThreadScheduler::spawn_default`].
pub const DEFAULT_THREAD_NAME: &str = "lungo-timers";

/// A [`Scheduler`] that owns one dedicated OS thread.
///
/// Dropping the scheduler asks the loop to stop and joins the thread.  Timers
/// still pending at that point are discarded without firing.
pub struct ThreadScheduler {
    tx: Sender<Command>,
    next_id: AtomicU64,
    owner: ThreadId,
    name: String,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// Spawns a context thread named `name`.
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(rx))
            .map_err(|source| Error::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(ThreadScheduler {
            tx,
            next_id: AtomicU64::new(1),
            owner: handle.thread().id(),
            name,
            join: Mutex::new(Some(handle)),
        })
    }

    /// Spawns a context thread named [`DEFAULT_THREAD_NAME`].
    pub fn spawn_default() -> Result<Self> {
        Self::spawn(DEFAULT_THREAD_NAME)
    }

    /// The name of the context thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when called from the context thread.
    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Stops the loop and waits for the thread to exit.
    ///
    /// Commands queued before the call are still applied.  When called from
    /// the context thread itself the loop stops after the current task
    /// returns and no join takes place.  Calling this more than once is
    /// harmless.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        if self.is_owner() {
            return;
        }
        if let Some(handle) = self.join.lock().take() {
            if handle.join().is_err() {
                tracing::error!(thread = %self.name, "scheduler thread panicked");
            }
        }
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| Error::SchedulerClosed)
    }
}

impl Scheduler for ThreadScheduler {
    fn run_on_owner(&self, task: Task) -> Result<()> {
        self.send(Command::Run(task))
    }

    fn schedule_once(&self, delay: Duration, task: Task) -> Result<TimerId> {
        let id = TimerId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.send(Command::Schedule { id, delay, task })?;
        Ok(id)
    }

    fn cancel(&self, timer: TimerId) -> Result<()> {
        self.send(Command::Cancel(timer))
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(rx: Receiver<Command>) {
    tracing::info!("scheduler context started");
    let mut timers: TimerQueue<Task> = TimerQueue::new();

    loop {
        for (id, task) in timers.pop_expired(Instant::now()) {
            tracing::trace!(timer = ?id, "timer elapsed");
            run_task(task);
        }

        let received = match timers.next_deadline() {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let cmd = match received {
            Ok(cmd) => cmd,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match cmd {
            Command::Run(task) => run_task(task),
            Command::Schedule { id, delay, task } => {
                timers.schedule(id, deadline_after(Instant::now(), delay), task);
            }
            Command::Cancel(id) => {
                timers.cancel(id);
            }
            Command::Shutdown => break,
        }
    }

    tracing::info!(discarded = timers.len(), "scheduler context stopped");
}
