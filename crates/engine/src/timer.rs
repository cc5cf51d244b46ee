//! Delayed task execution
//!
//! [`RetryTimer`] runs tasks after a delay on one lazily started thread
//! (`canopy-timer`). The ID allocator uses it for backoff between attempts and
//! the registry for request deadlines. Every task runs on that thread, zero
//! delays included, so a task never runs on the stack that scheduled it.
//!
//! Tasks still queued at shutdown are dropped without running.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, warn};

type Task = Box<dyn FnOnce() + Send>;

struct Scheduled {
    due: Instant,
    sequence: u64,
    task: Task,
}

impl Eq for Scheduled {}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

// Earliest deadline first, then lower sequence (older) first
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then(other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TimerInner {
    queue: Mutex<BinaryHeap<Scheduled>>,
    wake: Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
}

/// Runs tasks after a delay on a background thread
pub struct RetryTimer {
    inner: Arc<TimerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetryTimer {
    /// Create a timer; its thread starts on first delayed task
    pub fn new() -> Self {
        RetryTimer {
            inner: Arc::new(TimerInner {
                queue: Mutex::new(BinaryHeap::new()),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Run `task` on the timer thread after `delay`
    ///
    /// Never blocks the caller. After shutdown, or if the thread cannot be
    /// started, the task is dropped without running.
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        if self.inner.shutdown.load(AtomicOrdering::Acquire) {
            warn!(target: "canopy::registry", "timer shut down, dropping delayed task");
            return;
        }
        if !self.ensure_started() {
            warn!(target: "canopy::registry", ?delay, "no timer thread, dropping delayed task");
            return;
        }

        let sequence = self.inner.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.inner.queue.lock().push(Scheduled {
            due: Instant::now() + delay,
            sequence,
            task: Box::new(task),
        });
        self.inner.wake.notify_one();
    }

    /// Number of tasks waiting for their deadline
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Stop the thread and drop queued tasks
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::Release);
        let dropped = {
            let mut queue = self.inner.queue.lock();
            self.inner.wake.notify_all();
            std::mem::take(&mut *queue)
        };
        // Tasks may own handles whose drop re-enters the timer.
        drop(dropped);
        if let Some(handle) = self.worker.lock().take() {
            // The last timer handle may be dropped by a task on the timer thread.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    fn ensure_started(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return true;
        }
        let inner = Arc::clone(&self.inner);
        match std::thread::Builder::new()
            .name("canopy-timer".to_string())
            .spawn(move || timer_loop(&inner))
        {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                error!(target: "canopy::registry", error = %e, "failed to spawn timer thread");
                false
            }
        }
    }
}

impl Default for RetryTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(inner: &TimerInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if inner.shutdown.load(AtomicOrdering::Acquire) {
                    return;
                }
                let next_due = queue.peek().map(|s| s.due);
                match next_due {
                    None => {
                        inner.wake.wait(&mut queue);
                    }
                    Some(due) if due <= Instant::now() => {
                        if let Some(scheduled) = queue.pop() {
                            break scheduled.task;
                        }
                    }
                    Some(due) => {
                        inner.wake.wait_until(&mut queue, due);
                    }
                }
            }
        };

        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                target: "canopy::registry",
                "delayed task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
