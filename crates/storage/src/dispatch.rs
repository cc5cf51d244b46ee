//! Completion delivery
//!
//! The in-memory store never runs a callback while holding its own locks.
//! Completions are handed to a [`Dispatcher`], which either runs them on the
//! calling thread (`Inline`) or queues them for a fixed pool of worker threads
//! (`Threaded`), mimicking a network client's I/O threads.
//!
//! With a single worker, completions run in the order they were produced.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// A completion ready to run
pub type Delivery = Box<dyn FnOnce() + Send>;

/// Where completions run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// On the thread that triggered them, after store locks are released
    Inline,
    /// On `workers` background threads
    Threaded {
        /// Number of delivery threads (at least one is started)
        workers: usize,
    },
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Threaded { workers: 1 }
    }
}

struct DispatchInner {
    queue: Mutex<VecDeque<Delivery>>,
    work_ready: Condvar,
    idle: Condvar,
    in_flight: AtomicUsize,
    shutdown: AtomicBool,
}

/// Runs store completions according to a [`DeliveryMode`]
pub struct Dispatcher {
    mode: DeliveryMode,
    inner: Arc<DispatchInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher, starting worker threads for `Threaded`
    ///
    /// Workers are named `canopy-store-0`, `canopy-store-1`, etc.
    pub fn new(mode: DeliveryMode) -> Self {
        let inner = Arc::new(DispatchInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::new();
        if let DeliveryMode::Threaded { workers: count } = mode {
            for i in 0..count.max(1) {
                let inner_clone = Arc::clone(&inner);
                let handle = std::thread::Builder::new()
                    .name(format!("canopy-store-{}", i))
                    .spawn(move || worker_loop(&inner_clone))
                    .expect("failed to spawn store delivery thread");
                workers.push(handle);
            }
        }

        Dispatcher {
            mode,
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Delivery mode in effect
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Run or queue one completion
    ///
    /// After shutdown, threaded deliveries are dropped.
    pub fn deliver(&self, delivery: Delivery) {
        match self.mode {
            DeliveryMode::Inline => run_guarded(delivery),
            DeliveryMode::Threaded { .. } => {
                if self.inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
                self.inner.queue.lock().push_back(delivery);
                self.inner.work_ready.notify_one();
            }
        }
    }

    /// Run or queue several completions in order
    pub fn deliver_all(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.deliver(delivery);
        }
    }

    /// Block until every queued completion has run
    ///
    /// Completions queued by running completions are waited for too.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.in_flight.load(Ordering::Acquire) > 0 {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Stop the workers after they finish the queue
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let current = std::thread::current().id();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            // A worker can drop the last store handle; it must not join itself.
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_guarded(delivery: Delivery) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(delivery)) {
        error!(
            target: "canopy::store",
            "store completion panicked: {:?}",
            e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
        );
    }
}

fn worker_loop(inner: &DispatchInner) {
    loop {
        let delivery = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(delivery) = queue.pop_front() {
                    break delivery;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        run_guarded(delivery);

        if inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _queue = inner.queue.lock();
            inner.idle.notify_all();
        }
    }
}
