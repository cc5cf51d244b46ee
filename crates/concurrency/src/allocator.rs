//! ID allocator
//!
//! Assigns a unique, increasing non-negative integer key to a new child of a
//! path and writes a value there, while other clients race to do the same.
//!
//! ## Protocol
//!
//! ```text
//! QUERYING  ── read path ordered by key, last 1 ──► propose last + 1 (0 if empty)
//! PROPOSING ── transact on path:
//!              key present in live node → Abort → back-off → QUERYING
//!              key absent               → Commit(node + key)  → COMMITTED
//! any store error, exhausted retries, or deadline             → FAILED
//! ```
//!
//! The handler checks the node as the store sees it at commit time, so a key
//! proposed from a stale read is never written twice. Losing a race costs one
//! more read and transaction; waiting between attempts is a timer entry, not a
//! parked thread.
//!
//! Each allocation runs to exactly one of its two callbacks. Store errors
//! reach the error channel through the registry; failures raised here
//! (empty payload, exhausted retries, deadline, malformed key) are recorded
//! explicitly.
//!
//! The allocation deadline is enforced between attempts. A deadline that
//! passes while a transaction is in flight leaves the outcome to that
//! transaction: a commit is delivered as success, an abort as `Timeout`.

use canopy_core::{
    NodeSnapshot, Path, Query, Reference, StoreError, TransactionDecision, TransactionOutcome,
    Value,
};
use canopy_engine::{
    ClientConfig, Completion, Listener, MalformedKeyPolicy, Operation, OperationRegistry,
    RetryConfig,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::proposal::{max_integer_key, propose_key, KeyProposal};

// ============================================================================
// Public types
// ============================================================================

/// Where an allocation is in its protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationState {
    /// Reading the current last key
    Querying,
    /// Transaction for a proposed key in flight
    Proposing,
    /// Value written under its key
    Committed,
    /// Terminated by an error
    Failed,
}

impl AllocationState {
    /// True once the allocation can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, AllocationState::Committed | AllocationState::Failed)
    }
}

/// One query → propose → transact cycle
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationAttempt {
    /// Parent path
    pub path: Path,
    /// Key this cycle tries to claim
    pub proposed_key: u64,
    /// Value to write under it
    pub value: Value,
    /// Cycle number, counting from 1
    pub attempt_number: u32,
}

/// A successful allocation
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Path of the new child (`parent/key`)
    pub path: Path,
    /// Allocated key
    pub key: u64,
    /// Reference to the new child
    pub reference: Reference,
    /// Attempts used, including the winning one
    pub attempts: u32,
}

type AllocatedFn = Box<dyn FnOnce(Allocation) + Send>;
type FailedFn = Box<dyn FnOnce(StoreError) + Send>;

/// Callbacks for one allocation; exactly one of them runs
pub struct AllocationListener {
    on_allocated: AllocatedFn,
    on_error: Option<FailedFn>,
}

impl AllocationListener {
    /// Listener with a success callback and no error callback
    pub fn new(on_allocated: impl FnOnce(Allocation) + Send + 'static) -> Self {
        AllocationListener {
            on_allocated: Box::new(on_allocated),
            on_error: None,
        }
    }

    /// Attach an error callback
    pub fn on_error(mut self, on_error: impl FnOnce(StoreError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

/// Observes a running allocation
#[derive(Clone)]
pub struct AllocationHandle {
    task: Arc<AllocationTask>,
}

impl AllocationHandle {
    /// Parent path being allocated under
    pub fn path(&self) -> &Path {
        &self.task.path
    }

    /// Current protocol state
    pub fn state(&self) -> AllocationState {
        self.task.progress.lock().state
    }

    /// The cycle most recently proposed, if any
    pub fn current_attempt(&self) -> Option<AllocationAttempt> {
        self.task.progress.lock().attempt.clone()
    }

    /// Cycles started so far
    pub fn attempts(&self) -> u32 {
        self.task.progress.lock().attempt_number
    }

    /// True once a callback has run
    pub fn is_finished(&self) -> bool {
        self.task.finish.lock().is_none()
    }
}

impl fmt::Debug for AllocationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.task.progress.lock();
        f.debug_struct("AllocationHandle")
            .field("path", &self.task.path)
            .field("state", &progress.state)
            .field("attempts", &progress.attempt_number)
            .finish()
    }
}

// ============================================================================
// Allocator
// ============================================================================

/// Allocates integer child keys through an [`OperationRegistry`]
#[derive(Clone)]
pub struct IdAllocator {
    registry: OperationRegistry,
    retry: RetryConfig,
    malformed_keys: MalformedKeyPolicy,
    deadline: Option<std::time::Duration>,
}

impl IdAllocator {
    /// Allocator with default retry, deadline and malformed-key settings
    pub fn new(registry: OperationRegistry) -> Self {
        Self::with_config(registry, &ClientConfig::default())
    }

    /// Allocator configured from a [`ClientConfig`]
    pub fn with_config(registry: OperationRegistry, config: &ClientConfig) -> Self {
        IdAllocator {
            registry,
            retry: config.retry.clone(),
            malformed_keys: config.malformed_keys,
            deadline: config.allocation_deadline(),
        }
    }

    /// Retry settings in use
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Allocate the next key under `path` and write `value` there
    ///
    /// Returns immediately. `listener` is called exactly once, from whichever
    /// thread delivers the deciding completion. A value that would store
    /// nothing (`Null` or an empty object) fails with `EmptyValue`.
    pub fn allocate(
        &self,
        path: Path,
        value: impl Into<Value>,
        listener: AllocationListener,
    ) -> AllocationHandle {
        let started = Instant::now();
        let task = Arc::new(AllocationTask {
            registry: self.registry.clone(),
            retry: self.retry.clone(),
            malformed_keys: self.malformed_keys,
            path,
            value: value.into(),
            started,
            deadline: self.deadline.map(|d| started + d),
            progress: Mutex::new(Progress {
                state: AllocationState::Querying,
                attempt_number: 1,
                attempt: None,
            }),
            finish: Mutex::new(Some(listener)),
        });
        debug!(target: "canopy::alloc", path = %task.path, "allocation started");

        // The store would treat the write as a delete and free the key again.
        if task.value.is_empty_node() {
            task.fail(StoreError::EmptyValue {
                path: task.path.clone(),
            });
            return AllocationHandle { task };
        }

        if let Some(limit) = self.deadline {
            let weak = Arc::downgrade(&task);
            self.registry.timer().schedule(limit, move || {
                if let Some(task) = weak.upgrade() {
                    task.on_deadline();
                }
            });
        }

        task.query();
        AllocationHandle { task }
    }
}

// ============================================================================
// Per-allocation state machine
// ============================================================================

struct Progress {
    state: AllocationState,
    attempt_number: u32,
    attempt: Option<AllocationAttempt>,
}

struct AllocationTask {
    registry: OperationRegistry,
    retry: RetryConfig,
    malformed_keys: MalformedKeyPolicy,
    path: Path,
    value: Value,
    started: Instant,
    deadline: Option<Instant>,
    progress: Mutex<Progress>,
    /// Taken by whichever outcome runs first
    finish: Mutex<Option<AllocationListener>>,
}

impl AllocationTask {
    fn query(self: &Arc<Self>) {
        let expired = {
            let mut progress = self.progress.lock();
            if progress.state.is_terminal() || self.is_finished() {
                return;
            }
            let expired = self.past_deadline();
            if !expired {
                progress.state = AllocationState::Querying;
            }
            expired
        };
        if expired {
            self.expire();
            return;
        }

        let query = Query::new(self.path.clone()).order_by_key().limit_to_last(1);
        let on_value = Arc::clone(self);
        let on_error = Arc::clone(self);
        self.registry.issue(
            Operation::ReadOnce(query),
            Listener::new(move |completion: Completion| on_value.on_last_key(completion))
                .on_error(move |error| on_error.fail_from_store(error)),
        );
    }

    fn on_last_key(self: &Arc<Self>, completion: Completion) {
        let Some(snapshot) = self.snapshot_of(completion) else {
            return;
        };
        match propose_key(&snapshot) {
            KeyProposal::Next(key) => self.propose(key),
            KeyProposal::Malformed(key) => match self.malformed_keys {
                MalformedKeyPolicy::Fail => self.fail(StoreError::MalformedKey {
                    path: self.path.clone(),
                    key,
                }),
                MalformedKeyPolicy::Skip => {
                    debug!(target: "canopy::alloc", path = %self.path, key = %key, "non-integer last key, scanning node");
                    let on_value = Arc::clone(self);
                    let on_error = Arc::clone(self);
                    self.registry.issue(
                        Operation::ReadOnce(Query::new(self.path.clone())),
                        Listener::new(move |completion: Completion| {
                            if let Some(snapshot) = on_value.snapshot_of(completion) {
                                let next = max_integer_key(&snapshot).map_or(0, |max| max + 1);
                                on_value.propose(next);
                            }
                        })
                        .on_error(move |error| on_error.fail_from_store(error)),
                    );
                }
            },
        }
    }

    fn propose(self: &Arc<Self>, key: u64) {
        let child_path = match self.path.child(&key.to_string()) {
            Ok(child_path) => child_path,
            Err(reason) => {
                self.fail(StoreError::malformed_path(format!("{}/{}", self.path, key), reason));
                return;
            }
        };
        let attempt = {
            let mut progress = self.progress.lock();
            // Checked under the progress lock so the deadline timer sees
            // either no transaction or one that will decide the outcome.
            if progress.state.is_terminal() || self.is_finished() {
                return;
            }
            if self.past_deadline() {
                drop(progress);
                self.expire();
                return;
            }
            let attempt = AllocationAttempt {
                path: self.path.clone(),
                proposed_key: key,
                value: self.value.clone(),
                attempt_number: progress.attempt_number,
            };
            progress.state = AllocationState::Proposing;
            progress.attempt = Some(attempt.clone());
            attempt
        };
        debug!(
            target: "canopy::alloc",
            path = %self.path,
            key,
            attempt = attempt.attempt_number,
            "proposing key"
        );

        let child = key.to_string();
        let value = attempt.value;
        let handler = Box::new(move |live: &NodeSnapshot| {
            if live.has_child(&child) {
                return TransactionDecision::Abort;
            }
            let mut node = live.value().cloned().unwrap_or(Value::Null);
            node.set_at(std::slice::from_ref(&child), value.clone());
            TransactionDecision::Commit(node)
        });

        let on_value = Arc::clone(self);
        let on_error = Arc::clone(self);
        // A request timeout could report failure for a commit that still lands.
        self.registry.issue_untimed(
            Operation::Transact(self.path.clone(), handler),
            Listener::new(move |completion: Completion| match completion.into_outcome() {
                Some(TransactionOutcome::Committed(_)) => on_value.succeed(key, child_path.clone()),
                Some(TransactionOutcome::Aborted) => on_value.lost_race(key),
                None => unexpected(&on_value.path, "transact"),
            })
            .on_error(move |error| on_error.fail_from_store(error)),
        );
    }

    fn lost_race(self: &Arc<Self>, key: u64) {
        let attempt = self.progress.lock().attempt_number;
        let next = attempt.saturating_add(1);
        if !self.retry.allows_attempt(next) {
            warn!(target: "canopy::alloc", path = %self.path, attempts = attempt, "retry budget exhausted");
            self.fail(StoreError::ConflictExhausted {
                path: self.path.clone(),
                attempts: attempt,
            });
            return;
        }
        if self.past_deadline() {
            self.expire();
            return;
        }

        let delay = self.retry.delay_for(attempt);
        debug!(
            target: "canopy::alloc",
            path = %self.path,
            key,
            attempt,
            ?delay,
            "key taken, retrying"
        );
        {
            let mut progress = self.progress.lock();
            progress.attempt_number = next;
            progress.state = AllocationState::Querying;
        }
        let task = Arc::clone(self);
        self.registry.timer().schedule(delay, move || task.query());
    }

    fn succeed(&self, key: u64, path: Path) {
        let Some(listener) = self.finish.lock().take() else {
            warn!(target: "canopy::alloc", path = %self.path, key, "commit after allocation already ended");
            return;
        };
        let attempts = {
            let mut progress = self.progress.lock();
            progress.state = AllocationState::Committed;
            progress.attempt_number
        };
        info!(target: "canopy::alloc", path = %path, attempts, "allocated");
        (listener.on_allocated)(Allocation {
            reference: Reference::to_path(path.clone()),
            path,
            key,
            attempts,
        });
    }

    /// Fail with an error the registry has already recorded
    fn fail_from_store(&self, error: StoreError) {
        self.finish_with_error(error);
    }

    /// Fail with an error raised by the allocator itself
    fn fail(&self, error: StoreError) {
        if self.is_finished() {
            return;
        }
        self.registry.record_error(&error, &self.path);
        self.finish_with_error(error);
    }

    /// Deadline timer fired
    fn on_deadline(&self) {
        let listener = {
            let mut progress = self.progress.lock();
            if progress.state == AllocationState::Proposing {
                debug!(
                    target: "canopy::alloc",
                    path = %self.path,
                    attempt = progress.attempt_number,
                    "deadline passed during transaction, awaiting its outcome"
                );
                return;
            }
            let Some(listener) = self.finish.lock().take() else {
                return;
            };
            progress.state = AllocationState::Failed;
            listener
        };
        let error = self.timeout();
        self.registry.record_error(&error, &self.path);
        self.deliver_error(listener, error);
    }

    fn timeout(&self) -> StoreError {
        StoreError::Timeout {
            path: self.path.clone(),
            elapsed: self.started.elapsed(),
        }
    }

    fn expire(&self) {
        self.fail(self.timeout());
    }

    fn finish_with_error(&self, error: StoreError) {
        let Some(listener) = self.finish.lock().take() else {
            debug!(target: "canopy::alloc", path = %self.path, error = %error, "error after allocation already ended");
            return;
        };
        self.progress.lock().state = AllocationState::Failed;
        self.deliver_error(listener, error);
    }

    fn deliver_error(&self, listener: AllocationListener, error: StoreError) {
        match listener.on_error {
            Some(on_error) => on_error(error),
            None => warn!(
                target: "canopy::alloc",
                path = %self.path,
                kind = %error.kind(),
                error = %error,
                "allocation failed with no error listener"
            ),
        }
    }

    fn snapshot_of(&self, completion: Completion) -> Option<NodeSnapshot> {
        let snapshot = completion.into_snapshot();
        if snapshot.is_none() {
            unexpected(&self.path, "read");
        }
        snapshot
    }

    fn is_finished(&self) -> bool {
        self.finish.lock().is_none()
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

fn unexpected(path: &Path, operation: &str) {
    warn!(target: "canopy::alloc", path = %path, operation, "completion of the wrong kind dropped");
}
