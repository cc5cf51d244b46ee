//! Operation registry
//!
//! Tracks every in-flight store request and routes its completion back to the
//! listener that issued it.
//!
//! ## Request lifecycle
//!
//! ```text
//! issue()    → PendingRequest registered → store primitive called
//! complete() → lookup by RequestId
//!              ├─ error: ErrorChannel::record, then on_error (or log and drop)
//!              └─ value: on_value
//!              ReadOnce/Write/Transact: removed before the listener runs
//!              Subscribe: stays until cancel() or an error event
//! ```
//!
//! A completion for an id that is no longer pending (already completed,
//! cancelled, or expired by its deadline) is logged and dropped.
//!
//! ## Delivery
//!
//! One request's listener never runs on two threads at once. A completion that
//! arrives while the listener is busy (including re-entrantly, from inside the
//! listener) is queued on the request and delivered by the thread already
//! running it, in arrival order.
//!
//! Store callbacks hold only a weak handle to the registry, so dropping the
//! registry silently discards completions that arrive later.

use canopy_core::{
    ErrorRecord, NodeSnapshot, Path, Query, StoreClient, StoreError, StoreResult,
    SubscriptionId, Timestamp, TransactionHandler, TransactionOutcome, Value,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error_channel::ErrorChannel;
use crate::timer::RetryTimer;

// ============================================================================
// Request types
// ============================================================================

/// Kind of store request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Single read
    ReadOnce,
    /// Persistent subscription
    Subscribe,
    /// Write
    Write,
    /// Transaction
    Transact,
}

impl RequestKind {
    /// True for kinds that complete exactly once
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestKind::Subscribe)
    }
}

/// A store operation ready to issue
pub enum Operation {
    /// Read a node once with the query's ordering and limit
    ReadOnce(Query),
    /// Observe a node until cancelled
    Subscribe(Path),
    /// Replace the value at a path
    Write(Path, Value),
    /// Read-modify-write a node atomically
    Transact(Path, TransactionHandler),
}

impl Operation {
    /// Kind of request this operation becomes
    pub fn kind(&self) -> RequestKind {
        match self {
            Operation::ReadOnce(_) => RequestKind::ReadOnce,
            Operation::Subscribe(_) => RequestKind::Subscribe,
            Operation::Write(_, _) => RequestKind::Write,
            Operation::Transact(_, _) => RequestKind::Transact,
        }
    }

    /// Path the operation targets
    pub fn path(&self) -> &Path {
        match self {
            Operation::ReadOnce(query) => &query.path,
            Operation::Subscribe(path) | Operation::Write(path, _) | Operation::Transact(path, _) => {
                path
            }
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self.path())
    }
}

/// Successful result of a request, tagged by kind
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// ReadOnce or Subscribe event
    Value(NodeSnapshot),
    /// Write finished at this path
    Written(Path),
    /// Transaction finished
    Transacted(TransactionOutcome),
}

impl Completion {
    /// The snapshot of a `Value` completion
    pub fn into_snapshot(self) -> Option<NodeSnapshot> {
        match self {
            Completion::Value(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    /// The outcome of a `Transacted` completion
    pub fn into_outcome(self) -> Option<TransactionOutcome> {
        match self {
            Completion::Transacted(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Receives successful completions
pub type ValueListener = Box<dyn FnMut(Completion) + Send>;

/// Receives failures
pub type ErrorListener = Box<dyn FnMut(StoreError) + Send>;

/// Callbacks attached to one request
pub struct Listener {
    on_value: ValueListener,
    on_error: Option<ErrorListener>,
}

impl Listener {
    /// Listener with a value callback and no error callback
    pub fn new(on_value: impl FnMut(Completion) + Send + 'static) -> Self {
        Listener {
            on_value: Box::new(on_value),
            on_error: None,
        }
    }

    /// Attach an error callback
    pub fn on_error(mut self, on_error: impl FnMut(StoreError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    fn deliver(&mut self, id: RequestId, result: StoreResult<Completion>) {
        match result {
            Ok(completion) => (self.on_value)(completion),
            Err(error) => match self.on_error.as_mut() {
                Some(on_error) => on_error(error),
                None => warn!(
                    target: "canopy::registry",
                    request = id.0,
                    kind = %error.kind(),
                    error = %error,
                    "no error listener, dropping failure"
                ),
            },
        }
    }
}

/// Opaque token identifying one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw token value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Handle returned by [`OperationRegistry::issue`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestHandle {
    /// Request token
    pub id: RequestId,
    /// Kind of request
    pub kind: RequestKind,
    /// Path the request targets
    pub path: Path,
}

struct PendingRequest {
    id: RequestId,
    kind: RequestKind,
    path: Path,
    created_at: Timestamp,
    issued: Instant,
    deadline: Option<Instant>,
    listener: Mutex<Listener>,
    backlog: Mutex<VecDeque<StoreResult<Completion>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl PendingRequest {
    /// Queue `result` and deliver everything queued unless another thread is
    fn deliver(&self, result: StoreResult<Completion>) {
        self.backlog.lock().push_back(result);
        loop {
            {
                let Some(mut listener) = self.listener.try_lock() else {
                    return;
                };
                loop {
                    let next = self.backlog.lock().pop_front();
                    match next {
                        Some(result) => listener.deliver(self.id, result),
                        None => break,
                    }
                }
            }
            // A result queued between the last pop and the unlock is ours to deliver.
            if self.backlog.lock().is_empty() {
                return;
            }
        }
    }
}

/// Snapshot of one pending request, for introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    /// Request token
    pub id: RequestId,
    /// Kind of request
    pub kind: RequestKind,
    /// Path the request targets
    pub path: Path,
    /// When the request was issued
    pub created_at: Timestamp,
}

// ============================================================================
// Registry
// ============================================================================

struct RegistryInner {
    store: Arc<dyn StoreClient>,
    errors: Arc<ErrorChannel>,
    timer: Arc<RetryTimer>,
    request_timeout: Option<Duration>,
    pending: DashMap<RequestId, Arc<PendingRequest>>,
    next_id: AtomicU64,
    rejected: AtomicU64,
}

/// Issues store operations and matches completions to their listeners
///
/// Cloning shares the same registry.
#[derive(Clone)]
pub struct OperationRegistry {
    inner: Arc<RegistryInner>,
}

impl OperationRegistry {
    /// Registry over `store` with no request deadline
    pub fn new(store: Arc<dyn StoreClient>, errors: Arc<ErrorChannel>) -> Self {
        Self::with_options(store, errors, Arc::new(RetryTimer::new()), None)
    }

    /// Registry with a shared timer and optional per-request deadline
    pub fn with_options(
        store: Arc<dyn StoreClient>,
        errors: Arc<ErrorChannel>,
        timer: Arc<RetryTimer>,
        request_timeout: Option<Duration>,
    ) -> Self {
        OperationRegistry {
            inner: Arc::new(RegistryInner {
                store,
                errors,
                timer,
                request_timeout,
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// The error channel failures are recorded to
    pub fn errors(&self) -> &Arc<ErrorChannel> {
        &self.inner.errors
    }

    /// The timer used for deadlines, shared with callers needing delays
    pub fn timer(&self) -> &Arc<RetryTimer> {
        &self.inner.timer
    }

    /// The underlying store client
    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.inner.store
    }

    /// Register a request and hand it to the store
    ///
    /// Never blocks. The listener may run before this returns if the store
    /// delivers inline.
    pub fn issue(&self, operation: Operation, listener: Listener) -> RequestHandle {
        self.issue_with_timeout(operation, listener, self.inner.request_timeout)
    }

    /// Like [`issue`](Self::issue), but exempt from the request timeout
    ///
    /// For requests whose effect may still land after a deadline, so only
    /// the store's own completion can report how they ended.
    pub fn issue_untimed(&self, operation: Operation, listener: Listener) -> RequestHandle {
        self.issue_with_timeout(operation, listener, None)
    }

    fn issue_with_timeout(
        &self,
        operation: Operation,
        listener: Listener,
        timeout: Option<Duration>,
    ) -> RequestHandle {
        let inner = &self.inner;
        let id = RequestId(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = operation.kind();
        let path = operation.path().clone();
        let issued = Instant::now();
        let deadline = timeout
            .filter(|_| kind.is_terminal())
            .map(|timeout| issued + timeout);

        inner.pending.insert(
            id,
            Arc::new(PendingRequest {
                id,
                kind,
                path: path.clone(),
                created_at: Timestamp::now(),
                issued,
                deadline,
                listener: Mutex::new(listener),
                backlog: Mutex::new(VecDeque::new()),
                subscription: Mutex::new(None),
            }),
        );
        debug!(target: "canopy::registry", request = id.0, ?kind, path = %path, "issued");

        let weak = Arc::downgrade(inner);
        match operation {
            Operation::ReadOnce(query) => {
                inner.store.read_once(
                    &query,
                    Box::new(move |result| {
                        complete_weak(&weak, id, result.map(Completion::Value));
                    }),
                );
            }
            Operation::Write(target, value) => {
                let written = target.clone();
                inner.store.write(
                    &target,
                    value,
                    Box::new(move |result| {
                        complete_weak(&weak, id, result.map(|()| Completion::Written(written)));
                    }),
                );
            }
            Operation::Transact(target, handler) => {
                inner.store.transact(
                    &target,
                    handler,
                    Box::new(move |result| {
                        complete_weak(&weak, id, result.map(Completion::Transacted));
                    }),
                );
            }
            Operation::Subscribe(target) => {
                let subscription = inner.store.subscribe(
                    &target,
                    Arc::new(move |result| {
                        complete_weak(&weak, id, result.map(Completion::Value));
                    }),
                );
                let still_pending = inner.pending.get(&id).map(|entry| Arc::clone(entry.value()));
                match still_pending {
                    Some(request) => *request.subscription.lock() = Some(subscription),
                    // Cancelled or failed before the store returned its id.
                    None => inner.store.unsubscribe(subscription),
                }
            }
        }

        if let Some(timeout) = deadline.map(|d| d - issued) {
            let weak = Arc::downgrade(inner);
            inner.timer.schedule(timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.expire(id, Instant::now());
                }
            });
        }

        RequestHandle { id, kind, path }
    }

    /// Deliver a completion for `handle`
    ///
    /// Returns false if the request is no longer pending; the completion is
    /// then dropped.
    pub fn complete(&self, handle: &RequestHandle, result: StoreResult<Completion>) -> bool {
        self.inner.complete(handle.id, result)
    }

    /// Cancel a subscription
    ///
    /// Returns true if a live subscription was removed. Other kinds and
    /// already-removed handles are ignored.
    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        if handle.kind != RequestKind::Subscribe {
            return false;
        }
        let Some((_, request)) = self.inner.pending.remove(&handle.id) else {
            return false;
        };
        let subscription = request.subscription.lock().take();
        if let Some(subscription) = subscription {
            self.inner.store.unsubscribe(subscription);
        }
        debug!(target: "canopy::registry", request = handle.id.0, path = %handle.path, "cancelled");
        true
    }

    /// Fail every request whose deadline is at or before `now`
    ///
    /// Returns the number of requests expired.
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let overdue: Vec<RequestId> = self
            .inner
            .pending
            .iter()
            .filter(|entry| entry.value().deadline.is_some_and(|d| d <= now))
            .map(|entry| *entry.key())
            .collect();
        overdue
            .into_iter()
            .filter(|id| self.inner.expire(*id, now))
            .count()
    }

    /// Record a failure that did not come from the store
    ///
    /// Used by callers that fail on their own (retry budget, deadlines) so the
    /// error channel still reflects it.
    pub fn record_error(&self, error: &StoreError, path: &Path) {
        self.inner
            .errors
            .record(ErrorRecord::new(error.clone(), path.clone()));
    }

    /// True if `handle` has not completed or been cancelled
    pub fn is_pending(&self, handle: &RequestHandle) -> bool {
        self.inner.pending.contains_key(&handle.id)
    }

    /// Number of requests in flight (including live subscriptions)
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Introspection snapshot of every pending request, oldest first
    pub fn pending(&self) -> Vec<PendingInfo> {
        let mut infos: Vec<PendingInfo> = self
            .inner
            .pending
            .iter()
            .map(|entry| {
                let request = entry.value();
                PendingInfo {
                    id: request.id,
                    kind: request.kind,
                    path: request.path.clone(),
                    created_at: request.created_at,
                }
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Completions dropped because their request was no longer pending
    pub fn rejected_count(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }
}

fn complete_weak(inner: &Weak<RegistryInner>, id: RequestId, result: StoreResult<Completion>) {
    match inner.upgrade() {
        Some(inner) => {
            inner.complete(id, result);
        }
        None => debug!(target: "canopy::registry", request = id.0, "registry dropped, discarding completion"),
    }
}

impl RegistryInner {
    fn complete(&self, id: RequestId, result: StoreResult<Completion>) -> bool {
        let Some(request) = self.pending.get(&id).map(|entry| Arc::clone(entry.value())) else {
            return self.reject(id);
        };

        // An error event ends a subscription on the store side as well.
        let terminal = request.kind.is_terminal() || result.is_err();
        if terminal && self.pending.remove(&id).is_none() {
            return self.reject(id);
        }
        if terminal && request.kind == RequestKind::Subscribe {
            let subscription = request.subscription.lock().take();
            if let Some(subscription) = subscription {
                self.store.unsubscribe(subscription);
            }
        }

        if let Err(error) = &result {
            self.errors
                .record(ErrorRecord::new(error.clone(), request.path.clone()));
        }
        debug!(
            target: "canopy::registry",
            request = id.0,
            kind = ?request.kind,
            ok = result.is_ok(),
            "completed"
        );
        request.deliver(result);
        true
    }

    fn expire(&self, id: RequestId, now: Instant) -> bool {
        let request = match self.pending.get(&id) {
            Some(entry) => Arc::clone(entry.value()),
            None => return false,
        };
        if !request.deadline.is_some_and(|d| d <= now) {
            return false;
        }
        let elapsed = now.saturating_duration_since(request.issued);
        warn!(
            target: "canopy::registry",
            request = id.0,
            path = %request.path,
            ?elapsed,
            "request deadline expired"
        );
        self.complete(
            id,
            Err(StoreError::Timeout {
                path: request.path.clone(),
                elapsed,
            }),
        )
    }

    fn reject(&self, id: RequestId) -> bool {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "canopy::registry",
            request = id.0,
            "completion for unknown or finished request dropped"
        );
        false
    }
}
