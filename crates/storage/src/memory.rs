//! In-memory store
//!
//! [`MemoryStore`] implements the [`StoreClient`] contract over a single
//! in-process tree. It is the store the client layers are tested against and
//! behaves like the remote one in the ways that matter to them:
//!
//! - every primitive returns before its completion runs
//! - transactions are serialized: each handler sees the latest committed node
//! - subscribers get the current value on subscribe, then one event per change
//!   at, above or below their path
//! - a [`FaultPlan`] can deny paths, fail primitives, drop completions, or
//!   inject competing writes ahead of a transaction
//!
//! ## Locking
//!
//! The tree mutex is never held while a callback runs. Lock order is
//! tree → faults → subscriptions; the fault plan is also taken alone.

use canopy_core::{
    EventCallback, NodeSnapshot, Path, Query, ReadCallback, StoreClient, StoreError,
    SubscriptionId, TransactCallback, TransactionDecision, TransactionHandler,
    TransactionOutcome, Value, WriteCallback,
};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::dispatch::{Delivery, DeliveryMode, Dispatcher};
use crate::faults::{FaultPlan, Primitive};

/// Counters of store activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `read_once` calls
    pub reads: u64,
    /// `write` calls
    pub writes: u64,
    /// `transact` calls
    pub transactions: u64,
    /// Transactions that committed
    pub commits: u64,
    /// Transactions whose handler aborted
    pub aborts: u64,
    /// `subscribe` calls
    pub subscribes: u64,
    /// Operations swallowed while partitioned
    pub swallowed: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    transactions: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    subscribes: AtomicU64,
    swallowed: AtomicU64,
}

struct Tree {
    root: Value,
    /// Transactions evaluated per path, passed to the interceptor
    evaluated: HashMap<Path, u64>,
}

struct Subscription {
    path: Path,
    callback: EventCallback,
}

/// Thread-safe in-process implementation of [`StoreClient`]
pub struct MemoryStore {
    tree: Mutex<Tree>,
    faults: Mutex<FaultPlan>,
    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    next_subscription: AtomicU64,
    counters: Counters,
    dispatcher: Dispatcher,
}

impl MemoryStore {
    /// Empty store delivering completions on one background thread
    pub fn new() -> Self {
        Self::with_delivery(DeliveryMode::default())
    }

    /// Empty store with the given delivery mode
    pub fn with_delivery(mode: DeliveryMode) -> Self {
        MemoryStore {
            tree: Mutex::new(Tree {
                root: Value::Null,
                evaluated: HashMap::new(),
            }),
            faults: Mutex::new(FaultPlan::default()),
            subscriptions: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            counters: Counters::default(),
            dispatcher: Dispatcher::new(mode),
        }
    }

    /// Store `value` at `path` synchronously, notifying subscribers
    pub fn seed(&self, path: &Path, value: impl Into<Value>) {
        let deliveries = {
            let mut tree = self.tree.lock();
            tree.root.set_at(path.segments(), value.into());
            self.change_events(&tree.root, path)
        };
        self.dispatcher.deliver_all(deliveries);
    }

    /// Current value at `path`, read synchronously
    pub fn value_at(&self, path: &Path) -> Option<Value> {
        self.tree.lock().root.get_at(path.segments()).cloned()
    }

    /// Snapshot of `path`, read synchronously
    pub fn snapshot(&self, path: &Path) -> NodeSnapshot {
        NodeSnapshot::new(path.clone(), self.value_at(path))
    }

    /// Access the fault plan
    pub fn faults(&self) -> MutexGuard<'_, FaultPlan> {
        self.faults.lock()
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Activity counters
    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            reads: c.reads.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            transactions: c.transactions.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            aborts: c.aborts.load(Ordering::Relaxed),
            subscribes: c.subscribes.load(Ordering::Relaxed),
            swallowed: c.swallowed.load(Ordering::Relaxed),
        }
    }

    /// Block until every queued completion has run
    pub fn drain(&self) {
        self.dispatcher.drain();
    }

    /// Apply denial, queued failure and partition faults for one call
    ///
    /// `Err(None)` means the call is swallowed; `Err(Some(e))` fails it with `e`.
    fn check_faults(&self, primitive: Primitive, path: &Path) -> Result<(), Option<StoreError>> {
        let mut faults = self.faults.lock();
        if faults.is_partitioned() {
            self.counters.swallowed.fetch_add(1, Ordering::Relaxed);
            debug!(target: "canopy::store", path = %path, ?primitive, "swallowed while partitioned");
            return Err(None);
        }
        if let Some(denied) = faults.denial_for(path) {
            return Err(Some(denied));
        }
        if let Some(failure) = faults.take_failure(primitive) {
            return Err(Some(failure));
        }
        Ok(())
    }

    /// Events for every subscription overlapping `changed`
    fn change_events(&self, root: &Value, changed: &Path) -> Vec<Delivery> {
        let mut deliveries: Vec<Delivery> = Vec::new();
        for entry in self.subscriptions.iter() {
            let subscription = Arc::clone(entry.value());
            if !subscription.path.overlaps(changed) {
                continue;
            }
            let snapshot = NodeSnapshot::new(
                subscription.path.clone(),
                root.get_at(subscription.path.segments()).cloned(),
            );
            deliveries.push(Box::new(move || (subscription.callback)(Ok(snapshot))));
        }
        deliveries
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreClient for MemoryStore {
    fn read_once(&self, query: &Query, done: ReadCallback) {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let result = match self.check_faults(Primitive::Read, &query.path) {
            Ok(()) => {
                let tree = self.tree.lock();
                let node = tree.root.get_at(query.path.segments());
                Ok(NodeSnapshot::new(query.path.clone(), query.apply(node)))
            }
            Err(None) => return,
            Err(Some(e)) => Err(e),
        };
        self.dispatcher.deliver(Box::new(move || done(result)));
    }

    fn subscribe(&self, path: &Path, on_event: EventCallback) -> SubscriptionId {
        self.counters.subscribes.fetch_add(1, Ordering::Relaxed);
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));

        match self.check_faults(Primitive::Subscribe, path) {
            Ok(()) => {}
            Err(None) => return id,
            Err(Some(e)) => {
                self.dispatcher.deliver(Box::new(move || on_event(Err(e))));
                return id;
            }
        }

        let subscription = Arc::new(Subscription {
            path: path.clone(),
            callback: on_event,
        });
        self.subscriptions.insert(id, Arc::clone(&subscription));

        let initial = {
            let tree = self.tree.lock();
            NodeSnapshot::new(path.clone(), tree.root.get_at(path.segments()).cloned())
        };
        self.dispatcher
            .deliver(Box::new(move || (subscription.callback)(Ok(initial))));
        debug!(target: "canopy::store", path = %path, id = id.0, "subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscriptions.remove(&id).is_some() {
            debug!(target: "canopy::store", id = id.0, "unsubscribed");
        }
    }

    fn write(&self, path: &Path, value: Value, done: WriteCallback) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let mut deliveries = match self.check_faults(Primitive::Write, path) {
            Ok(()) => {
                let mut tree = self.tree.lock();
                tree.root.set_at(path.segments(), value);
                self.change_events(&tree.root, path)
            }
            Err(None) => return,
            Err(Some(e)) => {
                self.dispatcher.deliver(Box::new(move || done(Err(e))));
                return;
            }
        };
        deliveries.push(Box::new(move || done(Ok(()))));
        self.dispatcher.deliver_all(deliveries);
    }

    fn transact(&self, path: &Path, mut handler: TransactionHandler, done: TransactCallback) {
        self.counters.transactions.fetch_add(1, Ordering::Relaxed);
        match self.check_faults(Primitive::Transact, path) {
            Ok(()) => {}
            Err(None) => return,
            Err(Some(e)) => {
                self.dispatcher.deliver(Box::new(move || done(Err(e))));
                return;
            }
        }

        let mut deliveries: Vec<Delivery> = Vec::new();
        let outcome = {
            let mut tree = self.tree.lock();

            let evaluated = {
                let count = tree.evaluated.entry(path.clone()).or_insert(0);
                let seen = *count;
                *count += 1;
                seen
            };
            if let Some(interceptor) = self.faults.lock().interceptor_mut() {
                let before = tree.root.get_at(path.segments()).cloned().unwrap_or(Value::Null);
                let mut node = before.clone();
                interceptor(path, &mut node, evaluated);
                if node != before {
                    tree.root.set_at(path.segments(), node);
                    deliveries.extend(self.change_events(&tree.root, path));
                }
            }

            let current = NodeSnapshot::new(path.clone(), tree.root.get_at(path.segments()).cloned());
            match handler(&current) {
                TransactionDecision::Abort => {
                    self.counters.aborts.fetch_add(1, Ordering::Relaxed);
                    TransactionOutcome::Aborted
                }
                TransactionDecision::Commit(value) => {
                    tree.root.set_at(path.segments(), value);
                    deliveries.extend(self.change_events(&tree.root, path));
                    self.counters.commits.fetch_add(1, Ordering::Relaxed);
                    TransactionOutcome::Committed(NodeSnapshot::new(
                        path.clone(),
                        tree.root.get_at(path.segments()).cloned(),
                    ))
                }
            }
        };

        deliveries.push(Box::new(move || done(Ok(outcome))));
        self.dispatcher.deliver_all(deliveries);
    }
}
