//! The store client contract
//!
//! [`StoreClient`] is the seam between this crate family and whatever actually
//! talks to the store. It exposes exactly four primitives: read-once,
//! subscribe, write and transact.
//!
//! All methods return immediately. Completions arrive later on an unspecified
//! thread:
//!
//! - `read_once`, `write`, `transact` invoke their callback exactly once
//! - `subscribe` invokes its callback once per observed change until
//!   `unsubscribe`; an `Err` event ends the subscription on the store side
//!
//! Thread safety: implementations must be `Send + Sync`, and callbacks may be
//! invoked concurrently from several threads.

use std::sync::Arc;

use crate::error::StoreResult;
use crate::path::Path;
use crate::query::Query;
use crate::snapshot::NodeSnapshot;
use crate::value::Value;

/// Completion of a single read
pub type ReadCallback = Box<dyn FnOnce(StoreResult<NodeSnapshot>) + Send>;

/// Completion of a write
pub type WriteCallback = Box<dyn FnOnce(StoreResult<()>) + Send>;

/// Per-change notification of a subscription
pub type EventCallback = Arc<dyn Fn(StoreResult<NodeSnapshot>) + Send + Sync>;

/// Transaction body, run against the live node at commit time
///
/// The store may run the handler more than once if it has to re-evaluate
/// against a newer snapshot; only the decision from the final run counts.
pub type TransactionHandler = Box<dyn FnMut(&NodeSnapshot) -> TransactionDecision + Send>;

/// Completion of a transaction
pub type TransactCallback = Box<dyn FnOnce(StoreResult<TransactionOutcome>) + Send>;

/// What a transaction handler asks the store to do
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionDecision {
    /// Leave the node unchanged
    Abort,
    /// Replace the node with this value
    Commit(Value),
}

/// How a transaction ended
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// The new value is stored; the snapshot is the committed node
    Committed(NodeSnapshot),
    /// The handler aborted; nothing was written
    Aborted,
}

impl TransactionOutcome {
    /// True for `Committed`
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed(_))
    }
}

/// Store-side identifier of a live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Asynchronous access to the store tree
pub trait StoreClient: Send + Sync {
    /// Read a node once, applying the query's ordering and limit
    fn read_once(&self, query: &Query, done: ReadCallback);

    /// Observe a node; `on_event` receives the current value and every change
    fn subscribe(&self, path: &Path, on_event: EventCallback) -> SubscriptionId;

    /// Stop a subscription; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);

    /// Replace the value at `path` (`Value::Null` removes it)
    fn write(&self, path: &Path, value: Value, done: WriteCallback);

    /// Atomically read-modify-write the node at `path`
    fn transact(&self, path: &Path, handler: TransactionHandler, done: TransactCallback);
}
