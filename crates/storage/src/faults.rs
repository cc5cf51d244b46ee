//! Fault injection for the in-memory store
//!
//! A [`FaultPlan`] lets tests make the store misbehave the way a remote store
//! can: refuse paths, fail particular primitives, go silent, or let a
//! "competing writer" change a node right before a transaction evaluates it.

use canopy_core::{Path, StoreError, Value};
use std::collections::{HashMap, VecDeque};

/// One of the four store primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `read_once`
    Read,
    /// `subscribe`
    Subscribe,
    /// `write`
    Write,
    /// `transact`
    Transact,
}

/// Mutates a node just before a transaction handler sees it
///
/// Receives the transaction path, the node value (`Null` if absent) and the
/// number of transactions evaluated on that path so far. Whatever the
/// interceptor leaves in the value is committed as if another client had
/// written it.
pub type TransactionInterceptor = Box<dyn FnMut(&Path, &mut Value, u64) + Send>;

/// Pending misbehavior for a store
#[derive(Default)]
pub struct FaultPlan {
    denied: Vec<Path>,
    failures: HashMap<Primitive, VecDeque<StoreError>>,
    partitioned: bool,
    interceptor: Option<TransactionInterceptor>,
}

impl FaultPlan {
    /// Refuse every operation at or below `prefix`
    pub fn deny(&mut self, prefix: Path) {
        self.denied.push(prefix);
    }

    /// Lift every denial
    pub fn allow_all(&mut self) {
        self.denied.clear();
    }

    /// Denial error for `path`, if a denied prefix covers it
    pub fn denial_for(&self, path: &Path) -> Option<StoreError> {
        self.denied
            .iter()
            .any(|prefix| prefix.contains(path))
            .then(|| StoreError::denied(path.clone()))
    }

    /// Fail the next call of `primitive` with `error`
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&mut self, primitive: Primitive, error: StoreError) {
        self.failures.entry(primitive).or_default().push_back(error);
    }

    /// Take the next queued failure for `primitive`
    pub fn take_failure(&mut self, primitive: Primitive) -> Option<StoreError> {
        self.failures.get_mut(&primitive)?.pop_front()
    }

    /// Swallow every completion while set
    pub fn set_partitioned(&mut self, partitioned: bool) {
        self.partitioned = partitioned;
    }

    /// True if completions are being swallowed
    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    /// Install a transaction interceptor, replacing any previous one
    pub fn intercept_transactions(&mut self, interceptor: TransactionInterceptor) {
        self.interceptor = Some(interceptor);
    }

    /// Remove the transaction interceptor
    pub fn clear_interceptor(&mut self) {
        self.interceptor = None;
    }

    pub(crate) fn interceptor_mut(&mut self) -> Option<&mut TransactionInterceptor> {
        self.interceptor.as_mut()
    }
}
