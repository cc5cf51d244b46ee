//! The client facade
//!
//! [`Client`] binds one store to one registry, error channel, query memo and
//! allocator. Every method returns immediately; results arrive through the
//! callbacks passed in, possibly on another thread.
//!
//! | Call | Registry operation |
//! |------|--------------------|
//! | `allocate(path, value, ..)` | ReadOnce + Transact loop (see `canopy_concurrency`) |
//! | `get(target, ..)` | `ReadOnce(query)` |
//! | `watch(target, ..)` | `Subscribe(path)` |
//! | `set(path, value, ..)` | `Write(path, value)` |
//! | `transact(path, handler, ..)` | `Transact(path, handler)` |
//!
//! Every failure is recorded in the client's error channel before the
//! caller's error callback runs, so [`Client::last_error`] reflects it from
//! inside that callback.

use canopy_concurrency::{AllocationHandle, AllocationListener, IdAllocator};
use canopy_core::{
    ErrorRecord, NodeSnapshot, Path, Query, Reference, StoreClient, StoreError,
    TransactionDecision, TransactionOutcome, Value,
};
use canopy_engine::{
    ClientConfig, Completion, ConfigError, ErrorChannel, ErrorSubscriber, Listener, Operation,
    OperationRegistry, QueryMemo, RequestHandle, RetryTimer, Target,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::{ClientId, WatchHandle};

/// Asynchronous access to a store
pub struct Client {
    id: ClientId,
    config: ClientConfig,
    registry: OperationRegistry,
    memo: QueryMemo,
    allocator: IdAllocator,
}

impl Client {
    /// Client with default configuration
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self::build(store, ClientConfig::default())
    }

    /// Client with validated configuration
    pub fn with_config(store: Arc<dyn StoreClient>, config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(store, config))
    }

    fn build(store: Arc<dyn StoreClient>, config: ClientConfig) -> Self {
        let registry = OperationRegistry::with_options(
            store,
            Arc::new(ErrorChannel::new()),
            Arc::new(RetryTimer::new()),
            config.request_timeout(),
        );
        let allocator = IdAllocator::with_config(registry.clone(), &config);
        let id = ClientId::new();
        debug!(target: "canopy::registry", client = %id, ?config, "client created");
        Client {
            id,
            config,
            registry,
            memo: QueryMemo::new(),
            allocator,
        }
    }

    /// This client's identifier
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Configuration in effect
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying registry
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// The query memo used by `get` and `watch`
    pub fn memo(&self) -> &QueryMemo {
        &self.memo
    }

    /// Parse a path string, recording a malformed path as an error
    pub fn path(&self, input: &str) -> Result<Path, StoreError> {
        Path::parse(input).map_err(|reason| {
            let error = StoreError::malformed_path(input, reason);
            self.registry.record_error(&error, &Path::root());
            error
        })
    }

    /// Build a reference and make it the memoized one
    pub fn reference(&self, query: Query) -> Reference {
        self.memo.reference(query)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Allocate the next integer key under `path` and store `value` there
    ///
    /// `on_allocated` receives the new child's path and a reference to it.
    pub fn allocate(
        &self,
        path: &Path,
        value: impl Into<Value>,
        on_allocated: impl FnOnce(Path, Reference) + Send + 'static,
        on_error: impl FnOnce(StoreError) + Send + 'static,
    ) -> AllocationHandle {
        self.allocator.allocate(
            path.clone(),
            value,
            AllocationListener::new(move |allocation| {
                on_allocated(allocation.path, allocation.reference)
            })
            .on_error(on_error),
        )
    }

    /// Allocate with full access to the [`canopy_concurrency::Allocation`] result
    pub fn allocate_with(
        &self,
        path: &Path,
        value: impl Into<Value>,
        listener: AllocationListener,
    ) -> AllocationHandle {
        self.allocator.allocate(path.clone(), value, listener)
    }

    /// Read a path or reference once
    pub fn get(
        &self,
        target: impl Into<Target>,
        on_value: impl FnOnce(Path, NodeSnapshot) + Send + 'static,
        on_error: impl FnOnce(StoreError) + Send + 'static,
    ) -> RequestHandle {
        let resolved = self.memo.resolve(target);
        let path = resolved.path.clone();
        self.registry.issue(
            Operation::ReadOnce(resolved.reference.query().clone()),
            once_listener(
                move |completion| match completion.into_snapshot() {
                    Some(snapshot) => on_value(path, snapshot),
                    None => unexpected(&path, "read"),
                },
                on_error,
            ),
        )
    }

    /// Observe a path or reference until cancelled
    ///
    /// `on_value` runs with the current value, then once per change. Ordering
    /// and limits on a reference are not applied to subscriptions.
    pub fn watch(
        &self,
        target: impl Into<Target>,
        mut on_value: impl FnMut(Path, NodeSnapshot) + Send + 'static,
        on_error: impl FnMut(StoreError) + Send + 'static,
    ) -> WatchHandle {
        let path = self.memo.resolve(target).path;
        let watched = path.clone();
        let request = self.registry.issue(
            Operation::Subscribe(path),
            Listener::new(move |completion: Completion| match completion.into_snapshot() {
                Some(snapshot) => on_value(watched.clone(), snapshot),
                None => unexpected(&watched, "watch"),
            })
            .on_error(on_error),
        );
        WatchHandle { request }
    }

    /// Stop a watch; false if it had already ended
    pub fn cancel(&self, handle: &WatchHandle) -> bool {
        self.registry.cancel(&handle.request)
    }

    /// Replace the value at `path`
    pub fn set(
        &self,
        path: &Path,
        value: impl Into<Value>,
        on_complete: impl FnOnce(Path) + Send + 'static,
        on_error: impl FnOnce(StoreError) + Send + 'static,
    ) -> RequestHandle {
        let written = path.clone();
        self.registry.issue(
            Operation::Write(path.clone(), value.into()),
            once_listener(
                move |completion| match completion {
                    Completion::Written(path) => on_complete(path),
                    _ => unexpected(&written, "write"),
                },
                on_error,
            ),
        )
    }

    /// Atomically read-modify-write the node at `path`
    ///
    /// `handler` sees the node as the store has it at commit time and may run
    /// more than once.
    pub fn transact(
        &self,
        path: &Path,
        handler: impl FnMut(&NodeSnapshot) -> TransactionDecision + Send + 'static,
        on_complete: impl FnOnce(Path, TransactionOutcome) + Send + 'static,
        on_error: impl FnOnce(StoreError) + Send + 'static,
    ) -> RequestHandle {
        let target = path.clone();
        self.registry.issue(
            Operation::Transact(path.clone(), Box::new(handler)),
            once_listener(
                move |completion| match completion.into_outcome() {
                    Some(outcome) => on_complete(target, outcome),
                    None => unexpected(&target, "transact"),
                },
                on_error,
            ),
        )
    }

    // =========================================================================
    // Error channel
    // =========================================================================

    /// The most recent failure, if not cleared
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.registry.errors().current()
    }

    /// Discard the recorded failure; no-op when there is none
    pub fn clear_last_error(&self) {
        self.registry.errors().clear();
    }

    /// True if a failure is recorded
    pub fn has_error(&self) -> bool {
        self.registry.errors().has_error()
    }

    /// Replace the error subscriber; `None` stops notification
    pub fn set_error_subscriber(&self, subscriber: Option<ErrorSubscriber>) {
        self.registry.errors().set_subscriber(subscriber);
    }

    /// Requests in flight, including live watches
    pub fn pending_requests(&self) -> usize {
        self.registry.pending_count()
    }
}

/// Adapt single-shot callbacks to the registry's listener
///
/// Terminal requests complete at most once, so each callback runs at most once.
fn once_listener(
    on_value: impl FnOnce(Completion) + Send + 'static,
    on_error: impl FnOnce(StoreError) + Send + 'static,
) -> Listener {
    let mut on_value = Some(on_value);
    let mut on_error = Some(on_error);
    Listener::new(move |completion: Completion| {
        if let Some(f) = on_value.take() {
            f(completion);
        }
    })
    .on_error(move |error| {
        if let Some(f) = on_error.take() {
            f(error);
        }
    })
}

fn unexpected(path: &Path, operation: &str) {
    warn!(target: "canopy::registry", path = %path, operation, "completion of the wrong kind dropped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_storage::{DeliveryMode, MemoryStore, Primitive};
    use std::sync::mpsc;
    use std::time::Duration;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn inline() -> (Arc<MemoryStore>, Client) {
        let store = Arc::new(MemoryStore::with_delivery(DeliveryMode::Inline));
        let client = Client::new(store.clone());
        (store, client)
    }

    #[test]
    fn test_set_then_get() {
        let (_store, client) = inline();
        let (tx, rx) = mpsc::channel();
        client.set(&path("a/b"), 5, move |p| tx.send(p).unwrap(), |_| {});
        assert_eq!(rx.recv().unwrap(), path("a/b"));

        let (tx, rx) = mpsc::channel();
        client.get(
            &path("a"),
            move |p, snap| tx.send((p, snap)).unwrap(),
            |e| panic!("{}", e),
        );
        let (p, snap) = rx.recv().unwrap();
        assert_eq!(p, path("a"));
        assert!(snap.has_child("b"));
    }

    #[test]
    fn test_get_through_memoized_reference() {
        let (store, client) = inline();
        for k in 0..5 {
            store.seed(&path(&format!("jobs/{}", k)), k);
        }
        let reference = client.reference(Query::new(path("jobs")).order_by_key().limit_to_first(2));
        let (tx, rx) = mpsc::channel();
        client.get(&reference, move |_, snap| tx.send(snap).unwrap(), |_| {});
        assert_eq!(rx.recv().unwrap().child_keys(), vec!["0", "1"]);
        assert_eq!(client.memo().hits(), 1);
    }

    #[test]
    fn test_transact_outcome() {
        let (store, client) = inline();
        store.seed(&path("n"), 41);
        let (tx, rx) = mpsc::channel();
        client.transact(
            &path("n"),
            |snap: &NodeSnapshot| {
                TransactionDecision::Commit(Value::Int(snap.value().and_then(Value::as_int).unwrap_or(0) + 1))
            },
            move |p, outcome| tx.send((p, outcome)).unwrap(),
            |_| {},
        );
        let (p, outcome) = rx.recv().unwrap();
        assert_eq!(p, path("n"));
        assert!(outcome.is_committed());
        assert_eq!(store.value_at(&path("n")), Some(Value::Int(42)));
    }

    #[test]
    fn test_error_visible_inside_callback() {
        let (store, client) = inline();
        let client = Arc::new(client);
        store.faults().fail_next(Primitive::Write, StoreError::transport("offline"));
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&client);
        client.set(&path("x"), 1, |_| {}, move |_| tx.send(inner.last_error()).unwrap());
        let record = rx.recv().unwrap().unwrap();
        assert_eq!(record.cause, StoreError::transport("offline"));
        assert_eq!(record.path, path("x"));
    }

    #[test]
    fn test_malformed_path_recorded() {
        let (_store, client) = inline();
        let error = client.path("bad#segment").unwrap_err();
        assert_eq!(error.kind(), canopy_core::ErrorKind::MalformedPath);
        assert!(client.has_error());
        client.clear_last_error();
        assert!(!client.has_error());
    }

    #[test]
    fn test_with_config_validates() {
        let store = Arc::new(MemoryStore::new());
        let mut config = ClientConfig::default();
        config.retry.base_delay_ms = 1000;
        config.retry.max_delay_ms = 1;
        assert!(matches!(
            Client::with_config(store, config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_request_timeout_from_config() {
        let store = Arc::new(MemoryStore::with_delivery(DeliveryMode::Inline));
        let config = ClientConfig::from_toml_str("request_timeout_ms = 10").unwrap();
        let client = Client::with_config(store.clone(), config).unwrap();
        store.faults().set_partitioned(true);
        let (tx, rx) = mpsc::channel();
        client.get(&path("slow"), |_, _| {}, move |e| tx.send(e).unwrap());
        let error = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(error.kind(), canopy_core::ErrorKind::Timeout);
        assert_eq!(client.pending_requests(), 0);
    }
}
