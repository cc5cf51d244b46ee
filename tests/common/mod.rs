//! Shared test utilities for integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Once};
use std::time::Duration;

pub use canopy::storage::{DeliveryMode, MemoryStore, Primitive};
pub use canopy::{
    Allocation, AllocationListener, Client, ClientConfig, ErrorKind, NodeSnapshot, Path,
    RetryConfig, StoreError, Value,
};

/// Upper bound on any single wait in these suites
pub const WAIT: Duration = Duration::from_secs(10);

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

pub fn path(s: &str) -> Path {
    Path::parse(s).unwrap()
}

/// Store delivering completions on `workers` background threads
pub fn threaded_store(workers: usize) -> Arc<MemoryStore> {
    init_tracing();
    Arc::new(MemoryStore::with_delivery(DeliveryMode::Threaded { workers }))
}

/// Store delivering completions on the calling thread
pub fn inline_store() -> Arc<MemoryStore> {
    init_tracing();
    Arc::new(MemoryStore::with_delivery(DeliveryMode::Inline))
}

/// Retry settings that never wait, for deterministic attempt counts
pub fn no_wait_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(0)
        .with_max_delay_ms(0)
        .with_jitter(false)
}

pub fn client_with_retry(store: &Arc<MemoryStore>, retry: RetryConfig) -> Client {
    let config = ClientConfig {
        retry,
        ..ClientConfig::default()
    };
    Client::with_config(store.clone(), config).unwrap()
}

/// Outcome channel for one or more allocations
pub struct Outcomes {
    tx: Sender<Result<Allocation, StoreError>>,
    rx: Receiver<Result<Allocation, StoreError>>,
}

impl Outcomes {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Outcomes { tx, rx }
    }

    pub fn listener(&self) -> AllocationListener {
        let ok = self.tx.clone();
        let err = self.tx.clone();
        AllocationListener::new(move |a| {
            let _ = ok.send(Ok(a));
        })
        .on_error(move |e| {
            let _ = err.send(Err(e));
        })
    }

    pub fn next(&self) -> Result<Allocation, StoreError> {
        self.rx.recv_timeout(WAIT).expect("allocation did not finish")
    }

    pub fn collect(&self, n: usize) -> Vec<Result<Allocation, StoreError>> {
        (0..n).map(|_| self.next()).collect()
    }

    /// True if nothing further arrives within `wait`
    pub fn quiet_for(&self, wait: Duration) -> bool {
        self.rx.recv_timeout(wait).is_err()
    }
}
