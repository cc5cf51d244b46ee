//! Public API layer for Canopy
//!
//! [`Client`] is the surface host applications use:
//! - `allocate`: write a value under the next free integer key of a path
//! - `get` / `watch`: read once, or observe until cancelled
//! - `set` / `transact`: plain and atomic writes
//! - `last_error` / `clear_last_error`: the most recent failure
//!
//! ## Quick Start
//!
//! ```
//! use canopy_api::Client;
//! use canopy_core::Path;
//! use canopy_storage::{DeliveryMode, MemoryStore};
//! use std::sync::{mpsc, Arc};
//!
//! let store = Arc::new(MemoryStore::with_delivery(DeliveryMode::Inline));
//! let client = Client::new(store);
//! let jobs = Path::parse("jobs").unwrap();
//!
//! let (tx, rx) = mpsc::channel();
//! client.allocate(&jobs, "first", move |child, _| tx.send(child).unwrap(), |_| {});
//! assert_eq!(rx.recv().unwrap().to_string(), "/jobs/0");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod types;

pub use client::Client;
pub use types::{ClientId, WatchHandle};

pub use canopy_concurrency::{Allocation, AllocationHandle, AllocationListener, AllocationState};
pub use canopy_core::{
    ErrorKind, ErrorRecord, NodeSnapshot, Path, Query, Reference, StoreClient, StoreError,
    TransactionDecision, TransactionOutcome, Value,
};
pub use canopy_engine::{ClientConfig, ConfigError, ErrorSubscriber, MalformedKeyPolicy, RetryConfig, Target};
