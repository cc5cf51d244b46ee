//! Canopy - client-side access layer for a replicated hierarchical key/value tree
//!
//! Every operation is asynchronous and callback-driven. The centerpiece is
//! collision-free integer key allocation under a path, safe under any number of
//! racing clients, built only on the store's transaction primitive.
//!
//! # Quick Start
//!
//! ```
//! use canopy::{Client, Path};
//! use canopy::storage::{DeliveryMode, MemoryStore};
//! use std::sync::{mpsc, Arc};
//!
//! let store = Arc::new(MemoryStore::with_delivery(DeliveryMode::Inline));
//! let client = Client::new(store);
//! let queue = Path::parse("queue").unwrap();
//!
//! let (tx, rx) = mpsc::channel();
//! for job in ["build", "test"] {
//!     let tx = tx.clone();
//!     client.allocate(&queue, job, move |child, _| tx.send(child).unwrap(), |_| {});
//! }
//! let children: Vec<_> = rx.iter().take(2).map(|p| p.to_string()).collect();
//! assert_eq!(children, vec!["/queue/0", "/queue/1"]);
//! ```
//!
//! # Architecture
//!
//! `Client` issues requests through an operation registry, which routes each
//! completion back to its caller and funnels failures through one error
//! channel. Store adapters implement [`StoreClient`]; [`storage::MemoryStore`]
//! is the in-process one.

pub use canopy_api::*;

/// In-process store implementation
pub mod storage {
    pub use canopy_storage::{
        DeliveryMode, FaultPlan, MemoryStore, Primitive, StoreStats, TransactionInterceptor,
    };
}
