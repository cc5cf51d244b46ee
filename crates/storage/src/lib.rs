//! In-memory store for Canopy
//!
//! This crate provides [`MemoryStore`], an in-process implementation of the
//! `StoreClient` contract with:
//! - Serialized transactions evaluated against the latest committed node
//! - Subscriptions with change notification
//! - Inline or threaded completion delivery
//! - Fault injection (denials, failures, partitions, competing writers)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod faults;
pub mod memory;

pub use dispatch::{DeliveryMode, Dispatcher};
pub use faults::{FaultPlan, Primitive, TransactionInterceptor};
pub use memory::{MemoryStore, StoreStats};
