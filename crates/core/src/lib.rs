//! Core types and traits for Canopy
//!
//! This crate defines the foundational types shared by every layer:
//! - Path: slash-delimited address of a node
//! - Query / Reference: path plus ordering and limit, and a shareable handle to one
//! - Value: the eight-variant value model stored at nodes
//! - NodeSnapshot: immutable view of a node delivered to callbacks
//! - StoreError / ErrorKind / ErrorRecord: error taxonomy
//! - StoreClient: the four-primitive contract implemented by store adapters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod path;
pub mod query;
pub mod snapshot;
pub mod timestamp;
pub mod traits;
pub mod value;

pub use error::{ErrorKind, ErrorRecord, StoreError, StoreResult};
pub use path::{Path, PathError};
pub use query::{compare_keys, parse_int_key, Limit, OrderBy, Query, Reference};
pub use snapshot::NodeSnapshot;
pub use timestamp::Timestamp;
pub use traits::{
    EventCallback, ReadCallback, StoreClient, SubscriptionId, TransactCallback,
    TransactionDecision, TransactionHandler, TransactionOutcome, WriteCallback,
};
pub use value::Value;
