//! Optimistic ID allocation for Canopy
//!
//! This crate implements collision-free integer key allocation under a path
//! using only the store's transaction primitive:
//! - IdAllocator: the query → propose → transact → retry loop
//! - propose_key / max_integer_key: key proposal from an observed snapshot
//!
//! Any number of clients may allocate under the same path concurrently. The
//! transaction's existence check turns a stale proposal into an abort and a
//! retry, never a double write.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod proposal;

pub use allocator::{
    Allocation, AllocationAttempt, AllocationHandle, AllocationListener, AllocationState,
    IdAllocator,
};
pub use proposal::{max_integer_key, propose_key, KeyProposal};
