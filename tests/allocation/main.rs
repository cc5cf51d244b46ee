//! Allocation Integration Tests
//!
//! End-to-end behavior of `Client` over `MemoryStore`: key uniqueness under
//! contention, retry convergence, error routing and watch independence.

#[path = "../common/mod.rs"]
mod common;

mod contention;
mod error_routing;
mod sequence;
mod watches;
