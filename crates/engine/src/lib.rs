//! Request engine for Canopy
//!
//! This crate sits between callers and a [`canopy_core::StoreClient`]:
//! - OperationRegistry: tracks in-flight requests and routes completions
//! - ErrorChannel: most-recent-error slot with optional subscriber
//! - QueryMemo: single-slot reference → path cache
//! - RetryTimer: delayed tasks for backoff and deadlines
//! - ClientConfig: `canopy.toml` settings
//!
//! Nothing here blocks: every operation returns immediately and results
//! arrive through callbacks, on whatever thread the store completes on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error_channel;
pub mod memo;
pub mod registry;
pub mod timer;

pub use config::{ClientConfig, ConfigError, MalformedKeyPolicy, RetryConfig, CONFIG_FILE_NAME};
pub use error_channel::{ErrorChannel, ErrorSubscriber};
pub use memo::{QueryMemo, Resolved, Target};
pub use registry::{
    Completion, ErrorListener, Listener, Operation, OperationRegistry, PendingInfo, RequestHandle,
    RequestId, RequestKind, ValueListener,
};
pub use timer::RetryTimer;
