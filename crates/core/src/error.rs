//! Error types for Canopy
//!
//! Every failure a store operation can end in is a [`StoreError`]. Errors are
//! classified into an [`ErrorKind`]:
//!
//! - `Transport`: network or connectivity failure
//! - `Denied`: the store refused the operation (authorization)
//! - `Conflict`: a transaction lost a race; recovered internally by the ID
//!   allocator and surfaced only once its retry budget runs out
//! - `MalformedKey`: a child key is not part of the integer sequence
//! - `MalformedPath`: a path failed segment validation
//! - `Timeout`: a request or allocation deadline expired
//! - `InvalidValue`: a payload the operation cannot store
//!
//! The most recent error is kept as an [`ErrorRecord`] by the error channel.

use crate::path::{Path, PathError};
use crate::timestamp::Timestamp;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network/connectivity failure
    Transport,
    /// Authorization/permission failure reported by the store
    Denied,
    /// Lost optimistic-concurrency race
    Conflict,
    /// Child key failed integer parsing during allocation
    MalformedKey,
    /// Path failed validation
    MalformedPath,
    /// Deadline expired
    Timeout,
    /// Payload rejected before reaching the store
    InvalidValue,
}

impl ErrorKind {
    /// Stable lowercase name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Denied => "denied",
            ErrorKind::Conflict => "conflict",
            ErrorKind::MalformedKey => "malformed_key",
            ErrorKind::MalformedPath => "malformed_path",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidValue => "invalid_value",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a store operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Network or connectivity failure
    #[error("transport error: {message}")]
    Transport {
        /// Description from the transport layer
        message: String,
    },

    /// The store refused the operation
    #[error("permission denied at {path}")]
    Denied {
        /// Path the operation targeted
        path: Path,
    },

    /// Allocation retry budget spent without winning a commit
    #[error("allocation at {path} still conflicting after {attempts} attempts")]
    ConflictExhausted {
        /// Parent path of the allocation
        path: Path,
        /// Attempts made, including the last
        attempts: u32,
    },

    /// A child key outside the integer sequence blocked allocation
    #[error("child key '{key}' under {path} is not an integer")]
    MalformedKey {
        /// Parent path of the allocation
        path: Path,
        /// Offending key
        key: String,
    },

    /// A path string failed validation
    #[error("malformed path '{input}': {reason}")]
    MalformedPath {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: PathError,
    },

    /// A request or allocation deadline expired
    #[error("operation at {path} timed out after {elapsed:?}")]
    Timeout {
        /// Path the operation targeted
        path: Path,
        /// Time spent before giving up
        elapsed: Duration,
    },

    /// Allocation payload would write nothing (`Null` or an empty object)
    #[error("cannot allocate an empty value under {path}")]
    EmptyValue {
        /// Parent path of the allocation
        path: Path,
    },
}

impl StoreError {
    /// Build a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        StoreError::Transport {
            message: message.into(),
        }
    }

    /// Build a denial for `path`
    pub fn denied(path: Path) -> Self {
        StoreError::Denied { path }
    }

    /// Build a malformed-path error from a parse failure
    pub fn malformed_path(input: impl Into<String>, reason: PathError) -> Self {
        StoreError::MalformedPath {
            input: input.into(),
            reason,
        }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Transport { .. } => ErrorKind::Transport,
            StoreError::Denied { .. } => ErrorKind::Denied,
            StoreError::ConflictExhausted { .. } => ErrorKind::Conflict,
            StoreError::MalformedKey { .. } => ErrorKind::MalformedKey,
            StoreError::MalformedPath { .. } => ErrorKind::MalformedPath,
            StoreError::Timeout { .. } => ErrorKind::Timeout,
            StoreError::EmptyValue { .. } => ErrorKind::InvalidValue,
        }
    }

    /// True if retrying the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// The most recent failure, as retained by the error channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// What went wrong
    pub cause: StoreError,
    /// Path of the failing operation
    pub path: Path,
    /// When the failure was recorded
    pub occurred_at: Timestamp,
}

impl ErrorRecord {
    /// Stamp `cause` with the current time
    pub fn new(cause: StoreError, path: Path) -> Self {
        ErrorRecord {
            cause,
            path,
            occurred_at: Timestamp::now(),
        }
    }

    /// Classification of the cause
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs() -> Path {
        Path::parse("jobs").unwrap()
    }

    #[test]
    fn test_error_display_transport() {
        let msg = StoreError::transport("connection reset").to_string();
        assert!(msg.contains("transport error"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_error_display_denied() {
        let msg = StoreError::denied(jobs()).to_string();
        assert!(msg.contains("permission denied"));
        assert!(msg.contains("/jobs"));
    }

    #[test]
    fn test_error_display_conflict_exhausted() {
        let err = StoreError::ConflictExhausted {
            path: jobs(),
            attempts: 8,
        };
        assert!(err.to_string().contains("8 attempts"));
    }

    #[test]
    fn test_error_display_malformed_path() {
        let reason = Path::parse("a.b").unwrap_err();
        let err = StoreError::malformed_path("a.b", reason);
        assert!(err.to_string().contains("malformed path 'a.b'"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(StoreError::transport("x").kind(), ErrorKind::Transport);
        assert_eq!(StoreError::denied(jobs()).kind(), ErrorKind::Denied);
        let timeout = StoreError::Timeout {
            path: jobs(),
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        let key = StoreError::MalformedKey {
            path: jobs(),
            key: "draft".into(),
        };
        assert_eq!(key.kind().as_str(), "malformed_key");
    }

    #[test]
    fn test_empty_value_is_invalid() {
        let err = StoreError::EmptyValue { path: jobs() };
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert!(err.to_string().contains("empty value under /jobs"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        let conflict = StoreError::ConflictExhausted {
            path: jobs(),
            attempts: 1,
        };
        assert!(conflict.is_retryable());
        assert!(!StoreError::transport("down").is_retryable());
        assert!(!StoreError::denied(jobs()).is_retryable());
    }

    #[test]
    fn test_record_stamps_time() {
        let record = ErrorRecord::new(StoreError::transport("down"), jobs());
        assert_eq!(record.kind(), ErrorKind::Transport);
        assert!(record.occurred_at > Timestamp::EPOCH);
    }
}
