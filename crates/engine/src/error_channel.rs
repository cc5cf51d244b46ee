//! The error channel
//!
//! Single slot holding the most recent [`ErrorRecord`] plus an optional
//! subscriber. Every failing completion passes through [`ErrorChannel::record`]
//! before the caller's own error callback runs.
//!
//! Last write wins: concurrent failures overwrite each other in arrival order.
//! Callers that need the error of *their* request get it directly through
//! their error callback; the slot is a convenience for "what went wrong last".

use canopy_core::ErrorRecord;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Callback notified of every recorded error
pub type ErrorSubscriber = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

/// Most-recent-error slot with optional notification
#[derive(Default)]
pub struct ErrorChannel {
    current: Mutex<Option<ErrorRecord>>,
    subscriber: Mutex<Option<ErrorSubscriber>>,
    recorded: AtomicU64,
}

impl ErrorChannel {
    /// Empty channel with no subscriber
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current record and notify the subscriber
    ///
    /// The subscriber runs synchronously on the recording thread, after the
    /// slot has been updated and with no channel lock held.
    pub fn record(&self, record: ErrorRecord) {
        debug!(
            target: "canopy::registry",
            kind = %record.kind(),
            path = %record.path,
            "recording error"
        );
        *self.current.lock() = Some(record.clone());
        self.recorded.fetch_add(1, Ordering::Relaxed);

        let subscriber = self.subscriber.lock().clone();
        if let Some(subscriber) = subscriber {
            subscriber(&record);
        }
    }

    /// Discard the current record; no-op when empty
    pub fn clear(&self) {
        *self.current.lock() = None;
    }

    /// True if a record is held
    pub fn has_error(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Copy of the current record
    pub fn current(&self) -> Option<ErrorRecord> {
        self.current.lock().clone()
    }

    /// Remove and return the current record
    pub fn take(&self) -> Option<ErrorRecord> {
        self.current.lock().take()
    }

    /// Replace the subscriber; `None` stops notification and keeps the record
    pub fn set_subscriber(&self, subscriber: Option<ErrorSubscriber>) {
        *self.subscriber.lock() = subscriber;
    }

    /// Total records ever written
    pub fn recorded_count(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }
}
