//! Error routing
//!
//! Store failures stop an allocation, reach the caller exactly once and stay
//! visible through `last_error` until cleared.

use crate::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_transport_error_on_read_skips_transaction() {
    let store = threaded_store(2);
    store
        .faults()
        .fail_next(Primitive::Read, StoreError::transport("link down"));
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), "x", outcomes.listener());

    let error = outcomes.next().unwrap_err();
    assert_eq!(error, StoreError::transport("link down"));
    assert!(outcomes.quiet_for(Duration::from_millis(50)));
    store.drain();
    assert_eq!(store.stats().transactions, 0);

    let record = client.last_error().unwrap();
    assert_eq!(record.kind(), ErrorKind::Transport);
    assert_eq!(record.path, path("jobs"));
}

#[test]
fn test_denied_path_fails_allocation() {
    let store = inline_store();
    store.faults().deny(path("admin"));
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    client.allocate_with(&path("admin/ids"), "x", outcomes.listener());

    assert_eq!(outcomes.next().unwrap_err().kind(), ErrorKind::Denied);
    assert!(client.has_error());
    assert_eq!(client.pending_requests(), 0);
}

#[test]
fn test_error_subscriber_sees_each_failure() {
    let store = inline_store();
    let client = Client::new(store.clone());
    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    client.set_error_subscriber(Some(Arc::new(move |record: &canopy::ErrorRecord| {
        assert_eq!(record.kind(), ErrorKind::Transport);
        s.fetch_add(1, Ordering::SeqCst);
    })));

    for _ in 0..3 {
        store
            .faults()
            .fail_next(Primitive::Write, StoreError::transport("flaky"));
        client.set(&path("x"), 1, |_| {}, |_| {});
    }
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    client.set_error_subscriber(None);
    store
        .faults()
        .fail_next(Primitive::Write, StoreError::transport("unseen"));
    client.set(&path("x"), 1, |_| {}, |_| {});
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(
        client.last_error().map(|r| r.cause),
        Some(StoreError::transport("unseen"))
    );
}

#[test]
fn test_clear_without_error_is_noop() {
    let client = Client::new(inline_store());
    client.clear_last_error();
    assert!(!client.has_error());
    assert!(client.last_error().is_none());
}

#[test]
fn test_clear_after_error() {
    let store = inline_store();
    store.faults().fail_next(Primitive::Read, StoreError::transport("x"));
    let client = Client::new(store.clone());
    client.get(&path("a"), |_, _| {}, |_| {});
    assert!(client.has_error());
    client.clear_last_error();
    client.clear_last_error();
    assert!(!client.has_error());
}

#[test]
fn test_partition_times_out_with_deadline() {
    let store = inline_store();
    store.faults().set_partitioned(true);
    let config = ClientConfig {
        allocation_deadline_ms: 30,
        ..ClientConfig::default()
    };
    let client = Client::with_config(store.clone(), config).unwrap();
    let outcomes = Outcomes::new();
    let handle = client.allocate_with(&path("jobs"), "x", outcomes.listener());

    let error = outcomes.next().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(handle.is_finished());
    assert_eq!(handle.state(), canopy::AllocationState::Failed);
    assert_eq!(client.last_error().map(|r| r.kind()), Some(ErrorKind::Timeout));
}

#[test]
fn test_partition_without_deadline_stays_pending() {
    let store = inline_store();
    store.faults().set_partitioned(true);
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    let handle = client.allocate_with(&path("jobs"), "x", outcomes.listener());

    assert!(outcomes.quiet_for(Duration::from_millis(50)));
    assert!(!handle.is_finished());
    assert_eq!(client.pending_requests(), 1);
    assert!(!client.has_error());
}
