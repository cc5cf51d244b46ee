//! Racing allocators
//!
//! Many clients allocating under one path must end up with distinct,
//! gap-free keys, and a forced loss must cost exactly one more attempt.

use crate::common::*;
use canopy::storage::TransactionInterceptor;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// Uniqueness
// ============================================================================

fn assert_dense(keys: Vec<u64>, n: u64) {
    let unique: BTreeSet<u64> = keys.iter().copied().collect();
    assert_eq!(unique.len(), keys.len(), "duplicate keys: {:?}", keys);
    assert_eq!(unique, (0..n).collect::<BTreeSet<u64>>());
}

#[test]
fn test_concurrent_clients_get_distinct_keys() {
    const CLIENTS: usize = 8;
    const PER_CLIENT: usize = 10;

    let store = threaded_store(4);
    let retry = RetryConfig::default().with_max_attempts(0).with_max_delay_ms(5);
    let outcomes = Outcomes::new();
    let barrier = Arc::new(Barrier::new(CLIENTS));

    let handles: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let client = client_with_retry(&store, retry.clone());
            let listeners: Vec<AllocationListener> =
                (0..PER_CLIENT).map(|_| outcomes.listener()).collect();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for listener in listeners {
                    client.allocate_with(&path("queue"), "job", listener);
                }
                // Keep the client alive until its allocations finish.
                client
            })
        })
        .collect();
    let clients: Vec<Client> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let total = CLIENTS * PER_CLIENT;
    let keys: Vec<u64> = outcomes
        .collect(total)
        .into_iter()
        .map(|r| r.unwrap().key)
        .collect();
    assert_dense(keys, total as u64);
    assert_eq!(store.snapshot(&path("queue")).child_count(), total);
    assert!(clients.iter().all(|c| !c.has_error()));
}

#[test]
fn test_single_client_burst_gets_distinct_keys() {
    let store = threaded_store(4);
    let client = client_with_retry(&store, RetryConfig::unbounded());
    let outcomes = Outcomes::new();
    for _ in 0..40 {
        client.allocate_with(&path("burst"), 1, outcomes.listener());
    }
    let results = outcomes.collect(40);
    let keys: Vec<u64> = results.iter().map(|r| r.as_ref().unwrap().key).collect();
    assert_dense(keys, 40);

    // Every loss shows up as one extra attempt somewhere.
    let attempts: u64 = results.iter().map(|r| r.as_ref().unwrap().attempts as u64).sum();
    let stats = store.stats();
    assert_eq!(stats.commits, 40);
    assert_eq!(attempts, stats.transactions);
    assert_eq!(stats.aborts, stats.transactions - 40);
}

// ============================================================================
// Retry convergence
// ============================================================================

/// Rival writer that claims the next key ahead of the first `losses` transactions
fn rival(losses: u64) -> TransactionInterceptor {
    Box::new(move |_: &Path, node: &mut Value, evaluated: u64| {
        if evaluated < losses {
            let next = node.child_count();
            node.set_at(&[next.to_string()], Value::from("rival"));
        }
    })
}

#[test]
fn test_forced_losses_cost_one_attempt_each() {
    for losses in [1u64, 3, 6] {
        let store = inline_store();
        store.faults().intercept_transactions(rival(losses));
        let client = client_with_retry(&store, no_wait_retry(16));
        let outcomes = Outcomes::new();
        client.allocate_with(&path("jobs"), "mine", outcomes.listener());

        let allocation = outcomes.next().unwrap();
        assert_eq!(allocation.attempts as u64, losses + 1);
        // The key is the one free at commit time, not at the first read.
        assert_eq!(allocation.key, losses);
        assert_eq!(store.value_at(&allocation.path), Some(Value::from("mine")));
        assert_eq!(store.stats().aborts, losses);
    }
}

#[test]
fn test_retry_cap_surfaces_conflict() {
    let store = inline_store();
    store.faults().intercept_transactions(rival(u64::MAX));
    let client = client_with_retry(&store, no_wait_retry(4));
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), "mine", outcomes.listener());

    let error = outcomes.next().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Conflict);
    assert!(matches!(error, StoreError::ConflictExhausted { attempts: 4, .. }));
    assert_eq!(store.stats().transactions, 4);
    assert_eq!(client.last_error().map(|r| r.cause), Some(error));
    // Rival keys only; nothing of ours was written.
    assert_eq!(store.snapshot(&path("jobs")).child_count(), 4);
}

#[test]
fn test_backoff_retries_through_timer() {
    let store = threaded_store(1);
    store.faults().intercept_transactions(rival(2));
    let retry = RetryConfig::default()
        .with_base_delay_ms(5)
        .with_max_delay_ms(20)
        .with_jitter(false);
    let client = client_with_retry(&store, retry);
    let outcomes = Outcomes::new();

    let started = std::time::Instant::now();
    client.allocate_with(&path("jobs"), "mine", outcomes.listener());
    let allocation = outcomes.next().unwrap();
    assert_eq!(allocation.attempts, 3);
    // 5ms after the first loss, 10ms after the second
    assert!(started.elapsed() >= std::time::Duration::from_millis(15));
}
