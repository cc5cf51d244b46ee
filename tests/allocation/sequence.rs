//! Single-writer key sequence
//!
//! Keys proposed from the current node, with and without noise keys.

use crate::common::*;
use canopy::MalformedKeyPolicy;
use std::collections::BTreeSet;

#[test]
fn test_empty_node_allocates_zero() {
    let store = inline_store();
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), "x", outcomes.listener());

    let allocation = outcomes.next().unwrap();
    assert_eq!(allocation.key, 0);
    assert_eq!(allocation.path, path("jobs/0"));
    assert_eq!(store.value_at(&path("jobs/0")), Some(Value::from("x")));
}

#[test]
fn test_existing_children_yield_next_key() {
    let store = inline_store();
    for k in 0..3 {
        store.seed(&path(&format!("jobs/{}", k)), "old");
    }
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), "x", outcomes.listener());

    let allocation = outcomes.next().unwrap();
    assert_eq!(allocation.key, 3);
    assert_eq!(allocation.attempts, 1);
    assert_eq!(store.stats().transactions, 1);
}

#[test]
fn test_gaps_are_not_filled() {
    let store = inline_store();
    store.seed(&path("jobs/0"), "a");
    store.seed(&path("jobs/7"), "b");
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), "x", outcomes.listener());
    assert_eq!(outcomes.next().unwrap().key, 8);
}

#[test]
fn test_sequential_allocations_increase() {
    let store = threaded_store(2);
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    let mut keys = Vec::new();
    for _ in 0..10 {
        client.allocate_with(&path("log"), "entry", outcomes.listener());
        keys.push(outcomes.next().unwrap().key);
    }
    assert_eq!(keys, (0..10).collect::<Vec<u64>>());
}

#[test]
fn test_reference_points_at_new_child() {
    let store = inline_store();
    let client = Client::new(store.clone());
    let (tx, rx) = std::sync::mpsc::channel();
    client.allocate(
        &path("posts"),
        "hello",
        move |child, reference| tx.send((child, reference)).unwrap(),
        |_| {},
    );
    let (child, reference) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(reference.path(), &child);

    let (tx, rx) = std::sync::mpsc::channel();
    client.get(&reference, move |_, snap: NodeSnapshot| tx.send(snap).unwrap(), |_| {});
    assert_eq!(rx.recv_timeout(WAIT).unwrap().value(), Some(&Value::from("hello")));
}

#[test]
fn test_non_integer_keys_skipped() {
    let store = inline_store();
    store.seed(&path("jobs/2"), "a");
    store.seed(&path("jobs/meta"), "b");
    store.seed(&path("jobs/-5"), "c");
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), "x", outcomes.listener());
    assert_eq!(outcomes.next().unwrap().key, 3);

    let keys: BTreeSet<String> = store
        .snapshot(&path("jobs"))
        .child_keys()
        .into_iter()
        .map(String::from)
        .collect();
    assert!(keys.contains("meta"));
    assert!(keys.contains("3"));
}

#[test]
fn test_non_integer_keys_fail_when_configured() {
    let store = inline_store();
    store.seed(&path("jobs/meta"), "b");
    let config = ClientConfig {
        malformed_keys: MalformedKeyPolicy::Fail,
        ..ClientConfig::default()
    };
    let client = Client::with_config(store.clone(), config).unwrap();
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), "x", outcomes.listener());

    let error = outcomes.next().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MalformedKey);
    assert_eq!(client.last_error().map(|r| r.kind()), Some(ErrorKind::MalformedKey));
    assert_eq!(store.stats().transactions, 0);
}

#[test]
fn test_null_payload_never_claims_a_key() {
    let store = inline_store();
    let client = Client::new(store.clone());
    let outcomes = Outcomes::new();
    client.allocate_with(&path("jobs"), Value::Null, outcomes.listener());
    client.allocate_with(&path("jobs"), Value::Null, outcomes.listener());

    for _ in 0..2 {
        let error = outcomes.next().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidValue);
    }
    assert_eq!(store.value_at(&path("jobs")), None);
    assert_eq!(client.last_error().map(|r| r.kind()), Some(ErrorKind::InvalidValue));

    client.allocate_with(&path("jobs"), "real", outcomes.listener());
    assert_eq!(outcomes.next().unwrap().key, 0);
}
