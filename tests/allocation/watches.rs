//! Watch lifecycle
//!
//! Watches on the same path are independent; allocations are visible to them.

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;

type Seen = Arc<Mutex<Vec<usize>>>;

fn counting_watch(client: &Client, at: &str) -> (canopy::WatchHandle, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let handle = client.watch(
        &path(at),
        move |_, snap: NodeSnapshot| s.lock().push(snap.child_count()),
        |e| panic!("watch failed: {}", e),
    );
    (handle, seen)
}

#[test]
fn test_cancel_one_watch_keeps_other() {
    let store = inline_store();
    let client = Client::new(store.clone());
    let (first, first_seen) = counting_watch(&client, "room");
    let (second, second_seen) = counting_watch(&client, "room");
    assert_ne!(first, second);

    store.seed(&path("room/a"), 1);
    assert!(client.cancel(&first));
    store.seed(&path("room/b"), 2);

    assert_eq!(*first_seen.lock(), vec![0, 1]);
    assert_eq!(*second_seen.lock(), vec![0, 1, 2]);
    assert_eq!(store.subscription_count(), 1);

    assert!(client.cancel(&second));
    assert!(!client.cancel(&second));
    assert_eq!(store.subscription_count(), 0);
    assert_eq!(client.pending_requests(), 0);
}

#[test]
fn test_watch_observes_allocations() {
    let store = inline_store();
    let client = Client::new(store.clone());
    let (handle, seen) = counting_watch(&client, "queue");

    let outcomes = Outcomes::new();
    for _ in 0..3 {
        client.allocate_with(&path("queue"), "job", outcomes.listener());
        outcomes.next().unwrap();
    }
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    assert_eq!(handle.path(), &path("queue"));
    client.cancel(&handle);
}

#[test]
fn test_watch_other_path_unaffected_by_cancel() {
    let store = inline_store();
    let client = Client::new(store.clone());
    let (a, _) = counting_watch(&client, "a");
    let (_b, b_seen) = counting_watch(&client, "b");
    client.cancel(&a);
    store.seed(&path("b/x"), 1);
    assert_eq!(*b_seen.lock(), vec![0, 1]);
}
