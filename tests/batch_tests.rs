//! These tests ensure that concurrent loads coalesce into the correct
//! number of batch function calls, with keys in submission order.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::executor;
use futures::future;
use sectionloader::{props, BoxError, Loader, Props, Registry};

/// A loader that answers each key `{"id": n}` with `{"value": n * 10}`,
/// counting calls and recording the key lists it was given.
fn recording_loader(calls: &Arc<AtomicUsize>, seen: &Arc<Mutex<Vec<Vec<Props>>>>) -> Loader {
    let calls = Arc::clone(calls);
    let seen = Arc::clone(seen);
    Loader::new(["id"], move |keys: Vec<Props>| {
        calls.fetch_add(1, Ordering::SeqCst);
        seen.lock().unwrap().push(keys.clone());
        async move {
            let values: Vec<Props> = keys
                .iter()
                .map(|key| props! { "value": key["id"].as_i64().unwrap() * 10 })
                .collect();
            Ok::<_, BoxError>(values)
        }
    })
}

#[test]
fn same_window_loads_share_one_batch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    let loader = recording_loader(&calls, &seen);
    let batcher = registry.resolve(&loader);

    let fut1 = batcher.load(props! { "id": 1 });
    let fut2 = batcher.load(props! { "id": 2 });

    assert_eq!(executor::block_on(fut1).unwrap(), props! { "value": 10 });
    assert_eq!(executor::block_on(fut2).unwrap(), props! { "value": 20 });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], vec![props! { "id": 1 }, props! { "id": 2 }]);
}

#[test]
fn interleaved_tasks_share_one_batch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    let loader = recording_loader(&calls, &seen);
    let batcher = registry.resolve(&loader);
    let batcher = &batcher;

    // Neither load exists until its task is first polled; the batching
    // window must stay open long enough for both to join.
    let (res1, res2) = executor::block_on(future::join(
        async { batcher.load(props! { "id": 1 }).await },
        async { batcher.load(props! { "id": 2 }).await },
    ));

    assert_eq!(res1.unwrap(), props! { "value": 10 });
    assert_eq!(res2.unwrap(), props! { "value": 20 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn duplicate_keys_dispatch_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    let loader = recording_loader(&calls, &seen);
    let batcher = registry.resolve(&loader);

    let fut1 = batcher.load(props! { "id": 7 });
    let fut2 = batcher.load(props! { "id": 7 });
    let fut3 = batcher.load(props! { "id": 8 });

    assert_eq!(executor::block_on(fut1).unwrap(), props! { "value": 70 });
    assert_eq!(executor::block_on(fut2).unwrap(), props! { "value": 70 });
    assert_eq!(executor::block_on(fut3).unwrap(), props! { "value": 80 });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], vec![props! { "id": 7 }, props! { "id": 8 }]);
}

#[test]
fn key_order_insensitive_duplicates_coalesce() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    let loader = recording_loader(&calls, &seen);
    let batcher = registry.resolve(&loader);

    let mut forward = Props::new();
    forward.insert("x".to_owned(), 1.into());
    forward.insert("id".to_owned(), 7.into());

    let mut reversed = Props::new();
    reversed.insert("id".to_owned(), 7.into());
    reversed.insert("x".to_owned(), 1.into());

    let fut1 = batcher.load(forward);
    let fut2 = batcher.load(reversed);

    assert_eq!(executor::block_on(fut1).unwrap(), props! { "value": 70 });
    assert_eq!(executor::block_on(fut2).unwrap(), props! { "value": 70 });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().unwrap()[0].len(), 1);
}

#[test]
fn later_window_forms_new_batch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    let loader = recording_loader(&calls, &seen);
    let batcher = registry.resolve(&loader);

    assert_eq!(
        executor::block_on(batcher.load(props! { "id": 1 })).unwrap(),
        props! { "value": 10 }
    );
    assert_eq!(
        executor::block_on(batcher.load(props! { "id": 2 })).unwrap(),
        props! { "value": 20 }
    );

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn key_limit_dispatches_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    let loader = recording_loader(&calls, &seen).max_batch_size(NonZeroUsize::new(2).unwrap());
    let batcher = registry.resolve(&loader);

    let fut1 = batcher.load(props! { "id": 1 });
    let fut2 = batcher.load(props! { "id": 2 });
    let fut3 = batcher.load(props! { "id": 3 });

    assert_eq!(executor::block_on(fut1).unwrap(), props! { "value": 10 });
    assert_eq!(executor::block_on(fut2).unwrap(), props! { "value": 20 });
    assert_eq!(executor::block_on(fut3).unwrap(), props! { "value": 30 });

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], vec![props! { "id": 1 }, props! { "id": 2 }]);
    assert_eq!(seen[1], vec![props! { "id": 3 }]);
}

#[test]
fn key_limit_counts_unique_keys() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::new();
    let loader = recording_loader(&calls, &seen).max_batch_size(NonZeroUsize::new(3).unwrap());
    let batcher = registry.resolve(&loader);

    let fut1 = batcher.load(props! { "id": 1 });
    // A duplicate attaches to the existing slot and does not advance the
    // batch toward its key limit.
    let fut1_dup = batcher.load(props! { "id": 1 });
    let fut2 = batcher.load(props! { "id": 2 });
    let fut3 = batcher.load(props! { "id": 3 });

    assert_eq!(executor::block_on(fut1).unwrap(), props! { "value": 10 });
    assert_eq!(executor::block_on(fut1_dup).unwrap(), props! { "value": 10 });
    assert_eq!(executor::block_on(fut2).unwrap(), props! { "value": 20 });
    assert_eq!(executor::block_on(fut3).unwrap(), props! { "value": 30 });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().unwrap()[0].len(), 3);
}
