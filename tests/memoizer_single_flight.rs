//! Single-flight guarantees of the memoizer: one producer per key, byte
//! identical replay, exactly one `cached = false`, and error propagation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stream_fusion::errors::LockError;
use stream_fusion::lock::memory::MemoryLockBackend;
use stream_fusion::lock::{DistributedLock, LockOptions, Producer, memoize};

fn opts() -> LockOptions {
    LockOptions {
        ttl: Duration::from_secs(10),
        timeout: Duration::from_secs(5),
        retry_interval: Duration::from_millis(20),
    }
}

#[test_log::test(tokio::test)]
async fn a_thousand_concurrent_callers_invoke_one_producer() {
    let backend = Arc::new(MemoryLockBackend::new());
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..1000 {
        let backend = backend.clone();
        let invocations = invocations.clone();
        handles.push(tokio::spawn(async move {
            let producer: Producer = Box::new(move || {
                Box::pin(async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    Ok(r#"{"streams":["a","b"]}"#.to_string())
                })
            });
            backend.with_lock("providerX:tt1", producer, opts()).await
        }));
    }

    let mut uncached = 0usize;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.result, r#"{"streams":["a","b"]}"#);
        if !outcome.cached {
            uncached += 1;
        }
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(uncached, 1);
}

#[tokio::test]
async fn distinct_keys_do_not_share_flights() {
    let backend = Arc::new(MemoryLockBackend::new());
    let invocations = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for key_index in 0..4 {
        for _ in 0..8 {
            let backend = backend.clone();
            let invocations = invocations.clone();
            let key = format!("key-{key_index}");
            handles.push(tokio::spawn(async move {
                let payload = key.clone();
                let producer: Producer = Box::new(move || {
                    Box::pin(async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(payload)
                    })
                });
                let outcome = backend.with_lock(&key, producer, opts()).await.unwrap();
                assert_eq!(outcome.result, key);
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn waiters_observe_the_winners_error() {
    let backend = Arc::new(MemoryLockBackend::new());

    let slow_failure: Producer = Box::new(|| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Err("upstream 503".to_string())
        })
    });
    let winner = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.with_lock("k", slow_failure, opts()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let never_runs: Producer = Box::new(|| Box::pin(async { Ok("unused".to_string()) }));
    let waiter = backend.with_lock("k", never_runs, opts()).await;

    for outcome in [winner.await.unwrap(), waiter] {
        match outcome {
            Err(LockError::Producer { message, .. }) => assert_eq!(message, "upstream 503"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

#[tokio::test]
async fn typed_memoize_round_trips_json() {
    let backend = MemoryLockBackend::new();

    let (value, cached) = memoize(&backend, "typed", opts(), || async {
        Ok(vec!["x".to_string(), "y".to_string()])
    })
    .await
    .unwrap();
    assert_eq!(value, vec!["x".to_string(), "y".to_string()]);
    assert!(!cached);

    let (replayed, cached): (Vec<String>, bool) =
        memoize(&backend, "typed", opts(), || async { Ok(Vec::new()) })
            .await
            .unwrap();
    assert_eq!(replayed, vec!["x".to_string(), "y".to_string()]);
    assert!(cached);
}

#[tokio::test]
async fn waiters_time_out_when_the_producer_stalls() {
    let backend = Arc::new(MemoryLockBackend::new());

    let stalled: Producer = Box::new(|| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        })
    });
    let _winner = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.with_lock("k", stalled, opts()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let impatient_opts = LockOptions {
        timeout: Duration::from_millis(50),
        ..opts()
    };
    let never_runs: Producer = Box::new(|| Box::pin(async { Ok("unused".to_string()) }));
    let waiter = backend.with_lock("k", never_runs, impatient_opts).await;
    assert!(matches!(waiter, Err(LockError::Timeout { .. })));
}
