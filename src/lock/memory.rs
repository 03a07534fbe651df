//! Process-local lock backend: a mutex-guarded key map with per-key
//! broadcast channels. The in-memory analogue of the redis backend, used
//! when neither a redis bus nor a database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tracing::trace;

use crate::errors::{LockError, LockResult};
use crate::lock::{DistributedLock, LockOptions, LockOutcome, Producer, Published};

enum Entry {
    InFlight {
        tx: broadcast::Sender<Published>,
        expires_at: Instant,
    },
    Done {
        payload: Published,
        expires_at: Instant,
    },
}

pub struct MemoryLockBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop expired entries; called under the map lock at every acquisition,
    /// mirroring the opportunistic sweep of the database backend.
    fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, entry| match entry {
            Entry::InFlight { expires_at, .. } | Entry::Done { expires_at, .. } => {
                *expires_at > now
            }
        });
    }
}

impl Default for MemoryLockBackend {
    fn default() -> Self {
        Self::new()
    }
}

enum Role {
    Winner,
    Waiter(broadcast::Receiver<Published>),
    Replay(Published),
}

#[async_trait]
impl DistributedLock for MemoryLockBackend {
    async fn with_lock(
        &self,
        key: &str,
        producer: Producer,
        opts: LockOptions,
    ) -> LockResult<LockOutcome> {
        let role = {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            Self::sweep(&mut entries, now);

            match entries.get(key) {
                Some(Entry::Done { payload, .. }) => Role::Replay(payload.clone()),
                Some(Entry::InFlight { tx, .. }) => Role::Waiter(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    entries.insert(
                        key.to_string(),
                        Entry::InFlight {
                            tx,
                            expires_at: now + opts.ttl,
                        },
                    );
                    Role::Winner
                }
            }
        };

        match role {
            Role::Replay(payload) => {
                trace!(key, "memoized result replayed");
                payload.into_result(key).map(|result| LockOutcome {
                    result,
                    cached: true,
                })
            }
            Role::Waiter(mut rx) => {
                match tokio::time::timeout(opts.timeout, rx.recv()).await {
                    Ok(Ok(payload)) => payload.into_result(key).map(|result| LockOutcome {
                        result,
                        cached: true,
                    }),
                    // Channel closed without a publish: the producer died
                    // before publishing; treat as timeout per contract
                    Ok(Err(_)) | Err(_) => Err(LockError::Timeout {
                        key: key.to_string(),
                        waited_ms: opts.timeout.as_millis() as u64,
                    }),
                }
            }
            Role::Winner => {
                let produced = producer().await;
                let payload = match &produced {
                    Ok(body) => Published {
                        ok: true,
                        body: body.clone(),
                    },
                    Err(message) => Published {
                        ok: false,
                        body: message.clone(),
                    },
                };

                {
                    let mut entries = self.entries.lock().await;
                    if let Some(Entry::InFlight { tx, .. }) = entries.get(key) {
                        // Waiters may all have gone away; that is fine
                        let _ = tx.send(payload.clone());
                    }
                    entries.insert(
                        key.to_string(),
                        Entry::Done {
                            payload: payload.clone(),
                            expires_at: Instant::now() + opts.ttl,
                        },
                    );
                }

                payload.into_result(key).map(|result| LockOutcome {
                    result,
                    cached: false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn opts() -> LockOptions {
        LockOptions {
            ttl: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            retry_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn single_flight_among_concurrent_callers() {
        let backend = Arc::new(MemoryLockBackend::new());
        let invocations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let backend = backend.clone();
            let invocations = invocations.clone();
            handles.push(tokio::spawn(async move {
                let producer: Producer = Box::new(move || {
                    Box::pin(async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("\"payload\"".to_string())
                    })
                });
                backend.with_lock("k", producer, opts()).await.unwrap()
            }));
        }

        let mut uncached = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.result, "\"payload\"");
            if !outcome.cached {
                uncached += 1;
            }
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(uncached, 1);
    }

    #[tokio::test]
    async fn producer_errors_replay_to_waiters() {
        let backend = Arc::new(MemoryLockBackend::new());

        let slow_fail: Producer = Box::new(|| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err("upstream exploded".to_string())
            })
        });

        let winner = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.with_lock("k", slow_fail, opts()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let waiter_producer: Producer =
            Box::new(|| Box::pin(async { Ok("never-runs".to_string()) }));
        let waiter = backend.with_lock("k", waiter_producer, opts()).await;

        assert!(matches!(
            winner.await.unwrap(),
            Err(LockError::Producer { .. })
        ));
        assert!(matches!(waiter, Err(LockError::Producer { .. })));
    }

    #[tokio::test]
    async fn completed_results_replay_within_ttl() {
        let backend = MemoryLockBackend::new();
        let first: Producer = Box::new(|| Box::pin(async { Ok("1".to_string()) }));
        let outcome = backend.with_lock("k", first, opts()).await.unwrap();
        assert!(!outcome.cached);

        let second: Producer = Box::new(|| Box::pin(async { Ok("2".to_string()) }));
        let outcome = backend.with_lock("k", second, opts()).await.unwrap();
        assert!(outcome.cached);
        assert_eq!(outcome.result, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_allow_a_new_flight() {
        let backend = MemoryLockBackend::new();
        let first: Producer = Box::new(|| Box::pin(async { Ok("1".to_string()) }));
        backend.with_lock("k", first, opts()).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        let second: Producer = Box::new(|| Box::pin(async { Ok("2".to_string()) }));
        let outcome = backend.with_lock("k", second, opts()).await.unwrap();
        assert!(!outcome.cached);
        assert_eq!(outcome.result, "2");
    }
}
