//! Distributed lock / memoizer (single-flight coordination)
//!
//! `with_lock(key, producer, opts)` guarantees that at most one producer
//! executes per key across the whole deployment. Concurrent callers block
//! until the winner publishes its result (or error), which is replayed
//! byte-identically to every waiter; the winner alone observes
//! `cached == false`. Locks expire after their TTL so a crashed producer
//! cannot wedge a key; waiters treat that rare race as a timeout.
//!
//! Three backends cover the deployment spectrum: a process-local
//! broadcast backend, a redis backend (atomic SET NX + pub/sub), and a
//! transactional database backend (insert-if-absent + polling).

pub mod database;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{LockError, LockResult};

/// Producer future type: runs only on the winning caller
pub type Producer = Box<dyn FnOnce() -> BoxFuture<'static, Result<String, String>> + Send>;

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Crash-safety expiry of the lock and of the memoized result
    pub ttl: Duration,
    /// How long a waiter blocks before giving up
    pub timeout: Duration,
    /// Poll cadence for backends without push notification
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            timeout: Duration::from_secs(15),
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Outcome of a single-flight call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOutcome {
    /// Winner's payload, byte-identical for every waiter
    pub result: String,
    /// False exactly once per flight: on the winning caller
    pub cached: bool,
}

/// Wire envelope the winner publishes; errors replay to all waiters too
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Published {
    pub ok: bool,
    pub body: String,
}

impl Published {
    pub fn into_result(self, key: &str) -> LockResult<String> {
        if self.ok {
            Ok(self.body)
        } else {
            Err(LockError::Producer {
                key: key.to_string(),
                message: self.body,
            })
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Run `producer` under single-flight semantics for `key`
    async fn with_lock(
        &self,
        key: &str,
        producer: Producer,
        opts: LockOptions,
    ) -> LockResult<LockOutcome>;
}

/// Typed convenience wrapper: serializes the producer's output to JSON so
/// the replay guarantee stays byte-level, then deserializes on the way out.
pub async fn memoize<T, F, Fut>(
    lock: &dyn DistributedLock,
    key: &str,
    opts: LockOptions,
    producer: F,
) -> LockResult<(T, bool)>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T, String>> + Send + 'static,
{
    let boxed: Producer = Box::new(move || {
        Box::pin(async move {
            let value = producer().await?;
            serde_json::to_string(&value).map_err(|e| format!("serialize result: {e}"))
        })
    });
    let outcome = lock.with_lock(key, boxed, opts).await?;
    let value = serde_json::from_str(&outcome.result)
        .map_err(|e| LockError::Backend(format!("deserialize memoized result: {e}")))?;
    Ok((value, outcome.cached))
}

/// Pick the strongest configured backend: redis when a broadcast bus is
/// available, the database table otherwise, process-local memory as the
/// single-node fallback.
pub async fn backend_from_config(
    redis_uri: Option<&str>,
    db: Option<&crate::database::Database>,
) -> LockResult<Arc<dyn DistributedLock>> {
    if let Some(uri) = redis_uri {
        let backend = redis::RedisLockBackend::connect(uri).await?;
        return Ok(Arc::new(backend));
    }
    if let Some(db) = db {
        return Ok(Arc::new(database::DatabaseLockBackend::new(db.clone())));
    }
    Ok(Arc::new(memory::MemoryLockBackend::new()))
}
