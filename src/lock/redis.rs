//! Redis broadcast lock backend.
//!
//! Acquisition is an atomic `SET NX PX`; the winner publishes the JSON
//! envelope on a channel named after the key and stores it under a result
//! key with the same TTL, so both live waiters (pub/sub) and late arrivals
//! (result key) observe byte-identical payloads.
//!
//! Waiters subscribe BEFORE re-checking the lock so the publish cannot race
//! past them: after a successful subscribe the result key is re-read, and
//! if the lock key is gone without a result the flight is retried.

use futures::StreamExt;
use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::{Duration, Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::errors::{LockError, LockResult};
use crate::lock::{DistributedLock, LockOptions, LockOutcome, Producer, Published};

const LOCK_PREFIX: &str = "sf:lock:";
const RESULT_PREFIX: &str = "sf:lock:result:";
const CHANNEL_PREFIX: &str = "sf:lock:chan:";

pub struct RedisLockBackend {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
    owner_id: String,
}

impl RedisLockBackend {
    pub async fn connect(uri: &str) -> LockResult<Self> {
        let client = redis::Client::open(uri)
            .map_err(|e| LockError::Backend(format!("redis client: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| LockError::Backend(format!("redis connect: {e}")))?;
        Ok(Self {
            client,
            conn,
            owner_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn try_acquire(&self, key: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{LOCK_PREFIX}{key}"))
            .arg(&self.owner_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("redis acquire: {e}")))?;
        Ok(reply.is_some())
    }

    async fn read_result(&self, key: &str) -> LockResult<Option<Published>> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = conn
            .get(format!("{RESULT_PREFIX}{key}"))
            .await
            .map_err(|e| LockError::Backend(format!("redis read result: {e}")))?;
        match stored {
            Some(raw) => {
                let payload = serde_json::from_str(&raw)
                    .map_err(|e| LockError::Backend(format!("corrupt lock payload: {e}")))?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    async fn lock_held(&self, key: &str) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(format!("{LOCK_PREFIX}{key}"))
            .await
            .map_err(|e| LockError::Backend(format!("redis lock check: {e}")))
    }

    async fn publish(&self, key: &str, payload: &Published, ttl: Duration) -> LockResult<()> {
        let raw = serde_json::to_string(payload)
            .map_err(|e| LockError::Backend(format!("encode lock payload: {e}")))?;
        let mut conn = self.conn.clone();

        // Result first, then the notification, so a waiter woken by the
        // publish always finds the result key populated.
        let _: () = conn
            .set_ex(
                format!("{RESULT_PREFIX}{key}"),
                &raw,
                ttl.as_secs().max(1),
            )
            .await
            .map_err(|e| LockError::Backend(format!("redis store result: {e}")))?;
        let _: () = conn
            .publish(format!("{CHANNEL_PREFIX}{key}"), &raw)
            .await
            .map_err(|e| LockError::Backend(format!("redis publish: {e}")))?;
        let _: () = conn
            .del(format!("{LOCK_PREFIX}{key}"))
            .await
            .map_err(|e| LockError::Backend(format!("redis release: {e}")))?;
        Ok(())
    }

    /// Wait for a publish on the key's channel, bounded by `deadline`
    async fn wait_for_publish(
        &self,
        key: &str,
        deadline: Instant,
    ) -> LockResult<Option<Published>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| LockError::Backend(format!("redis pubsub: {e}")))?;
        pubsub
            .subscribe(format!("{CHANNEL_PREFIX}{key}"))
            .await
            .map_err(|e| LockError::Backend(format!("redis subscribe: {e}")))?;

        // Subscribed: re-check state to close the publish race
        if let Some(payload) = self.read_result(key).await? {
            return Ok(Some(payload));
        }
        if !self.lock_held(key).await? {
            // Lock vanished without a result: the producer died
            return Ok(None);
        }

        let mut stream = pubsub.on_message();
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, stream.next()).await {
            Ok(Some(message)) => {
                let raw: String = message
                    .get_payload()
                    .map_err(|e| LockError::Backend(format!("redis payload: {e}")))?;
                let payload = serde_json::from_str(&raw)
                    .map_err(|e| LockError::Backend(format!("corrupt lock payload: {e}")))?;
                Ok(Some(payload))
            }
            Ok(None) => {
                warn!(key, "redis pubsub stream ended while waiting for lock");
                Ok(None)
            }
            Err(_) => Err(LockError::Timeout {
                key: key.to_string(),
                waited_ms: 0,
            }),
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLockBackend {
    async fn with_lock(
        &self,
        key: &str,
        producer: Producer,
        opts: LockOptions,
    ) -> LockResult<LockOutcome> {
        let deadline = Instant::now() + opts.timeout;

        // A completed flight within TTL replays immediately
        if let Some(payload) = self.read_result(key).await? {
            return payload.into_result(key).map(|result| LockOutcome {
                result,
                cached: true,
            });
        }

        let mut producer = Some(producer);
        loop {
            if self.try_acquire(key, opts.ttl).await? {
                debug!(key, "lock acquired, running producer");
                let produced = match producer.take() {
                    Some(p) => p().await,
                    None => return Err(LockError::Backend("producer already consumed".into())),
                };
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
                self.publish(key, &payload, opts.ttl).await?;
                return payload.into_result(key).map(|result| LockOutcome {
                    result,
                    cached: false,
                });
            }

            match self.wait_for_publish(key, deadline).await {
                Ok(Some(payload)) => {
                    return payload.into_result(key).map(|result| LockOutcome {
                        result,
                        cached: true,
                    });
                }
                Ok(None) => {
                    // Producer died before publishing; retry until deadline
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout {
                            key: key.to_string(),
                            waited_ms: opts.timeout.as_millis() as u64,
                        });
                    }
                    sleep(opts.retry_interval).await;
                }
                Err(LockError::Timeout { .. }) => {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        waited_ms: opts.timeout.as_millis() as u64,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }
}
