//! Transactional lock backend over the `distributed_locks` table.
//!
//! Acquisition is an insert-if-absent; waiters poll the row for the stored
//! result at `retry_interval`. The winner writes its result into the same
//! row (same store that owns the lock), and every acquisition attempt
//! opportunistically sweeps expired rows first.

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::database::Database;
use crate::database::repositories::LockRepository;
use crate::errors::{LockError, LockResult};
use crate::lock::{DistributedLock, LockOptions, LockOutcome, Producer, Published};

pub struct DatabaseLockBackend {
    repository: LockRepository,
    owner_id: String,
}

impl DatabaseLockBackend {
    pub fn new(db: Database) -> Self {
        Self {
            repository: LockRepository::new(db.connection),
            owner_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn decode(key: &str, raw: &str) -> LockResult<Published> {
        serde_json::from_str(raw)
            .map_err(|e| LockError::Backend(format!("corrupt payload for '{key}': {e}")))
    }
}

#[async_trait]
impl DistributedLock for DatabaseLockBackend {
    async fn with_lock(
        &self,
        key: &str,
        producer: Producer,
        opts: LockOptions,
    ) -> LockResult<LockOutcome> {
        let deadline = Instant::now() + opts.timeout;
        let mut producer = Some(producer);

        loop {
            let now = Utc::now();
            self.repository.sweep_expired(now).await?;

            let ttl = chrono::Duration::from_std(opts.ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));

            if self
                .repository
                .try_acquire(key, &self.owner_id, now + ttl)
                .await?
            {
                debug!(key, "lock row inserted, running producer");
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
                let raw = serde_json::to_string(&payload)
                    .map_err(|e| LockError::Backend(format!("encode payload: {e}")))?;
                self.repository
                    .publish_result(key, &raw, Utc::now() + ttl)
                    .await?;
                return payload.into_result(key).map(|result| LockOutcome {
                    result,
                    cached: false,
                });
            }

            // Someone else owns the row: poll it for a result
            match self.repository.read(key).await? {
                Some(row) => {
                    if let Some(raw) = row.result {
                        let payload = Self::decode(key, &raw)?;
                        return payload.into_result(key).map(|result| LockOutcome {
                            result,
                            cached: true,
                        });
                    }
                }
                // Row vanished (expired + swept): loop and re-acquire
                None => continue,
            }

            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited_ms: opts.timeout.as_millis() as u64,
                });
            }
            sleep(opts.retry_interval).await;
        }
    }
}
