//! Repository for the `distributed_locks` table.
//!
//! Acquisition is an insert-if-absent so exactly one owner can hold a key;
//! the winner later writes its result into the same row. Expired rows are
//! swept opportunistically at every acquisition attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use tracing::trace;

use crate::entities::{distributed_locks, prelude::DistributedLocks};
use crate::errors::{LockError, LockResult};

#[derive(Clone)]
pub struct LockRepository {
    connection: Arc<DatabaseConnection>,
}

impl LockRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// Delete rows whose expiry has passed
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> LockResult<u64> {
        let deleted = DistributedLocks::delete_many()
            .filter(distributed_locks::Column::ExpiresAt.lt(now))
            .exec(self.connection.as_ref())
            .await
            .map_err(backend_err)?;
        if deleted.rows_affected > 0 {
            trace!(rows = deleted.rows_affected, "swept expired locks");
        }
        Ok(deleted.rows_affected)
    }

    /// Insert-if-absent acquisition; `true` when this caller became owner
    pub async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> LockResult<bool> {
        let row = distributed_locks::ActiveModel {
            key: Set(key.to_string()),
            owner: Set(owner.to_string()),
            expires_at: Set(expires_at),
            result: Set(None),
        };

        let insert = DistributedLocks::insert(row)
            .on_conflict(
                OnConflict::column(distributed_locks::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(self.connection.as_ref())
            .await;

        match insert {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(other) => Err(backend_err(other)),
        }
    }

    pub async fn read(&self, key: &str) -> LockResult<Option<distributed_locks::Model>> {
        DistributedLocks::find_by_id(key.to_string())
            .one(self.connection.as_ref())
            .await
            .map_err(backend_err)
    }

    /// Store the winner's payload on the owned row
    pub async fn publish_result(
        &self,
        key: &str,
        payload: &str,
        expires_at: DateTime<Utc>,
    ) -> LockResult<()> {
        let Some(existing) = self.read(key).await? else {
            return Err(LockError::Backend(format!(
                "lock row for '{key}' vanished before publish"
            )));
        };
        let mut row: distributed_locks::ActiveModel = existing.into();
        row.result = Set(Some(payload.to_string()));
        row.expires_at = Set(expires_at);
        row.update(self.connection.as_ref())
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

fn backend_err(e: DbErr) -> LockError {
    LockError::Backend(format!("database: {e}"))
}
