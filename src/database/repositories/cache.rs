//! Repository for the general-purpose `cache` table

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::{cache, prelude::Cache};
use crate::errors::{AppError, AppResult};

#[derive(Clone)]
pub struct CacheRepository {
    connection: Arc<DatabaseConnection>,
}

impl CacheRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    /// Read a value; expired rows read as absent
    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let row = Cache::find_by_id(key.to_string())
            .one(self.connection.as_ref())
            .await
            .map_err(AppError::Database)?;
        Ok(row
            .filter(|r| r.expires_at > Utc::now())
            .map(|r| r.value))
    }

    /// Upsert a value with a TTL
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60));
        let row = cache::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            expires_at: Set(expires_at),
        };
        Cache::insert(row)
            .on_conflict(
                OnConflict::column(cache::Column::Key)
                    .update_columns([cache::Column::Value, cache::Column::ExpiresAt])
                    .to_owned(),
            )
            .exec(self.connection.as_ref())
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Delete expired rows; returns how many were removed
    pub async fn prune_expired(&self) -> AppResult<u64> {
        let deleted = Cache::delete_many()
            .filter(cache::Column::ExpiresAt.lt(Utc::now()))
            .exec(self.connection.as_ref())
            .await
            .map_err(AppError::Database)?;
        Ok(deleted.rows_affected)
    }
}
