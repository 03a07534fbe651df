//! Repository for the `users` table.
//!
//! Configurations are stored as ciphertext with a per-user salt; the
//! repository never sees plaintext. `accessed_at` feeds the pruning task.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::entities::{prelude::Users, users};
use crate::errors::{AppError, AppResult};

#[derive(Clone)]
pub struct UserRepository {
    connection: Arc<DatabaseConnection>,
}

impl UserRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    pub async fn create(
        &self,
        password_hash: &str,
        config_ciphertext: &str,
        config_salt: &str,
    ) -> AppResult<users::Model> {
        let now = Utc::now();
        let row = users::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            password_hash: Set(password_hash.to_string()),
            config_ciphertext: Set(config_ciphertext.to_string()),
            config_salt: Set(config_salt.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            accessed_at: Set(now),
        };
        row.insert(self.connection.as_ref())
            .await
            .map_err(AppError::Database)
    }

    pub async fn find(&self, uuid: Uuid) -> AppResult<Option<users::Model>> {
        Users::find_by_id(uuid)
            .one(self.connection.as_ref())
            .await
            .map_err(AppError::Database)
    }

    pub async fn update_config(
        &self,
        uuid: Uuid,
        config_ciphertext: &str,
        config_salt: &str,
    ) -> AppResult<()> {
        let Some(existing) = self.find(uuid).await? else {
            return Err(AppError::NotFound {
                resource: "user".to_string(),
                id: uuid.to_string(),
            });
        };
        let mut row: users::ActiveModel = existing.into();
        row.config_ciphertext = Set(config_ciphertext.to_string());
        row.config_salt = Set(config_salt.to_string());
        row.updated_at = Set(Utc::now());
        row.update(self.connection.as_ref())
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    /// Record a request touching this user's configuration
    pub async fn touch_accessed(&self, uuid: Uuid) -> AppResult<()> {
        if let Some(existing) = self.find(uuid).await? {
            let mut row: users::ActiveModel = existing.into();
            row.accessed_at = Set(Utc::now());
            row.update(self.connection.as_ref())
                .await
                .map_err(AppError::Database)?;
        }
        Ok(())
    }

    /// Remove users not accessed within `max_days`; 0 disables pruning
    pub async fn prune_stale(&self, max_days: u32) -> AppResult<u64> {
        if max_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(i64::from(max_days));
        let deleted = Users::delete_many()
            .filter(users::Column::AccessedAt.lt(cutoff))
            .exec(self.connection.as_ref())
            .await
            .map_err(AppError::Database)?;
        Ok(deleted.rows_affected)
    }
}
