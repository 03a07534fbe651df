use sea_orm::entity::prelude::*;

/// User rows: the configuration document is stored as ciphertext, salted
/// per user; the server never persists plaintext credentials.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub uuid: Uuid,
    pub password_hash: String,
    #[sea_orm(column_type = "Text")]
    pub config_ciphertext: String,
    pub config_salt: String,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
    pub accessed_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
