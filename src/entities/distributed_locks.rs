use sea_orm::entity::prelude::*;

/// Single-flight lock rows. `result` is written by the winning producer in
/// the same store that owns the row; expired rows are swept opportunistically
/// at every acquisition.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "distributed_locks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    pub owner: String,
    pub expires_at: ChronoDateTimeUtc,
    #[sea_orm(column_type = "Text", nullable)]
    pub result: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
