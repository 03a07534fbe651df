use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Users::Uuid).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                    .col(ColumnDef::new(Users::ConfigCiphertext).text().not_null())
                    .col(ColumnDef::new(Users::ConfigSalt).string().not_null())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Users::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Users::AccessedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DistributedLocks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DistributedLocks::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DistributedLocks::Owner).string().not_null())
                    .col(
                        ColumnDef::new(DistributedLocks::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DistributedLocks::Result).text())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_distributed_locks_expires_at")
                    .table(DistributedLocks::Table)
                    .col(DistributedLocks::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Cache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Cache::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Cache::Value).text().not_null())
                    .col(
                        ColumnDef::new(Cache::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_cache_expires_at")
                    .table(Cache::Table)
                    .col(Cache::ExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Cache::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DistributedLocks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Uuid,
    PasswordHash,
    ConfigCiphertext,
    ConfigSalt,
    CreatedAt,
    UpdatedAt,
    AccessedAt,
}

#[derive(DeriveIden)]
enum DistributedLocks {
    Table,
    Key,
    Owner,
    ExpiresAt,
    Result,
}

#[derive(DeriveIden)]
enum Cache {
    Table,
    Key,
    Value,
    ExpiresAt,
}
