use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Session::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Session::TokenHash)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Session::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Session::LastActivity)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .take(),
            )
            .await?;

        // One live session per user; login upserts on this index.
        manager
            .create_index(
                Index::create()
                    .table(Session::Table)
                    .col(Session::UserId)
                    .name("idx_sessions_user_id")
                    .unique()
                    .take(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Session::Table)
                    .col(Session::LastActivity)
                    .name("idx_sessions_last_activity")
                    .take(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().if_exists().table(Session::Table).take())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Session {
    #[sea_orm(iden = "sessions")]
    Table,
    TokenHash,
    UserId,
    LastActivity,
}
