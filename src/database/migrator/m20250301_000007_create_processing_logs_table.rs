use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ProcessingLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProcessingLogs::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ProcessingLogs::Level).string().not_null())
                    .col(ColumnDef::new(ProcessingLogs::Category).string().not_null())
                    .col(ColumnDef::new(ProcessingLogs::Message).text().not_null())
                    .col(ColumnDef::new(ProcessingLogs::QueueId).string())
                    .col(ColumnDef::new(ProcessingLogs::WorkerId).string())
                    .col(ColumnDef::new(ProcessingLogs::ProcessingStep).string())
                    .col(ColumnDef::new(ProcessingLogs::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_processing_logs_created_at")
                    .table(ProcessingLogs::Table)
                    .col(ProcessingLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_processing_logs_queue_id")
                    .table(ProcessingLogs::Table)
                    .col(ProcessingLogs::QueueId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProcessingLogs::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum ProcessingLogs {
    Table,
    Id,
    Level,
    Category,
    Message,
    QueueId,
    WorkerId,
    ProcessingStep,
    CreatedAt,
}
