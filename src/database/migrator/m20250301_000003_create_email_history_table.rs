use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailHistory::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EmailHistory::QueueId).string().not_null())
                    .col(ColumnDef::new(EmailHistory::TemplateId).integer())
                    .col(ColumnDef::new(EmailHistory::ToEmails).text().not_null())
                    .col(ColumnDef::new(EmailHistory::CcEmails).text())
                    .col(ColumnDef::new(EmailHistory::BccEmails).text())
                    .col(ColumnDef::new(EmailHistory::Subject).text().not_null())
                    .col(ColumnDef::new(EmailHistory::Body).text().not_null())
                    .col(ColumnDef::new(EmailHistory::IsHtml).boolean().not_null())
                    .col(ColumnDef::new(EmailHistory::Status).string().not_null())
                    .col(ColumnDef::new(EmailHistory::ErrorDetails).text())
                    .col(ColumnDef::new(EmailHistory::RetryCount).integer().not_null().default(0))
                    .col(ColumnDef::new(EmailHistory::ProcessingTimeMs).big_integer())
                    .col(ColumnDef::new(EmailHistory::ProcessedBy).string())
                    .col(ColumnDef::new(EmailHistory::SentAt).big_integer())
                    .col(ColumnDef::new(EmailHistory::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_history_queue_id")
                    .table(EmailHistory::Table)
                    .col(EmailHistory::QueueId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_history_sent_at")
                    .table(EmailHistory::Table)
                    .col(EmailHistory::SentAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_history_template_id")
                    .table(EmailHistory::Table)
                    .col(EmailHistory::TemplateId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailHistory::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum EmailHistory {
    Table,
    Id,
    QueueId,
    TemplateId,
    ToEmails,
    CcEmails,
    BccEmails,
    Subject,
    Body,
    IsHtml,
    Status,
    ErrorDetails,
    RetryCount,
    ProcessingTimeMs,
    ProcessedBy,
    SentAt,
    CreatedAt,
}
