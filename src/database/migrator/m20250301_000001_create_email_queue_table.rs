use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailQueue::QueueId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EmailQueue::Priority).integer().not_null().default(1))
                    .col(ColumnDef::new(EmailQueue::ToEmails).text().not_null())
                    .col(ColumnDef::new(EmailQueue::CcEmails).text())
                    .col(ColumnDef::new(EmailQueue::BccEmails).text())
                    .col(ColumnDef::new(EmailQueue::Subject).text().not_null())
                    .col(ColumnDef::new(EmailQueue::Body).text().not_null())
                    .col(ColumnDef::new(EmailQueue::IsHtml).boolean().not_null().default(true))
                    .col(ColumnDef::new(EmailQueue::TemplateId).integer())
                    .col(ColumnDef::new(EmailQueue::TemplateData).text())
                    .col(
                        ColumnDef::new(EmailQueue::RequiresTemplateProcessing)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(EmailQueue::Attachments).text())
                    .col(
                        ColumnDef::new(EmailQueue::HasEmbeddedImages)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(EmailQueue::CustomHeaders).text())
                    .col(
                        ColumnDef::new(EmailQueue::RequestDeliveryNotification)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(EmailQueue::RequestReadReceipt)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(EmailQueue::Status).string().not_null().default("queued"))
                    .col(ColumnDef::new(EmailQueue::RetryCount).integer().not_null().default(0))
                    .col(ColumnDef::new(EmailQueue::MaxRetries).integer().not_null().default(3))
                    .col(ColumnDef::new(EmailQueue::ScheduledFor).big_integer())
                    .col(
                        ColumnDef::new(EmailQueue::IsScheduled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(EmailQueue::ProcessingStartedAt).big_integer())
                    .col(ColumnDef::new(EmailQueue::ProcessedAt).big_integer())
                    .col(ColumnDef::new(EmailQueue::ProcessedBy).string())
                    .col(ColumnDef::new(EmailQueue::ErrorMessage).text())
                    .col(ColumnDef::new(EmailQueue::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(EmailQueue::UpdatedAt).big_integer().not_null())
                    .col(ColumnDef::new(EmailQueue::CreatedBy).string().not_null())
                    .col(ColumnDef::new(EmailQueue::RequestSource).string())
                    .to_owned(),
            )
            .await?;

        // Claim ordering: status + priority + created_at
        manager
            .create_index(
                Index::create()
                    .name("idx_email_queue_status_priority_created")
                    .table(EmailQueue::Table)
                    .col((EmailQueue::Status, IndexOrder::Asc))
                    .col((EmailQueue::Priority, IndexOrder::Desc))
                    .col((EmailQueue::CreatedAt, IndexOrder::Asc))
                    .to_owned(),
            )
            .await?;

        // Due-scheduled claim filter
        manager
            .create_index(
                Index::create()
                    .name("idx_email_queue_status_scheduled_for")
                    .table(EmailQueue::Table)
                    .col(EmailQueue::Status)
                    .col(EmailQueue::ScheduledFor)
                    .to_owned(),
            )
            .await?;

        // Stuck-job reaper scan
        manager
            .create_index(
                Index::create()
                    .name("idx_email_queue_processing_started_at")
                    .table(EmailQueue::Table)
                    .col(EmailQueue::ProcessingStartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailQueue::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum EmailQueue {
    Table,
    QueueId,
    Priority,
    ToEmails,
    CcEmails,
    BccEmails,
    Subject,
    Body,
    IsHtml,
    TemplateId,
    TemplateData,
    RequiresTemplateProcessing,
    Attachments,
    HasEmbeddedImages,
    CustomHeaders,
    RequestDeliveryNotification,
    RequestReadReceipt,
    Status,
    RetryCount,
    MaxRetries,
    ScheduledFor,
    IsScheduled,
    ProcessingStartedAt,
    ProcessedAt,
    ProcessedBy,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    RequestSource,
}
