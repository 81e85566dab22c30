use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailAttachments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailAttachments::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EmailAttachments::QueueId).string().not_null())
                    .col(ColumnDef::new(EmailAttachments::FileName).string().not_null())
                    .col(
                        ColumnDef::new(EmailAttachments::ContentType)
                            .string()
                            .not_null()
                            .default("application/octet-stream"),
                    )
                    .col(ColumnDef::new(EmailAttachments::ContentId).string())
                    .col(
                        ColumnDef::new(EmailAttachments::IsInline)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(EmailAttachments::Content).text())
                    .col(ColumnDef::new(EmailAttachments::FilePath).string())
                    .col(ColumnDef::new(EmailAttachments::SizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(EmailAttachments::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_attachments_queue_id")
                    .table(EmailAttachments::Table)
                    .col(EmailAttachments::QueueId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailAttachments::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum EmailAttachments {
    Table,
    Id,
    QueueId,
    FileName,
    ContentType,
    ContentId,
    IsInline,
    Content,
    FilePath,
    SizeBytes,
    CreatedAt,
}
