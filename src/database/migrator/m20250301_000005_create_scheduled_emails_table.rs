use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduledEmails::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduledEmails::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScheduledEmails::ToEmails).text().not_null())
                    .col(ColumnDef::new(ScheduledEmails::CcEmails).text())
                    .col(ColumnDef::new(ScheduledEmails::BccEmails).text())
                    .col(ColumnDef::new(ScheduledEmails::Subject).text().not_null())
                    .col(ColumnDef::new(ScheduledEmails::Body).text().not_null())
                    .col(ColumnDef::new(ScheduledEmails::IsHtml).boolean().not_null().default(true))
                    .col(ColumnDef::new(ScheduledEmails::Priority).integer().not_null().default(1))
                    .col(ColumnDef::new(ScheduledEmails::TemplateId).integer())
                    .col(ColumnDef::new(ScheduledEmails::TemplateData).text())
                    .col(ColumnDef::new(ScheduledEmails::Attachments).text())
                    .col(ColumnDef::new(ScheduledEmails::NextRunTime).big_integer().not_null())
                    .col(ColumnDef::new(ScheduledEmails::IntervalMinutes).integer())
                    .col(ColumnDef::new(ScheduledEmails::CronExpression).string())
                    .col(
                        ColumnDef::new(ScheduledEmails::IsRecurring)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ScheduledEmails::EndDate).big_integer())
                    .col(ColumnDef::new(ScheduledEmails::MaxExecutions).integer())
                    .col(
                        ColumnDef::new(ScheduledEmails::ExecutionCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ScheduledEmails::LastExecutedAt).big_integer())
                    .col(ColumnDef::new(ScheduledEmails::LastExecutionStatus).string())
                    .col(ColumnDef::new(ScheduledEmails::LastExecutionError).text())
                    .col(
                        ColumnDef::new(ScheduledEmails::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(ScheduledEmails::CreatedBy).string().not_null())
                    .col(ColumnDef::new(ScheduledEmails::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(ScheduledEmails::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scheduled_emails_active_next_run")
                    .table(ScheduledEmails::Table)
                    .col(ScheduledEmails::IsActive)
                    .col(ScheduledEmails::NextRunTime)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScheduledEmails::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum ScheduledEmails {
    Table,
    Id,
    ToEmails,
    CcEmails,
    BccEmails,
    Subject,
    Body,
    IsHtml,
    Priority,
    TemplateId,
    TemplateData,
    Attachments,
    NextRunTime,
    IntervalMinutes,
    CronExpression,
    IsRecurring,
    EndDate,
    MaxExecutions,
    ExecutionCount,
    LastExecutedAt,
    LastExecutionStatus,
    LastExecutionError,
    IsActive,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}
