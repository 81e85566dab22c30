use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailTemplates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailTemplates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EmailTemplates::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(EmailTemplates::Category).string())
                    .col(ColumnDef::new(EmailTemplates::SubjectTemplate).text().not_null())
                    .col(ColumnDef::new(EmailTemplates::BodyTemplate).text().not_null())
                    .col(
                        ColumnDef::new(EmailTemplates::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(EmailTemplates::IsSystem)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(EmailTemplates::Version).integer().not_null().default(1))
                    .col(ColumnDef::new(EmailTemplates::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(EmailTemplates::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailTemplates::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum EmailTemplates {
    Table,
    Id,
    Name,
    Category,
    SubjectTemplate,
    BodyTemplate,
    IsActive,
    IsSystem,
    Version,
    CreatedAt,
    UpdatedAt,
}
