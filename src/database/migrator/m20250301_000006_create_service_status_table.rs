use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServiceStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServiceStatus::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServiceStatus::ServiceName).string().not_null())
                    .col(ColumnDef::new(ServiceStatus::MachineName).string().not_null())
                    .col(ColumnDef::new(ServiceStatus::Status).string().not_null())
                    .col(ColumnDef::new(ServiceStatus::LastHeartbeat).big_integer().not_null())
                    .col(
                        ColumnDef::new(ServiceStatus::CpuUsagePercent)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ServiceStatus::MemoryUsedMb)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ServiceStatus::DiskFreePercent)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(ServiceStatus::MaxWorkers).integer().not_null())
                    .col(ColumnDef::new(ServiceStatus::BatchSize).integer().not_null())
                    .col(ColumnDef::new(ServiceStatus::Version).string().not_null())
                    .col(ColumnDef::new(ServiceStatus::StartedAt).big_integer().not_null())
                    .col(ColumnDef::new(ServiceStatus::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_service_status_service_machine")
                    .table(ServiceStatus::Table)
                    .col(ServiceStatus::ServiceName)
                    .col(ServiceStatus::MachineName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ServiceStatus::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum ServiceStatus {
    Table,
    Id,
    ServiceName,
    MachineName,
    Status,
    LastHeartbeat,
    CpuUsagePercent,
    MemoryUsedMb,
    DiskFreePercent,
    MaxWorkers,
    BatchSize,
    Version,
    StartedAt,
    UpdatedAt,
}
