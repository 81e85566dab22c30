use sea_orm_migration::prelude::*;

mod m20250301_000001_create_email_queue_table;
mod m20250301_000002_create_email_templates_table;
mod m20250301_000003_create_email_history_table;
mod m20250301_000004_create_email_attachments_table;
mod m20250301_000005_create_scheduled_emails_table;
mod m20250301_000006_create_service_status_table;
mod m20250301_000007_create_processing_logs_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_email_queue_table::Migration),
            Box::new(m20250301_000002_create_email_templates_table::Migration),
            Box::new(m20250301_000003_create_email_history_table::Migration),
            Box::new(m20250301_000004_create_email_attachments_table::Migration),
            Box::new(m20250301_000005_create_scheduled_emails_table::Migration),
            Box::new(m20250301_000006_create_service_status_table::Migration),
            Box::new(m20250301_000007_create_processing_logs_table::Migration),
        ]
    }
}
