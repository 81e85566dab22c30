pub mod email_attachments;
pub mod email_history;
pub mod email_queue;
pub mod email_templates;
pub mod migrator;
pub mod processing_logs;
pub mod scheduled_emails;
pub mod service_status;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

/// Connect and bring the schema up to date. In-memory sqlite is pinned to a
/// single pooled connection: every sqlite `:memory:` connection is its own
/// database, so a wider pool would scatter the schema.
pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(database_url.to_string());
    if database_url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    }

    let db = Database::connect(options).await?;
    migrator::Migrator::up(&db, None).await?;
    Ok(db)
}

/// Current time as UTC epoch microseconds, the timestamp unit used by every
/// persisted column in this crate.
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
pub const MICROS_PER_DAY: i64 = 24 * 60 * MICROS_PER_MINUTE;

/// Rewrite `?` placeholders to `$1..$n` for Postgres. SQLite (and MySQL)
/// take `?` as-is.
pub fn backend_sql(backend: sea_orm::DbBackend, sql: &str) -> String {
    match backend {
        sea_orm::DbBackend::Postgres => {
            let mut numbered = String::with_capacity(sql.len());
            let mut n = 0;
            for c in sql.chars() {
                if c == '?' {
                    n += 1;
                    numbered.push('$');
                    numbered.push_str(&n.to_string());
                } else {
                    numbered.push(c);
                }
            }
            numbered
        }
        _ => sql.to_string(),
    }
}
