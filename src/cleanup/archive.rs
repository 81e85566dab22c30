use crate::database::email_history::{self, Entity as EmailHistory};
use crate::error::{MailerError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ArchiveResult {
    pub records_archived: u64,
    pub file_path: Option<String>,
}

/// Serialize history rows older than the cutoff to gzip-compressed JSON and
/// return them for deletion. The file holds a plain JSON array with every
/// row field verbatim.
pub async fn write_history_archive(
    db: &DatabaseConnection,
    cutoff_micros: i64,
    max_records: u64,
    archive_dir: &Path,
) -> Result<(Vec<String>, ArchiveResult)> {
    let rows = EmailHistory::find()
        .filter(
            email_history::Column::SentAt
                .lt(cutoff_micros)
                .or(email_history::Column::SentAt
                    .is_null()
                    .and(email_history::Column::CreatedAt.lt(cutoff_micros))),
        )
        .order_by_asc(email_history::Column::CreatedAt)
        .limit(max_records)
        .all(db)
        .await?;

    if rows.is_empty() {
        return Ok((
            Vec::new(),
            ArchiveResult {
                records_archived: 0,
                file_path: None,
            },
        ));
    }

    std::fs::create_dir_all(archive_dir)?;
    let file_name = format!(
        "EmailHistory_Archive_{}.json.gz",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    );
    let file_path = archive_dir.join(&file_name);

    let json = serde_json::to_vec(&rows)?;
    let file = std::fs::File::create(&file_path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&json)?;
    encoder.finish()?;

    let ids = rows.into_iter().map(|r| r.id).collect::<Vec<_>>();
    let count = ids.len() as u64;

    tracing::info!(
        records = count,
        file = %file_path.display(),
        "Email history archive written"
    );

    Ok((
        ids,
        ArchiveResult {
            records_archived: count,
            file_path: Some(file_path.display().to_string()),
        },
    ))
}

/// Remove archive/backup files older than the retention window, going by
/// filesystem modification time.
pub fn prune_old_files(dir: &Path, retention_days: i64) -> Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = std::time::SystemTime::now()
        .checked_sub(std::time::Duration::from_secs(
            retention_days.max(0) as u64 * 24 * 60 * 60,
        ))
        .ok_or_else(|| MailerError::config("backup retention overflows system time"))?;

    let mut removed = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(file = %entry.path().display(), "Failed to remove old file: {e}");
                }
            }
        }
    }

    Ok(removed)
}

/// Port to the vendor backup facility. SQLite snapshots the live database
/// with `VACUUM INTO`; other backends need an external tool and report so.
#[async_trait::async_trait]
pub trait BackupEngine: Send + Sync {
    async fn create_backup(&self, db: &DatabaseConnection, target_dir: &Path) -> Result<PathBuf>;
}

pub struct SqliteBackupEngine;

#[async_trait::async_trait]
impl BackupEngine for SqliteBackupEngine {
    async fn create_backup(&self, db: &DatabaseConnection, target_dir: &Path) -> Result<PathBuf> {
        use sea_orm::{ConnectionTrait, Statement};

        if db.get_database_backend() != sea_orm::DbBackend::Sqlite {
            return Err(MailerError::config(
                "database backups are only built in for sqlite; use the vendor tooling for other backends",
            ));
        }

        std::fs::create_dir_all(target_dir)?;
        let file_name = format!(
            "mailspool_backup_{}.db",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let target = target_dir.join(&file_name);

        let sql = format!("VACUUM INTO '{}'", target.display());
        db.execute(Statement::from_string(db.get_database_backend(), sql))
            .await?;

        tracing::info!(file = %target.display(), "Database backup created");
        Ok(target)
    }
}
