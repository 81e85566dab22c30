pub mod archive;
pub mod disk;

use crate::config::CleanupSettings;
use crate::database::{backend_sql, now_micros, MICROS_PER_DAY};
use crate::error::Result;
use archive::{ArchiveResult, BackupEngine, SqliteBackupEngine};
use disk::DiskSpaceReport;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct CleanupStepResult {
    pub step: String,
    pub records_affected: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FullCleanupReport {
    pub steps: Vec<CleanupStepResult>,
    pub total_records_removed: u64,
    pub archive: Option<ArchiveResult>,
    pub backup_file: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct RetentionWindows {
    history_days: i64,
    logs_days: i64,
    attachments_days: i64,
    service_status_days: i64,
    failed_queue_days: i64,
}

/// Age-based retention over every durable table, with archival, orphan
/// sweeping, backups and disk-pressure escalation.
pub struct CleanupEngine {
    db: Arc<DatabaseConnection>,
    settings: CleanupSettings,
    backup: Arc<dyn BackupEngine>,
}

impl CleanupEngine {
    pub fn new(db: Arc<DatabaseConnection>, settings: CleanupSettings) -> Self {
        Self {
            db,
            settings,
            backup: Arc::new(SqliteBackupEngine),
        }
    }

    pub fn with_backup_engine(mut self, backup: Arc<dyn BackupEngine>) -> Self {
        self.backup = backup;
        self
    }

    /// Spawn the periodic cleanup loop.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval =
            std::time::Duration::from_secs(self.settings.cleanup_interval_minutes.max(1) * 60);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            tracing::info!(interval = ?interval, "Cleanup service started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.cancelled() => break,
                }

                let report = self.perform_full_cleanup().await;
                tracing::info!(
                    removed = report.total_records_removed,
                    steps = report.steps.len(),
                    "Cleanup pass finished"
                );

                if self.settings.enable_aggressive_cleanup {
                    match disk::analyze_disk_space(
                        self.db.as_ref(),
                        self.cutoff(self.settings.history_retention_days),
                        self.cutoff(self.settings.logs_retention_days),
                    )
                    .await
                    {
                        Ok(space) if space.requires_cleanup => {
                            tracing::warn!(
                                free_percent = space.free_percent,
                                "Disk pressure detected, escalating to aggressive cleanup"
                            );
                            let report = self.perform_aggressive_cleanup(20.0).await;
                            tracing::info!(
                                removed = report.total_records_removed,
                                "Aggressive cleanup finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Disk space analysis failed: {e}"),
                    }
                }
            }

            tracing::info!("Cleanup service stopped");
        })
    }

    fn cutoff(&self, retention_days: i64) -> i64 {
        now_micros() - retention_days * MICROS_PER_DAY
    }

    /// Delete at most `max_records_per_cleanup` rows matching the predicate.
    async fn delete_capped(
        &self,
        table: &str,
        primary_key: &str,
        predicate: &str,
        cutoff_micros: i64,
    ) -> Result<u64> {
        let backend = self.db.get_database_backend();
        let sql = format!(
            "DELETE FROM {table} WHERE {primary_key} IN (\
                SELECT {primary_key} FROM {table} WHERE {predicate} LIMIT ?\
            )"
        );
        let statement = Statement::from_sql_and_values(
            backend,
            backend_sql(backend, &sql),
            [
                cutoff_micros.into(),
                self.settings.max_records_per_cleanup.into(),
            ],
        );
        let result = self.db.execute(statement).await?;
        Ok(result.rows_affected())
    }

    pub async fn cleanup_email_history(&self, retention_days: i64) -> Result<u64> {
        self.delete_capped(
            "email_history",
            "id",
            "COALESCE(sent_at, created_at) < ?",
            self.cutoff(retention_days),
        )
        .await
    }

    pub async fn cleanup_processing_logs(&self, retention_days: i64) -> Result<u64> {
        self.delete_capped(
            "processing_logs",
            "id",
            "created_at < ?",
            self.cutoff(retention_days),
        )
        .await
    }

    pub async fn cleanup_attachments(&self, retention_days: i64) -> Result<u64> {
        self.delete_capped(
            "email_attachments",
            "id",
            "created_at < ?",
            self.cutoff(retention_days),
        )
        .await
    }

    pub async fn cleanup_service_status(&self, retention_days: i64) -> Result<u64> {
        self.delete_capped(
            "service_status",
            "id",
            "last_heartbeat < ?",
            self.cutoff(retention_days),
        )
        .await
    }

    pub async fn cleanup_failed_queue_items(&self, retention_days: i64) -> Result<u64> {
        self.delete_capped(
            "email_queue",
            "queue_id",
            "status = 'failed' AND updated_at < ?",
            self.cutoff(retention_days),
        )
        .await
    }

    /// Attachment rows whose queue_id is referenced by neither a live queue
    /// row nor a history row are swept unconditionally.
    pub async fn cleanup_orphaned_attachments(&self) -> Result<u64> {
        let backend = self.db.get_database_backend();
        let sql = "DELETE FROM email_attachments WHERE id IN (\
                SELECT a.id FROM email_attachments a \
                WHERE NOT EXISTS (SELECT 1 FROM email_queue q WHERE q.queue_id = a.queue_id) \
                  AND NOT EXISTS (SELECT 1 FROM email_history h WHERE h.queue_id = a.queue_id) \
                LIMIT ?\
            )";
        let statement = Statement::from_sql_and_values(
            backend,
            backend_sql(backend, sql),
            [self.settings.max_records_per_cleanup.into()],
        );
        let result = self.db.execute(statement).await?;
        Ok(result.rows_affected())
    }

    /// Archive aged history rows to a gzip JSON file, then delete them.
    pub async fn archive_email_history(
        &self,
        retention_days: i64,
        archive_dir: &Path,
    ) -> Result<ArchiveResult> {
        let cutoff = self.cutoff(retention_days);
        let (ids, result) = archive::write_history_archive(
            self.db.as_ref(),
            cutoff,
            self.settings.max_records_per_cleanup,
            archive_dir,
        )
        .await?;

        if !ids.is_empty() {
            self.delete_history_by_ids(&ids).await?;
        }
        Ok(result)
    }

    async fn delete_history_by_ids(&self, ids: &[String]) -> Result<u64> {
        const MAX_DELETE_BATCH: usize = 500;
        let backend = self.db.get_database_backend();
        let mut total = 0u64;

        for chunk in ids.chunks(MAX_DELETE_BATCH) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("DELETE FROM email_history WHERE id IN ({placeholders})");
            let values: Vec<sea_orm::Value> = chunk.iter().map(|id| id.as_str().into()).collect();
            let statement =
                Statement::from_sql_and_values(backend, backend_sql(backend, &sql), values);
            total += self.db.execute(statement).await?.rows_affected();
        }

        Ok(total)
    }

    pub async fn create_backup(&self) -> Result<String> {
        let path = self
            .backup
            .create_backup(self.db.as_ref(), Path::new(&self.settings.backup_path))
            .await?;
        Ok(path.display().to_string())
    }

    pub async fn cleanup_old_backups(&self, retention_days: i64) -> Result<u64> {
        archive::prune_old_files(Path::new(&self.settings.backup_path), retention_days)
    }

    /// Refresh planner statistics; sqlite additionally gets a PRAGMA
    /// optimize pass.
    pub async fn optimize_database(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        self.db
            .execute(Statement::from_string(backend, "ANALYZE"))
            .await?;
        if backend == sea_orm::DbBackend::Sqlite {
            self.db
                .execute(Statement::from_string(backend, "PRAGMA optimize"))
                .await?;
        }
        Ok(())
    }

    pub async fn analyze_disk_space(&self) -> Result<DiskSpaceReport> {
        disk::analyze_disk_space(
            self.db.as_ref(),
            self.cutoff(self.settings.history_retention_days),
            self.cutoff(self.settings.logs_retention_days),
        )
        .await
    }

    pub async fn perform_full_cleanup(&self) -> FullCleanupReport {
        let windows = RetentionWindows {
            history_days: self.settings.history_retention_days,
            logs_days: self.settings.logs_retention_days,
            attachments_days: self.settings.attachments_retention_days,
            service_status_days: self.settings.service_status_retention_days,
            failed_queue_days: self.settings.failed_queue_retention_days,
        };
        self.run_suite(windows).await
    }

    /// Shorten retention based on how much space must be recovered, then run
    /// the full suite.
    pub async fn perform_aggressive_cleanup(&self, target_free_percent: f64) -> FullCleanupReport {
        let days = if target_free_percent >= 20.0 {
            1
        } else if target_free_percent >= 10.0 {
            7
        } else {
            30
        };

        tracing::warn!(
            target_free_percent,
            retention_days = days,
            "Aggressive cleanup shortening retention"
        );

        let windows = RetentionWindows {
            history_days: days,
            logs_days: days.min(self.settings.logs_retention_days),
            attachments_days: days.min(self.settings.attachments_retention_days),
            service_status_days: days.min(self.settings.service_status_retention_days),
            failed_queue_days: days.min(self.settings.failed_queue_retention_days),
        };
        self.run_suite(windows).await
    }

    /// Execute every cleanup step in order, isolating failures so one broken
    /// step never aborts the rest.
    async fn run_suite(&self, windows: RetentionWindows) -> FullCleanupReport {
        let mut report = FullCleanupReport::default();

        if self.settings.create_backup_before_cleanup {
            match self.create_backup().await {
                Ok(path) => report.backup_file = Some(path),
                Err(e) => {
                    tracing::error!("Pre-cleanup backup failed: {e}");
                    report.steps.push(CleanupStepResult {
                        step: "create_backup".to_string(),
                        records_affected: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        match self
            .archive_email_history(windows.history_days, Path::new(&self.settings.archive_path))
            .await
        {
            Ok(result) => {
                report.total_records_removed += result.records_archived;
                report.steps.push(CleanupStepResult {
                    step: "archive_email_history".to_string(),
                    records_affected: result.records_archived,
                    error: None,
                });
                report.archive = Some(result);
            }
            Err(e) => report.steps.push(CleanupStepResult {
                step: "archive_email_history".to_string(),
                records_affected: 0,
                error: Some(e.to_string()),
            }),
        }

        // History retention is enforced by the archive step above: it deletes
        // only what it has written out, at most one cap per pass. Running the
        // plain capped delete here as well would remove a second cap's worth
        // of rows that were never archived.
        let steps: [(&str, Result<u64>); 5] = [
            (
                "cleanup_processing_logs",
                self.cleanup_processing_logs(windows.logs_days).await,
            ),
            (
                "cleanup_attachments",
                self.cleanup_attachments(windows.attachments_days).await,
            ),
            (
                "cleanup_service_status",
                self.cleanup_service_status(windows.service_status_days)
                    .await,
            ),
            (
                "cleanup_failed_queue_items",
                self.cleanup_failed_queue_items(windows.failed_queue_days)
                    .await,
            ),
            (
                "cleanup_orphaned_attachments",
                self.cleanup_orphaned_attachments().await,
            ),
        ];

        for (name, outcome) in steps {
            match outcome {
                Ok(count) => {
                    report.total_records_removed += count;
                    report.steps.push(CleanupStepResult {
                        step: name.to_string(),
                        records_affected: count,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!(step = name, "Cleanup step failed: {e}");
                    report.steps.push(CleanupStepResult {
                        step: name.to_string(),
                        records_affected: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        match self
            .cleanup_old_backups(self.settings.backup_retention_days)
            .await
        {
            Ok(count) => report.steps.push(CleanupStepResult {
                step: "cleanup_old_backups".to_string(),
                records_affected: count,
                error: None,
            }),
            Err(e) => report.steps.push(CleanupStepResult {
                step: "cleanup_old_backups".to_string(),
                records_affected: 0,
                error: Some(e.to_string()),
            }),
        }

        if let Err(e) = self.optimize_database().await {
            tracing::error!("Database optimization failed: {e}");
            report.steps.push(CleanupStepResult {
                step: "optimize_database".to_string(),
                records_affected: 0,
                error: Some(e.to_string()),
            });
        } else {
            report.steps.push(CleanupStepResult {
                step: "optimize_database".to_string(),
                records_affected: 0,
                error: None,
            });
        }

        report
    }
}
