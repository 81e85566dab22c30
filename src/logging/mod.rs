use crate::database::{now_micros, processing_logs};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use uuid::Uuid;

/// Durable processing trail. Writes are best-effort: a failed insert is
/// reported through tracing and never fails the pipeline step it annotates.
#[derive(Clone)]
pub struct ProcessingLogger {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl ProcessingLogger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn log(
        &self,
        level: LogLevel,
        category: &str,
        message: &str,
        queue_id: Option<&str>,
        worker_id: Option<&str>,
        processing_step: Option<&str>,
    ) {
        let row = processing_logs::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            level: Set(level.as_str().to_string()),
            category: Set(category.to_string()),
            message: Set(message.to_string()),
            queue_id: Set(queue_id.map(str::to_string)),
            worker_id: Set(worker_id.map(str::to_string)),
            processing_step: Set(processing_step.map(str::to_string)),
            created_at: Set(now_micros()),
        };

        if let Err(e) = row.insert(self.db.as_ref()).await {
            tracing::warn!("Failed to write processing log: {e}");
        }
    }

    pub async fn info(&self, category: &str, message: &str, queue_id: Option<&str>) {
        self.log(LogLevel::Info, category, message, queue_id, None, None)
            .await;
    }

    pub async fn warning(&self, category: &str, message: &str, queue_id: Option<&str>) {
        self.log(LogLevel::Warning, category, message, queue_id, None, None)
            .await;
    }

    pub async fn error(&self, category: &str, message: &str, queue_id: Option<&str>) {
        self.log(LogLevel::Error, category, message, queue_id, None, None)
            .await;
    }
}
