use crate::error::Result;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DiskSpaceReport {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub free_percent: f64,
    pub database_size_bytes: Option<u64>,
    pub reclaimable_estimate_bytes: u64,
    pub requires_cleanup: bool,
    pub is_low_on_space: bool,
    pub recommendations: Vec<String>,
}

/// Per-row size guesses used for the reclaimable estimate. History rows
/// carry a rendered body; log rows are short.
const HISTORY_ROW_ESTIMATE: u64 = 2048;
const LOG_ROW_ESTIMATE: u64 = 256;

pub async fn analyze_disk_space(
    db: &DatabaseConnection,
    history_cutoff_micros: i64,
    logs_cutoff_micros: i64,
) -> Result<DiskSpaceReport> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let cwd = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("/"));

    // The disk whose mount point is the longest prefix of the working
    // directory is the one the database lives on.
    let (total_bytes, free_bytes) = disks
        .iter()
        .filter(|d| cwd.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .or_else(|| disks.iter().next())
        .map(|d| (d.total_space(), d.available_space()))
        .unwrap_or((0, 0));

    let used_bytes = total_bytes.saturating_sub(free_bytes);
    let free_percent = if total_bytes > 0 {
        free_bytes as f64 / total_bytes as f64 * 100.0
    } else {
        0.0
    };

    let database_size_bytes = database_size(db).await;
    let reclaimable_estimate_bytes =
        estimate_reclaimable(db, history_cutoff_micros, logs_cutoff_micros).await?;

    let requires_cleanup = free_percent < 10.0;
    let is_low_on_space = free_percent < 20.0;

    let mut recommendations = Vec::new();
    if requires_cleanup {
        recommendations
            .push("free space is below 10%; run an aggressive cleanup immediately".to_string());
    } else if is_low_on_space {
        recommendations.push("free space is below 20%; schedule a full cleanup".to_string());
    }
    if reclaimable_estimate_bytes > 0 {
        recommendations.push(format!(
            "roughly {reclaimable_estimate_bytes} bytes of aged history and logs can be reclaimed"
        ));
    }
    if recommendations.is_empty() {
        recommendations.push("disk space is healthy".to_string());
    }

    Ok(DiskSpaceReport {
        total_bytes,
        free_bytes,
        used_bytes,
        free_percent,
        database_size_bytes,
        reclaimable_estimate_bytes,
        requires_cleanup,
        is_low_on_space,
        recommendations,
    })
}

async fn database_size(db: &DatabaseConnection) -> Option<u64> {
    let backend = db.get_database_backend();
    match backend {
        sea_orm::DbBackend::Sqlite => {
            let page_count = scalar_i64(db, "PRAGMA page_count").await?;
            let page_size = scalar_i64(db, "PRAGMA page_size").await?;
            Some((page_count * page_size) as u64)
        }
        sea_orm::DbBackend::Postgres => {
            let size = db
                .query_one(Statement::from_string(
                    backend,
                    "SELECT pg_database_size(current_database()) AS size",
                ))
                .await
                .ok()
                .flatten()?
                .try_get::<i64>("", "size")
                .ok()?;
            Some(size as u64)
        }
        _ => None,
    }
}

async fn scalar_i64(db: &DatabaseConnection, sql: &str) -> Option<i64> {
    let row = db
        .query_one(Statement::from_string(db.get_database_backend(), sql))
        .await
        .ok()
        .flatten()?;
    // PRAGMA result columns are named after the pragma itself
    let column = sql.rsplit(' ').next().unwrap_or_default();
    row.try_get::<i64>("", column).ok()
}

async fn estimate_reclaimable(
    db: &DatabaseConnection,
    history_cutoff_micros: i64,
    logs_cutoff_micros: i64,
) -> Result<u64> {
    let backend = db.get_database_backend();

    let history_rows = count_query(
        db,
        Statement::from_sql_and_values(
            backend,
            crate::database::backend_sql(
                backend,
                "SELECT COUNT(*) AS count FROM email_history WHERE COALESCE(sent_at, created_at) < ?",
            ),
            [history_cutoff_micros.into()],
        ),
    )
    .await?;

    let log_rows = count_query(
        db,
        Statement::from_sql_and_values(
            backend,
            crate::database::backend_sql(
                backend,
                "SELECT COUNT(*) AS count FROM processing_logs WHERE created_at < ?",
            ),
            [logs_cutoff_micros.into()],
        ),
    )
    .await?;

    Ok(history_rows * HISTORY_ROW_ESTIMATE + log_rows * LOG_ROW_ESTIMATE)
}

async fn count_query(db: &DatabaseConnection, statement: Statement) -> Result<u64> {
    let count = match db.query_one(statement).await? {
        Some(row) => row.try_get::<i64>("", "count")? as u64,
        None => 0,
    };
    Ok(count)
}
