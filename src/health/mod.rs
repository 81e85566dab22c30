pub mod alerts;

use crate::config::ProcessingSettings;
use crate::database::service_status::{self, Entity as ServiceStatusEntity, HealthStatus};
use crate::database::now_micros;
use crate::error::Result;
use crate::queue::QueueManager;
use crate::smtp::MailTransport;
use alerts::Alerter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, Statement,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: HealthStatus,
    pub elapsed_ms: i64,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub probes: Vec<ProbeResult>,
    pub checked_at: String,
}

/// Heartbeat writer and probe aggregator. One row per
/// (service_name, machine_name) in service_status.
pub struct HealthReporter {
    db: Arc<DatabaseConnection>,
    queue: QueueManager,
    transport: Arc<dyn MailTransport>,
    alerter: Option<Arc<Alerter>>,
    service_name: String,
    machine_name: String,
    max_workers: i32,
    batch_size: i32,
    queue_depth_threshold: u64,
    heartbeat_interval: Duration,
    started_at: i64,
    system: Mutex<sysinfo::System>,
    last_overall: Mutex<Option<HealthStatus>>,
}

impl HealthReporter {
    pub fn new(
        db: Arc<DatabaseConnection>,
        queue: QueueManager,
        transport: Arc<dyn MailTransport>,
        alerter: Option<Arc<Alerter>>,
        service_name: String,
        processing: &ProcessingSettings,
    ) -> Self {
        Self {
            db,
            queue,
            transport,
            alerter,
            service_name,
            machine_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            max_workers: processing.max_concurrent_workers as i32,
            batch_size: processing.batch_size as i32,
            queue_depth_threshold: processing.queue_depth_warning_threshold,
            heartbeat_interval: Duration::from_secs(processing.heartbeat_interval_secs),
            started_at: now_micros(),
            system: Mutex::new(sysinfo::System::new_all()),
            last_overall: Mutex::new(None),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.heartbeat_interval);
            tracing::info!(
                service = %self.service_name,
                machine = %self.machine_name,
                "Health reporter started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.cancelled() => break,
                }

                let report = self.check_health().await;
                if let Err(e) = self.heartbeat(report.overall).await {
                    tracing::error!("Heartbeat write failed: {e}");
                }

                let mut last = self.last_overall.lock().await;
                let escalated = report.overall == HealthStatus::Critical
                    && *last != Some(HealthStatus::Critical);
                *last = Some(report.overall);
                drop(last);

                if escalated {
                    if let Some(alerter) = &self.alerter {
                        let detail = report
                            .probes
                            .iter()
                            .map(|p| format!("{}: {}", p.name, p.status))
                            .collect::<Vec<_>>()
                            .join(", ");
                        alerter
                            .alert("critical", "Email worker health is critical", &detail)
                            .await;
                    }
                }
            }

            tracing::info!("Health reporter stopped");
        })
    }

    pub async fn probe_database(&self) -> ProbeResult {
        let started = Instant::now();
        let backend = self.db.get_database_backend();
        let outcome = self
            .db
            .query_one(Statement::from_string(backend, "SELECT 1 AS one"))
            .await;

        match outcome {
            Ok(_) => ProbeResult {
                name: "database".to_string(),
                status: HealthStatus::Healthy,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: None,
            },
            Err(e) => ProbeResult {
                name: "database".to_string(),
                status: HealthStatus::Unhealthy,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: Some(e.to_string()),
            },
        }
    }

    pub async fn probe_smtp(&self) -> ProbeResult {
        let started = Instant::now();
        match self.transport.test_connection().await {
            Ok(true) => ProbeResult {
                name: "smtp".to_string(),
                status: HealthStatus::Healthy,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: None,
            },
            Ok(false) => ProbeResult {
                name: "smtp".to_string(),
                status: HealthStatus::Unhealthy,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: Some("relay refused the connection".to_string()),
            },
            Err(e) => ProbeResult {
                name: "smtp".to_string(),
                status: HealthStatus::Unhealthy,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: Some(e.to_string()),
            },
        }
    }

    pub async fn probe_queue(&self) -> ProbeResult {
        let started = Instant::now();
        match self.queue.count_pending().await {
            Ok(depth) if depth > self.queue_depth_threshold => ProbeResult {
                name: "queue".to_string(),
                status: HealthStatus::Degraded,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: Some(format!(
                    "queue depth {depth} exceeds threshold {}",
                    self.queue_depth_threshold
                )),
            },
            Ok(depth) => ProbeResult {
                name: "queue".to_string(),
                status: HealthStatus::Healthy,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: Some(format!("depth {depth}")),
            },
            Err(e) => ProbeResult {
                name: "queue".to_string(),
                status: HealthStatus::Unhealthy,
                elapsed_ms: started.elapsed().as_millis() as i64,
                detail: Some(e.to_string()),
            },
        }
    }

    /// Run all probes and fold them into one overall status: a DB failure is
    /// critical on its own, one failing dependency is a warning, more than
    /// one is critical.
    pub async fn check_health(&self) -> HealthReport {
        let probes = vec![
            self.probe_database().await,
            self.probe_smtp().await,
            self.probe_queue().await,
        ];

        let db_unhealthy = probes
            .iter()
            .any(|p| p.name == "database" && p.status == HealthStatus::Unhealthy);
        let unhealthy_count = probes
            .iter()
            .filter(|p| p.status == HealthStatus::Unhealthy)
            .count();
        let any_degraded = probes.iter().any(|p| p.status == HealthStatus::Degraded);

        let overall = if db_unhealthy || unhealthy_count > 1 {
            HealthStatus::Critical
        } else if unhealthy_count == 1 {
            HealthStatus::Warning
        } else if any_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            overall,
            probes,
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Upsert this instance's service_status row with fresh resource gauges
    /// and a config echo.
    pub async fn heartbeat(&self, status: HealthStatus) -> Result<()> {
        let (cpu_usage, memory_used_mb) = {
            let mut system = self.system.lock().await;
            system.refresh_cpu();
            system.refresh_memory();
            (
                system.global_cpu_info().cpu_usage() as f64,
                (system.used_memory() / 1024 / 1024) as i64,
            )
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let disk_free_percent = disks
            .iter()
            .next()
            .map(|d| {
                if d.total_space() > 0 {
                    d.available_space() as f64 / d.total_space() as f64 * 100.0
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);

        let now = now_micros();
        let existing = ServiceStatusEntity::find()
            .filter(service_status::Column::ServiceName.eq(&self.service_name))
            .filter(service_status::Column::MachineName.eq(&self.machine_name))
            .one(self.db.as_ref())
            .await?;

        match existing {
            Some(row) => {
                let mut active: service_status::ActiveModel = row.into();
                active.status = Set(status.to_string());
                active.last_heartbeat = Set(now);
                active.cpu_usage_percent = Set(cpu_usage);
                active.memory_used_mb = Set(memory_used_mb);
                active.disk_free_percent = Set(disk_free_percent);
                active.max_workers = Set(self.max_workers);
                active.batch_size = Set(self.batch_size);
                active.updated_at = Set(now);
                active.update(self.db.as_ref()).await?;
            }
            None => {
                let row = service_status::ActiveModel {
                    service_name: Set(self.service_name.clone()),
                    machine_name: Set(self.machine_name.clone()),
                    status: Set(status.to_string()),
                    last_heartbeat: Set(now),
                    cpu_usage_percent: Set(cpu_usage),
                    memory_used_mb: Set(memory_used_mb),
                    disk_free_percent: Set(disk_free_percent),
                    max_workers: Set(self.max_workers),
                    batch_size: Set(self.batch_size),
                    version: Set(env!("CARGO_PKG_VERSION").to_string()),
                    started_at: Set(self.started_at),
                    updated_at: Set(now),
                    ..Default::default()
                };
                row.insert(self.db.as_ref()).await?;
            }
        }

        Ok(())
    }
}
