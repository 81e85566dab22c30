use crate::config::ProcessingSettings;
use crate::health::alerts::Alerter;
use crate::logging::{LogLevel, ProcessingLogger};
use crate::queue::QueueManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Periodic recovery of rows abandoned in Processing by crashed or hung
/// workers. Resets do not count against the retry budget.
pub struct Reaper {
    queue: QueueManager,
    logger: ProcessingLogger,
    alerter: Option<Arc<Alerter>>,
    threshold_minutes: i64,
    interval: Duration,
    alert_threshold: u64,
    shutdown: CancellationToken,
}

impl Reaper {
    pub fn new(
        queue: QueueManager,
        logger: ProcessingLogger,
        alerter: Option<Arc<Alerter>>,
        config: &ProcessingSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            logger,
            alerter,
            threshold_minutes: config.stuck_threshold_minutes,
            interval: Duration::from_secs(config.reaper_interval_secs),
            alert_threshold: config.stuck_alert_threshold,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            tracing::info!(
                threshold_minutes = self.threshold_minutes,
                "Stuck-job reaper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.shutdown.cancelled() => break,
                }

                match self.queue.reset_stuck(self.threshold_minutes).await {
                    Ok(0) => {}
                    Ok(count) => {
                        tracing::info!(count, "Reaper reset stuck queue items");
                        self.logger
                            .log(
                                LogLevel::Info,
                                "reaper",
                                &format!("reset {count} stuck items to queued"),
                                None,
                                None,
                                Some("reap"),
                            )
                            .await;

                        if count > self.alert_threshold {
                            if let Some(alerter) = &self.alerter {
                                alerter
                                    .alert(
                                        "warning",
                                        "Stuck email jobs reset",
                                        &format!(
                                            "Reaper reset {count} items stuck in processing for more than {} minutes",
                                            self.threshold_minutes
                                        ),
                                    )
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Reaper pass failed: {e}");
                    }
                }
            }

            tracing::info!("Stuck-job reaper stopped");
        })
    }
}
