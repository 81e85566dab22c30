pub mod reaper;

use crate::composer::{MimeComposer, OutboundEmail};
use crate::config::ProcessingSettings;
use crate::database::email_queue::{self, EmailPriority};
use crate::error::{MailerError, Result};
use crate::logging::{LogLevel, ProcessingLogger};
use crate::queue::models::AttachmentData;
use crate::queue::QueueManager;
use crate::smtp::MailTransport;
use crate::template::TemplateEngine;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

static STARTUP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stable worker identity for the lifetime of this process:
/// `hostname#pid#startup-counter`.
pub fn next_worker_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let counter = STARTUP_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{hostname}#{}#{counter}", std::process::id())
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Long-running supervisor: claims batches, fans items out to a bounded set
/// of workers, and feeds outcomes back to the queue manager.
#[derive(Clone)]
pub struct Dispatcher {
    queue: QueueManager,
    composer: MimeComposer,
    templates: Arc<TemplateEngine>,
    transport: Arc<dyn MailTransport>,
    logger: ProcessingLogger,
    config: ProcessingSettings,
    worker_id: String,
    semaphore: Arc<Semaphore>,
    rate_limiter: Arc<DirectRateLimiter>,
    shutdown: CancellationToken,
    supervisor: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl Dispatcher {
    pub fn new(
        queue: QueueManager,
        composer: MimeComposer,
        templates: Arc<TemplateEngine>,
        transport: Arc<dyn MailTransport>,
        logger: ProcessingLogger,
        config: ProcessingSettings,
        rate_limit_per_minute: u32,
        burst_limit: u32,
    ) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(rate_limit_per_minute.max(1)).expect("nonzero rate limit"),
        )
        .allow_burst(NonZeroU32::new(burst_limit.max(1)).expect("nonzero burst"));

        Self {
            queue,
            composer,
            templates,
            transport,
            logger,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_workers)),
            config,
            worker_id: next_worker_id(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            shutdown: CancellationToken::new(),
            supervisor: Arc::new(RwLock::new(None)),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Spawn the supervisor loop. Items left in Processing by a previous
    /// crash are recovered first so they become claimable again.
    pub async fn start(&self) -> Result<()> {
        match self
            .queue
            .reset_stuck(self.config.stuck_threshold_minutes)
            .await
        {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::warn!(recovered, "Recovered stuck items from a previous run");
            }
            Err(e) => {
                tracing::error!("Crash recovery failed: {e}");
            }
        }

        let dispatcher = self.clone();
        let handle = tokio::spawn(async move {
            dispatcher.run().await;
        });
        *self.supervisor.write().await = Some(handle);

        tracing::info!(worker_id = %self.worker_id, "Dispatcher started");
        Ok(())
    }

    /// Stop claiming and wait for in-flight items up to the drain timeout.
    /// Anything still Processing afterwards is recovered by the reaper on the
    /// next startup.
    pub async fn shutdown(&self) {
        tracing::info!("Dispatcher shutting down...");
        self.shutdown.cancel();

        if let Some(handle) = self.supervisor.write().await.take() {
            let drain = Duration::from_secs(self.config.shutdown_drain_timeout_secs);
            match tokio::time::timeout(drain, handle).await {
                Ok(Ok(())) => tracing::info!("Dispatcher drained cleanly"),
                Ok(Err(e)) => tracing::error!("Dispatcher supervisor panicked: {e}"),
                Err(_) => tracing::warn!(
                    "Dispatcher drain timed out after {drain:?}; remaining items go back via the reaper"
                ),
            }
        }
    }

    async fn run(&self) {
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.claim_and_process().await {
                Ok(0) => {
                    tokio::select! {
                        _ = sleep(poll_interval) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
                Ok(count) => {
                    tracing::debug!(count, "Processed batch");
                }
                Err(e) => {
                    // Storage trouble: suspend the claim loop for a poll
                    // interval instead of hot-spinning against a down DB.
                    tracing::error!("Claim loop error: {e}");
                    tokio::select! {
                        _ = sleep(poll_interval) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            }
        }

        tracing::info!("Dispatcher supervisor stopped");
    }

    /// One claim + fan-out cycle. Returns the number of items handled.
    async fn claim_and_process(&self) -> Result<usize> {
        let mut items = self
            .queue
            .claim_batch(self.config.batch_size, &self.worker_id)
            .await?;
        items.extend(
            self.queue
                .claim_due_scheduled(self.config.batch_size, &self.worker_id)
                .await?,
        );

        if items.is_empty() {
            return Ok(0);
        }

        let count = items.len();
        let mut handles = Vec::with_capacity(count);
        for item in items {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            let dispatcher = self.clone();
            handles.push(tokio::spawn(async move {
                let queue_id = item.queue_id.clone();
                if let Err(e) = dispatcher.process_item(item).await {
                    // Storage failure mid-flight: the row stays Processing
                    // and the reaper will recover it.
                    tracing::error!(queue_id = %queue_id, "Item processing aborted on storage error: {e}");
                }
                drop(permit);
            }));
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Worker task panicked: {e}");
            }
        }

        Ok(count)
    }

    /// The per-item pipeline: template → compose → rate limit → send →
    /// report. Only storage errors escape; every other failure is classified
    /// and reported to the queue manager here.
    async fn process_item(&self, item: email_queue::Model) -> Result<()> {
        let started = Instant::now();
        let queue_id = item.queue_id.clone();

        let (subject, body) = match self.resolve_content(&item).await {
            Ok(content) => content,
            Err(e) => {
                self.report_failure(&queue_id, &e, "template").await?;
                return Ok(());
            }
        };

        let outbound = match self.build_outbound(&item, &subject, &body) {
            Ok(outbound) => outbound,
            Err(e) => {
                self.report_failure(&queue_id, &e, "normalize").await?;
                return Ok(());
            }
        };

        let composed = match self.composer.compose(&outbound).await {
            Ok(composed) => composed,
            Err(e) => {
                self.report_failure(&queue_id, &e, "compose").await?;
                return Ok(());
            }
        };
        for warning in &composed.warnings {
            self.logger
                .log(
                    LogLevel::Warning,
                    "composer",
                    warning,
                    Some(&queue_id),
                    Some(&self.worker_id),
                    Some("compose"),
                )
                .await;
        }

        self.rate_limiter.until_ready().await;

        if let Err(e) = self.transport.send(&composed.message).await {
            self.report_failure(&queue_id, &e, "send").await?;
            return Ok(());
        }

        let elapsed_ms = started.elapsed().as_millis() as i64;
        self.queue
            .mark_sent(&queue_id, &self.worker_id, elapsed_ms, &subject, &body)
            .await?;
        self.logger
            .log(
                LogLevel::Info,
                "dispatcher",
                &format!("sent in {elapsed_ms} ms"),
                Some(&queue_id),
                Some(&self.worker_id),
                Some("send"),
            )
            .await;

        Ok(())
    }

    /// Resolve the final subject and body, substituting template placeholders
    /// when the row asks for it.
    async fn resolve_content(&self, item: &email_queue::Model) -> Result<(String, String)> {
        if !item.requires_template_processing {
            return Ok((item.subject.clone(), item.body.clone()));
        }
        let Some(template_id) = item.template_id else {
            return Ok((item.subject.clone(), item.body.clone()));
        };

        let template = self.templates.resolve_active(template_id).await?;

        let values: HashMap<String, String> = match &item.template_data {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| MailerError::validation(format!("template_data is not valid JSON: {e}")))?,
            None => HashMap::new(),
        };

        let rendered = self
            .templates
            .render(&template.subject_template, &template.body_template, &values);

        if !rendered.missing_placeholders.is_empty() {
            self.logger
                .log(
                    LogLevel::Warning,
                    "template",
                    &format!(
                        "missing placeholders: {}",
                        rendered.missing_placeholders.join(", ")
                    ),
                    Some(&item.queue_id),
                    Some(&self.worker_id),
                    Some("template"),
                )
                .await;
        }

        Ok((rendered.subject, rendered.body))
    }

    fn build_outbound(
        &self,
        item: &email_queue::Model,
        subject: &str,
        body: &str,
    ) -> Result<OutboundEmail> {
        let attachments: Vec<AttachmentData> = match &item.attachments {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| MailerError::validation(format!("attachments are not valid JSON: {e}")))?,
            None => Vec::new(),
        };
        let custom_headers: HashMap<String, String> = match &item.custom_headers {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| MailerError::validation(format!("custom_headers are not valid JSON: {e}")))?,
            None => HashMap::new(),
        };

        Ok(OutboundEmail {
            to_emails: item.to_emails.clone(),
            cc_emails: item.cc_emails.clone(),
            bcc_emails: item.bcc_emails.clone(),
            reply_to: None,
            subject: subject.to_string(),
            body: body.to_string(),
            is_html: item.is_html,
            priority: EmailPriority::from_i32(item.priority),
            attachments,
            custom_headers,
            request_delivery_notification: item.request_delivery_notification,
            request_read_receipt: item.request_read_receipt,
        })
    }

    async fn report_failure(&self, queue_id: &str, error: &MailerError, step: &str) -> Result<()> {
        let should_retry = error.is_retryable();
        self.logger
            .log(
                if should_retry {
                    LogLevel::Warning
                } else {
                    LogLevel::Error
                },
                "dispatcher",
                &error.to_string(),
                Some(queue_id),
                Some(&self.worker_id),
                Some(step),
            )
            .await;
        self.queue
            .mark_failed(queue_id, &error.to_string(), should_retry)
            .await
    }
}
