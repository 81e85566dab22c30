use crate::database::email_queue::EmailPriority;
use crate::database::scheduled_emails::{self, Entity as ScheduledEmails};
use crate::database::{now_micros, MICROS_PER_DAY, MICROS_PER_MINUTE};
use crate::error::{MailerError, Result};
use crate::queue::models::{AttachmentData, EnqueueRequest};
use crate::queue::QueueManager;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Payload and recurrence rule for a future-dated email.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduledEmailSpec {
    pub to_emails: String,
    #[serde(default)]
    pub cc_emails: Option<String>,
    #[serde(default)]
    pub bcc_emails: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_html: bool,
    #[serde(default)]
    pub priority: Option<EmailPriority>,
    #[serde(default)]
    pub template_id: Option<i32>,
    #[serde(default)]
    pub template_data: Option<HashMap<String, String>>,
    #[serde(default)]
    pub attachments: Vec<AttachmentData>,
    #[serde(default)]
    pub interval_minutes: Option<i32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub end_date: Option<i64>,
    #[serde(default)]
    pub max_executions: Option<i32>,
    pub created_by: String,
}

/// Promotes due scheduled emails into the queue on a periodic tick and keeps
/// recurrence bookkeeping.
pub struct Scheduler {
    db: Arc<DatabaseConnection>,
    queue: QueueManager,
    tick_interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        queue: QueueManager,
        tick_interval_secs: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            queue,
            tick_interval: Duration::from_secs(tick_interval_secs),
            shutdown,
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick_interval);
            tracing::info!(interval = ?self.tick_interval, "Scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.shutdown.cancelled() => break,
                }

                match self.process_due().await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "Materialized due scheduled emails"),
                    Err(e) => tracing::error!("Scheduler tick failed: {e}"),
                }
            }

            tracing::info!("Scheduler stopped");
        })
    }

    pub async fn schedule(&self, spec: ScheduledEmailSpec, when: i64) -> Result<i32> {
        if spec.to_emails.trim().is_empty() {
            return Err(MailerError::validation("recipient list must not be empty"));
        }
        if spec.subject.trim().is_empty() {
            return Err(MailerError::validation("subject must not be empty"));
        }

        let now = now_micros();
        let row = scheduled_emails::ActiveModel {
            to_emails: Set(spec.to_emails),
            cc_emails: Set(spec.cc_emails),
            bcc_emails: Set(spec.bcc_emails),
            subject: Set(spec.subject),
            body: Set(spec.body),
            is_html: Set(spec.is_html),
            priority: Set(spec.priority.unwrap_or_default().as_i32()),
            template_id: Set(spec.template_id),
            template_data: Set(spec
                .template_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?),
            attachments: Set(if spec.attachments.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&spec.attachments)?)
            }),
            next_run_time: Set(when),
            interval_minutes: Set(spec.interval_minutes),
            cron_expression: Set(spec.cron_expression),
            is_recurring: Set(spec.is_recurring),
            end_date: Set(spec.end_date),
            max_executions: Set(spec.max_executions),
            execution_count: Set(0),
            last_executed_at: Set(None),
            last_execution_status: Set(None),
            last_execution_error: Set(None),
            is_active: Set(true),
            created_by: Set(spec.created_by),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let inserted = row.insert(self.db.as_ref()).await?;
        tracing::info!(id = inserted.id, "Scheduled email created");
        Ok(inserted.id)
    }

    /// Deactivate a schedule. A one-shot schedule that already ran cannot be
    /// cancelled.
    pub async fn cancel(&self, id: i32) -> Result<bool> {
        let Some(row) = ScheduledEmails::find_by_id(id).one(self.db.as_ref()).await? else {
            return Ok(false);
        };
        if !row.is_recurring && row.execution_count > 0 {
            return Ok(false);
        }

        let mut active: scheduled_emails::ActiveModel = row.into();
        active.is_active = Set(false);
        active.updated_at = Set(now_micros());
        active.update(self.db.as_ref()).await?;
        Ok(true)
    }

    pub async fn reschedule(&self, id: i32, new_time: i64) -> Result<bool> {
        if new_time <= now_micros() {
            return Err(MailerError::validation(
                "reschedule time must be in the future",
            ));
        }

        let Some(row) = ScheduledEmails::find_by_id(id).one(self.db.as_ref()).await? else {
            return Ok(false);
        };
        if !row.is_recurring && row.execution_count > 0 {
            return Ok(false);
        }

        let mut active: scheduled_emails::ActiveModel = row.into();
        active.next_run_time = Set(new_time);
        active.is_active = Set(true);
        active.updated_at = Set(now_micros());
        active.update(self.db.as_ref()).await?;
        Ok(true)
    }

    pub async fn list_in_range(&self, from: i64, to: i64) -> Result<Vec<scheduled_emails::Model>> {
        Ok(ScheduledEmails::find()
            .filter(scheduled_emails::Column::NextRunTime.gte(from))
            .filter(scheduled_emails::Column::NextRunTime.lte(to))
            .order_by_asc(scheduled_emails::Column::NextRunTime)
            .all(self.db.as_ref())
            .await?)
    }

    /// Materialize every due schedule into a fresh queue item and advance (or
    /// deactivate) the schedule. Returns the number of schedules handled.
    pub async fn process_due(&self) -> Result<u64> {
        let now = now_micros();
        let due = ScheduledEmails::find()
            .filter(scheduled_emails::Column::IsActive.eq(true))
            .filter(scheduled_emails::Column::NextRunTime.lte(now))
            .order_by_asc(scheduled_emails::Column::NextRunTime)
            .all(self.db.as_ref())
            .await?;

        let mut processed = 0u64;
        for schedule in due {
            match self.materialize(&schedule).await {
                Ok(queue_id) => {
                    self.advance(schedule, Some(queue_id), None).await?;
                }
                Err(e) => {
                    tracing::error!(
                        schedule_id = schedule.id,
                        "Failed to materialize scheduled email: {e}"
                    );
                    self.advance(schedule, None, Some(e.to_string())).await?;
                }
            }
            processed += 1;
        }

        Ok(processed)
    }

    async fn materialize(&self, schedule: &scheduled_emails::Model) -> Result<String> {
        let template_data: Option<HashMap<String, String>> = schedule
            .template_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let attachments: Vec<AttachmentData> = schedule
            .attachments
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default();

        self.queue
            .enqueue(EnqueueRequest {
                to_emails: schedule.to_emails.clone(),
                cc_emails: schedule.cc_emails.clone(),
                bcc_emails: schedule.bcc_emails.clone(),
                subject: schedule.subject.clone(),
                body: schedule.body.clone(),
                is_html: schedule.is_html,
                priority: EmailPriority::from_i32(schedule.priority),
                template_id: schedule.template_id,
                template_data,
                attachments,
                custom_headers: None,
                request_delivery_notification: false,
                request_read_receipt: false,
                scheduled_for: None,
                max_retries: None,
                created_by: schedule.created_by.clone(),
                request_source: Some(format!("scheduler:{}", schedule.id)),
            })
            .await
    }

    /// Recurrence bookkeeping after an execution attempt. Recurring schedules
    /// advance by their interval (one day when none is set) from now, so a
    /// backlog never causes a catch-up storm; exhausted or expired schedules
    /// deactivate.
    async fn advance(
        &self,
        schedule: scheduled_emails::Model,
        queue_id: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let now = now_micros();
        let execution_count = schedule.execution_count + 1;
        let is_recurring = schedule.is_recurring;
        let end_date = schedule.end_date;
        let max_executions = schedule.max_executions;
        let interval_minutes = schedule.interval_minutes;
        let schedule_id = schedule.id;

        let mut active: scheduled_emails::ActiveModel = schedule.into();
        active.execution_count = Set(execution_count);
        active.last_executed_at = Set(Some(now));
        active.last_execution_status = Set(Some(if error.is_none() {
            "success".to_string()
        } else {
            "failed".to_string()
        }));
        active.last_execution_error = Set(error);
        active.updated_at = Set(now);

        if is_recurring {
            let next = match interval_minutes {
                Some(minutes) => now + minutes as i64 * MICROS_PER_MINUTE,
                None => now + MICROS_PER_DAY,
            };

            let expired = end_date.is_some_and(|end| next > end);
            let exhausted = max_executions.is_some_and(|max| execution_count >= max);
            if expired || exhausted {
                active.is_active = Set(false);
                tracing::info!(schedule_id, "Recurring schedule deactivated");
            } else {
                active.next_run_time = Set(next);
            }
        } else {
            active.is_active = Set(false);
        }

        active.update(self.db.as_ref()).await?;

        if let Some(queue_id) = queue_id {
            tracing::debug!(schedule_id, queue_id = %queue_id, "Schedule materialized");
        }
        Ok(())
    }
}
