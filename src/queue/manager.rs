use crate::composer::normalize::parse_valid_addresses;
use crate::config::ProcessingSettings;
use crate::database::email_queue::{self, EmailPriority, Entity as EmailQueue, QueueStatus};
use crate::database::{backend_sql, email_attachments, email_history, now_micros, MICROS_PER_MINUTE};
use crate::error::{MailerError, Result};
use crate::queue::models::{EnqueueRequest, QueueListFilter, QueueStats};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

const NON_TERMINAL_STATUSES: [&str; 3] = ["queued", "scheduled", "processing"];

#[derive(Clone)]
pub struct QueueManager {
    db: Arc<DatabaseConnection>,
    retry_backoff_minutes: i64,
    max_attachment_total_bytes: usize,
}

impl QueueManager {
    pub fn new(db: Arc<DatabaseConnection>, processing: &ProcessingSettings) -> Self {
        Self {
            db,
            retry_backoff_minutes: processing.retry_backoff_minutes,
            max_attachment_total_bytes: processing.max_attachment_total_bytes,
        }
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    /// Persist a send request. Returns the queue id. The row lands in
    /// `Scheduled` when a future `scheduled_for` is given, otherwise in
    /// `Queued`.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<String> {
        self.validate_request(&request)?;

        let txn = self.db.begin().await?;
        let queue_id = self.insert_request(&txn, &request).await?;
        txn.commit().await?;

        tracing::info!(queue_id = %queue_id, "Email enqueued");
        Ok(queue_id)
    }

    /// Insert a batch in a single transaction. Any invalid item aborts the
    /// whole batch; callers wanting partial acceptance validate up front.
    pub async fn bulk_enqueue(&self, requests: Vec<EnqueueRequest>) -> Result<Vec<String>> {
        for request in &requests {
            self.validate_request(request)?;
        }

        let txn = self.db.begin().await?;
        let mut ids = Vec::with_capacity(requests.len());
        for request in &requests {
            ids.push(self.insert_request(&txn, request).await?);
        }
        txn.commit().await?;

        tracing::info!(count = ids.len(), "Bulk enqueue committed");
        Ok(ids)
    }

    pub fn validate_request(&self, request: &EnqueueRequest) -> Result<()> {
        let (valid, _invalid) = parse_valid_addresses(&request.to_emails);
        if valid.is_empty() {
            return Err(MailerError::validation(
                "recipient list is empty after parsing",
            ));
        }
        if request.subject.trim().is_empty() {
            return Err(MailerError::validation("subject must not be empty"));
        }

        let mut total_bytes = 0usize;
        for attachment in &request.attachments {
            match (&attachment.content, &attachment.file_path) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(MailerError::validation(format!(
                        "attachment '{}' must set exactly one of content and file_path",
                        attachment.file_name
                    )));
                }
                _ => {}
            }
            total_bytes += attachment.estimated_size_bytes();
        }
        if total_bytes > self.max_attachment_total_bytes {
            return Err(MailerError::validation(format!(
                "attachments exceed the {} byte limit",
                self.max_attachment_total_bytes
            )));
        }

        Ok(())
    }

    async fn insert_request<C: ConnectionTrait>(
        &self,
        conn: &C,
        request: &EnqueueRequest,
    ) -> Result<String> {
        let queue_id = Uuid::new_v4().to_string();
        let now = now_micros();

        let is_scheduled = request.scheduled_for.is_some();
        let status = match request.scheduled_for {
            Some(at) if at > now => QueueStatus::Scheduled,
            _ => QueueStatus::Queued,
        };

        let has_embedded_images = request.is_html && request.body.contains("data:image/");

        let attachments_json = if request.attachments.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&request.attachments)?)
        };

        let row = email_queue::ActiveModel {
            queue_id: Set(queue_id.clone()),
            priority: Set(request.priority.as_i32()),
            to_emails: Set(request.to_emails.clone()),
            cc_emails: Set(request.cc_emails.clone()),
            bcc_emails: Set(request.bcc_emails.clone()),
            subject: Set(request.subject.clone()),
            body: Set(request.body.clone()),
            is_html: Set(request.is_html),
            template_id: Set(request.template_id),
            template_data: Set(request
                .template_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?),
            requires_template_processing: Set(request.template_id.is_some()),
            attachments: Set(attachments_json),
            has_embedded_images: Set(has_embedded_images),
            custom_headers: Set(request
                .custom_headers
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?),
            request_delivery_notification: Set(request.request_delivery_notification),
            request_read_receipt: Set(request.request_read_receipt),
            status: Set(status.to_string()),
            retry_count: Set(0),
            max_retries: Set(request.max_retries.unwrap_or(3)),
            scheduled_for: Set(request.scheduled_for),
            is_scheduled: Set(is_scheduled),
            processing_started_at: Set(None),
            processed_at: Set(None),
            processed_by: Set(None),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            created_by: Set(request.created_by.clone()),
            request_source: Set(request.request_source.clone()),
        };
        row.insert(conn).await?;

        for attachment in &request.attachments {
            let audit = email_attachments::ActiveModel {
                id: Set(Uuid::new_v4().to_string()),
                queue_id: Set(queue_id.clone()),
                file_name: Set(attachment.file_name.clone()),
                content_type: Set(attachment.content_type.clone()),
                content_id: Set(attachment.content_id.clone()),
                is_inline: Set(attachment.is_inline),
                content: Set(attachment.content.clone()),
                file_path: Set(attachment.file_path.clone()),
                size_bytes: Set(attachment.estimated_size_bytes() as i64),
                created_at: Set(now),
            };
            audit.insert(conn).await?;
        }

        Ok(queue_id)
    }

    /// Atomically flip up to `batch_size` ready rows to Processing for this
    /// worker and return them. The conditional UPDATE guarantees at-most-one
    /// worker per row; claimed rows are read back by the claim marker.
    pub async fn claim_batch(
        &self,
        batch_size: u64,
        worker_id: &str,
    ) -> Result<Vec<email_queue::Model>> {
        self.claim_with(
            "status = 'queued' AND (scheduled_for IS NULL OR scheduled_for <= ?)",
            "priority DESC, created_at ASC",
            batch_size,
            worker_id,
        )
        .await
    }

    /// Claim rows whose scheduled time has arrived. Same contract as
    /// `claim_batch`, different source state.
    pub async fn claim_due_scheduled(
        &self,
        batch_size: u64,
        worker_id: &str,
    ) -> Result<Vec<email_queue::Model>> {
        self.claim_with(
            "status = 'scheduled' AND scheduled_for <= ?",
            "scheduled_for ASC",
            batch_size,
            worker_id,
        )
        .await
    }

    async fn claim_with(
        &self,
        ready_predicate: &str,
        order_clause: &str,
        batch_size: u64,
        worker_id: &str,
    ) -> Result<Vec<email_queue::Model>> {
        let now = now_micros();
        let backend = self.db.get_database_backend();

        // Postgres runs many dispatcher processes against one database; the
        // inner SELECT must lock its candidate rows and skip ones another
        // claimer holds, or two UPDATEs can materialize overlapping id sets.
        // SQLite serializes whole statements, so no row locking exists or is
        // needed there.
        let locking = match backend {
            sea_orm::DbBackend::Postgres => "FOR UPDATE SKIP LOCKED",
            _ => "",
        };
        let sql = format!(
            "UPDATE email_queue \
             SET status = ?, processing_started_at = ?, processed_by = ?, updated_at = ? \
             WHERE queue_id IN (\
                 SELECT queue_id FROM email_queue \
                 WHERE {ready_predicate} \
                 ORDER BY {order_clause} \
                 LIMIT ? {locking}\
             )"
        );

        let statement = Statement::from_sql_and_values(
            backend,
            backend_sql(backend, &sql),
            [
                QueueStatus::Processing.to_string().into(),
                now.into(),
                worker_id.to_string().into(),
                now.into(),
                now.into(),
                batch_size.into(),
            ],
        );

        let result = self.db.execute(statement).await?;
        if result.rows_affected() == 0 {
            return Ok(Vec::new());
        }

        let claimed = EmailQueue::find()
            .filter(email_queue::Column::ProcessedBy.eq(worker_id))
            .filter(email_queue::Column::ProcessingStartedAt.eq(now))
            .filter(email_queue::Column::Status.eq(QueueStatus::Processing.to_string()))
            .order_by_desc(email_queue::Column::Priority)
            .order_by_asc(email_queue::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;

        tracing::debug!(
            worker_id = %worker_id,
            count = claimed.len(),
            "Claimed queue batch"
        );
        Ok(claimed)
    }

    /// Terminal success. Writes the history snapshot (with the final rendered
    /// subject and body) in the same transaction.
    pub async fn mark_sent(
        &self,
        queue_id: &str,
        worker_id: &str,
        processing_time_ms: i64,
        rendered_subject: &str,
        rendered_body: &str,
    ) -> Result<()> {
        let txn = self.db.begin().await?;

        let row = EmailQueue::find_by_id(queue_id)
            .one(&txn)
            .await?
            .ok_or_else(|| MailerError::NotFound(format!("queue item {queue_id}")))?;

        let status: QueueStatus = row.status.parse().map_err(MailerError::validation)?;
        if status.is_terminal() {
            tracing::warn!(queue_id = %queue_id, status = %row.status, "mark_sent on terminal row ignored");
            txn.rollback().await?;
            return Ok(());
        }
        if row.processed_by.as_deref() != Some(worker_id) {
            tracing::warn!(
                queue_id = %queue_id,
                claimed_by = ?row.processed_by,
                worker_id = %worker_id,
                "mark_sent from a worker that no longer owns the row ignored"
            );
            txn.rollback().await?;
            return Ok(());
        }

        let now = now_micros();
        let history = email_history::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            queue_id: Set(row.queue_id.clone()),
            template_id: Set(row.template_id),
            to_emails: Set(row.to_emails.clone()),
            cc_emails: Set(row.cc_emails.clone()),
            bcc_emails: Set(row.bcc_emails.clone()),
            subject: Set(rendered_subject.to_string()),
            body: Set(rendered_body.to_string()),
            is_html: Set(row.is_html),
            status: Set(QueueStatus::Sent.to_string()),
            error_details: Set(None),
            retry_count: Set(row.retry_count),
            processing_time_ms: Set(Some(processing_time_ms)),
            processed_by: Set(Some(worker_id.to_string())),
            sent_at: Set(Some(now)),
            created_at: Set(now),
        };
        history.insert(&txn).await?;

        let mut active: email_queue::ActiveModel = row.into();
        active.status = Set(QueueStatus::Sent.to_string());
        active.processed_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Failure outcome. Retries go back to Queued with a linear backoff
    /// (`retry_count × base`); exhausted or non-retryable items become
    /// terminal Failed with a history snapshot.
    pub async fn mark_failed(&self, queue_id: &str, error: &str, should_retry: bool) -> Result<()> {
        let txn = self.db.begin().await?;

        let row = EmailQueue::find_by_id(queue_id)
            .one(&txn)
            .await?
            .ok_or_else(|| MailerError::NotFound(format!("queue item {queue_id}")))?;

        let status: QueueStatus = row.status.parse().map_err(MailerError::validation)?;
        if status.is_terminal() {
            tracing::warn!(queue_id = %queue_id, status = %row.status, "mark_failed on terminal row ignored");
            txn.rollback().await?;
            return Ok(());
        }

        let now = now_micros();
        let mut active: email_queue::ActiveModel = row.clone().into();

        if should_retry && row.retry_count < row.max_retries {
            let new_retry_count = row.retry_count + 1;
            let backoff = new_retry_count as i64 * self.retry_backoff_minutes * MICROS_PER_MINUTE;

            active.status = Set(QueueStatus::Queued.to_string());
            active.retry_count = Set(new_retry_count);
            active.scheduled_for = Set(Some(now + backoff));
            active.processing_started_at = Set(None);
            active.processed_by = Set(None);
            active.error_message = Set(Some(format!(
                "Retry {new_retry_count}/{}: {error}",
                row.max_retries
            )));
            active.updated_at = Set(now);
            active.update(&txn).await?;
            txn.commit().await?;

            tracing::info!(
                queue_id = %queue_id,
                retry = new_retry_count,
                max = row.max_retries,
                "Email send failed, scheduled for retry"
            );
            return Ok(());
        }

        // retry_count never exceeds max_retries, even on the terminal failure
        let final_retry_count = row.retry_count.min(row.max_retries);

        let history = email_history::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            queue_id: Set(row.queue_id.clone()),
            template_id: Set(row.template_id),
            to_emails: Set(row.to_emails.clone()),
            cc_emails: Set(row.cc_emails.clone()),
            bcc_emails: Set(row.bcc_emails.clone()),
            subject: Set(row.subject.clone()),
            body: Set(row.body.clone()),
            is_html: Set(row.is_html),
            status: Set(QueueStatus::Failed.to_string()),
            error_details: Set(Some(error.to_string())),
            retry_count: Set(final_retry_count),
            processing_time_ms: Set(None),
            processed_by: Set(row.processed_by.clone()),
            sent_at: Set(None),
            created_at: Set(now),
        };
        history.insert(&txn).await?;

        active.status = Set(QueueStatus::Failed.to_string());
        active.retry_count = Set(final_retry_count);
        active.error_message = Set(Some(error.to_string()));
        active.processed_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        txn.commit().await?;
        tracing::warn!(queue_id = %queue_id, error = %error, "Email permanently failed");
        Ok(())
    }

    /// Cancel a not-yet-claimed item. The conditional update makes the race
    /// against claiming workers safe: once a worker owns the row the cancel
    /// returns false.
    pub async fn cancel(&self, queue_id: &str) -> Result<bool> {
        let result = EmailQueue::update_many()
            .col_expr(
                email_queue::Column::Status,
                Expr::value(QueueStatus::Cancelled.to_string()),
            )
            .col_expr(email_queue::Column::UpdatedAt, Expr::value(now_micros()))
            .filter(email_queue::Column::QueueId.eq(queue_id))
            .filter(email_queue::Column::Status.is_in(["queued", "scheduled"]))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    pub async fn update_priority(&self, queue_id: &str, priority: EmailPriority) -> Result<bool> {
        let result = EmailQueue::update_many()
            .col_expr(email_queue::Column::Priority, Expr::value(priority.as_i32()))
            .col_expr(email_queue::Column::UpdatedAt, Expr::value(now_micros()))
            .filter(email_queue::Column::QueueId.eq(queue_id))
            .filter(email_queue::Column::Status.eq(QueueStatus::Queued.to_string()))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Move a Queued row back into Scheduled at a future time. Only fresh
    /// rows qualify; a retried row keeps its backoff schedule.
    pub async fn reschedule(&self, queue_id: &str, new_time: i64) -> Result<bool> {
        if new_time <= now_micros() {
            return Err(MailerError::validation(
                "reschedule time must be in the future",
            ));
        }

        let result = EmailQueue::update_many()
            .col_expr(
                email_queue::Column::Status,
                Expr::value(QueueStatus::Scheduled.to_string()),
            )
            .col_expr(email_queue::Column::ScheduledFor, Expr::value(new_time))
            .col_expr(email_queue::Column::IsScheduled, Expr::value(true))
            .col_expr(email_queue::Column::UpdatedAt, Expr::value(now_micros()))
            .filter(email_queue::Column::QueueId.eq(queue_id))
            .filter(email_queue::Column::Status.eq(QueueStatus::Queued.to_string()))
            .filter(email_queue::Column::RetryCount.eq(0))
            .exec(self.db.as_ref())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Put rows abandoned in Processing back into the claimable set. The
    /// earlier attempt made no observable commitment, so retry_count is left
    /// alone.
    pub async fn reset_stuck(&self, threshold_minutes: i64) -> Result<u64> {
        let cutoff = now_micros() - threshold_minutes * MICROS_PER_MINUTE;

        let stuck = EmailQueue::find()
            .filter(email_queue::Column::Status.eq(QueueStatus::Processing.to_string()))
            .filter(email_queue::Column::ProcessingStartedAt.lt(cutoff))
            .all(self.db.as_ref())
            .await?;

        let mut reset_count = 0u64;
        for row in stuck {
            let queue_id = row.queue_id.clone();
            let stuck_worker = row.processed_by.clone();

            let mut active: email_queue::ActiveModel = row.into();
            active.status = Set(QueueStatus::Queued.to_string());
            active.processing_started_at = Set(None);
            active.processed_by = Set(None);
            active.updated_at = Set(now_micros());
            active.update(self.db.as_ref()).await?;

            tracing::info!(
                queue_id = %queue_id,
                worker = ?stuck_worker,
                "Reset stuck queue item to queued"
            );
            reset_count += 1;
        }

        Ok(reset_count)
    }

    pub async fn statistics(&self) -> Result<QueueStats> {
        let backend = self.db.get_database_backend();
        let mut stats = QueueStats::default();

        let by_status = self
            .db
            .query_all(Statement::from_sql_and_values(
                backend,
                "SELECT status, COUNT(*) AS count FROM email_queue GROUP BY status",
                [],
            ))
            .await?;
        for row in by_status {
            let status: String = row.try_get("", "status")?;
            let count: i64 = row.try_get("", "count")?;
            let count = count as u64;
            match status.as_str() {
                "queued" => stats.queued = count,
                "scheduled" => stats.scheduled = count,
                "processing" => stats.processing = count,
                "sent" => stats.sent = count,
                "failed" => stats.failed = count,
                "cancelled" => stats.cancelled = count,
                other => tracing::warn!("Unknown queue status in statistics: {other}"),
            }
        }

        let by_priority = self
            .db
            .query_all(Statement::from_sql_and_values(
                backend,
                r#"
                SELECT priority, COUNT(*) AS count FROM email_queue
                WHERE status IN ('queued', 'scheduled', 'processing')
                GROUP BY priority
                "#,
                [],
            ))
            .await?;
        for row in by_priority {
            let priority: i32 = row.try_get("", "priority")?;
            let count: i64 = row.try_get("", "count")?;
            stats.pending_by_priority.insert(
                EmailPriority::from_i32(priority).as_str().to_string(),
                count as u64,
            );
        }

        if let Some(row) = self
            .db
            .query_one(Statement::from_sql_and_values(
                backend,
                "SELECT MIN(created_at) AS oldest FROM email_queue WHERE status = 'queued'",
                [],
            ))
            .await?
        {
            let oldest: Option<i64> = row.try_get("", "oldest")?;
            stats.oldest_queued_age_seconds =
                oldest.map(|created| (now_micros() - created) / 1_000_000);
        }

        if let Some(row) = self
            .db
            .query_one(Statement::from_sql_and_values(
                backend,
                r#"
                SELECT AVG(processed_at - created_at) AS latency FROM email_queue
                WHERE status = 'sent' AND processed_at IS NOT NULL
                "#,
                [],
            ))
            .await?
        {
            let latency: Option<f64> = row.try_get("", "latency")?;
            stats.average_queue_latency_ms = latency.map(|micros| (micros / 1000.0) as i64);
        }

        Ok(stats)
    }

    /// Sent and failed counts with terminal timestamps inside the range,
    /// for the statistics endpoint's date filter.
    pub async fn count_terminal_in_range(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<(u64, u64)> {
        let mut sent = EmailQueue::find()
            .filter(email_queue::Column::Status.eq(QueueStatus::Sent.to_string()));
        let mut failed = EmailQueue::find()
            .filter(email_queue::Column::Status.eq(QueueStatus::Failed.to_string()));

        if let Some(from) = from {
            sent = sent.filter(email_queue::Column::ProcessedAt.gte(from));
            failed = failed.filter(email_queue::Column::ProcessedAt.gte(from));
        }
        if let Some(to) = to {
            sent = sent.filter(email_queue::Column::ProcessedAt.lte(to));
            failed = failed.filter(email_queue::Column::ProcessedAt.lte(to));
        }

        Ok((
            sent.count(self.db.as_ref()).await?,
            failed.count(self.db.as_ref()).await?,
        ))
    }

    pub async fn count_pending(&self) -> Result<u64> {
        let count = EmailQueue::find()
            .filter(email_queue::Column::Status.is_in(NON_TERMINAL_STATUSES))
            .count(self.db.as_ref())
            .await?;
        Ok(count)
    }

    pub async fn get(&self, queue_id: &str) -> Result<Option<email_queue::Model>> {
        Ok(EmailQueue::find_by_id(queue_id).one(self.db.as_ref()).await?)
    }

    pub async fn get_batch(&self, queue_ids: &[String]) -> Result<Vec<email_queue::Model>> {
        Ok(EmailQueue::find()
            .filter(email_queue::Column::QueueId.is_in(queue_ids.iter().map(String::as_str)))
            .all(self.db.as_ref())
            .await?)
    }

    /// Paged listing for the operator surface. `page` is 1-based.
    pub async fn list(
        &self,
        page: u64,
        page_size: u64,
        filter: QueueListFilter,
    ) -> Result<(Vec<email_queue::Model>, u64)> {
        let mut query = EmailQueue::find();

        if let Some(status) = &filter.status {
            query = query.filter(email_queue::Column::Status.eq(status.as_str()));
        }
        if let Some(priority) = filter.priority {
            query = query.filter(email_queue::Column::Priority.eq(priority.as_i32()));
        }
        if let Some(from) = filter.from {
            query = query.filter(email_queue::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(email_queue::Column::CreatedAt.lte(to));
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{search}%");
            query = query.filter(
                email_queue::Column::ToEmails
                    .like(pattern.clone())
                    .or(email_queue::Column::Subject.like(pattern)),
            );
        }

        let paginator = query
            .order_by_desc(email_queue::Column::CreatedAt)
            .paginate(self.db.as_ref(), page_size.max(1));
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((rows, total))
    }
}
