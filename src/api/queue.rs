use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::database::email_queue::{self, EmailPriority};
use crate::error::MailerError;
use crate::queue::models::{AttachmentData, EnqueueRequest, QueueListFilter};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/queue", post(queue_email))
        .route("/queue-template", post(queue_template_email))
        .route("/queue-bulk", post(queue_bulk))
        .route("/status/batch", post(status_batch))
        .route("/status/:queue_id", get(status))
        .route("/cancel/:queue_id", post(cancel))
        .route("/statistics", get(statistics))
        .route("/list", get(list))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct QueueEmailRequest {
    pub to_emails: String,
    #[serde(default)]
    pub cc_emails: Option<String>,
    #[serde(default)]
    pub bcc_emails: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_true")]
    pub is_html: bool,
    #[serde(default)]
    pub priority: EmailPriority,
    #[serde(default)]
    pub attachments: Vec<AttachmentData>,
    #[serde(default)]
    pub custom_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub request_delivery_notification: bool,
    #[serde(default)]
    pub request_read_receipt: bool,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    pub created_by: String,
    #[serde(default)]
    pub request_source: Option<String>,
    // Template variant extras; ignored on the plain endpoint
    #[serde(default)]
    pub template_id: Option<i32>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_data: Option<HashMap<String, String>>,
}

impl QueueEmailRequest {
    fn into_enqueue(self, template_id: Option<i32>, subject: String) -> EnqueueRequest {
        EnqueueRequest {
            to_emails: self.to_emails,
            cc_emails: self.cc_emails,
            bcc_emails: self.bcc_emails,
            subject,
            body: self.body,
            is_html: self.is_html,
            priority: self.priority,
            template_id,
            template_data: self.template_data,
            attachments: self.attachments,
            custom_headers: self.custom_headers,
            request_delivery_notification: self.request_delivery_notification,
            request_read_receipt: self.request_read_receipt,
            scheduled_for: self.scheduled_for.map(|t| t.timestamp_micros()),
            max_retries: self.max_retries,
            created_by: self.created_by,
            request_source: self.request_source,
        }
    }
}

fn error_response(error: &MailerError) -> (StatusCode, Json<Value>) {
    let status = match error {
        MailerError::Validation { .. } => StatusCode::BAD_REQUEST,
        MailerError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Queue API error: {error}");
    }
    (status, Json(json!({ "error": error.to_string() })))
}

fn status_body(row: &email_queue::Model) -> Value {
    json!({
        "queue_id": row.queue_id,
        "status": row.status,
        "priority": EmailPriority::from_i32(row.priority).as_str(),
        "retry_count": row.retry_count,
        "max_retries": row.max_retries,
        "error_message": row.error_message,
        "scheduled_for": row.scheduled_for,
        "created_at": row.created_at,
        "processed_at": row.processed_at,
        "processed_by": row.processed_by,
    })
}

pub async fn queue_email(
    State(state): State<AppState>,
    Json(request): Json<QueueEmailRequest>,
) -> (StatusCode, Json<Value>) {
    let subject = request.subject.clone();
    match state.queue.enqueue(request.into_enqueue(None, subject)).await {
        Ok(queue_id) => (
            StatusCode::OK,
            Json(json!({
                "queue_id": queue_id,
                "queued_at": Utc::now().to_rfc3339(),
                "status": "queued",
            })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn queue_template_email(
    State(state): State<AppState>,
    Json(request): Json<QueueEmailRequest>,
) -> (StatusCode, Json<Value>) {
    let template = match (&request.template_id, &request.template_name) {
        (Some(id), _) => state.templates.get_template(*id).await,
        (None, Some(name)) => state.templates.get_by_name(name).await,
        (None, None) => {
            return error_response(&MailerError::validation(
                "template_id or template_name is required",
            ))
        }
    };

    let template = match template {
        Ok(Some(template)) if template.is_active => template,
        Ok(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "template not found or inactive" })),
            )
        }
        Err(e) => return error_response(&e),
    };

    // The raw template subject rides along; placeholders are substituted at
    // processing time.
    let subject = template.subject_template.clone();
    match state
        .queue
        .enqueue(request.into_enqueue(Some(template.id), subject))
        .await
    {
        Ok(queue_id) => (
            StatusCode::OK,
            Json(json!({
                "queue_id": queue_id,
                "queued_at": Utc::now().to_rfc3339(),
                "status": "queued",
            })),
        ),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkQueueRequest {
    pub items: Vec<QueueEmailRequest>,
}

pub async fn queue_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkQueueRequest>,
) -> (StatusCode, Json<Value>) {
    let mut accepted_requests = Vec::new();
    let mut rejected = Vec::new();

    for (index, item) in request.items.into_iter().enumerate() {
        let subject = item.subject.clone();
        let enqueue = item.into_enqueue(None, subject);
        match state.queue.validate_request(&enqueue) {
            Ok(()) => accepted_requests.push(enqueue),
            Err(e) => rejected.push(json!({ "index": index, "error": e.to_string() })),
        }
    }

    match state.queue.bulk_enqueue(accepted_requests).await {
        Ok(ids) => (
            StatusCode::OK,
            Json(json!({ "accepted": ids, "rejected": rejected })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn status(
    State(state): State<AppState>,
    Path(queue_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.queue.get(&queue_id).await {
        Ok(Some(row)) => (StatusCode::OK, Json(status_body(&row))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "queue item not found" })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn status_batch(
    State(state): State<AppState>,
    Json(queue_ids): Json<Vec<String>>,
) -> (StatusCode, Json<Value>) {
    if queue_ids.is_empty() {
        return error_response(&MailerError::validation("queue id list is empty"));
    }

    match state.queue.get_batch(&queue_ids).await {
        Ok(rows) => {
            let body = rows.iter().map(status_body).collect::<Vec<_>>();
            (StatusCode::OK, Json(json!(body)))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(queue_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.queue.get(&queue_id).await {
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "queue item not found" })),
            )
        }
        Err(e) => return error_response(&e),
        Ok(Some(_)) => {}
    }

    match state.queue.cancel(&queue_id).await {
        Ok(cancelled) => (StatusCode::OK, Json(json!(cancelled))),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

pub async fn statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> (StatusCode, Json<Value>) {
    let stats = match state.queue.statistics().await {
        Ok(stats) => stats,
        Err(e) => return error_response(&e),
    };

    let from = query.from.map(|t| t.timestamp_micros());
    let to = query.to.map(|t| t.timestamp_micros());
    let (sent_in_range, failed_in_range) =
        match state.queue.count_terminal_in_range(from, to).await {
            Ok(counts) => counts,
            Err(e) => return error_response(&e),
        };

    (
        StatusCode::OK,
        Json(json!({
            "totals": stats,
            "range": {
                "from": query.from.map(|t| t.to_rfc3339()),
                "to": query.to.map(|t| t.to_rfc3339()),
                "sent": sent_in_range,
                "failed": failed_in_range,
            },
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default, rename = "pageSize")]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> (StatusCode, Json<Value>) {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(50).clamp(1, 500);

    let filter = QueueListFilter {
        status: query.status,
        priority: query
            .priority
            .as_deref()
            .and_then(EmailPriority::from_priority_str),
        from: query.from.map(|t| t.timestamp_micros()),
        to: query.to.map(|t| t.timestamp_micros()),
        search: query.search,
    };

    match state.queue.list(page, page_size, filter).await {
        Ok((rows, total)) => {
            let items = rows.iter().map(status_body).collect::<Vec<_>>();
            (
                StatusCode::OK,
                Json(json!({
                    "items": items,
                    "total": total,
                    "page": page,
                    "page_size": page_size,
                })),
            )
        }
        Err(e) => error_response(&e),
    }
}
