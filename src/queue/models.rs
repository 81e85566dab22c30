use crate::database::email_queue::EmailPriority;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_file_name() -> String {
    "attachment".to_string()
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

/// Attachment payload as carried inside the queue row's JSON column and the
/// audit table. Exactly one of `content` (base64) and `file_path` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentData {
    #[serde(default = "default_file_name")]
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub is_inline: bool,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl AttachmentData {
    /// Approximate decoded size; base64 payloads shrink by 4:3.
    pub fn estimated_size_bytes(&self) -> usize {
        match &self.content {
            Some(b64) => b64.len() / 4 * 3,
            None => 0,
        }
    }
}

/// Normalized enqueue request, shared by the HTTP surface, the scheduler and
/// the alerting path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub to_emails: String,
    #[serde(default)]
    pub cc_emails: Option<String>,
    #[serde(default)]
    pub bcc_emails: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_true")]
    pub is_html: bool,
    #[serde(default)]
    pub priority: EmailPriority,
    #[serde(default)]
    pub template_id: Option<i32>,
    #[serde(default)]
    pub template_data: Option<HashMap<String, String>>,
    #[serde(default)]
    pub attachments: Vec<AttachmentData>,
    #[serde(default)]
    pub custom_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub request_delivery_notification: bool,
    #[serde(default)]
    pub request_read_receipt: bool,
    #[serde(default)]
    pub scheduled_for: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    pub created_by: String,
    #[serde(default)]
    pub request_source: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Aggregate queue counters for the statistics endpoint and health probes.
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub scheduled: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Non-terminal rows broken down by priority name.
    pub pending_by_priority: HashMap<String, u64>,
    pub oldest_queued_age_seconds: Option<i64>,
    pub average_queue_latency_ms: Option<i64>,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.queued + self.scheduled + self.processing + self.sent + self.failed + self.cancelled
    }

    pub fn pending(&self) -> u64 {
        self.queued + self.scheduled + self.processing
    }
}

/// Filters for the paged list endpoint.
#[derive(Debug, Default, Clone)]
pub struct QueueListFilter {
    pub status: Option<String>,
    pub priority: Option<EmailPriority>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub search: Option<String>,
}
