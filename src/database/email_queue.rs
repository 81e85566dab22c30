use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_queue")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub queue_id: String,
    pub priority: i32,
    pub to_emails: String,
    pub cc_emails: Option<String>,
    pub bcc_emails: Option<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub template_id: Option<i32>,
    pub template_data: Option<String>, // JSON map of placeholder -> value
    pub requires_template_processing: bool,
    pub attachments: Option<String>, // JSON array of AttachmentData
    pub has_embedded_images: bool,
    pub custom_headers: Option<String>, // JSON map of header name -> value
    pub request_delivery_notification: bool,
    pub request_read_receipt: bool,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub scheduled_for: Option<i64>, // Unix epoch microseconds
    pub is_scheduled: bool,
    pub processing_started_at: Option<i64>,
    pub processed_at: Option<i64>,
    pub processed_by: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub created_by: String,
    pub request_source: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Queue row lifecycle states. Sent, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    Queued,
    Scheduled,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueStatus::Queued => write!(f, "queued"),
            QueueStatus::Scheduled => write!(f, "scheduled"),
            QueueStatus::Processing => write!(f, "processing"),
            QueueStatus::Sent => write!(f, "sent"),
            QueueStatus::Failed => write!(f, "failed"),
            QueueStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "scheduled" => Ok(QueueStatus::Scheduled),
            "processing" => Ok(QueueStatus::Processing),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// Stored as an integer so the claim query can `ORDER BY priority DESC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl EmailPriority {
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::High => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            2 => Self::High,
            0 => Self::Low,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    pub fn from_priority_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}
