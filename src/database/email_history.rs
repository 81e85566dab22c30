use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Snapshot written when a queue row reaches a terminal Sent or Failed state.
/// `queue_id` is the join key back to the (possibly cleaned-up) queue row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub queue_id: String,
    pub template_id: Option<i32>,
    pub to_emails: String,
    pub cc_emails: Option<String>,
    pub bcc_emails: Option<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub status: String,
    pub error_details: Option<String>,
    pub retry_count: i32,
    pub processing_time_ms: Option<i64>,
    pub processed_by: Option<String>,
    pub sent_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
