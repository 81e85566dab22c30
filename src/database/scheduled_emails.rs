use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A future-dated (optionally recurring) email. The scheduler materializes a
/// fresh queue row each time `next_run_time` comes due.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scheduled_emails")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub to_emails: String,
    pub cc_emails: Option<String>,
    pub bcc_emails: Option<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub priority: i32,
    pub template_id: Option<i32>,
    pub template_data: Option<String>,
    pub attachments: Option<String>,
    pub next_run_time: i64,
    pub interval_minutes: Option<i32>,
    /// Stored for forward compatibility; recurrence without an interval
    /// advances by one day.
    pub cron_expression: Option<String>,
    pub is_recurring: bool,
    pub end_date: Option<i64>,
    pub max_executions: Option<i32>,
    pub execution_count: i32,
    pub last_executed_at: Option<i64>,
    pub last_execution_status: Option<String>,
    pub last_execution_error: Option<String>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
