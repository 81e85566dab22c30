use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only processing trail, written best-effort around pipeline steps.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processing_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub level: String,
    pub category: String,
    pub message: String,
    pub queue_id: Option<String>,
    pub worker_id: Option<String>,
    pub processing_step: Option<String>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
