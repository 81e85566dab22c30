use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable audit copy of an attachment, kept per queue_id until neither the
/// queue row nor any history row references it (orphan sweep).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_attachments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub queue_id: String,
    pub file_name: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
    pub content: Option<String>, // base64
    pub file_path: Option<String>,
    pub size_bytes: i64,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
