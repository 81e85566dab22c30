use crate::database::email_templates::{self, Entity as EmailTemplates};
use crate::database::now_micros;
use crate::error::{MailerError, Result};
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, Statement,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of rendering a template against a placeholder map.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body: String,
    pub missing_placeholders: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateValidation {
    pub placeholders: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateUsageStats {
    pub template_id: i32,
    pub times_used: u64,
    pub success_count: u64,
    pub average_processing_time_ms: Option<i64>,
    pub last_used_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSpec {
    pub name: String,
    pub category: Option<String>,
    pub subject_template: String,
    pub body_template: String,
    pub is_system: bool,
}

/// Literal `{key}` substitution over stored templates, with a read-mostly
/// cache invalidated on every write.
pub struct TemplateEngine {
    db: Arc<DatabaseConnection>,
    placeholder_re: Regex,
    cache: RwLock<HashMap<i32, email_templates::Model>>,
}

impl TemplateEngine {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            placeholder_re: Regex::new(r"\{([^}]+)\}").expect("placeholder regex"),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// One literal pass: every `{key}` token is replaced by its mapped value,
    /// or the empty string when the (trimmed) key is absent. Values are never
    /// re-scanned, so substitution does not recurse.
    pub fn substitute(
        &self,
        text: &str,
        values: &HashMap<String, String>,
        missing: &mut Vec<String>,
    ) -> String {
        self.placeholder_re
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let key = caps[1].trim().to_string();
                match values.get(&key) {
                    Some(value) => value.clone(),
                    None => {
                        if !missing.contains(&key) {
                            missing.push(key);
                        }
                        String::new()
                    }
                }
            })
            .into_owned()
    }

    pub fn render(
        &self,
        subject_template: &str,
        body_template: &str,
        values: &HashMap<String, String>,
    ) -> RenderedTemplate {
        let mut missing = Vec::new();
        let subject = self.substitute(subject_template, values, &mut missing);
        let body = self.substitute(body_template, values, &mut missing);

        if !missing.is_empty() {
            tracing::warn!(missing = ?missing, "Template rendered with missing placeholders");
        }

        RenderedTemplate {
            subject,
            body,
            missing_placeholders: missing,
        }
    }

    /// Distinct placeholder keys in document order, trimmed.
    pub fn extract_placeholders(&self, text: &str) -> Vec<String> {
        let mut keys = Vec::new();
        for caps in self.placeholder_re.captures_iter(text) {
            let key = caps[1].trim().to_string();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn validate(&self, subject_template: &str, body_template: &str) -> TemplateValidation {
        let mut placeholders = self.extract_placeholders(subject_template);
        for key in self.extract_placeholders(body_template) {
            if !placeholders.contains(&key) {
                placeholders.push(key);
            }
        }

        let mut errors = Vec::new();
        if subject_template.trim().is_empty() {
            errors.push("subject template is empty".to_string());
        }
        if body_template.trim().is_empty() {
            errors.push("body template is empty".to_string());
        }

        let mut warnings = Vec::new();
        let lowered = body_template.to_lowercase();
        if lowered.contains("<script") {
            warnings.push("body contains a <script> tag".to_string());
        }
        if lowered.contains("javascript:") {
            warnings.push("body contains a javascript: URL".to_string());
        }

        TemplateValidation {
            placeholders,
            errors,
            warnings,
        }
    }

    pub async fn get_template(&self, id: i32) -> Result<Option<email_templates::Model>> {
        if let Some(cached) = self.cache.read().await.get(&id) {
            return Ok(Some(cached.clone()));
        }

        let template = EmailTemplates::find_by_id(id).one(self.db.as_ref()).await?;
        if let Some(template) = &template {
            self.cache.write().await.insert(id, template.clone());
        }
        Ok(template)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<email_templates::Model>> {
        let template = EmailTemplates::find()
            .filter(email_templates::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await?;
        if let Some(template) = &template {
            self.cache
                .write()
                .await
                .insert(template.id, template.clone());
        }
        Ok(template)
    }

    /// Resolve a template for processing. Inactive or missing templates are a
    /// TemplateResolution error, which the dispatcher treats as retriable to
    /// ride out deactivation races.
    pub async fn resolve_active(&self, id: i32) -> Result<email_templates::Model> {
        let template = self
            .get_template(id)
            .await?
            .ok_or_else(|| MailerError::template(format!("template {id} not found")))?;
        if !template.is_active {
            return Err(MailerError::template(format!("template {id} is inactive")));
        }
        Ok(template)
    }

    pub async fn create_template(&self, spec: TemplateSpec) -> Result<email_templates::Model> {
        let validation = self.validate(&spec.subject_template, &spec.body_template);
        if !validation.errors.is_empty() {
            return Err(MailerError::validation(validation.errors.join("; ")));
        }

        let now = now_micros();
        let row = email_templates::ActiveModel {
            name: Set(spec.name),
            category: Set(spec.category),
            subject_template: Set(spec.subject_template),
            body_template: Set(spec.body_template),
            is_active: Set(true),
            is_system: Set(spec.is_system),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(row.insert(self.db.as_ref()).await?)
    }

    /// Updates bump the version and drop the cached copy.
    pub async fn update_template(
        &self,
        id: i32,
        spec: TemplateSpec,
        is_active: bool,
    ) -> Result<email_templates::Model> {
        let existing = self
            .get_template(id)
            .await?
            .ok_or_else(|| MailerError::NotFound(format!("template {id}")))?;

        let validation = self.validate(&spec.subject_template, &spec.body_template);
        if !validation.errors.is_empty() {
            return Err(MailerError::validation(validation.errors.join("; ")));
        }

        let next_version = existing.version + 1;
        let mut active: email_templates::ActiveModel = existing.into();
        active.name = Set(spec.name);
        active.category = Set(spec.category);
        active.subject_template = Set(spec.subject_template);
        active.body_template = Set(spec.body_template);
        active.is_active = Set(is_active);
        active.version = Set(next_version);
        active.updated_at = Set(now_micros());

        let updated = active.update(self.db.as_ref()).await?;
        self.cache.write().await.remove(&id);
        Ok(updated)
    }

    pub async fn delete_template(&self, id: i32) -> Result<bool> {
        let Some(existing) = self.get_template(id).await? else {
            return Ok(false);
        };
        if existing.is_system {
            return Err(MailerError::validation(format!(
                "template '{}' is a system template and cannot be deleted",
                existing.name
            )));
        }

        EmailTemplates::delete_by_id(id).exec(self.db.as_ref()).await?;
        self.cache.write().await.remove(&id);
        Ok(true)
    }

    pub async fn clone_template(
        &self,
        id: i32,
        new_name: &str,
    ) -> Result<email_templates::Model> {
        let source = self
            .get_template(id)
            .await?
            .ok_or_else(|| MailerError::NotFound(format!("template {id}")))?;

        self.create_template(TemplateSpec {
            name: new_name.to_string(),
            category: source.category,
            subject_template: source.subject_template,
            body_template: source.body_template,
            is_system: false,
        })
        .await
    }

    pub async fn list_templates(&self, active_only: bool) -> Result<Vec<email_templates::Model>> {
        let mut query = EmailTemplates::find();
        if active_only {
            query = query.filter(email_templates::Column::IsActive.eq(true));
        }
        Ok(query
            .order_by_asc(email_templates::Column::Name)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn usage_statistics(&self, id: i32) -> Result<TemplateUsageStats> {
        let backend = self.db.get_database_backend();
        let row = self
            .db
            .query_one(Statement::from_sql_and_values(
                backend,
                crate::database::backend_sql(
                    backend,
                    r#"
                    SELECT
                        COUNT(*) AS times_used,
                        SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END) AS success_count,
                        AVG(processing_time_ms) AS avg_processing_ms,
                        MAX(created_at) AS last_used
                    FROM email_history
                    WHERE template_id = ?
                    "#,
                ),
                [id.into()],
            ))
            .await?;

        let Some(row) = row else {
            return Ok(TemplateUsageStats {
                template_id: id,
                times_used: 0,
                success_count: 0,
                average_processing_time_ms: None,
                last_used_at: None,
            });
        };

        let times_used: i64 = row.try_get("", "times_used")?;
        let success_count: Option<i64> = row.try_get("", "success_count")?;
        let avg_processing_ms: Option<f64> = row.try_get("", "avg_processing_ms")?;
        let last_used: Option<i64> = row.try_get("", "last_used")?;

        Ok(TemplateUsageStats {
            template_id: id,
            times_used: times_used as u64,
            success_count: success_count.unwrap_or(0) as u64,
            average_processing_time_ms: avg_processing_ms.map(|v| v as i64),
            last_used_at: last_used,
        })
    }
}
