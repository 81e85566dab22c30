use crate::config::AlertSettings;
use crate::database::email_queue::EmailPriority;
use crate::queue::models::EnqueueRequest;
use crate::queue::QueueManager;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub id: String,
    pub title: String,
    pub message: String,
    pub level: String,
    pub timestamp: String,
    pub source: String,
    pub service: String,
}

/// Emits operational alerts two ways: as ordinary queued emails (so alert
/// delivery gets the same retry discipline as everything else) and as JSON
/// webhook posts.
pub struct Alerter {
    queue: QueueManager,
    settings: AlertSettings,
    http: reqwest::Client,
    service_name: String,
}

impl Alerter {
    pub fn new(queue: QueueManager, settings: AlertSettings, service_name: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.webhook_timeout_secs.max(1)))
            .build()
            .unwrap_or_default();

        Self {
            queue,
            settings,
            http,
            service_name,
        }
    }

    fn payload(&self, level: &str, title: &str, message: &str) -> AlertPayload {
        AlertPayload {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            level: level.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            service: self.service_name.clone(),
        }
    }

    pub async fn alert(&self, level: &str, title: &str, message: &str) {
        let payload = self.payload(level, title, message);

        if let Some(alert_email) = &self.settings.alert_email {
            let request = EnqueueRequest {
                to_emails: alert_email.clone(),
                cc_emails: None,
                bcc_emails: None,
                subject: format!("[{}] {title}", level.to_uppercase()),
                body: format!(
                    "<p><strong>{title}</strong></p><p>{message}</p><p>source: {} at {}</p>",
                    payload.source, payload.timestamp
                ),
                is_html: true,
                priority: EmailPriority::High,
                template_id: None,
                template_data: None,
                attachments: Vec::new(),
                custom_headers: None,
                request_delivery_notification: false,
                request_read_receipt: false,
                scheduled_for: None,
                max_retries: None,
                created_by: self.service_name.clone(),
                request_source: Some("alerter".to_string()),
            };

            if let Err(e) = self.queue.enqueue(request).await {
                tracing::error!("Failed to enqueue alert email: {e}");
            }
        }

        if let Some(url) = &self.settings.webhook_url {
            match self.http.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "Alert webhook rejected payload");
                }
                Err(e) => {
                    tracing::warn!("Alert webhook post failed: {e}");
                }
            }
        }
    }

    pub async fn alert_batch(&self, alerts: Vec<AlertPayload>) {
        let Some(url) = &self.settings.webhook_url else {
            return;
        };

        let body = serde_json::json!({
            "batch_id": Uuid::new_v4().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "alerts": alerts,
        });

        if let Err(e) = self.http.post(url).json(&body).send().await {
            tracing::warn!("Alert webhook batch post failed: {e}");
        }
    }
}
