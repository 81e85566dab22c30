use crate::error::MailerError;
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub service_name: String,
    pub smtp: SmtpSettings,
    pub processing: ProcessingSettings,
    pub cleanup: CleanupSettings,
    pub alerts: AlertSettings,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SmtpConnectionMode {
    None,
    StartTls,
    SslOnConnect,
}

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub connection_mode: SmtpConnectionMode,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub timeout_seconds: u64,
    pub rate_limit_per_minute: u32,
    pub burst_limit: u32,
}

impl SmtpSettings {
    /// Domain part of the sender address, used for Message-ID generation.
    pub fn sender_domain(&self) -> &str {
        self.sender_email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost")
    }
}

#[derive(Clone, Debug)]
pub struct ProcessingSettings {
    pub max_concurrent_workers: usize,
    pub batch_size: u64,
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub stuck_threshold_minutes: i64,
    pub reaper_interval_secs: u64,
    pub stuck_alert_threshold: u64,
    pub retry_backoff_minutes: i64,
    pub shutdown_drain_timeout_secs: u64,
    pub max_attachment_total_bytes: usize,
    pub queue_depth_warning_threshold: u64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 5,
            batch_size: 10,
            poll_interval_secs: 2,
            heartbeat_interval_secs: 30,
            stuck_threshold_minutes: 10,
            reaper_interval_secs: 300,
            stuck_alert_threshold: 50,
            retry_backoff_minutes: 5,
            shutdown_drain_timeout_secs: 30,
            max_attachment_total_bytes: 25 * 1024 * 1024,
            queue_depth_warning_threshold: 10_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CleanupSettings {
    pub history_retention_days: i64,
    pub logs_retention_days: i64,
    pub attachments_retention_days: i64,
    pub service_status_retention_days: i64,
    pub failed_queue_retention_days: i64,
    pub archive_path: String,
    pub backup_path: String,
    pub backup_retention_days: i64,
    pub max_records_per_cleanup: u64,
    pub create_backup_before_cleanup: bool,
    pub enable_aggressive_cleanup: bool,
    pub cleanup_interval_minutes: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            history_retention_days: 180,
            logs_retention_days: 30,
            attachments_retention_days: 90,
            service_status_retention_days: 7,
            failed_queue_retention_days: 7,
            archive_path: "data/archives".to_string(),
            backup_path: "data/backups".to_string(),
            backup_retention_days: 30,
            max_records_per_cleanup: 1000,
            create_backup_before_cleanup: false,
            enable_aggressive_cleanup: false,
            cleanup_interval_minutes: 360,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AlertSettings {
    pub alert_email: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T, MailerError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| MailerError::config(format!("Invalid {key} value")))
}

impl Config {
    pub fn from_env() -> Result<Self, MailerError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:data/mailspool.db?mode=rwc".to_string());
        let port: u16 = parse_env("PORT", "3900")?;
        let service_name =
            env::var("SERVICE_NAME").unwrap_or_else(|_| "mailspool-worker".to_string());

        // Ensure the data directory exists for sqlite connections
        if let Some(db_path_str) = database_url.strip_prefix("sqlite:") {
            if let Some(db_path) = db_path_str.split('?').next() {
                if db_path != ":memory:" {
                    if let Some(parent) = std::path::Path::new(db_path).parent() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            MailerError::config(format!("Failed to create data directory: {e}"))
                        })?;
                    }
                }
            }
        }

        Ok(Config {
            database_url,
            port,
            service_name,
            smtp: Self::smtp_from_env()?,
            processing: Self::processing_from_env()?,
            cleanup: Self::cleanup_from_env()?,
            alerts: Self::alerts_from_env()?,
        })
    }

    fn smtp_from_env() -> Result<SmtpSettings, MailerError> {
        let server = env::var("SMTP_SERVER")
            .map_err(|_| MailerError::config("SMTP_SERVER environment variable is required"))?;
        let sender_email = env::var("SMTP_SENDER_EMAIL").map_err(|_| {
            MailerError::config("SMTP_SENDER_EMAIL environment variable is required")
        })?;

        let connection_mode = match env::var("SMTP_CONNECTION_MODE")
            .unwrap_or_else(|_| "starttls".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => SmtpConnectionMode::None,
            "starttls" | "tls" => SmtpConnectionMode::StartTls,
            "ssl" => SmtpConnectionMode::SslOnConnect,
            _ => {
                return Err(MailerError::config(
                    "Invalid SMTP_CONNECTION_MODE value. Use: none, starttls, or ssl",
                ))
            }
        };

        Ok(SmtpSettings {
            server,
            port: parse_env("SMTP_PORT", "587")?,
            connection_mode,
            username: env::var("SMTP_USERNAME").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
            sender_email,
            sender_name: env::var("SMTP_SENDER_NAME").ok(),
            timeout_seconds: parse_env("SMTP_TIMEOUT_SECONDS", "30")?,
            rate_limit_per_minute: parse_env("SMTP_RATE_LIMIT_PER_MINUTE", "60")?,
            burst_limit: parse_env("SMTP_BURST_LIMIT", "10")?,
        })
    }

    fn processing_from_env() -> Result<ProcessingSettings, MailerError> {
        let settings = ProcessingSettings {
            max_concurrent_workers: parse_env("MAX_CONCURRENT_WORKERS", "5")?,
            batch_size: parse_env("BATCH_SIZE", "10")?,
            poll_interval_secs: parse_env("POLL_INTERVAL_SECS", "2")?,
            heartbeat_interval_secs: parse_env("HEARTBEAT_INTERVAL_SECS", "30")?,
            stuck_threshold_minutes: parse_env("STUCK_THRESHOLD_MINUTES", "10")?,
            reaper_interval_secs: parse_env("REAPER_INTERVAL_SECS", "300")?,
            stuck_alert_threshold: parse_env("STUCK_ALERT_THRESHOLD", "50")?,
            retry_backoff_minutes: parse_env("RETRY_BACKOFF_MINUTES", "5")?,
            shutdown_drain_timeout_secs: parse_env("SHUTDOWN_DRAIN_TIMEOUT_SECS", "30")?,
            max_attachment_total_bytes: parse_env("MAX_ATTACHMENT_TOTAL_BYTES", "26214400")?,
            queue_depth_warning_threshold: parse_env("QUEUE_DEPTH_WARNING_THRESHOLD", "10000")?,
        };

        if settings.max_concurrent_workers == 0 {
            return Err(MailerError::config(
                "MAX_CONCURRENT_WORKERS must be greater than 0",
            ));
        }
        if settings.batch_size == 0 {
            return Err(MailerError::config("BATCH_SIZE must be greater than 0"));
        }

        Ok(settings)
    }

    fn cleanup_from_env() -> Result<CleanupSettings, MailerError> {
        Ok(CleanupSettings {
            history_retention_days: parse_env("CLEANUP_HISTORY_RETENTION_DAYS", "180")?,
            logs_retention_days: parse_env("CLEANUP_LOGS_RETENTION_DAYS", "30")?,
            attachments_retention_days: parse_env("CLEANUP_ATTACHMENTS_RETENTION_DAYS", "90")?,
            service_status_retention_days: parse_env("CLEANUP_SERVICE_STATUS_RETENTION_DAYS", "7")?,
            failed_queue_retention_days: parse_env("CLEANUP_FAILED_QUEUE_RETENTION_DAYS", "7")?,
            archive_path: env::var("CLEANUP_ARCHIVE_PATH")
                .unwrap_or_else(|_| "data/archives".to_string()),
            backup_path: env::var("CLEANUP_BACKUP_PATH")
                .unwrap_or_else(|_| "data/backups".to_string()),
            backup_retention_days: parse_env("CLEANUP_BACKUP_RETENTION_DAYS", "30")?,
            max_records_per_cleanup: parse_env("CLEANUP_MAX_RECORDS_PER_CLEANUP", "1000")?,
            create_backup_before_cleanup: parse_env("CLEANUP_CREATE_BACKUP_BEFORE_CLEANUP", "false")?,
            enable_aggressive_cleanup: parse_env("CLEANUP_ENABLE_AGGRESSIVE", "false")?,
            cleanup_interval_minutes: parse_env("CLEANUP_INTERVAL_MINUTES", "360")?,
        })
    }

    fn alerts_from_env() -> Result<AlertSettings, MailerError> {
        Ok(AlertSettings {
            alert_email: env::var("ALERT_EMAIL").ok(),
            webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
            webhook_timeout_secs: parse_env("ALERT_WEBHOOK_TIMEOUT_SECS", "30")?,
        })
    }
}
