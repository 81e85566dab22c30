use thiserror::Error;

pub type Result<T> = std::result::Result<T, MailerError>;

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("template resolution error: {message}")]
    TemplateResolution { message: String },

    #[error("composition error: {message}")]
    Composition { message: String },

    #[error("transient transport error: {message}")]
    TransportTransient { message: String },

    #[error("permanent transport error: {message}")]
    TransportPermanent { message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Storage(#[from] sea_orm::DbErr),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MailerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::TemplateResolution {
            message: message.into(),
        }
    }

    pub fn composition(message: impl Into<String>) -> Self {
        Self::Composition {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransportTransient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::TransportPermanent {
            message: message.into(),
        }
    }

    /// Whether the dispatcher should put the item back in the queue for
    /// another attempt. Storage errors are not classified here; they bubble
    /// up and leave the row in Processing for the reaper.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportTransient { .. } | Self::TemplateResolution { .. }
        )
    }
}
