use crate::config::{SmtpConnectionMode, SmtpSettings};
use crate::error::{MailerError, Result};
use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// Transport seam between the dispatcher and the relay. Production uses the
/// lettre SMTP client; tests substitute scripted stubs.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transmit one message. Errors are already classified into
    /// transient/permanent transport errors.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Connect, authenticate and quit without sending. Used by health
    /// probes.
    async fn test_connection(&self) -> Result<bool>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.server)
            .map_err(|e| MailerError::config(format!("failed to create SMTP relay: {e}")))?
            .port(settings.port)
            .timeout(Some(Duration::from_secs(settings.timeout_seconds)));

        builder = match settings.connection_mode {
            SmtpConnectionMode::None => builder.tls(Tls::None),
            SmtpConnectionMode::StartTls => {
                let tls_params = TlsParameters::new(settings.server.clone())
                    .map_err(|e| MailerError::config(format!("TLS configuration error: {e}")))?;
                builder.tls(Tls::Required(tls_params))
            }
            SmtpConnectionMode::SslOnConnect => {
                let tls_params = TlsParameters::new(settings.server.clone())
                    .map_err(|e| MailerError::config(format!("TLS configuration error: {e}")))?;
                builder.tls(Tls::Wrapper(tls_params))
            }
        };

        // Authenticate only when both halves of the credential are present
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &Message) -> Result<()> {
        match self.transport.send(message.clone()).await {
            Ok(response) => {
                let reply = response.message().collect::<Vec<_>>().join(" ");
                tracing::debug!("SMTP accepted message: {reply}");
                Ok(())
            }
            Err(e) => Err(classify_smtp_error(&e)),
        }
    }

    async fn test_connection(&self) -> Result<bool> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| classify_smtp_error(&e))
    }
}

/// 5xx replies are permanent (a full mailbox 552 included); everything else
/// (4xx deferrals, network failures, timeouts) is worth another attempt.
fn classify_smtp_error(error: &lettre::transport::smtp::Error) -> MailerError {
    if error.is_permanent() {
        MailerError::permanent(error.to_string())
    } else {
        MailerError::transient(error.to_string())
    }
}

/// Pure classification of an SMTP reply code, used where only the code is
/// known (e.g. relay replies surfaced as text).
pub fn classify_reply_code(code: u16) -> Option<bool> {
    match code {
        400..=499 => Some(true),  // transient, retry
        500..=599 => Some(false), // permanent
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferrals_are_retryable() {
        assert_eq!(classify_reply_code(451), Some(true));
        assert_eq!(classify_reply_code(421), Some(true));
    }

    #[test]
    fn rejections_are_permanent() {
        assert_eq!(classify_reply_code(550), Some(false));
        // A full mailbox does not warrant a retry either
        assert_eq!(classify_reply_code(552), Some(false));
    }

    #[test]
    fn success_codes_are_not_classified() {
        assert_eq!(classify_reply_code(250), None);
    }
}
