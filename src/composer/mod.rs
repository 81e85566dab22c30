pub mod inline;
pub mod normalize;

use crate::config::SmtpSettings;
use crate::database::email_queue::EmailPriority;
use crate::error::{MailerError, Result};
use crate::queue::models::AttachmentData;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use normalize::{load_attachments, parse_valid_addresses, LoadedAttachment};
use std::collections::HashMap;
use uuid::Uuid;

const X_MAILER: &str = "mailspool/0.1";

/// Everything the composer needs to produce one outbound message. Built by
/// the dispatcher from a queue row (after template processing) or directly by
/// the alerting path.
#[derive(Debug, Clone, Default)]
pub struct OutboundEmail {
    pub to_emails: String,
    pub cc_emails: Option<String>,
    pub bcc_emails: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub priority: EmailPriority,
    pub attachments: Vec<AttachmentData>,
    pub custom_headers: HashMap<String, String>,
    pub request_delivery_notification: bool,
    pub request_read_receipt: bool,
}

pub struct ComposedMessage {
    pub message: Message,
    pub warnings: Vec<String>,
    pub inline_image_count: usize,
}

/// Turns a normalized send request into a fully formed MIME message,
/// inlining embedded images as `multipart/related` CID parts.
#[derive(Clone)]
pub struct MimeComposer {
    smtp: SmtpSettings,
}

impl MimeComposer {
    pub fn new(smtp: SmtpSettings) -> Self {
        Self { smtp }
    }

    pub async fn compose(&self, email: &OutboundEmail) -> Result<ComposedMessage> {
        let mut warnings = Vec::new();

        let (to, invalid_to) = parse_valid_addresses(&email.to_emails);
        for bad in &invalid_to {
            warnings.push(format!("dropped invalid recipient address '{bad}'"));
        }
        if to.is_empty() {
            return Err(MailerError::validation(
                "recipient list is empty after parsing",
            ));
        }

        let (cc, invalid_cc) =
            parse_valid_addresses(email.cc_emails.as_deref().unwrap_or_default());
        let (bcc, invalid_bcc) =
            parse_valid_addresses(email.bcc_emails.as_deref().unwrap_or_default());
        for bad in invalid_cc.iter().chain(invalid_bcc.iter()) {
            warnings.push(format!("dropped invalid cc/bcc address '{bad}'"));
        }

        let subject = if email.subject.trim().is_empty() {
            "No Subject".to_string()
        } else {
            email.subject.clone()
        };

        let loaded = load_attachments(&email.attachments, &mut warnings).await;

        // Inline handling only applies to HTML bodies; plain-text messages
        // carry every attachment as a regular part.
        let (body, data_images, mut inline_parts, regular_parts) = if email.is_html {
            let (rewritten, images, inline_warnings) = inline::rewrite_data_urls(&email.body);
            warnings.extend(inline_warnings);
            let optimized = inline::optimize_for_clients(&rewritten);

            let (inline_atts, regular_atts): (Vec<_>, Vec<_>) =
                loaded.into_iter().partition(|a| a.is_inline);
            (optimized, images, inline_atts, regular_atts)
        } else {
            (email.body.clone(), Vec::new(), Vec::new(), loaded)
        };
        let inline_image_count = data_images.len() + inline_parts.len();

        // Skipping broken attachments is fine while something else remains to
        // send. When they were the only content the message would be empty,
        // which is a deterministic failure, not a degenerate send.
        if body.trim().is_empty()
            && !email.attachments.is_empty()
            && data_images.is_empty()
            && inline_parts.is_empty()
            && regular_parts.is_empty()
        {
            return Err(MailerError::composition(
                "no attachment survived loading and the body is empty",
            ));
        }

        let from = self.sender_mailbox()?;
        let reply_to = email
            .reply_to
            .as_deref()
            .filter(|addr| validator::validate_email(*addr))
            .unwrap_or(&self.smtp.sender_email)
            .parse::<Mailbox>()
            .map_err(|e| MailerError::composition(format!("invalid reply-to address: {e}")))?;

        let mut builder = Message::builder()
            .from(from)
            .reply_to(reply_to)
            .subject(subject)
            .message_id(Some(format!(
                "<{}@{}>",
                Uuid::new_v4(),
                self.smtp.sender_domain()
            )));

        for address in &to {
            builder = builder.to(Self::mailbox(address)?);
        }
        for address in &cc {
            builder = builder.cc(Self::mailbox(address)?);
        }
        for address in &bcc {
            builder = builder.bcc(Self::mailbox(address)?);
        }

        let body_part = if email.is_html {
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(body)
        } else {
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(body)
        };

        let has_inline = !data_images.is_empty() || !inline_parts.is_empty();
        let has_regular = !regular_parts.is_empty();

        let mut message = match (has_inline, has_regular) {
            (false, false) => builder.singlepart(body_part),
            (true, false) => {
                let related =
                    self.related_tree(body_part, &data_images, &mut inline_parts, &mut warnings);
                builder.multipart(related)
            }
            (false, true) => {
                let mut mixed = MultiPart::mixed().singlepart(body_part);
                for attachment in &regular_parts {
                    mixed = mixed.singlepart(self.attachment_part(attachment, &mut warnings));
                }
                builder.multipart(mixed)
            }
            (true, true) => {
                let related =
                    self.related_tree(body_part, &data_images, &mut inline_parts, &mut warnings);
                let mut mixed = MultiPart::mixed().multipart(related);
                for attachment in &regular_parts {
                    mixed = mixed.singlepart(self.attachment_part(attachment, &mut warnings));
                }
                builder.multipart(mixed)
            }
        }
        .map_err(|e| MailerError::composition(format!("failed to build message: {e}")))?;

        self.apply_headers(&mut message, email, &mut warnings);

        Ok(ComposedMessage {
            message,
            warnings,
            inline_image_count,
        })
    }

    fn related_tree(
        &self,
        body_part: SinglePart,
        data_images: &[inline::InlineImage],
        inline_attachments: &mut Vec<LoadedAttachment>,
        warnings: &mut Vec<String>,
    ) -> MultiPart {
        let mut related = MultiPart::related().singlepart(body_part);

        for image in data_images {
            let content_type = match ContentType::parse(&image.content_type) {
                Ok(ct) => ct,
                Err(_) => {
                    warnings.push(format!(
                        "inline image content type '{}' is invalid, using octet-stream",
                        image.content_type
                    ));
                    ContentType::parse("application/octet-stream").expect("octet-stream")
                }
            };
            related = related.singlepart(
                Attachment::new_inline(image.content_id.clone())
                    .body(Body::new(image.bytes.clone()), content_type),
            );
        }

        for attachment in inline_attachments.drain(..) {
            let content_type = Self::parse_content_type(&attachment.content_type, warnings);
            related = related.singlepart(
                Attachment::new_inline(attachment.content_id.clone())
                    .body(Body::new(attachment.bytes), content_type),
            );
        }

        related
    }

    fn attachment_part(
        &self,
        attachment: &LoadedAttachment,
        warnings: &mut Vec<String>,
    ) -> SinglePart {
        let content_type = Self::parse_content_type(&attachment.content_type, warnings);
        Attachment::new(attachment.file_name.clone())
            .body(Body::new(attachment.bytes.clone()), content_type)
    }

    fn parse_content_type(raw: &str, warnings: &mut Vec<String>) -> ContentType {
        ContentType::parse(raw).unwrap_or_else(|_| {
            warnings.push(format!(
                "attachment content type '{raw}' is invalid, using octet-stream"
            ));
            ContentType::parse("application/octet-stream").expect("octet-stream")
        })
    }

    fn apply_headers(
        &self,
        message: &mut Message,
        email: &OutboundEmail,
        warnings: &mut Vec<String>,
    ) {
        Self::raw_header(message, "X-Mailer", X_MAILER, warnings);

        let (priority, x_priority) = match email.priority {
            EmailPriority::High => ("urgent", "1"),
            EmailPriority::Normal => ("normal", "3"),
            EmailPriority::Low => ("non-urgent", "5"),
        };
        Self::raw_header(message, "Priority", priority, warnings);
        Self::raw_header(message, "X-Priority", x_priority, warnings);

        if email.request_delivery_notification {
            Self::raw_header(
                message,
                "Return-Receipt-To",
                &format!("<{}>", self.smtp.sender_email),
                warnings,
            );
        }
        if email.request_read_receipt {
            Self::raw_header(
                message,
                "Disposition-Notification-To",
                &format!("<{}>", self.smtp.sender_email),
                warnings,
            );
        }

        for (name, value) in &email.custom_headers {
            if name.trim().is_empty() {
                continue;
            }
            Self::raw_header(message, name, value, warnings);
        }
    }

    fn raw_header(message: &mut Message, name: &str, value: &str, warnings: &mut Vec<String>) {
        match HeaderName::new_from_ascii(name.to_string()) {
            Ok(header_name) => {
                message
                    .headers_mut()
                    .insert_raw(HeaderValue::new(header_name, value.to_string()));
            }
            Err(e) => {
                warnings.push(format!("dropped invalid header '{name}': {e}"));
            }
        }
    }

    fn sender_mailbox(&self) -> Result<Mailbox> {
        let address = self
            .smtp
            .sender_email
            .parse::<Address>()
            .map_err(|e| MailerError::config(format!("invalid sender address: {e}")))?;
        Ok(Mailbox::new(self.smtp.sender_name.clone(), address))
    }

    fn mailbox(address: &str) -> Result<Mailbox> {
        let parsed = address
            .parse::<Address>()
            .map_err(|e| MailerError::validation(format!("invalid address '{address}': {e}")))?;
        Ok(Mailbox::new(None, parsed))
    }
}
