use mailspool::composer::{MimeComposer, OutboundEmail};
use mailspool::config::{SmtpConnectionMode, SmtpSettings};
use mailspool::database::email_queue::EmailPriority;
use mailspool::error::MailerError;
use mailspool::queue::models::AttachmentData;
use std::collections::HashMap;

fn smtp_settings() -> SmtpSettings {
    SmtpSettings {
        server: "smtp.example.com".to_string(),
        port: 587,
        connection_mode: SmtpConnectionMode::StartTls,
        username: None,
        password: None,
        sender_email: "noreply@mailspool.example".to_string(),
        sender_name: Some("Mailspool".to_string()),
        timeout_seconds: 30,
        rate_limit_per_minute: 60,
        burst_limit: 10,
    }
}

fn basic_email() -> OutboundEmail {
    OutboundEmail {
        to_emails: "a@example.com".to_string(),
        subject: "hello".to_string(),
        body: "plain body".to_string(),
        is_html: false,
        priority: EmailPriority::Normal,
        ..Default::default()
    }
}

fn formatted(message: &lettre::Message) -> String {
    String::from_utf8_lossy(&message.formatted()).to_string()
}

#[tokio::test]
async fn test_plain_text_is_a_single_part() {
    let composer = MimeComposer::new(smtp_settings());
    let composed = composer.compose(&basic_email()).await.expect("compose");
    let raw = formatted(&composed.message);

    assert!(!raw.contains("multipart/"));
    assert!(raw.contains("plain body"));
    assert!(raw.contains("Subject: hello"));
    assert!(raw.contains("From: "));
    assert!(raw.contains("X-Mailer: mailspool"));
}

#[tokio::test]
async fn test_cid_inlining_round_trip() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.is_html = true;
    email.body = r#"<html><body><img src="data:image/png;base64,iVBORw0KGgo="></body></html>"#
        .to_string();

    let composed = composer.compose(&email).await.expect("compose");
    assert_eq!(composed.inline_image_count, 1);

    let raw = formatted(&composed.message);
    assert!(raw.contains("multipart/related"));
    assert!(raw.contains("Content-Type: image/png"));
    assert!(raw.contains("Content-Disposition: inline"));

    // The rewritten src and the part's Content-ID must agree
    let cid_start = raw.find("cid:").expect("cid reference present") + 4;
    let cid_end = raw[cid_start..]
        .find('"')
        .map(|i| cid_start + i)
        .expect("cid reference closes");
    let cid = &raw[cid_start..cid_end];
    assert!(cid.ends_with("@mailspool"));
    assert!(raw.contains(&format!("Content-ID: <{cid}>")));

    // Decoded bytes equal the original payload: the inline part re-encodes
    // the same eight PNG signature bytes
    assert!(raw.contains("iVBORw0KGgo="));
    // The data URL itself is gone from the html part
    assert!(!raw.contains("data:image/png"));
}

#[tokio::test]
async fn test_invalid_base64_image_is_left_untouched() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.is_html = true;
    email.body = r#"<img src="data:image/png;base64,%%%not-base64%%%">"#.to_string();

    let composed = composer.compose(&email).await.expect("compose");
    assert_eq!(composed.inline_image_count, 0);
    assert!(!composed.warnings.is_empty());

    let raw = formatted(&composed.message);
    assert!(!raw.contains("multipart/related"));
}

#[tokio::test]
async fn test_attachments_build_multipart_mixed() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.attachments = vec![AttachmentData {
        file_name: "report.txt".to_string(),
        content_type: "text/plain".to_string(),
        content_id: None,
        is_inline: false,
        content: Some(base64_of(b"line one")),
        file_path: None,
    }];

    let composed = composer.compose(&email).await.expect("compose");
    let raw = formatted(&composed.message);

    assert!(raw.contains("multipart/mixed"));
    assert!(raw.contains("report.txt"));
    assert!(!raw.contains("multipart/related"));
}

#[tokio::test]
async fn test_inline_images_and_attachments_nest_related_inside_mixed() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.is_html = true;
    email.body =
        r#"<p>see <img src="data:image/gif;base64,R0lGODdh"> attached</p>"#.to_string();
    email.attachments = vec![AttachmentData {
        file_name: "data.csv".to_string(),
        content_type: "text/csv".to_string(),
        content_id: None,
        is_inline: false,
        content: Some(base64_of(b"a,b,c")),
        file_path: None,
    }];

    let composed = composer.compose(&email).await.expect("compose");
    let raw = formatted(&composed.message);

    assert!(raw.contains("multipart/mixed"));
    assert!(raw.contains("multipart/related"));
    assert!(raw.contains("Content-Type: image/gif"));
    assert!(raw.contains("data.csv"));
}

#[tokio::test]
async fn test_empty_recipient_list_is_a_deterministic_failure() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.to_emails = " ; , ".to_string();

    let err = composer.compose(&email).await.expect_err("must fail");
    assert!(matches!(err, MailerError::Validation { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_invalid_recipients_are_dropped_with_warnings() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.to_emails = "good@example.com, not-an-address".to_string();

    let composed = composer.compose(&email).await.expect("compose");
    assert!(composed
        .warnings
        .iter()
        .any(|w| w.contains("not-an-address")));
}

#[tokio::test]
async fn test_priority_and_receipt_headers() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.priority = EmailPriority::High;
    email.request_delivery_notification = true;
    email.request_read_receipt = true;
    email.custom_headers = HashMap::from([
        ("X-Campaign".to_string(), "spring".to_string()),
        ("".to_string(), "dropped".to_string()),
    ]);

    let composed = composer.compose(&email).await.expect("compose");
    let raw = formatted(&composed.message);

    assert!(raw.contains("Priority: urgent"));
    assert!(raw.contains("X-Priority: 1"));
    assert!(raw.contains("Return-Receipt-To: <noreply@mailspool.example>"));
    assert!(raw.contains("Disposition-Notification-To: <noreply@mailspool.example>"));
    assert!(raw.contains("X-Campaign: spring"));
    assert!(!raw.contains("dropped"));
}

#[tokio::test]
async fn test_all_attachments_failing_with_empty_body_is_a_failure() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.body = "   ".to_string();
    email.attachments = vec![AttachmentData {
        file_name: "broken.bin".to_string(),
        content_type: "application/octet-stream".to_string(),
        content_id: None,
        is_inline: false,
        content: Some("%%%not-base64%%%".to_string()),
        file_path: None,
    }];

    let err = composer.compose(&email).await.expect_err("must fail");
    assert!(matches!(err, MailerError::Composition { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_broken_attachment_is_skipped_when_body_remains() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.attachments = vec![AttachmentData {
        file_name: "broken.bin".to_string(),
        content_type: "application/octet-stream".to_string(),
        content_id: None,
        is_inline: false,
        content: Some("%%%not-base64%%%".to_string()),
        file_path: None,
    }];

    let composed = composer.compose(&email).await.expect("compose");
    assert!(composed
        .warnings
        .iter()
        .any(|w| w.contains("broken.bin")));

    let raw = formatted(&composed.message);
    assert!(raw.contains("plain body"));
    assert!(!raw.contains("multipart/mixed"));
}

#[tokio::test]
async fn test_empty_subject_defaults() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.subject = "   ".to_string();

    let composed = composer.compose(&email).await.expect("compose");
    let raw = formatted(&composed.message);
    assert!(raw.contains("Subject: No Subject"));
}

#[tokio::test]
async fn test_message_id_uses_sender_domain() {
    let composer = MimeComposer::new(smtp_settings());
    let composed = composer.compose(&basic_email()).await.expect("compose");
    let raw = formatted(&composed.message);
    assert!(raw.contains("@mailspool.example>"));
}

#[tokio::test]
async fn test_mobile_post_processing_adds_viewport_and_alt() {
    let composer = MimeComposer::new(smtp_settings());
    let mut email = basic_email();
    email.is_html = true;
    email.body =
        r#"<html><head></head><body><img src="https://example.com/x.png"></body></html>"#
            .to_string();

    let composed = composer.compose(&email).await.expect("compose");
    let raw = formatted(&composed.message);

    assert!(raw.contains("viewport"));
    assert!(raw.contains(r#"alt="Image""#));
    assert!(raw.contains("max-width:100%"));
}

fn base64_of(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
