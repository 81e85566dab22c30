use async_trait::async_trait;
use mailspool::composer::MimeComposer;
use mailspool::config::{ProcessingSettings, SmtpConnectionMode, SmtpSettings};
use mailspool::database::email_history::{self, Entity as EmailHistory};
use mailspool::database::email_queue::EmailPriority;
use mailspool::database::establish_connection;
use mailspool::dispatcher::Dispatcher;
use mailspool::error::{MailerError, Result};
use mailspool::logging::ProcessingLogger;
use mailspool::queue::models::EnqueueRequest;
use mailspool::queue::QueueManager;
use mailspool::smtp::MailTransport;
use mailspool::template::{TemplateEngine, TemplateSpec};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Replays a scripted sequence of outcomes, then succeeds forever. Captures
/// every accepted message for assertions.
struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<String>>,
}

enum Step {
    Ok,
    Transient(&'static str),
    Permanent(&'static str),
}

impl ScriptedTransport {
    fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    async fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, message: &lettre::Message) -> Result<()> {
        let step = self.script.lock().await.pop_front().unwrap_or(Step::Ok);
        match step {
            Step::Ok => {
                self.sent
                    .lock()
                    .await
                    .push(String::from_utf8_lossy(&message.formatted()).to_string());
                Ok(())
            }
            Step::Transient(reply) => Err(MailerError::transient(reply)),
            Step::Permanent(reply) => Err(MailerError::permanent(reply)),
        }
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(true)
    }
}

fn smtp_settings() -> SmtpSettings {
    SmtpSettings {
        server: "smtp.example.com".to_string(),
        port: 587,
        connection_mode: SmtpConnectionMode::None,
        username: None,
        password: None,
        sender_email: "noreply@mailspool.example".to_string(),
        sender_name: None,
        timeout_seconds: 30,
        rate_limit_per_minute: 600,
        burst_limit: 100,
    }
}

fn fast_processing() -> ProcessingSettings {
    ProcessingSettings {
        poll_interval_secs: 1,
        retry_backoff_minutes: 0,
        ..Default::default()
    }
}

struct Harness {
    db: Arc<DatabaseConnection>,
    queue: QueueManager,
    dispatcher: Dispatcher,
    transport: Arc<ScriptedTransport>,
    templates: Arc<TemplateEngine>,
}

async fn setup(script: Vec<Step>) -> Harness {
    let db = Arc::new(
        establish_connection("sqlite::memory:")
            .await
            .expect("connect test database"),
    );
    let processing = fast_processing();
    let queue = QueueManager::new(db.clone(), &processing);
    let templates = Arc::new(TemplateEngine::new(db.clone()));
    let transport = ScriptedTransport::new(script);

    let dispatcher = Dispatcher::new(
        queue.clone(),
        MimeComposer::new(smtp_settings()),
        templates.clone(),
        transport.clone(),
        ProcessingLogger::new(db.clone()),
        processing,
        600,
        100,
    );

    Harness {
        db,
        queue,
        dispatcher,
        transport,
        templates,
    }
}

fn request(subject: &str) -> EnqueueRequest {
    EnqueueRequest {
        to_emails: "a@x.io".to_string(),
        cc_emails: None,
        bcc_emails: None,
        subject: subject.to_string(),
        body: "hello".to_string(),
        is_html: false,
        priority: EmailPriority::Normal,
        template_id: None,
        template_data: None,
        attachments: Vec::new(),
        custom_headers: None,
        request_delivery_notification: false,
        request_read_receipt: false,
        scheduled_for: None,
        max_retries: None,
        created_by: "tests".to_string(),
        request_source: None,
    }
}

async fn wait_for_status(queue: &QueueManager, queue_id: &str, status: &str) -> bool {
    for _ in 0..100 {
        let row = queue.get(queue_id).await.expect("get").expect("row");
        if row.status == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_happy_path_plain_text() {
    let harness = setup(vec![]).await;
    let queue_id = harness
        .queue
        .enqueue(request("hi"))
        .await
        .expect("enqueue");

    harness.dispatcher.start().await.expect("start dispatcher");
    assert!(wait_for_status(&harness.queue, &queue_id, "sent").await);
    harness.dispatcher.shutdown().await;

    let row = harness
        .queue
        .get(&queue_id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(row.retry_count, 0);

    let sent = harness.transport.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Subject: hi"));
    assert!(sent[0].contains("hello"));

    let history = EmailHistory::find()
        .filter(email_history::Column::QueueId.eq(&queue_id))
        .one(harness.db.as_ref())
        .await
        .expect("query history")
        .expect("history row");
    assert_eq!(history.status, "sent");
    assert_eq!(history.retry_count, 0);
}

#[tokio::test]
async fn test_transient_failure_retries_then_succeeds() {
    let harness = setup(vec![Step::Transient("451 try again"), Step::Ok]).await;
    let queue_id = harness
        .queue
        .enqueue(request("retry me"))
        .await
        .expect("enqueue");

    harness.dispatcher.start().await.expect("start dispatcher");
    assert!(wait_for_status(&harness.queue, &queue_id, "sent").await);
    harness.dispatcher.shutdown().await;

    let row = harness
        .queue
        .get(&queue_id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(row.retry_count, 1);

    let history = EmailHistory::find()
        .filter(email_history::Column::QueueId.eq(&queue_id))
        .all(harness.db.as_ref())
        .await
        .expect("query history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "sent");
    assert_eq!(history[0].retry_count, 1);
}

#[tokio::test]
async fn test_transient_failures_exhaust_into_failed() {
    let harness = setup(vec![
        Step::Transient("451 mailbox busy"),
        Step::Transient("451 mailbox busy"),
        Step::Transient("451 mailbox busy"),
        Step::Transient("451 mailbox busy"),
        Step::Transient("451 mailbox busy"),
    ])
    .await;
    let queue_id = harness
        .queue
        .enqueue(request("doomed"))
        .await
        .expect("enqueue");

    harness.dispatcher.start().await.expect("start dispatcher");
    assert!(wait_for_status(&harness.queue, &queue_id, "failed").await);
    harness.dispatcher.shutdown().await;

    let row = harness
        .queue
        .get(&queue_id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(row.retry_count, row.max_retries);

    let history = EmailHistory::find()
        .filter(email_history::Column::QueueId.eq(&queue_id))
        .one(harness.db.as_ref())
        .await
        .expect("query history")
        .expect("history row");
    assert!(history
        .error_details
        .as_deref()
        .expect("error details")
        .contains("451"));
    assert!(harness.transport.sent_messages().await.is_empty());
}

#[tokio::test]
async fn test_permanent_rejection_fails_without_retry() {
    let harness = setup(vec![Step::Permanent("550 no such user")]).await;
    let queue_id = harness
        .queue
        .enqueue(request("bounced"))
        .await
        .expect("enqueue");

    harness.dispatcher.start().await.expect("start dispatcher");
    assert!(wait_for_status(&harness.queue, &queue_id, "failed").await);
    harness.dispatcher.shutdown().await;

    let row = harness
        .queue
        .get(&queue_id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(row.retry_count, 0);
    assert!(row
        .error_message
        .as_deref()
        .expect("error message")
        .contains("550"));
}

#[tokio::test]
async fn test_template_rows_render_before_send() {
    let harness = setup(vec![]).await;

    let template = harness
        .templates
        .create_template(TemplateSpec {
            name: "welcome".to_string(),
            category: None,
            subject_template: "Welcome {Name}".to_string(),
            body_template: "<p>Hi {Name}, code={Code}</p>".to_string(),
            is_system: false,
        })
        .await
        .expect("create template");

    let mut req = request("placeholder subject");
    req.is_html = true;
    req.template_id = Some(template.id);
    req.template_data = Some(std::collections::HashMap::from([(
        "Name".to_string(),
        "Sam".to_string(),
    )]));
    let queue_id = harness.queue.enqueue(req).await.expect("enqueue");

    harness.dispatcher.start().await.expect("start dispatcher");
    assert!(wait_for_status(&harness.queue, &queue_id, "sent").await);
    harness.dispatcher.shutdown().await;

    let sent = harness.transport.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Subject: Welcome Sam"));

    // History keeps the rendered body, empty where the mapping had no Code
    let history = EmailHistory::find()
        .filter(email_history::Column::QueueId.eq(&queue_id))
        .one(harness.db.as_ref())
        .await
        .expect("query history")
        .expect("history row");
    assert_eq!(history.subject, "Welcome Sam");
    assert_eq!(history.body, "<p>Hi Sam, code=</p>");
}

#[tokio::test]
async fn test_missing_template_is_retried_until_exhaustion() {
    let harness = setup(vec![]).await;

    let mut req = request("no template");
    req.template_id = Some(4242);
    let queue_id = harness.queue.enqueue(req).await.expect("enqueue");

    harness.dispatcher.start().await.expect("start dispatcher");
    assert!(wait_for_status(&harness.queue, &queue_id, "failed").await);
    harness.dispatcher.shutdown().await;

    // Resolution failures are retriable (deactivation race), so the retry
    // budget is spent before the row goes terminal
    let row = harness
        .queue
        .get(&queue_id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(row.retry_count, row.max_retries);
    assert!(harness.transport.sent_messages().await.is_empty());
}
