use async_trait::async_trait;
use axum_test::TestServer;
use mailspool::config::{
    AlertSettings, CleanupSettings, Config, ProcessingSettings, SmtpConnectionMode, SmtpSettings,
};
use mailspool::database::establish_connection;
use mailspool::error::Result;
use mailspool::health::HealthReporter;
use mailspool::queue::QueueManager;
use mailspool::scheduler::Scheduler;
use mailspool::smtp::MailTransport;
use mailspool::template::{TemplateEngine, TemplateSpec};
use mailspool::{api, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct AlwaysUpTransport;

#[async_trait]
impl MailTransport for AlwaysUpTransport {
    async fn send(&self, _message: &lettre::Message) -> Result<()> {
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(true)
    }
}

fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        port: 0,
        service_name: "mailspool-test".to_string(),
        smtp: SmtpSettings {
            server: "smtp.example.com".to_string(),
            port: 587,
            connection_mode: SmtpConnectionMode::None,
            username: None,
            password: None,
            sender_email: "noreply@mailspool.example".to_string(),
            sender_name: None,
            timeout_seconds: 30,
            rate_limit_per_minute: 60,
            burst_limit: 10,
        },
        processing: ProcessingSettings::default(),
        cleanup: CleanupSettings::default(),
        alerts: AlertSettings::default(),
    }
}

async fn setup() -> (TestServer, AppState) {
    let config = test_config();
    let db = Arc::new(
        establish_connection(&config.database_url)
            .await
            .expect("connect test database"),
    );

    let queue = QueueManager::new(db.clone(), &config.processing);
    let templates = Arc::new(TemplateEngine::new(db.clone()));
    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        queue.clone(),
        60,
        CancellationToken::new(),
    ));
    let health = Arc::new(HealthReporter::new(
        db.clone(),
        queue.clone(),
        Arc::new(AlwaysUpTransport),
        None,
        config.service_name.clone(),
        &config.processing,
    ));

    let state = AppState {
        db,
        config: Arc::new(config),
        queue,
        templates,
        scheduler,
        health,
    };

    let server = TestServer::new(api::create_router().with_state(state.clone()))
        .expect("build test server");
    (server, state)
}

#[tokio::test]
async fn test_queue_endpoint_accepts_and_reports_status() {
    let (server, _state) = setup().await;

    let response = server
        .post("/queue")
        .json(&json!({
            "to_emails": "a@x.io",
            "subject": "hi",
            "body": "hello",
            "is_html": false,
            "created_by": "tests",
        }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    let queue_id = body["queue_id"].as_str().expect("queue_id").to_string();
    assert_eq!(body["status"], "queued");

    let status = server.get(&format!("/status/{queue_id}")).await;
    status.assert_status_ok();
    let status_body: Value = status.json();
    assert_eq!(status_body["status"], "queued");
    assert_eq!(status_body["priority"], "normal");
    assert_eq!(status_body["retry_count"], 0);
}

#[tokio::test]
async fn test_queue_endpoint_validates() {
    let (server, _state) = setup().await;

    let response = server
        .post("/queue")
        .json(&json!({
            "to_emails": " ; ",
            "subject": "hi",
            "created_by": "tests",
        }))
        .await;
    response.assert_status_bad_request();

    let body: Value = response.json();
    assert!(body["error"].as_str().expect("error").contains("recipient"));
}

#[tokio::test]
async fn test_status_unknown_id_is_404() {
    let (server, _state) = setup().await;
    let response = server.get("/status/does-not-exist").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn test_status_batch() {
    let (server, _state) = setup().await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let response = server
            .post("/queue")
            .json(&json!({
                "to_emails": "a@x.io",
                "subject": format!("msg {i}"),
                "created_by": "tests",
            }))
            .await;
        let body: Value = response.json();
        ids.push(body["queue_id"].as_str().expect("queue_id").to_string());
    }

    let response = server.post("/status/batch").json(&json!(ids)).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body.as_array().expect("array").len(), 3);

    let empty = server.post("/status/batch").json(&json!([])).await;
    empty.assert_status_bad_request();
}

#[tokio::test]
async fn test_cancel_endpoint() {
    let (server, _state) = setup().await;

    let response = server
        .post("/queue")
        .json(&json!({
            "to_emails": "a@x.io",
            "subject": "cancel me",
            "created_by": "tests",
        }))
        .await;
    let body: Value = response.json();
    let queue_id = body["queue_id"].as_str().expect("queue_id");

    let cancel = server.post(&format!("/cancel/{queue_id}")).await;
    cancel.assert_status_ok();
    let cancelled: Value = cancel.json();
    assert_eq!(cancelled, json!(true));

    // A second cancel is a no-op on the terminal row
    let again = server.post(&format!("/cancel/{queue_id}")).await;
    again.assert_status_ok();
    let cancelled: Value = again.json();
    assert_eq!(cancelled, json!(false));

    let missing = server.post("/cancel/nope").await;
    missing.assert_status_not_found();
}

#[tokio::test]
async fn test_queue_template_endpoint() {
    let (server, state) = setup().await;

    let missing = server
        .post("/queue-template")
        .json(&json!({
            "to_emails": "a@x.io",
            "template_name": "nope",
            "created_by": "tests",
        }))
        .await;
    missing.assert_status_not_found();

    let template = state
        .templates
        .create_template(TemplateSpec {
            name: "welcome".to_string(),
            category: None,
            subject_template: "Welcome {Name}".to_string(),
            body_template: "<p>Hi {Name}</p>".to_string(),
            is_system: false,
        })
        .await
        .expect("create template");

    let response = server
        .post("/queue-template")
        .json(&json!({
            "to_emails": "a@x.io",
            "template_id": template.id,
            "template_data": { "Name": "Sam" },
            "created_by": "tests",
        }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    let queue_id = body["queue_id"].as_str().expect("queue_id");
    let row = state
        .queue
        .get(queue_id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(row.template_id, Some(template.id));
    assert!(row.requires_template_processing);
}

#[tokio::test]
async fn test_queue_bulk_partial_acceptance() {
    let (server, _state) = setup().await;

    let response = server
        .post("/queue-bulk")
        .json(&json!({
            "items": [
                { "to_emails": "a@x.io", "subject": "ok one", "created_by": "tests" },
                { "to_emails": "", "subject": "bad", "created_by": "tests" },
                { "to_emails": "b@x.io", "subject": "ok two", "created_by": "tests" },
            ]
        }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["accepted"].as_array().expect("accepted").len(), 2);
    let rejected = body["rejected"].as_array().expect("rejected");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["index"], 1);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _state) = setup().await;

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "Healthy");
    assert_eq!(body["probes"].as_array().expect("probes").len(), 3);
}

#[tokio::test]
async fn test_statistics_and_list_endpoints() {
    let (server, _state) = setup().await;

    server
        .post("/queue")
        .json(&json!({
            "to_emails": "a@x.io",
            "subject": "counted",
            "created_by": "tests",
        }))
        .await
        .assert_status_ok();

    let stats = server.get("/statistics").await;
    stats.assert_status_ok();
    let body: Value = stats.json();
    assert_eq!(body["totals"]["queued"], 1);

    let list = server.get("/list?page=1&pageSize=10&status=queued").await;
    list.assert_status_ok();
    let body: Value = list.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"].as_array().expect("items").len(), 1);
}
