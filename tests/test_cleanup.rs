use flate2::read::GzDecoder;
use mailspool::cleanup::CleanupEngine;
use mailspool::config::CleanupSettings;
use mailspool::database::email_history::{self, Entity as EmailHistory};
use mailspool::database::{email_attachments, email_queue, establish_connection, processing_logs};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, Set};
use std::io::Read;
use std::sync::Arc;

const MICROS_PER_DAY: i64 = 24 * 60 * 60 * 1_000_000;

async fn setup(settings: CleanupSettings) -> (Arc<DatabaseConnection>, CleanupEngine) {
    let db = Arc::new(
        establish_connection("sqlite::memory:")
            .await
            .expect("connect test database"),
    );
    let engine = CleanupEngine::new(db.clone(), settings);
    (db, engine)
}

fn temp_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "mailspool-test-{label}-{}",
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

async fn seed_history(db: &DatabaseConnection, count: usize, age_days: i64) -> Vec<String> {
    let now = chrono::Utc::now().timestamp_micros();
    let stamp = now - age_days * MICROS_PER_DAY;
    let mut ids = Vec::with_capacity(count);

    for i in 0..count {
        let id = format!("hist-{age_days}d-{i}");
        let row = email_history::ActiveModel {
            id: Set(id.clone()),
            queue_id: Set(format!("queue-{age_days}d-{i}")),
            template_id: Set(None),
            to_emails: Set("a@example.com".to_string()),
            cc_emails: Set(None),
            bcc_emails: Set(None),
            subject: Set(format!("subject {i}")),
            body: Set(format!("body {i}")),
            is_html: Set(false),
            status: Set("sent".to_string()),
            error_details: Set(None),
            retry_count: Set(0),
            processing_time_ms: Set(Some(i as i64)),
            processed_by: Set(Some("w1".to_string())),
            sent_at: Set(Some(stamp)),
            created_at: Set(stamp),
        };
        row.insert(db).await.expect("seed history");
        ids.push(id);
    }

    ids
}

#[tokio::test]
async fn test_archive_round_trip() {
    let archive_dir = temp_dir("archive");
    let settings = CleanupSettings {
        archive_path: archive_dir.display().to_string(),
        max_records_per_cleanup: 2000,
        ..Default::default()
    };
    let (db, engine) = setup(settings).await;

    let old_ids = seed_history(db.as_ref(), 1000, 200).await;
    seed_history(db.as_ref(), 5, 1).await;

    let result = engine
        .archive_email_history(180, &archive_dir)
        .await
        .expect("archive");
    assert_eq!(result.records_archived, 1000);
    let file_path = result.file_path.expect("archive file path");
    assert!(file_path.contains("EmailHistory_Archive_"));
    assert!(file_path.ends_with(".json.gz"));

    // Decompressing and deserializing yields exactly the removed rows
    let mut decoder = GzDecoder::new(std::fs::File::open(&file_path).expect("open archive"));
    let mut json = String::new();
    decoder.read_to_string(&mut json).expect("decompress");
    let restored: Vec<email_history::Model> =
        serde_json::from_str(&json).expect("deserialize archive");

    assert_eq!(restored.len(), 1000);
    let mut restored_ids: Vec<String> = restored.iter().map(|r| r.id.clone()).collect();
    restored_ids.sort();
    let mut expected = old_ids.clone();
    expected.sort();
    assert_eq!(restored_ids, expected);
    assert!(restored.iter().all(|r| r.to_emails == "a@example.com"));

    // Archived rows are gone, recent rows survive
    let remaining = EmailHistory::find()
        .count(db.as_ref())
        .await
        .expect("count");
    assert_eq!(remaining, 5);

    std::fs::remove_dir_all(&archive_dir).ok();
}

#[tokio::test]
async fn test_history_cleanup_respects_cap_and_cutoff() {
    let (db, engine) = setup(CleanupSettings {
        max_records_per_cleanup: 4,
        ..Default::default()
    })
    .await;

    seed_history(db.as_ref(), 10, 365).await;
    seed_history(db.as_ref(), 3, 1).await;

    // Each pass deletes at most the configured cap
    assert_eq!(engine.cleanup_email_history(180).await.expect("pass 1"), 4);
    assert_eq!(engine.cleanup_email_history(180).await.expect("pass 2"), 4);
    assert_eq!(engine.cleanup_email_history(180).await.expect("pass 3"), 2);
    assert_eq!(engine.cleanup_email_history(180).await.expect("pass 4"), 0);

    let remaining = EmailHistory::find()
        .count(db.as_ref())
        .await
        .expect("count");
    assert_eq!(remaining, 3);
}

#[tokio::test]
async fn test_orphaned_attachments_are_swept() {
    let (db, engine) = setup(CleanupSettings::default()).await;
    let now = chrono::Utc::now().timestamp_micros();

    // A live queue row keeps its attachment
    let queue_row = email_queue::ActiveModel {
        queue_id: Set("queue-live".to_string()),
        priority: Set(1),
        to_emails: Set("a@example.com".to_string()),
        cc_emails: Set(None),
        bcc_emails: Set(None),
        subject: Set("live".to_string()),
        body: Set("body".to_string()),
        is_html: Set(false),
        template_id: Set(None),
        template_data: Set(None),
        requires_template_processing: Set(false),
        attachments: Set(None),
        has_embedded_images: Set(false),
        custom_headers: Set(None),
        request_delivery_notification: Set(false),
        request_read_receipt: Set(false),
        status: Set("queued".to_string()),
        retry_count: Set(0),
        max_retries: Set(3),
        scheduled_for: Set(None),
        is_scheduled: Set(false),
        processing_started_at: Set(None),
        processed_at: Set(None),
        processed_by: Set(None),
        error_message: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        created_by: Set("tests".to_string()),
        request_source: Set(None),
    };
    queue_row.insert(db.as_ref()).await.expect("seed queue row");

    for (id, queue_id) in [("att-live", "queue-live"), ("att-orphan", "queue-gone")] {
        let attachment = email_attachments::ActiveModel {
            id: Set(id.to_string()),
            queue_id: Set(queue_id.to_string()),
            file_name: Set("f.txt".to_string()),
            content_type: Set("text/plain".to_string()),
            content_id: Set(None),
            is_inline: Set(false),
            content: Set(Some("aGk=".to_string())),
            file_path: Set(None),
            size_bytes: Set(2),
            created_at: Set(now),
        };
        attachment
            .insert(db.as_ref())
            .await
            .expect("seed attachment");
    }

    let swept = engine
        .cleanup_orphaned_attachments()
        .await
        .expect("sweep orphans");
    assert_eq!(swept, 1);

    let remaining = email_attachments::Entity::find()
        .all(db.as_ref())
        .await
        .expect("remaining attachments");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "att-live");
}

#[tokio::test]
async fn test_failed_queue_rows_expire() {
    let (db, engine) = setup(CleanupSettings::default()).await;
    let now = chrono::Utc::now().timestamp_micros();

    for (id, status, age_days) in [
        ("old-failed", "failed", 30),
        ("new-failed", "failed", 1),
        ("old-sent", "sent", 30),
    ] {
        let row = email_queue::ActiveModel {
            queue_id: Set(id.to_string()),
            priority: Set(1),
            to_emails: Set("a@example.com".to_string()),
            cc_emails: Set(None),
            bcc_emails: Set(None),
            subject: Set(id.to_string()),
            body: Set("body".to_string()),
            is_html: Set(false),
            template_id: Set(None),
            template_data: Set(None),
            requires_template_processing: Set(false),
            attachments: Set(None),
            has_embedded_images: Set(false),
            custom_headers: Set(None),
            request_delivery_notification: Set(false),
            request_read_receipt: Set(false),
            status: Set(status.to_string()),
            retry_count: Set(0),
            max_retries: Set(3),
            scheduled_for: Set(None),
            is_scheduled: Set(false),
            processing_started_at: Set(None),
            processed_at: Set(None),
            processed_by: Set(None),
            error_message: Set(None),
            created_at: Set(now - age_days * MICROS_PER_DAY),
            updated_at: Set(now - age_days * MICROS_PER_DAY),
            created_by: Set("tests".to_string()),
            request_source: Set(None),
        };
        row.insert(db.as_ref()).await.expect("seed queue row");
    }

    let deleted = engine
        .cleanup_failed_queue_items(7)
        .await
        .expect("cleanup failed rows");
    assert_eq!(deleted, 1);

    let remaining = email_queue::Entity::find()
        .all(db.as_ref())
        .await
        .expect("remaining rows");
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|r| r.queue_id != "old-failed"));
}

#[tokio::test]
async fn test_full_cleanup_isolates_step_failures() {
    let archive_dir = temp_dir("full");
    let settings = CleanupSettings {
        archive_path: archive_dir.display().to_string(),
        backup_path: temp_dir("backups").display().to_string(),
        logs_retention_days: 30,
        ..Default::default()
    };
    let (db, engine) = setup(settings).await;

    seed_history(db.as_ref(), 6, 365).await;

    let now = chrono::Utc::now().timestamp_micros();
    let log = processing_logs::ActiveModel {
        id: Set("log-old".to_string()),
        level: Set("info".to_string()),
        category: Set("dispatcher".to_string()),
        message: Set("ancient".to_string()),
        queue_id: Set(None),
        worker_id: Set(None),
        processing_step: Set(None),
        created_at: Set(now - 90 * MICROS_PER_DAY),
    };
    log.insert(db.as_ref()).await.expect("seed log");

    let report = engine.perform_full_cleanup().await;

    // Archive removed the aged history, logs step removed the old log row
    assert!(report.total_records_removed >= 7);
    assert!(report.steps.iter().all(|s| s.error.is_none()));
    assert!(report
        .steps
        .iter()
        .any(|s| s.step == "archive_email_history" && s.records_affected == 6));
    assert!(report
        .steps
        .iter()
        .any(|s| s.step == "cleanup_processing_logs" && s.records_affected == 1));

    std::fs::remove_dir_all(&archive_dir).ok();
}

#[tokio::test]
async fn test_full_cleanup_never_deletes_unarchived_history() {
    let archive_dir = temp_dir("overflow");
    let settings = CleanupSettings {
        archive_path: archive_dir.display().to_string(),
        backup_path: temp_dir("overflow-backups").display().to_string(),
        max_records_per_cleanup: 4,
        ..Default::default()
    };
    let (db, engine) = setup(settings).await;

    // More aged rows than one pass's cap
    seed_history(db.as_ref(), 10, 365).await;

    let report = engine.perform_full_cleanup().await;

    let archived = report
        .archive
        .as_ref()
        .expect("archive result")
        .records_archived;
    assert_eq!(archived, 4);

    // Exactly the archived rows are gone; nothing was deleted without being
    // written to an archive first
    let remaining = EmailHistory::find()
        .count(db.as_ref())
        .await
        .expect("count");
    assert_eq!(remaining, 6);

    let mut decoder = GzDecoder::new(
        std::fs::File::open(report.archive.unwrap().file_path.expect("archive file"))
            .expect("open archive"),
    );
    let mut json = String::new();
    decoder.read_to_string(&mut json).expect("decompress");
    let restored: Vec<email_history::Model> =
        serde_json::from_str(&json).expect("deserialize archive");
    assert_eq!(restored.len(), 4);

    std::fs::remove_dir_all(&archive_dir).ok();
}

#[tokio::test]
async fn test_disk_space_analysis_shape() {
    let (_db, engine) = setup(CleanupSettings::default()).await;

    let report = engine.analyze_disk_space().await.expect("disk analysis");
    assert!(report.free_percent >= 0.0 && report.free_percent <= 100.0);
    assert!(!report.recommendations.is_empty());
    if report.total_bytes > 0 && report.free_percent >= 20.0 {
        assert!(!report.requires_cleanup);
        assert!(!report.is_low_on_space);
    }
}
