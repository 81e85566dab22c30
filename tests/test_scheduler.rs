use mailspool::config::ProcessingSettings;
use mailspool::database::email_queue::Entity as EmailQueue;
use mailspool::database::establish_connection;
use mailspool::database::scheduled_emails::Entity as ScheduledEmails;
use mailspool::queue::QueueManager;
use mailspool::scheduler::{ScheduledEmailSpec, Scheduler};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const MICROS_PER_MINUTE: i64 = 60 * 1_000_000;

async fn setup() -> (Arc<DatabaseConnection>, Scheduler) {
    let db = Arc::new(
        establish_connection("sqlite::memory:")
            .await
            .expect("connect test database"),
    );
    let queue = QueueManager::new(db.clone(), &ProcessingSettings::default());
    let scheduler = Scheduler::new(db.clone(), queue, 60, CancellationToken::new());
    (db, scheduler)
}

fn spec(subject: &str) -> ScheduledEmailSpec {
    ScheduledEmailSpec {
        to_emails: "a@example.com".to_string(),
        subject: subject.to_string(),
        body: "scheduled body".to_string(),
        is_html: false,
        created_by: "tests".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_one_shot_materializes_and_deactivates() {
    let (db, scheduler) = setup().await;

    let now = chrono::Utc::now().timestamp_micros();
    let id = scheduler
        .schedule(spec("one shot"), now - 1_000_000)
        .await
        .expect("schedule");

    let processed = scheduler.process_due().await.expect("process due");
    assert_eq!(processed, 1);

    let schedule = ScheduledEmails::find_by_id(id)
        .one(db.as_ref())
        .await
        .expect("find schedule")
        .expect("schedule row");
    assert_eq!(schedule.execution_count, 1);
    assert!(!schedule.is_active);
    assert_eq!(schedule.last_execution_status.as_deref(), Some("success"));

    // A queue item with the same payload exists and is claimable
    let queued = EmailQueue::find().all(db.as_ref()).await.expect("queue rows");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].subject, "one shot");
    assert_eq!(queued[0].body, "scheduled body");
    assert_eq!(queued[0].status, "queued");
    assert_eq!(
        queued[0].request_source.as_deref(),
        Some(format!("scheduler:{id}").as_str())
    );

    // Nothing due remains
    assert_eq!(scheduler.process_due().await.expect("second pass"), 0);
}

#[tokio::test]
async fn test_future_schedules_are_not_touched() {
    let (db, scheduler) = setup().await;

    let now = chrono::Utc::now().timestamp_micros();
    let id = scheduler
        .schedule(spec("future"), now + 60 * MICROS_PER_MINUTE)
        .await
        .expect("schedule");

    assert_eq!(scheduler.process_due().await.expect("process due"), 0);

    let schedule = ScheduledEmails::find_by_id(id)
        .one(db.as_ref())
        .await
        .expect("find schedule")
        .expect("schedule row");
    assert_eq!(schedule.execution_count, 0);
    assert!(schedule.is_active);
}

#[tokio::test]
async fn test_recurring_advances_by_interval() {
    let (db, scheduler) = setup().await;

    let now = chrono::Utc::now().timestamp_micros();
    let mut recurring = spec("recurring");
    recurring.is_recurring = true;
    recurring.interval_minutes = Some(30);
    let id = scheduler
        .schedule(recurring, now - 1_000_000)
        .await
        .expect("schedule");

    scheduler.process_due().await.expect("process due");

    let schedule = ScheduledEmails::find_by_id(id)
        .one(db.as_ref())
        .await
        .expect("find schedule")
        .expect("schedule row");
    assert!(schedule.is_active);
    assert_eq!(schedule.execution_count, 1);

    let advanced_by = schedule.next_run_time - now;
    assert!(advanced_by >= 29 * MICROS_PER_MINUTE && advanced_by <= 31 * MICROS_PER_MINUTE);
}

#[tokio::test]
async fn test_recurring_without_interval_advances_one_day() {
    let (db, scheduler) = setup().await;

    let now = chrono::Utc::now().timestamp_micros();
    let mut recurring = spec("daily");
    recurring.is_recurring = true;
    let id = scheduler
        .schedule(recurring, now - 1_000_000)
        .await
        .expect("schedule");

    scheduler.process_due().await.expect("process due");

    let schedule = ScheduledEmails::find_by_id(id)
        .one(db.as_ref())
        .await
        .expect("find schedule")
        .expect("schedule row");
    let advanced_by = schedule.next_run_time - now;
    let day = 24 * 60 * MICROS_PER_MINUTE;
    assert!(advanced_by > day - MICROS_PER_MINUTE && advanced_by < day + MICROS_PER_MINUTE);
}

#[tokio::test]
async fn test_max_executions_deactivates() {
    let (db, scheduler) = setup().await;

    let now = chrono::Utc::now().timestamp_micros();
    let mut recurring = spec("capped");
    recurring.is_recurring = true;
    recurring.interval_minutes = Some(1);
    recurring.max_executions = Some(1);
    let id = scheduler
        .schedule(recurring, now - 1_000_000)
        .await
        .expect("schedule");

    scheduler.process_due().await.expect("process due");

    let schedule = ScheduledEmails::find_by_id(id)
        .one(db.as_ref())
        .await
        .expect("find schedule")
        .expect("schedule row");
    assert!(!schedule.is_active);
    assert_eq!(schedule.execution_count, 1);
}

#[tokio::test]
async fn test_cancel_rules() {
    let (_db, scheduler) = setup().await;

    let now = chrono::Utc::now().timestamp_micros();
    let pending = scheduler
        .schedule(spec("pending"), now + 60 * MICROS_PER_MINUTE)
        .await
        .expect("schedule");
    assert!(scheduler.cancel(pending).await.expect("cancel pending"));

    // A one-shot that already executed cannot be cancelled
    let executed = scheduler
        .schedule(spec("executed"), now - 1_000_000)
        .await
        .expect("schedule");
    scheduler.process_due().await.expect("process due");
    assert!(!scheduler.cancel(executed).await.expect("cancel executed"));

    assert!(!scheduler.cancel(99_999).await.expect("cancel unknown"));
}

#[tokio::test]
async fn test_reschedule_and_list_in_range() {
    let (_db, scheduler) = setup().await;

    let now = chrono::Utc::now().timestamp_micros();
    let id = scheduler
        .schedule(spec("movable"), now + 10 * MICROS_PER_MINUTE)
        .await
        .expect("schedule");

    let new_time = now + 120 * MICROS_PER_MINUTE;
    assert!(scheduler
        .reschedule(id, new_time)
        .await
        .expect("reschedule"));

    let in_old_window = scheduler
        .list_in_range(now, now + 60 * MICROS_PER_MINUTE)
        .await
        .expect("list");
    assert!(in_old_window.is_empty());

    let in_new_window = scheduler
        .list_in_range(now + 60 * MICROS_PER_MINUTE, now + 180 * MICROS_PER_MINUTE)
        .await
        .expect("list");
    assert_eq!(in_new_window.len(), 1);
    assert_eq!(in_new_window[0].id, id);
}
