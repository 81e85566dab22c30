use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use mailspool::cleanup::CleanupEngine;
use mailspool::composer::MimeComposer;
use mailspool::config::Config;
use mailspool::dispatcher::{reaper::Reaper, Dispatcher};
use mailspool::health::{alerts::Alerter, HealthReporter};
use mailspool::logging::ProcessingLogger;
use mailspool::queue::QueueManager;
use mailspool::scheduler::Scheduler;
use mailspool::smtp::SmtpMailer;
use mailspool::template::TemplateEngine;
use mailspool::{api, establish_connection, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    tracing::info!("Starting mailspool on port {}", config.port);

    // Migrations run inside establish_connection
    let db = Arc::new(establish_connection(&config.database_url).await?);

    let queue = QueueManager::new(db.clone(), &config.processing);
    let templates = Arc::new(TemplateEngine::new(db.clone()));
    let logger = ProcessingLogger::new(db.clone());
    let composer = MimeComposer::new(config.smtp.clone());
    let transport: Arc<dyn mailspool::smtp::MailTransport> =
        Arc::new(SmtpMailer::new(&config.smtp)?);
    let alerter = Arc::new(Alerter::new(
        queue.clone(),
        config.alerts.clone(),
        config.service_name.clone(),
    ));

    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        queue.clone(),
        composer,
        templates.clone(),
        transport.clone(),
        logger.clone(),
        config.processing.clone(),
        config.smtp.rate_limit_per_minute,
        config.smtp.burst_limit,
    );
    dispatcher.start().await?;

    let reaper = Reaper::new(
        queue.clone(),
        logger.clone(),
        Some(alerter.clone()),
        &config.processing,
        shutdown.clone(),
    );
    let reaper_handle = reaper.start();

    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        queue.clone(),
        60,
        shutdown.clone(),
    ));
    let scheduler_handle = scheduler.clone().start();

    let cleanup = Arc::new(CleanupEngine::new(db.clone(), config.cleanup.clone()));
    let cleanup_handle = cleanup.start(shutdown.clone());

    let health = Arc::new(HealthReporter::new(
        db.clone(),
        queue.clone(),
        transport,
        Some(alerter),
        config.service_name.clone(),
        &config.processing,
    ));
    let health_handle = health.clone().start(shutdown.clone());

    let port = config.port;
    let state = AppState {
        db,
        config: Arc::new(config),
        queue,
        templates,
        scheduler,
        health,
    };

    let app = api::create_router()
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(&format!("0.0.0.0:{port}")).await?;
    tracing::info!("mailspool API listening on http://0.0.0.0:{port}");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        tracing::info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("Shutting down background services...");
    shutdown.cancel();
    dispatcher.shutdown().await;

    for (name, handle) in [
        ("reaper", reaper_handle),
        ("scheduler", scheduler_handle),
        ("cleanup", cleanup_handle),
        ("health", health_handle),
    ] {
        if let Err(e) = handle.await {
            tracing::error!("{name} task ended abnormally: {e}");
        }
    }

    tracing::info!("Application shutdown complete");
    Ok(())
}
