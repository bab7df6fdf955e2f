use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use notification_cell::models::WorkerConfig;
use notification_cell::services::{
    EmailDispatcher, NotificationRouter, NotificationWorkerService, PushDispatcher, RetryEngine,
    RetryPolicy, WhatsappDispatcher,
};
use notification_cell::store::{
    DeliveryLedger, InMemoryDeliveryLedger, InMemoryNotificationJobStore,
    InMemoryRecipientDirectory, NotificationJobStore, RecipientDirectory,
};
use notification_cell::NotificationState;
use scheduling_cell::services::SchedulingService;
use scheduling_cell::store::{AppointmentStore, InMemoryAppointmentStore};
use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Amae Clinic API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Storage ports; the in-memory implementations back local runs
    let appointments: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointmentStore::new());
    let jobs: Arc<dyn NotificationJobStore> = Arc::new(InMemoryNotificationJobStore::new());
    let ledger: Arc<dyn DeliveryLedger> = Arc::new(InMemoryDeliveryLedger::new());
    let directory: Arc<dyn RecipientDirectory> = Arc::new(InMemoryRecipientDirectory::new());

    // Notification pipeline: router consumes lifecycle events, workers drain
    // the job table through the channel dispatchers
    let notification_router = Arc::new(NotificationRouter::new(
        jobs.clone(),
        ledger.clone(),
        directory.clone(),
        appointments.clone(),
        &config,
    ));

    let scheduling = Arc::new(SchedulingService::new(
        appointments.clone(),
        notification_router.clone(),
        &config,
    ));

    let retry = Arc::new(RetryEngine::new(
        RetryPolicy::from_config(&config),
        ledger.clone(),
    ));
    let worker = Arc::new(NotificationWorkerService::new(
        WorkerConfig::from_config(&config),
        jobs.clone(),
        directory.clone(),
        appointments.clone(),
        vec![
            Arc::new(EmailDispatcher::new(config.clone())),
            Arc::new(WhatsappDispatcher::new(config.clone())),
            Arc::new(PushDispatcher::new(config.clone())),
        ],
        retry,
    ));

    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.start().await {
                tracing::error!("Notification worker stopped with error: {}", e);
            }
        })
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let notification_state = NotificationState::new(notification_router, jobs, ledger);

    // Build the application router
    let app = router::create_router(config.clone(), scheduling, notification_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .unwrap();

    worker.shutdown().await.ok();
    worker_handle.abort();
}
