use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;

use notification_cell::router::notification_routes;
use notification_cell::NotificationState;
use scheduling_cell::router::appointment_routes;
use scheduling_cell::services::SchedulingService;
use shared_config::AppConfig;

pub fn create_router(
    config: Arc<AppConfig>,
    scheduling: Arc<SchedulingService>,
    notifications: NotificationState,
) -> Router {
    let health_jobs = notifications.jobs.clone();

    Router::new()
        .route("/", get(|| async { "Amae Clinic API is running!" }))
        .route(
            "/healthz",
            get(move || {
                let config = config.clone();
                let jobs = health_jobs.clone();
                async move {
                    let (status, queue) = match jobs.stats().await {
                        Ok(queue) => ("ok", json!(queue)),
                        Err(e) => ("degraded", json!({ "error": e.to_string() })),
                    };
                    Json(json!({
                        "status": status,
                        "channels": {
                            "email": config.is_email_configured(),
                            "whatsapp": config.is_whatsapp_configured(),
                            "push": config.is_push_configured(),
                        },
                        "queue": queue,
                    }))
                }
            }),
        )
        .nest("/appointments", appointment_routes(scheduling))
        .nest("/notifications", notification_routes(notifications))
}
