// libs/notification-cell/src/router.rs
use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    get_appointment_notifications, get_job, get_queue_stats, run_reminder_sweeps,
    NotificationState,
};

/// Notification routes. These are operational surfaces (cron triggers and
/// inspection), not patient-facing, so no organization header is required.
pub fn notification_routes(state: NotificationState) -> Router {
    Router::new()
        .route("/sweep", post(run_reminder_sweeps))
        .route("/jobs/{job_id}", get(get_job))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment_notifications),
        )
        .route("/stats", get(get_queue_stats))
        .with_state(state)
}
