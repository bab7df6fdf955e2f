// libs/notification-cell/src/handlers.rs
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::error::NotificationError;
use crate::models::TemplateKind;
use crate::services::NotificationRouter;
use crate::store::{DeliveryLedger, NotificationJobStore};

#[derive(Clone)]
pub struct NotificationState {
    pub router: Arc<NotificationRouter>,
    pub jobs: Arc<dyn NotificationJobStore>,
    pub ledger: Arc<dyn DeliveryLedger>,
}

impl NotificationState {
    pub fn new(
        router: Arc<NotificationRouter>,
        jobs: Arc<dyn NotificationJobStore>,
        ledger: Arc<dyn DeliveryLedger>,
    ) -> Self {
        Self {
            router,
            jobs,
            ledger,
        }
    }
}

/// Run both reminder sweeps against the current clock. Wired to the
/// scheduler cron; also handy to trigger manually.
#[axum::debug_handler]
pub async fn run_reminder_sweeps(
    State(state): State<NotificationState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let now = Utc::now();
    let reminder_24h = state
        .router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await?;
    let reminder_2h = state
        .router
        .run_reminder_sweep(TemplateKind::Reminder2h, now)
        .await?;

    Ok(Json(json!({
        "reminder_24h": reminder_24h,
        "reminder_2h": reminder_2h,
    })))
}

/// One job plus its full attempt history from the delivery ledger.
#[axum::debug_handler]
pub async fn get_job(
    State(state): State<NotificationState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state
        .jobs
        .get(job_id)
        .await?
        .ok_or(NotificationError::JobNotFound)?;
    let attempts = state.ledger.entries_for_job(job_id).await?;

    Ok(Json(json!({
        "job": job,
        "attempts": attempts,
    })))
}

/// Every notification touching one appointment: jobs in all states plus the
/// ledger entries behind them.
#[axum::debug_handler]
pub async fn get_appointment_notifications(
    State(state): State<NotificationState>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let jobs = state.jobs.jobs_for_appointment(appointment_id).await?;
    let attempts = state.ledger.entries_for_appointment(appointment_id).await?;

    Ok(Json(json!({
        "jobs": jobs,
        "attempts": attempts,
    })))
}

#[axum::debug_handler]
pub async fn get_queue_stats(
    State(state): State<NotificationState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let stats = state.jobs.stats().await?;
    Ok(Json(json!({ "queue": stats })))
}
