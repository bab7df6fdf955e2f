// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::OrganizationContext;

use crate::error::SchedulingError;
use crate::models::{
    Appointment, CancelAppointmentRequest, CreateAppointmentRequest,
    RescheduleAppointmentRequest, UpdateStatusRequest,
};
use crate::services::SchedulingService;

#[axum::debug_handler]
pub async fn create_appointment_handler(
    State(service): State<Arc<SchedulingService>>,
    Extension(context): Extension<OrganizationContext>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), SchedulingError> {
    let appointment = service
        .create_appointment(context.organization_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

#[axum::debug_handler]
pub async fn get_appointment_handler(
    State(service): State<Arc<SchedulingService>>,
    Extension(context): Extension<OrganizationContext>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, SchedulingError> {
    let appointment = service
        .get_appointment(context.organization_id, appointment_id)
        .await?;
    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn reschedule_appointment_handler(
    State(service): State<Arc<SchedulingService>>,
    Extension(context): Extension<OrganizationContext>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Appointment>, SchedulingError> {
    let appointment = service
        .reschedule_appointment(context.organization_id, appointment_id, request)
        .await?;
    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn cancel_appointment_handler(
    State(service): State<Arc<SchedulingService>>,
    Extension(context): Extension<OrganizationContext>,
    Path(appointment_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Value>, SchedulingError> {
    // The cancellation body is optional; an empty body means "no reason given".
    let request: CancelAppointmentRequest = if body.is_empty() {
        CancelAppointmentRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| SchedulingError::InvalidBody(e.to_string()))?
    };
    let appointment = service
        .cancel_appointment(context.organization_id, appointment_id, request)
        .await?;
    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

#[axum::debug_handler]
pub async fn update_status_handler(
    State(service): State<Arc<SchedulingService>>,
    Extension(context): Extension<OrganizationContext>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Appointment>, SchedulingError> {
    let appointment = service
        .update_status(context.organization_id, appointment_id, request.status)
        .await?;
    Ok(Json(appointment))
}
