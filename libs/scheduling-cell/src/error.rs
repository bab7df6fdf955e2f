use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{AppointmentStatus, ConflictResponse, SchedulingDecision};

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Appointment not found")]
    NotFound,

    #[error("Hard conflict: therapist already has an overlapping appointment")]
    HardConflict { decision: SchedulingDecision },

    #[error("Soft conflict: slot capacity is exhausted")]
    SoftConflict { decision: SchedulingDecision },

    #[error("Appointment cannot be modified in current status: {0}")]
    NotModifiable(AppointmentStatus),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Concurrent booking activity, please retry")]
    StaleWrite,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SchedulingError {
    pub fn decision(&self) -> Option<&SchedulingDecision> {
        match self {
            SchedulingError::HardConflict { decision } => Some(decision),
            SchedulingError::SoftConflict { decision } => Some(decision),
            _ => None,
        }
    }
}

impl IntoResponse for SchedulingError {
    fn into_response(self) -> Response {
        match self {
            SchedulingError::HardConflict { decision }
            | SchedulingError::SoftConflict { decision } => {
                tracing::warn!(
                    "Scheduling conflict ({}) against {} appointment(s)",
                    decision.outcome,
                    decision.conflicting_appointment_ids.len()
                );
                let body: ConflictResponse = decision.into();
                (StatusCode::CONFLICT, Json(body)).into_response()
            }
            SchedulingError::StaleWrite => {
                tracing::warn!("Optimistic write retries exhausted");
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
            }
            SchedulingError::NotFound => {
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::NOT_FOUND, body).into_response()
            }
            SchedulingError::InvalidTimeRange(_)
            | SchedulingError::InvalidBody(_)
            | SchedulingError::NotModifiable(_)
            | SchedulingError::InvalidTransition { .. } => {
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            SchedulingError::Storage(_) => {
                tracing::error!("Storage failure: {}", self);
                let body = Json(json!({ "error": self.to_string() }));
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}
