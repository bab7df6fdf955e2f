// libs/notification-cell/src/error.rs
use thiserror::Error;

use shared_models::AppError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Notification job not found")]
    JobNotFound,

    #[error("No dispatcher registered for channel {0}")]
    UnknownChannel(String),

    #[error("Template kind {0} has no sweep window")]
    NotASweepKind(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<NotificationError> for AppError {
    fn from(error: NotificationError) -> Self {
        match error {
            NotificationError::JobNotFound => AppError::NotFound(error.to_string()),
            NotificationError::NotASweepKind(_) => AppError::BadRequest(error.to_string()),
            NotificationError::Storage(message) => AppError::Storage(message),
            NotificationError::Http(_) => AppError::ExternalService(error.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
