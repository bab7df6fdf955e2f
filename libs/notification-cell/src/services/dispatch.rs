// libs/notification-cell/src/services/dispatch.rs
use async_trait::async_trait;

use crate::models::{Channel, DispatchOutcome, NotificationJob, RenderedMessage};

/// One delivery channel behind a uniform send surface. Implementations report
/// the outcome of a single attempt; retries live in the retry engine, never
/// in the dispatcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, job: &NotificationJob, message: &RenderedMessage) -> DispatchOutcome;
}

/// Classify a non-success HTTP status. Server errors and rate limiting are
/// worth retrying; everything else is a permanent rejection.
pub fn failure_for_status(status: u16, detail: String) -> DispatchOutcome {
    if status >= 500 || status == 429 {
        DispatchOutcome::TransientFailure {
            detail,
            http_status: Some(status),
        }
    } else {
        DispatchOutcome::PermanentFailure {
            detail,
            http_status: Some(status),
        }
    }
}

/// Classify a reqwest error. Connect failures, resets and timeouts carry no
/// meaningful status and are all retryable.
pub fn failure_for_error(error: &reqwest::Error) -> DispatchOutcome {
    DispatchOutcome::TransientFailure {
        detail: error.to_string(),
        http_status: error.status().map(|s| s.as_u16()),
    }
}
