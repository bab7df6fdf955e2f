// libs/notification-cell/src/services/retry.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::NotificationError;
use crate::models::{DeliveryLedgerEntry, DispatchOutcome, JobStatus, NotificationJob, RenderedMessage};
use crate::services::dispatch::ChannelDispatcher;
use crate::store::{DeliveryLedger, NotificationJobStore};

/// Backoff parameters for one delivery job. `max_retries` counts retries
/// after the first attempt, so a job is tried at most `max_retries + 1`
/// times in total.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.notification_max_retries,
            base_delay: Duration::from_millis(config.notification_base_delay_ms),
            attempt_timeout: Duration::from_secs(config.dispatch_timeout_seconds),
            jitter: config.retry_jitter,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay scheduled after failed attempt `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Injectable sleep, so tests can observe and short-circuit backoff waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How a delivery run ended after all attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryVerdict {
    Delivered {
        attempts: u32,
        external_message_id: Option<String>,
    },
    Failed {
        attempts: u32,
        detail: String,
    },
    /// The job was skipped (reschedule or cancellation) while we were
    /// backing off; nothing more to do.
    Superseded,
}

/// Drives a dispatcher through timed attempts with exponential backoff,
/// writing one ledger entry per attempt. Transient failures are retried up
/// to the policy bound; permanent failures stop immediately.
pub struct RetryEngine {
    policy: RetryPolicy,
    ledger: Arc<dyn DeliveryLedger>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy, ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self {
            policy,
            ledger,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(
        policy: RetryPolicy,
        ledger: Arc<dyn DeliveryLedger>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            policy,
            ledger,
            sleeper,
        }
    }

    pub async fn execute(
        &self,
        jobs: &dyn NotificationJobStore,
        dispatcher: &dyn ChannelDispatcher,
        job: &NotificationJob,
        message: &RenderedMessage,
    ) -> Result<RetryVerdict, NotificationError> {
        let total = self.policy.total_attempts();
        let mut attempt = 1u32;

        loop {
            // A reschedule or cancellation may have skipped the job while we
            // were backing off.
            if attempt > 1 {
                if let Some(current) = jobs.get(job.id).await? {
                    if current.status == JobStatus::Skipped {
                        debug!(job_id = %job.id, "Job was skipped mid-retry, stopping");
                        return Ok(RetryVerdict::Superseded);
                    }
                }
            }

            let outcome = match timeout(self.policy.attempt_timeout, dispatcher.send(job, message))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => DispatchOutcome::TransientFailure {
                    detail: format!(
                        "attempt timed out after {}s",
                        self.policy.attempt_timeout.as_secs_f64()
                    ),
                    http_status: None,
                },
            };

            self.ledger
                .append(DeliveryLedgerEntry {
                    id: Uuid::new_v4(),
                    job_id: job.id,
                    appointment_id: job.appointment_id,
                    template_kind: job.template_kind,
                    channel: job.channel,
                    attempt_number: attempt,
                    timestamp: Utc::now(),
                    outcome: outcome.attempt_outcome(),
                    external_message_id: outcome.external_message_id().map(str::to_string),
                    http_status: outcome.http_status(),
                    detail: outcome.detail().map(str::to_string),
                })
                .await?;

            match outcome {
                DispatchOutcome::Delivered {
                    external_message_id,
                    ..
                } => {
                    info!(
                        job_id = %job.id,
                        "Delivered on attempt {}/{} via {}",
                        attempt, total, job.channel
                    );
                    return Ok(RetryVerdict::Delivered {
                        attempts: attempt,
                        external_message_id,
                    });
                }
                DispatchOutcome::PermanentFailure { detail, .. } => {
                    warn!(
                        job_id = %job.id,
                        "Permanent failure on attempt {}: {}",
                        attempt, detail
                    );
                    return Ok(RetryVerdict::Failed {
                        attempts: attempt,
                        detail,
                    });
                }
                DispatchOutcome::TransientFailure { detail, .. } => {
                    if attempt >= total {
                        warn!(
                            job_id = %job.id,
                            "Giving up after {} attempts: {}",
                            attempt, detail
                        );
                        return Ok(RetryVerdict::Failed {
                            attempts: attempt,
                            detail,
                        });
                    }

                    let delay = self.delay_with_jitter(attempt);
                    debug!(
                        job_id = %job.id,
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, total, detail, delay
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.policy.delay_for_attempt(attempt);
        if self.policy.jitter {
            delay.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            delay
        }
    }
}
