// libs/notification-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// CHANNELS AND TEMPLATES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Whatsapp,
    Push,
}

impl Channel {
    /// Canonical dispatch order; routing iterates channels in this order.
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Whatsapp, Channel::Push];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Whatsapp => write!(f, "whatsapp"),
            Channel::Push => write!(f, "push"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    #[serde(rename = "confirmation")]
    Confirmation,
    #[serde(rename = "reminder_24h")]
    Reminder24h,
    #[serde(rename = "reminder_2h")]
    Reminder2h,
    #[serde(rename = "cancellation")]
    Cancellation,
    #[serde(rename = "reschedule")]
    Reschedule,
}

impl TemplateKind {
    pub fn is_reminder(&self) -> bool {
        matches!(self, TemplateKind::Reminder24h | TemplateKind::Reminder2h)
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Confirmation => write!(f, "confirmation"),
            TemplateKind::Reminder24h => write!(f, "reminder_24h"),
            TemplateKind::Reminder2h => write!(f, "reminder_2h"),
            TemplateKind::Cancellation => write!(f, "cancellation"),
            TemplateKind::Reschedule => write!(f, "reschedule"),
        }
    }
}

// ==============================================================================
// NOTIFICATION JOBS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed | JobStatus::Skipped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Sent => write!(f, "sent"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One pending or settled delivery: a template for one appointment to one
/// recipient over one channel. Jobs are the dedupe anchor; at most one live
/// job exists per (appointment, template, channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub organization_id: Uuid,
    pub patient_id: Uuid,
    pub channel: Channel,
    pub template_kind: TemplateKind,
    pub scheduled_for: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationJob {
    pub fn new(
        appointment_id: Uuid,
        organization_id: Uuid,
        patient_id: Uuid,
        channel: Channel,
        template_kind: TemplateKind,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            appointment_id,
            organization_id,
            patient_id,
            channel,
            template_kind,
            scheduled_for,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            skip_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A job recorded as skipped at creation time, e.g. when the recipient
    /// has no address for the channel.
    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = JobStatus::Skipped;
        self.skip_reason = Some(reason.into());
        self
    }
}

// ==============================================================================
// DELIVERY LEDGER
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Delivered,
    TransientFailure,
    PermanentFailure,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Delivered => write!(f, "delivered"),
            AttemptOutcome::TransientFailure => write!(f, "transient_failure"),
            AttemptOutcome::PermanentFailure => write!(f, "permanent_failure"),
        }
    }
}

/// Append-only record of one dispatch attempt. Every attempt writes exactly
/// one entry, including timeouts and permanent rejections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLedgerEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub appointment_id: Uuid,
    pub template_kind: TemplateKind,
    pub channel: Channel,
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub external_message_id: Option<String>,
    pub http_status: Option<u16>,
    pub detail: Option<String>,
}

// ==============================================================================
// DISPATCH RESULTS
// ==============================================================================

/// What a channel dispatcher reports for one attempt. Transient failures are
/// retried with backoff; permanent failures short-circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered {
        external_message_id: Option<String>,
        http_status: Option<u16>,
    },
    TransientFailure {
        detail: String,
        http_status: Option<u16>,
    },
    PermanentFailure {
        detail: String,
        http_status: Option<u16>,
    },
}

impl DispatchOutcome {
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            DispatchOutcome::Delivered { .. } => AttemptOutcome::Delivered,
            DispatchOutcome::TransientFailure { .. } => AttemptOutcome::TransientFailure,
            DispatchOutcome::PermanentFailure { .. } => AttemptOutcome::PermanentFailure,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            DispatchOutcome::Delivered { http_status, .. }
            | DispatchOutcome::TransientFailure { http_status, .. }
            | DispatchOutcome::PermanentFailure { http_status, .. } => *http_status,
        }
    }

    pub fn external_message_id(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Delivered {
                external_message_id,
                ..
            } => external_message_id.as_deref(),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Delivered { .. } => None,
            DispatchOutcome::TransientFailure { detail, .. }
            | DispatchOutcome::PermanentFailure { detail, .. } => Some(detail),
        }
    }
}

// ==============================================================================
// RECIPIENTS AND RENDERED MESSAGES
// ==============================================================================

/// Contact data and channel preferences for one patient, as served by the
/// recipient directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientContact {
    pub patient_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub push_tokens: Vec<String>,
    pub preferred_channels: Vec<Channel>,
    pub opted_out: bool,
}

impl RecipientContact {
    pub fn new(patient_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            patient_id,
            name: name.into(),
            email: None,
            phone: None,
            push_tokens: Vec::new(),
            preferred_channels: Channel::ALL.to_vec(),
            opted_out: false,
        }
    }
}

/// Channel-agnostic rendering of a template for one recipient. Positional
/// `template_params` feed the WhatsApp template API; `subject` and `body`
/// feed email and push.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
    pub template_params: Vec<String>,
    pub recipient: RecipientContact,
}

// ==============================================================================
// SWEEPS AND WORKERS
// ==============================================================================

/// Outcome counters for one reminder sweep pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub considered: u32,
    pub enqueued: u32,
    pub deduplicated: u32,
    pub skipped: u32,
}

/// Live job counts, logged by the worker health loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub worker_count: u32,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub health_check_interval_seconds: u64,
    pub graceful_shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("notification-worker-{}", Uuid::new_v4()),
            worker_count: 4,
            poll_interval_ms: 1000,
            batch_size: 10,
            health_check_interval_seconds: 30,
            graceful_shutdown_timeout_seconds: 5,
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &shared_config::AppConfig) -> Self {
        Self {
            worker_count: config.notification_worker_count.max(1),
            poll_interval_ms: config.worker_poll_interval_ms,
            ..Self::default()
        }
    }
}
