// libs/notification-cell/src/services/routing.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use scheduling_cell::models::{
    Appointment, AppointmentEvent, AppointmentEventKind, AppointmentStatus,
};
use scheduling_cell::services::EventSink;
use scheduling_cell::store::AppointmentStore;
use shared_config::AppConfig;

use crate::error::NotificationError;
use crate::models::{
    Channel, JobStatus, NotificationJob, RecipientContact, SweepReport, TemplateKind,
};
use crate::services::whatsapp::format_phone;
use crate::store::{DeliveryLedger, NotificationJobStore, RecipientDirectory};

/// Template kinds that a reschedule or cancellation makes obsolete while
/// still pending.
const SUPERSEDABLE_KINDS: [TemplateKind; 4] = [
    TemplateKind::Confirmation,
    TemplateKind::Reminder24h,
    TemplateKind::Reminder2h,
    TemplateKind::Reschedule,
];

#[derive(Debug, Default)]
struct EnqueueSummary {
    enqueued: u32,
    deduplicated: u32,
    skipped: u32,
}

/// Turns appointment lifecycle events and reminder sweeps into notification
/// jobs. Channel selection intersects the organization's enabled channels
/// with the patient's preferences; duplicates are suppressed per
/// (appointment, template, channel).
pub struct NotificationRouter {
    jobs: Arc<dyn NotificationJobStore>,
    ledger: Arc<dyn DeliveryLedger>,
    directory: Arc<dyn RecipientDirectory>,
    appointments: Arc<dyn AppointmentStore>,
    sweep_tolerance: Duration,
}

impl NotificationRouter {
    pub fn new(
        jobs: Arc<dyn NotificationJobStore>,
        ledger: Arc<dyn DeliveryLedger>,
        directory: Arc<dyn RecipientDirectory>,
        appointments: Arc<dyn AppointmentStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            jobs,
            ledger,
            directory,
            appointments,
            sweep_tolerance: Duration::minutes(config.reminder_sweep_tolerance_minutes),
        }
    }

    /// React to one appointment lifecycle event.
    #[instrument(skip(self, event), fields(appointment_id = %event.appointment_id, kind = ?event.kind))]
    pub async fn handle_event(&self, event: &AppointmentEvent) -> Result<(), NotificationError> {
        let appointment = match self
            .appointments
            .get(event.organization_id, event.appointment_id)
            .await
            .map_err(|e| NotificationError::Storage(e.to_string()))?
        {
            Some(appointment) => appointment,
            None => {
                warn!("Event references unknown appointment, ignoring");
                return Ok(());
            }
        };

        match event.kind {
            AppointmentEventKind::Created | AppointmentEventKind::Confirmed => {
                self.enqueue_for_appointment(
                    &appointment,
                    TemplateKind::Confirmation,
                    Utc::now(),
                    true,
                )
                .await?;
            }
            AppointmentEventKind::Rescheduled => {
                let skipped = self
                    .jobs
                    .skip_pending(
                        event.appointment_id,
                        &SUPERSEDABLE_KINDS,
                        "appointment rescheduled",
                    )
                    .await?;
                if skipped > 0 {
                    info!("Skipped {} pending jobs made obsolete by reschedule", skipped);
                }
                // A second reschedule must notify again, so this kind is
                // never deduplicated.
                self.enqueue_for_appointment(
                    &appointment,
                    TemplateKind::Reschedule,
                    Utc::now(),
                    false,
                )
                .await?;
            }
            AppointmentEventKind::Cancelled => {
                let skipped = self
                    .jobs
                    .skip_pending(
                        event.appointment_id,
                        &SUPERSEDABLE_KINDS,
                        "appointment cancelled",
                    )
                    .await?;
                if skipped > 0 {
                    info!(
                        "Skipped {} pending jobs made obsolete by cancellation",
                        skipped
                    );
                }
                self.enqueue_for_appointment(
                    &appointment,
                    TemplateKind::Cancellation,
                    Utc::now(),
                    true,
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Enqueue reminder jobs for appointments starting one lead time from
    /// `now`, give or take the sweep tolerance. Safe to run repeatedly; the
    /// dedupe check keeps overlapping windows from double-booking reminders.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn run_reminder_sweep(
        &self,
        kind: TemplateKind,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, NotificationError> {
        let lead = match kind {
            TemplateKind::Reminder24h => Duration::hours(24),
            TemplateKind::Reminder2h => Duration::hours(2),
            other => return Err(NotificationError::NotASweepKind(other.to_string())),
        };

        let from = now + lead - self.sweep_tolerance;
        let to = now + lead + self.sweep_tolerance;

        let candidates = self
            .appointments
            .starting_between(from, to)
            .await
            .map_err(|e| NotificationError::Storage(e.to_string()))?;

        let mut report = SweepReport::default();
        for appointment in candidates {
            if !matches!(
                appointment.status,
                AppointmentStatus::Scheduled | AppointmentStatus::Confirmed
            ) {
                continue;
            }

            report.considered += 1;
            let summary = self
                .enqueue_for_appointment(&appointment, kind, now, true)
                .await?;
            report.enqueued += summary.enqueued;
            report.deduplicated += summary.deduplicated;
            report.skipped += summary.skipped;
        }

        info!(
            "Reminder sweep done: {} considered, {} enqueued, {} deduplicated, {} skipped",
            report.considered, report.enqueued, report.deduplicated, report.skipped
        );
        Ok(report)
    }

    async fn enqueue_for_appointment(
        &self,
        appointment: &Appointment,
        kind: TemplateKind,
        scheduled_for: DateTime<Utc>,
        dedupe: bool,
    ) -> Result<EnqueueSummary, NotificationError> {
        let mut summary = EnqueueSummary::default();

        let contact = match self
            .directory
            .contact(appointment.organization_id, appointment.patient_id)
            .await?
        {
            Some(contact) => contact,
            None => {
                warn!(
                    patient_id = %appointment.patient_id,
                    "No contact on file for patient, nothing to enqueue"
                );
                return Ok(summary);
            }
        };

        if contact.opted_out {
            debug!(
                patient_id = %appointment.patient_id,
                "Patient opted out of notifications"
            );
            return Ok(summary);
        }

        let org_channels = self
            .directory
            .organization_channels(appointment.organization_id)
            .await?;

        for channel in Channel::ALL {
            if !org_channels.contains(&channel) || !contact.preferred_channels.contains(&channel) {
                continue;
            }

            if dedupe && self.already_handled(appointment.id, kind, channel).await? {
                debug!(
                    channel = %channel,
                    "Duplicate suppressed for {} on {}",
                    kind, channel
                );
                summary.deduplicated += 1;
                continue;
            }

            let job = NotificationJob::new(
                appointment.id,
                appointment.organization_id,
                appointment.patient_id,
                channel,
                kind,
                scheduled_for,
            );

            if let Some(reason) = address_problem(&contact, channel) {
                info!(
                    channel = %channel,
                    "Recording skipped job for {}: {}",
                    kind, reason
                );
                self.jobs.enqueue(job.skipped(reason)).await?;
                summary.skipped += 1;
                continue;
            }

            let job = self.jobs.enqueue(job).await?;
            debug!(job_id = %job.id, channel = %channel, "Enqueued {} job", kind);
            summary.enqueued += 1;
        }

        Ok(summary)
    }

    /// A (appointment, template, channel) triple is already handled when a
    /// live or delivered job exists for it, or the ledger shows a past
    /// delivery. Failed and skipped jobs do not block a fresh enqueue.
    async fn already_handled(
        &self,
        appointment_id: Uuid,
        kind: TemplateKind,
        channel: Channel,
    ) -> Result<bool, NotificationError> {
        let existing = self.jobs.find(appointment_id, kind, channel).await?;
        if existing
            .iter()
            .any(|job| matches!(job.status, JobStatus::Pending | JobStatus::Sent))
        {
            return Ok(true);
        }

        self.ledger.has_delivery(appointment_id, kind, channel).await
    }
}

/// Why a channel cannot reach this contact, if it cannot.
fn address_problem(contact: &RecipientContact, channel: Channel) -> Option<String> {
    match channel {
        Channel::Email => contact
            .email
            .is_none()
            .then(|| "no email address on file".to_string()),
        Channel::Whatsapp => match contact.phone.as_deref() {
            None => Some("no phone number on file".to_string()),
            Some(phone) if format_phone(phone).is_none() => Some(format!(
                "phone number {} is not a valid WhatsApp destination",
                phone
            )),
            Some(_) => None,
        },
        Channel::Push => contact
            .push_tokens
            .is_empty()
            .then(|| "no registered devices".to_string()),
    }
}

#[async_trait]
impl EventSink for NotificationRouter {
    async fn publish(&self, event: AppointmentEvent) -> anyhow::Result<()> {
        self.handle_event(&event).await?;
        Ok(())
    }
}
