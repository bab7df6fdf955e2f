// libs/scheduling-cell/src/services/booking.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::SchedulingError;
use crate::models::{
    Appointment, AppointmentEvent, AppointmentEventKind, AppointmentStatus,
    CancelAppointmentRequest, CreateAppointmentRequest, DecisionOutcome,
    RescheduleAppointmentRequest, SchedulingDecision, TimeRange,
};
use crate::services::{capacity, conflict};
use crate::store::{AppointmentStore, WindowSnapshot, WriteOutcome};

/// Downstream consumer of appointment lifecycle events. The notification
/// router implements this; a publish failure never rolls back the booking.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: AppointmentEvent) -> anyhow::Result<()>;
}

pub struct SchedulingService {
    store: Arc<dyn AppointmentStore>,
    events: Arc<dyn EventSink>,
    default_max_concurrent: u32,
    max_write_retries: u32,
}

impl SchedulingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        events: Arc<dyn EventSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            events,
            default_max_concurrent: config.default_max_concurrent,
            max_write_retries: config.scheduling_max_write_retries,
        }
    }

    /// Create an appointment after conflict and capacity evaluation.
    ///
    /// The read-evaluate-write cycle runs under a window token; a stale token
    /// means another booking landed in the same window first, so the cycle is
    /// retried against fresh state. Replays of an already-applied `request_id`
    /// return the original appointment without re-evaluating.
    #[instrument(skip(self, request), fields(organization_id = %organization_id))]
    pub async fn create_appointment(
        &self,
        organization_id: Uuid,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        request.time_range.validate()?;

        if let Some(existing) = self
            .store
            .find_by_request_id(organization_id, request.request_id)
            .await?
        {
            info!(
                "Replaying create request {} as appointment {}",
                request.request_id, existing.id
            );
            return Ok(existing);
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            organization_id,
            patient_id: request.patient_id,
            therapist_id: request.therapist_id,
            time_range: request.time_range,
            status: AppointmentStatus::Scheduled,
            capacity_override_applied: false,
            created_at: now,
            updated_at: now,
        };

        for attempt in 1..=self.max_write_retries {
            let snapshot = self
                .load_surrounding_window(organization_id, &request.time_range)
                .await?;
            let decision = self.decide(&appointment, &snapshot.appointments).await?;
            let override_applied =
                self.gate_decision(&decision, request.override_capacity)?;

            let mut candidate = appointment.clone();
            candidate.capacity_override_applied = override_applied;

            match self
                .store
                .insert(candidate, &snapshot.token, request.request_id)
                .await
            {
                // A replay here means another call with the same request id
                // won the race after our pre-check; it already published the
                // event, so the loser only hands back the committed row.
                Ok(WriteOutcome::Replayed(existing)) => {
                    info!(
                        "Create request {} already applied as appointment {}",
                        request.request_id, existing.id
                    );
                    return Ok(existing);
                }
                Ok(WriteOutcome::Applied(created)) => {
                    info!(
                        "Created appointment {} ({} - {})",
                        created.id, created.time_range.start, created.time_range.end
                    );
                    self.emit(AppointmentEvent {
                        kind: AppointmentEventKind::Created,
                        appointment_id: created.id,
                        organization_id,
                        previous_time_range: None,
                        new_time_range: created.time_range,
                    })
                    .await;
                    return Ok(created);
                }
                Err(SchedulingError::StaleWrite) if attempt < self.max_write_retries => {
                    warn!(
                        "Stale window on create attempt {}/{}, retrying",
                        attempt, self.max_write_retries
                    );
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(SchedulingError::StaleWrite)
    }

    /// Move an appointment to a new slot. The new slot is evaluated exactly
    /// like a create, with the appointment itself excluded from the counts.
    #[instrument(skip(self, request), fields(organization_id = %organization_id))]
    pub async fn reschedule_appointment(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        request.time_range.validate()?;

        let current = self
            .store
            .get(organization_id, appointment_id)
            .await?
            .ok_or(SchedulingError::NotFound)?;
        if current.status.is_terminal() {
            return Err(SchedulingError::NotModifiable(current.status));
        }

        if let Some(existing) = self
            .store
            .find_by_request_id(organization_id, request.request_id)
            .await?
        {
            info!(
                "Replaying reschedule request {} for appointment {}",
                request.request_id, existing.id
            );
            return Ok(existing);
        }

        let previous_range = current.time_range;
        let mut proposed = current;
        proposed.time_range = request.time_range;

        for attempt in 1..=self.max_write_retries {
            let snapshot = self
                .load_surrounding_window(organization_id, &request.time_range)
                .await?;
            let decision = self.decide(&proposed, &snapshot.appointments).await?;
            let override_applied =
                self.gate_decision(&decision, request.override_capacity)?;

            match self
                .store
                .update_time_range(
                    organization_id,
                    appointment_id,
                    request.time_range,
                    override_applied,
                    &snapshot.token,
                    request.request_id,
                )
                .await
            {
                Ok(WriteOutcome::Replayed(existing)) => {
                    info!(
                        "Reschedule request {} already applied to appointment {}",
                        request.request_id, existing.id
                    );
                    return Ok(existing);
                }
                Ok(WriteOutcome::Applied(updated)) => {
                    info!(
                        "Rescheduled appointment {} to {} - {}",
                        updated.id, updated.time_range.start, updated.time_range.end
                    );
                    self.emit(AppointmentEvent {
                        kind: AppointmentEventKind::Rescheduled,
                        appointment_id: updated.id,
                        organization_id,
                        previous_time_range: Some(previous_range),
                        new_time_range: updated.time_range,
                    })
                    .await;
                    return Ok(updated);
                }
                Err(SchedulingError::StaleWrite) if attempt < self.max_write_retries => {
                    warn!(
                        "Stale window on reschedule attempt {}/{}, retrying",
                        attempt, self.max_write_retries
                    );
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(SchedulingError::StaleWrite)
    }

    /// Cancel an appointment, releasing its capacity. Cancelling an already
    /// cancelled appointment is a no-op that returns the current state.
    pub async fn cancel_appointment(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        let current = self
            .store
            .get(organization_id, appointment_id)
            .await?
            .ok_or(SchedulingError::NotFound)?;

        match current.status {
            AppointmentStatus::Cancelled => {
                info!("Appointment {} is already cancelled", appointment_id);
                return Ok(current);
            }
            AppointmentStatus::Completed | AppointmentStatus::NoShow => {
                return Err(SchedulingError::NotModifiable(current.status));
            }
            _ => {}
        }

        let cancelled = self
            .store
            .update_status(organization_id, appointment_id, AppointmentStatus::Cancelled)
            .await?;

        match request.reason {
            Some(reason) => info!("Cancelled appointment {}: {}", appointment_id, reason),
            None => info!("Cancelled appointment {}", appointment_id),
        }

        self.emit(AppointmentEvent {
            kind: AppointmentEventKind::Cancelled,
            appointment_id,
            organization_id,
            previous_time_range: None,
            new_time_range: cancelled.time_range,
        })
        .await;

        Ok(cancelled)
    }

    /// Lifecycle transition (confirm, complete, mark no-show, cancel).
    pub async fn update_status(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let updated = self
            .store
            .update_status(organization_id, appointment_id, new_status)
            .await?;
        info!("Appointment {} is now {}", appointment_id, new_status);

        let event_kind = match new_status {
            AppointmentStatus::Confirmed => Some(AppointmentEventKind::Confirmed),
            AppointmentStatus::Cancelled => Some(AppointmentEventKind::Cancelled),
            _ => None,
        };
        if let Some(kind) = event_kind {
            self.emit(AppointmentEvent {
                kind,
                appointment_id,
                organization_id,
                previous_time_range: None,
                new_time_range: updated.time_range,
            })
            .await;
        }

        Ok(updated)
    }

    pub async fn get_appointment(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        self.store
            .get(organization_id, appointment_id)
            .await?
            .ok_or(SchedulingError::NotFound)
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    /// One day of slack on both sides so rules and bookings that straddle
    /// midnight are always visible to the evaluation.
    async fn load_surrounding_window(
        &self,
        organization_id: Uuid,
        range: &TimeRange,
    ) -> Result<WindowSnapshot, SchedulingError> {
        let from = range.start - ChronoDuration::days(1);
        let to = range.end + ChronoDuration::days(1);
        self.store.load_window(organization_id, from, to).await
    }

    async fn decide(
        &self,
        proposed: &Appointment,
        existing: &[Appointment],
    ) -> Result<SchedulingDecision, SchedulingError> {
        if let Some(decision) = conflict::detect(proposed, existing) {
            return Ok(decision);
        }
        let rules = self.store.capacity_rules(proposed.organization_id).await?;
        Ok(capacity::resolve(
            proposed,
            existing,
            &rules,
            self.default_max_concurrent,
        ))
    }

    /// Returns whether a capacity override was applied. Hard conflicts are
    /// never overridable; soft conflicts pass only when the caller asked.
    fn gate_decision(
        &self,
        decision: &SchedulingDecision,
        override_capacity: bool,
    ) -> Result<bool, SchedulingError> {
        match decision.outcome {
            DecisionOutcome::Free => Ok(false),
            DecisionOutcome::SoftConflict => {
                if override_capacity {
                    info!(
                        "Capacity override applied at {}/{} used",
                        decision.capacity_used, decision.capacity_limit
                    );
                    Ok(true)
                } else {
                    Err(SchedulingError::SoftConflict {
                        decision: decision.clone(),
                    })
                }
            }
            DecisionOutcome::HardConflict => Err(SchedulingError::HardConflict {
                decision: decision.clone(),
            }),
        }
    }

    async fn emit(&self, event: AppointmentEvent) {
        let kind = event.kind;
        let appointment_id = event.appointment_id;
        if let Err(e) = self.events.publish(event).await {
            warn!(
                "Failed to publish {} event for appointment {}: {}",
                kind, appointment_id, e
            );
        }
    }
}
