// libs/scheduling-cell/src/store.rs
//
// Storage port for the scheduling core. The deployment binds this to the
// organization-partitioned document store; the in-memory implementation backs
// tests and local runs with the same optimistic-concurrency semantics.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::models::{Appointment, AppointmentStatus, CapacityRule, TimeRange};

/// Version vector over the days a window read touched. A write presenting a
/// token commits only if none of those days changed since the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowToken {
    pub versions: Vec<(NaiveDate, u64)>,
}

#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub appointments: Vec<Appointment>,
    pub token: WindowToken,
}

/// Result of a token-guarded write: applied, or replayed because the
/// request id was already recorded.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Applied(Appointment),
    Replayed(Appointment),
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Appointments of one organization overlapping `[from, to)`, plus the
    /// window token guarding subsequent writes.
    async fn load_window(
        &self,
        organization_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<WindowSnapshot, SchedulingError>;

    /// Token-guarded insert, atomic with the `request_id` idempotency check.
    async fn insert(
        &self,
        appointment: Appointment,
        token: &WindowToken,
        request_id: Uuid,
    ) -> Result<WriteOutcome, SchedulingError>;

    /// Token-guarded time-range update (reschedule path).
    async fn update_time_range(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
        new_range: TimeRange,
        capacity_override_applied: bool,
        token: &WindowToken,
        request_id: Uuid,
    ) -> Result<WriteOutcome, SchedulingError>;

    /// Status change with transition validation; bumps day versions so
    /// concurrent capacity reads re-evaluate (a cancellation frees a slot).
    async fn update_status(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError>;

    async fn get(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, SchedulingError>;

    async fn find_by_request_id(
        &self,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<Appointment>, SchedulingError>;

    /// Cross-organization scan for the reminder sweep: appointments starting
    /// within `[from, to)`.
    async fn starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError>;

    async fn capacity_rules(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CapacityRule>, SchedulingError>;

    /// Rules are maintained by admin tooling outside the core; exposed here
    /// for seeding and tests.
    async fn upsert_rule(&self, rule: CapacityRule) -> Result<(), SchedulingError>;
}

// ==============================================================================
// IN-MEMORY IMPLEMENTATION
// ==============================================================================

#[derive(Default)]
struct StoreInner {
    // organization -> appointment id -> appointment
    appointments: HashMap<Uuid, HashMap<Uuid, Appointment>>,
    // organization -> capacity rules
    rules: HashMap<Uuid, Vec<CapacityRule>>,
    // (organization, request id) -> appointment id
    requests: HashMap<(Uuid, Uuid), Uuid>,
    // (organization, day) -> version
    day_versions: HashMap<(Uuid, NaiveDate), u64>,
}

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn covered_days(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = from.date_naive();
    let last = to.date_naive();
    while day <= last {
        days.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days
}

fn appointment_days(range: &TimeRange) -> Vec<NaiveDate> {
    let mut days = vec![range.start.date_naive()];
    let end_day = range.end.date_naive();
    if end_day != days[0] {
        days.push(end_day);
    }
    days
}

impl StoreInner {
    fn token_matches(&self, organization_id: Uuid, token: &WindowToken) -> bool {
        token.versions.iter().all(|(day, version)| {
            let current = self
                .day_versions
                .get(&(organization_id, *day))
                .copied()
                .unwrap_or(0);
            current == *version
        })
    }

    fn bump_days(&mut self, organization_id: Uuid, days: &[NaiveDate]) {
        for day in days {
            *self.day_versions.entry((organization_id, *day)).or_insert(0) += 1;
        }
    }

    fn appointment(&self, organization_id: Uuid, appointment_id: Uuid) -> Option<&Appointment> {
        self.appointments
            .get(&organization_id)
            .and_then(|partition| partition.get(&appointment_id))
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn load_window(
        &self,
        organization_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<WindowSnapshot, SchedulingError> {
        let inner = self.inner.read().await;
        let window = TimeRange { start: from, end: to };

        let mut appointments: Vec<Appointment> = inner
            .appointments
            .get(&organization_id)
            .map(|partition| {
                partition
                    .values()
                    .filter(|appointment| appointment.time_range.overlaps(&window))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        appointments.sort_by_key(|appointment| (appointment.time_range.start, appointment.id));

        let versions = covered_days(from, to)
            .into_iter()
            .map(|day| {
                let version = inner
                    .day_versions
                    .get(&(organization_id, day))
                    .copied()
                    .unwrap_or(0);
                (day, version)
            })
            .collect();

        Ok(WindowSnapshot {
            appointments,
            token: WindowToken { versions },
        })
    }

    async fn insert(
        &self,
        appointment: Appointment,
        token: &WindowToken,
        request_id: Uuid,
    ) -> Result<WriteOutcome, SchedulingError> {
        let mut inner = self.inner.write().await;
        let organization_id = appointment.organization_id;

        if let Some(existing_id) = inner.requests.get(&(organization_id, request_id)).copied() {
            if let Some(existing) = inner.appointment(organization_id, existing_id) {
                return Ok(WriteOutcome::Replayed(existing.clone()));
            }
        }

        if !inner.token_matches(organization_id, token) {
            return Err(SchedulingError::StaleWrite);
        }

        let days = appointment_days(&appointment.time_range);
        inner.bump_days(organization_id, &days);
        inner
            .requests
            .insert((organization_id, request_id), appointment.id);
        inner
            .appointments
            .entry(organization_id)
            .or_default()
            .insert(appointment.id, appointment.clone());

        Ok(WriteOutcome::Applied(appointment))
    }

    async fn update_time_range(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
        new_range: TimeRange,
        capacity_override_applied: bool,
        token: &WindowToken,
        request_id: Uuid,
    ) -> Result<WriteOutcome, SchedulingError> {
        let mut inner = self.inner.write().await;

        if let Some(existing_id) = inner.requests.get(&(organization_id, request_id)).copied() {
            if let Some(existing) = inner.appointment(organization_id, existing_id) {
                return Ok(WriteOutcome::Replayed(existing.clone()));
            }
        }

        if !inner.token_matches(organization_id, token) {
            return Err(SchedulingError::StaleWrite);
        }

        let previous_range = inner
            .appointment(organization_id, appointment_id)
            .map(|appointment| appointment.time_range)
            .ok_or(SchedulingError::NotFound)?;

        let mut days = appointment_days(&previous_range);
        days.extend(appointment_days(&new_range));
        inner.bump_days(organization_id, &days);
        inner
            .requests
            .insert((organization_id, request_id), appointment_id);

        let partition = inner
            .appointments
            .entry(organization_id)
            .or_default();
        let appointment = partition
            .get_mut(&appointment_id)
            .ok_or(SchedulingError::NotFound)?;
        appointment.time_range = new_range;
        appointment.capacity_override_applied = capacity_override_applied;
        appointment.updated_at = Utc::now();

        Ok(WriteOutcome::Applied(appointment.clone()))
    }

    async fn update_status(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, SchedulingError> {
        let mut inner = self.inner.write().await;

        let current = inner
            .appointment(organization_id, appointment_id)
            .map(|appointment| (appointment.status, appointment.time_range))
            .ok_or(SchedulingError::NotFound)?;

        if !current.0.can_transition_to(&new_status) {
            return Err(SchedulingError::InvalidTransition {
                from: current.0,
                to: new_status,
            });
        }

        let days = appointment_days(&current.1);
        inner.bump_days(organization_id, &days);

        let partition = inner
            .appointments
            .entry(organization_id)
            .or_default();
        let appointment = partition
            .get_mut(&appointment_id)
            .ok_or(SchedulingError::NotFound)?;
        appointment.status = new_status;
        appointment.updated_at = Utc::now();

        Ok(appointment.clone())
    }

    async fn get(
        &self,
        organization_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let inner = self.inner.read().await;
        Ok(inner.appointment(organization_id, appointment_id).cloned())
    }

    async fn find_by_request_id(
        &self,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<Appointment>, SchedulingError> {
        let inner = self.inner.read().await;
        let appointment = inner
            .requests
            .get(&(organization_id, request_id))
            .and_then(|appointment_id| inner.appointment(organization_id, *appointment_id))
            .cloned();
        Ok(appointment)
    }

    async fn starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let inner = self.inner.read().await;
        let mut appointments: Vec<Appointment> = inner
            .appointments
            .values()
            .flat_map(|partition| partition.values())
            .filter(|appointment| {
                appointment.time_range.start >= from && appointment.time_range.start < to
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| (appointment.time_range.start, appointment.id));
        Ok(appointments)
    }

    async fn capacity_rules(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<CapacityRule>, SchedulingError> {
        let inner = self.inner.read().await;
        Ok(inner.rules.get(&organization_id).cloned().unwrap_or_default())
    }

    async fn upsert_rule(&self, rule: CapacityRule) -> Result<(), SchedulingError> {
        let mut inner = self.inner.write().await;
        let rules = inner.rules.entry(rule.organization_id).or_default();
        match rules.iter_mut().find(|existing| existing.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }
}
