// libs/scheduling-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulingError;

// ==============================================================================
// TIME-SLOT MODEL
// ==============================================================================

/// Half-open interval `[start, end)`. Two ranges overlap iff
/// `a.start < b.end && b.start < a.end`; back-to-back slots do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SchedulingError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.start < self.end {
            Ok(())
        } else {
            Err(SchedulingError::InvalidTimeRange(format!(
                "start {} must be before end {}",
                self.start, self.end
            )))
        }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

// ==============================================================================
// CAPACITY RULES
// ==============================================================================

/// Who a capacity rule constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleScope {
    OrganizationWide,
    TherapistScoped { therapist_id: Uuid },
}

impl RuleScope {
    pub fn applies_to(&self, therapist_id: Option<Uuid>) -> bool {
        match self {
            RuleScope::OrganizationWide => true,
            RuleScope::TherapistScoped { therapist_id: scoped } => therapist_id == Some(*scoped),
        }
    }

    pub fn is_therapist_scoped(&self) -> bool {
        matches!(self, RuleScope::TherapistScoped { .. })
    }
}

/// Which day a capacity rule covers: a weekly recurrence (0 = Sunday .. 6 =
/// Saturday) or one explicit date. Date rules win over weekly rules when both
/// match the same day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleDay {
    Weekly { day_of_week: u8 },
    Date { date: NaiveDate },
}

impl RuleDay {
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            RuleDay::Weekly { day_of_week } => {
                date.weekday().num_days_from_sunday() == u32::from(*day_of_week)
            }
            RuleDay::Date { date: rule_date } => *rule_date == date,
        }
    }

    pub fn is_date_specific(&self) -> bool {
        matches!(self, RuleDay::Date { .. })
    }
}

/// Maximum concurrent appointments for a recurring (or date-specific)
/// time-of-day window. Maintained by clinic admins; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRule {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub scope: RuleScope,
    pub day: RuleDay,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_concurrent: u32,
}

impl CapacityRule {
    /// Whether this rule constrains the proposed slot: same organization, day
    /// match on the slot's start date, time-of-day window overlap, and scope
    /// applicability.
    pub fn matches(&self, proposed: &Appointment) -> bool {
        if self.organization_id != proposed.organization_id {
            return false;
        }

        let date = proposed.time_range.start.date_naive();
        if !self.day.matches(date) {
            return false;
        }

        if !self.scope.applies_to(proposed.therapist_id) {
            return false;
        }

        let window = TimeRange {
            start: date.and_time(self.start_time).and_utc(),
            end: date.and_time(self.end_time).and_utc(),
        };
        window.overlaps(&proposed.time_range)
    }
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

impl AppointmentStatus {
    /// Active appointments occupy capacity; cancellation is the only way to
    /// release a slot.
    pub fn is_active(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn can_transition_to(&self, target: &AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match (self, target) {
            (Scheduled, Confirmed) => true,
            (Scheduled | Confirmed, Completed) => true,
            (Scheduled | Confirmed, Cancelled) => true,
            (Scheduled | Confirmed, NoShow) => true,
            _ => false,
        }
    }

    pub fn valid_transitions(&self) -> Vec<AppointmentStatus> {
        use AppointmentStatus::*;
        match self {
            Scheduled => vec![Confirmed, Completed, Cancelled, NoShow],
            Confirmed => vec![Completed, Cancelled, NoShow],
            Completed | Cancelled | NoShow => vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub patient_id: Uuid,
    pub therapist_id: Option<Uuid>,
    pub time_range: TimeRange,
    pub status: AppointmentStatus,
    pub capacity_override_applied: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// SCHEDULING DECISIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Free,
    SoftConflict,
    HardConflict,
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionOutcome::Free => write!(f, "free"),
            DecisionOutcome::SoftConflict => write!(f, "soft_conflict"),
            DecisionOutcome::HardConflict => write!(f, "hard_conflict"),
        }
    }
}

/// Outcome of one conflict/capacity evaluation. Transient: produced per
/// request, consumed by the caller, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingDecision {
    pub outcome: DecisionOutcome,
    pub conflicting_appointment_ids: Vec<Uuid>,
    pub capacity_used: u32,
    pub capacity_limit: u32,
}

impl SchedulingDecision {
    pub fn free(capacity_used: u32, capacity_limit: u32) -> Self {
        Self {
            outcome: DecisionOutcome::Free,
            conflicting_appointment_ids: Vec::new(),
            capacity_used,
            capacity_limit,
        }
    }

    pub fn soft_conflict(
        conflicting_appointment_ids: Vec<Uuid>,
        capacity_used: u32,
        capacity_limit: u32,
    ) -> Self {
        Self {
            outcome: DecisionOutcome::SoftConflict,
            conflicting_appointment_ids,
            capacity_used,
            capacity_limit,
        }
    }

    pub fn hard_conflict(conflicting_appointment_ids: Vec<Uuid>) -> Self {
        Self {
            outcome: DecisionOutcome::HardConflict,
            conflicting_appointment_ids,
            capacity_used: 0,
            capacity_limit: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.outcome == DecisionOutcome::Free
    }
}

// ==============================================================================
// LIFECYCLE EVENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEventKind {
    Created,
    Confirmed,
    Rescheduled,
    Cancelled,
}

impl fmt::Display for AppointmentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentEventKind::Created => write!(f, "created"),
            AppointmentEventKind::Confirmed => write!(f, "confirmed"),
            AppointmentEventKind::Rescheduled => write!(f, "rescheduled"),
            AppointmentEventKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle event emitted after a successful write, consumed by the
/// notification router. `previous_time_range` is set only for reschedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentEvent {
    pub kind: AppointmentEventKind,
    pub appointment_id: Uuid,
    pub organization_id: Uuid,
    pub previous_time_range: Option<TimeRange>,
    pub new_time_range: TimeRange,
}

// ==============================================================================
// REQUEST / RESPONSE TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub therapist_id: Option<Uuid>,
    pub time_range: TimeRange,
    #[serde(default)]
    pub override_capacity: bool,
    /// Client-supplied idempotency key; retrying the same request returns the
    /// originally created appointment.
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub time_range: TimeRange,
    #[serde(default)]
    pub override_capacity: bool,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

/// Body of a 409 response; `kind` distinguishes the two conflict classes so
/// the caller can offer "schedule anyway" only for soft conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResponse {
    pub kind: DecisionOutcome,
    pub conflicting_appointment_ids: Vec<Uuid>,
    pub capacity_used: u32,
    pub capacity_limit: u32,
}

impl From<SchedulingDecision> for ConflictResponse {
    fn from(decision: SchedulingDecision) -> Self {
        Self {
            kind: decision.outcome,
            conflicting_appointment_ids: decision.conflicting_appointment_ids,
            capacity_used: decision.capacity_used,
            capacity_limit: decision.capacity_limit,
        }
    }
}
