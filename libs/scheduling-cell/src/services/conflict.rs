// libs/scheduling-cell/src/services/conflict.rs
use tracing::warn;
use uuid::Uuid;

use crate::models::{Appointment, SchedulingDecision};

/// Same-therapist overlap check. Returns a hard-conflict decision when the
/// proposed slot overlaps an active appointment of the same therapist, `None`
/// otherwise. Appointments without a therapist never hard-conflict.
pub fn detect(proposed: &Appointment, existing: &[Appointment]) -> Option<SchedulingDecision> {
    let therapist_id = proposed.therapist_id?;

    let conflicting: Vec<Uuid> = existing
        .iter()
        .filter(|appointment| {
            appointment.id != proposed.id
                && appointment.therapist_id == Some(therapist_id)
                && appointment.status.is_active()
                && appointment.time_range.overlaps(&proposed.time_range)
        })
        .map(|appointment| appointment.id)
        .collect();

    if conflicting.is_empty() {
        return None;
    }

    warn!(
        "Hard conflict for therapist {}: {} overlapping appointment(s)",
        therapist_id,
        conflicting.len()
    );
    Some(SchedulingDecision::hard_conflict(conflicting))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, TimeRange};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn appointment(
        therapist_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: AppointmentStatus,
    ) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            therapist_id,
            time_range: TimeRange { start, end },
            status,
            capacity_override_applied: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_same_therapist_overlap_is_a_hard_conflict() {
        let therapist = Uuid::new_v4();
        let booked = appointment(
            Some(therapist),
            at(10, 0),
            at(10, 30),
            AppointmentStatus::Scheduled,
        );
        let proposed = appointment(
            Some(therapist),
            at(10, 15),
            at(10, 45),
            AppointmentStatus::Scheduled,
        );

        let decision = detect(&proposed, &[booked.clone()]).unwrap();
        assert_eq!(decision.conflicting_appointment_ids, vec![booked.id]);
    }

    #[test]
    fn test_different_therapists_do_not_conflict() {
        let booked = appointment(
            Some(Uuid::new_v4()),
            at(10, 0),
            at(10, 30),
            AppointmentStatus::Scheduled,
        );
        let proposed = appointment(
            Some(Uuid::new_v4()),
            at(10, 15),
            at(10, 45),
            AppointmentStatus::Scheduled,
        );

        assert!(detect(&proposed, &[booked]).is_none());
    }

    #[test]
    fn test_unassigned_therapist_skips_the_check() {
        let therapist = Uuid::new_v4();
        let booked = appointment(
            Some(therapist),
            at(10, 0),
            at(10, 30),
            AppointmentStatus::Scheduled,
        );
        let proposed = appointment(None, at(10, 15), at(10, 45), AppointmentStatus::Scheduled);

        assert!(detect(&proposed, &[booked]).is_none());
    }

    #[test]
    fn test_cancelled_appointments_are_ignored() {
        let therapist = Uuid::new_v4();
        let cancelled = appointment(
            Some(therapist),
            at(10, 0),
            at(10, 30),
            AppointmentStatus::Cancelled,
        );
        let proposed = appointment(
            Some(therapist),
            at(10, 15),
            at(10, 45),
            AppointmentStatus::Scheduled,
        );

        assert!(detect(&proposed, &[cancelled]).is_none());
    }

    #[test]
    fn test_back_to_back_slots_do_not_conflict() {
        let therapist = Uuid::new_v4();
        let booked = appointment(
            Some(therapist),
            at(10, 0),
            at(10, 30),
            AppointmentStatus::Scheduled,
        );
        let proposed = appointment(
            Some(therapist),
            at(10, 30),
            at(11, 0),
            AppointmentStatus::Scheduled,
        );

        assert!(detect(&proposed, &[booked]).is_none());
    }

    #[test]
    fn test_reschedule_does_not_conflict_with_itself() {
        let therapist = Uuid::new_v4();
        let mut proposed = appointment(
            Some(therapist),
            at(10, 0),
            at(10, 30),
            AppointmentStatus::Scheduled,
        );
        let stored = proposed.clone();
        proposed.time_range = TimeRange {
            start: at(10, 15),
            end: at(10, 45),
        };

        assert!(detect(&proposed, &[stored]).is_none());
    }
}
