// libs/scheduling-cell/src/services/capacity.rs
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, CapacityRule, RuleScope, SchedulingDecision};

/// Capacity evaluation for a proposed slot against the appointments already
/// booked around it. When several rules match, a date-specific rule beats a
/// weekly one, then a therapist-scoped rule beats an organization-wide one;
/// without any matching rule the configured default limit applies
/// organization-wide.
pub fn resolve(
    proposed: &Appointment,
    existing: &[Appointment],
    rules: &[CapacityRule],
    default_max_concurrent: u32,
) -> SchedulingDecision {
    let matched = rules
        .iter()
        .filter(|rule| rule.matches(proposed))
        .min_by_key(|rule| {
            (
                !rule.day.is_date_specific(),
                !rule.scope.is_therapist_scoped(),
                rule.id,
            )
        });

    let (limit, scope) = match matched {
        Some(rule) => {
            debug!(
                "Capacity rule {} matched slot {} - {} (limit {})",
                rule.id, proposed.time_range.start, proposed.time_range.end, rule.max_concurrent
            );
            (rule.max_concurrent, rule.scope)
        }
        None => (default_max_concurrent, RuleScope::OrganizationWide),
    };

    let occupying: Vec<Uuid> = existing
        .iter()
        .filter(|appointment| {
            appointment.id != proposed.id
                && appointment.status.is_active()
                && appointment.time_range.overlaps(&proposed.time_range)
                && scope.applies_to(appointment.therapist_id)
        })
        .map(|appointment| appointment.id)
        .collect();

    let used = occupying.len() as u32;
    if used < limit {
        SchedulingDecision::free(used, limit)
    } else {
        SchedulingDecision::soft_conflict(occupying, used, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, DecisionOutcome, RuleDay, TimeRange};
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};

    // 2026-03-02 is a Monday
    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn appointment(
        organization_id: Uuid,
        therapist_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            organization_id,
            patient_id: Uuid::new_v4(),
            therapist_id,
            time_range: TimeRange { start, end },
            status: AppointmentStatus::Scheduled,
            capacity_override_applied: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn weekly_rule(
        organization_id: Uuid,
        day_of_week: u8,
        window: (u32, u32),
        max_concurrent: u32,
    ) -> CapacityRule {
        CapacityRule {
            id: Uuid::new_v4(),
            organization_id,
            scope: RuleScope::OrganizationWide,
            day: RuleDay::Weekly { day_of_week },
            start_time: NaiveTime::from_hms_opt(window.0, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(window.1, 0, 0).unwrap(),
            max_concurrent,
        }
    }

    #[test]
    fn test_monday_morning_fills_up_at_two_concurrent() {
        let organization_id = Uuid::new_v4();
        let rule = weekly_rule(organization_id, 1, (9, 10), 2);

        let first = appointment(organization_id, None, at(9, 0), at(9, 30));
        let second = appointment(organization_id, None, at(9, 15), at(9, 45));
        let third = appointment(organization_id, None, at(9, 20), at(9, 40));

        // Second booking still fits: only the first overlaps it
        let decision = resolve(&second, &[first.clone()], &[rule.clone()], 1);
        assert_eq!(decision.outcome, DecisionOutcome::Free);
        assert_eq!(decision.capacity_used, 1);
        assert_eq!(decision.capacity_limit, 2);

        // Third overlaps both and the window is full
        let decision = resolve(
            &third,
            &[first.clone(), second.clone()],
            &[rule.clone()],
            1,
        );
        assert_eq!(decision.outcome, DecisionOutcome::SoftConflict);
        assert_eq!(decision.capacity_used, 2);
        assert_eq!(decision.capacity_limit, 2);
        assert_eq!(decision.conflicting_appointment_ids.len(), 2);
        assert!(decision.conflicting_appointment_ids.contains(&first.id));
        assert!(decision.conflicting_appointment_ids.contains(&second.id));
    }

    #[test]
    fn test_default_limit_is_one_concurrent_appointment() {
        let organization_id = Uuid::new_v4();
        let booked = appointment(organization_id, None, at(9, 0), at(9, 30));
        let proposed = appointment(organization_id, None, at(9, 15), at(9, 45));

        let decision = resolve(&proposed, &[booked.clone()], &[], 1);
        assert_eq!(decision.outcome, DecisionOutcome::SoftConflict);
        assert_eq!(decision.capacity_used, 1);
        assert_eq!(decision.capacity_limit, 1);
        assert_eq!(decision.conflicting_appointment_ids, vec![booked.id]);
    }

    #[test]
    fn test_default_limit_is_configurable() {
        let organization_id = Uuid::new_v4();
        let booked = appointment(organization_id, None, at(9, 0), at(9, 30));
        let proposed = appointment(organization_id, None, at(9, 15), at(9, 45));

        let decision = resolve(&proposed, &[booked], &[], 2);
        assert_eq!(decision.outcome, DecisionOutcome::Free);
        assert_eq!(decision.capacity_used, 1);
        assert_eq!(decision.capacity_limit, 2);
    }

    #[test]
    fn test_date_specific_rule_beats_weekly_rule() {
        let organization_id = Uuid::new_v4();
        let weekly = weekly_rule(organization_id, 1, (9, 10), 1);
        let date_rule = CapacityRule {
            day: RuleDay::Date {
                date: at(9, 0).date_naive(),
            },
            max_concurrent: 3,
            ..weekly_rule(organization_id, 1, (9, 10), 3)
        };

        let booked = appointment(organization_id, None, at(9, 0), at(9, 30));
        let proposed = appointment(organization_id, None, at(9, 15), at(9, 45));

        let decision = resolve(&proposed, &[booked], &[weekly, date_rule], 1);
        assert_eq!(decision.outcome, DecisionOutcome::Free);
        assert_eq!(decision.capacity_limit, 3);
    }

    #[test]
    fn test_therapist_scoped_rule_counts_only_that_therapist() {
        let organization_id = Uuid::new_v4();
        let therapist = Uuid::new_v4();
        let rule = CapacityRule {
            scope: RuleScope::TherapistScoped {
                therapist_id: therapist,
            },
            ..weekly_rule(organization_id, 1, (9, 10), 1)
        };

        let other = appointment(
            organization_id,
            Some(Uuid::new_v4()),
            at(9, 0),
            at(9, 30),
        );
        let proposed = appointment(organization_id, Some(therapist), at(9, 15), at(9, 45));

        // Another therapist's booking does not occupy this therapist's window
        let decision = resolve(&proposed, &[other], &[rule.clone()], 1);
        assert_eq!(decision.outcome, DecisionOutcome::Free);
        assert_eq!(decision.capacity_used, 0);

        let own = appointment(organization_id, Some(therapist), at(9, 0), at(9, 30));
        let decision = resolve(&proposed, &[own], &[rule], 1);
        assert_eq!(decision.outcome, DecisionOutcome::SoftConflict);
        assert_eq!(decision.capacity_used, 1);
    }

    #[test]
    fn test_slot_outside_the_rule_window_uses_the_default() {
        let organization_id = Uuid::new_v4();
        let rule = weekly_rule(organization_id, 1, (9, 10), 5);

        // 10:00 - 10:30 is back-to-back with the rule window, not inside it
        let booked = appointment(organization_id, None, at(10, 0), at(10, 30));
        let proposed = appointment(organization_id, None, at(10, 15), at(10, 45));

        let decision = resolve(&proposed, &[booked], &[rule], 1);
        assert_eq!(decision.outcome, DecisionOutcome::SoftConflict);
        assert_eq!(decision.capacity_limit, 1);
    }

    #[test]
    fn test_cancelled_appointments_release_capacity() {
        let organization_id = Uuid::new_v4();
        let mut cancelled = appointment(organization_id, None, at(9, 0), at(9, 30));
        cancelled.status = AppointmentStatus::Cancelled;
        let proposed = appointment(organization_id, None, at(9, 15), at(9, 45));

        let decision = resolve(&proposed, &[cancelled], &[], 1);
        assert_eq!(decision.outcome, DecisionOutcome::Free);
        assert_eq!(decision.capacity_used, 0);
    }
}
