// libs/notification-cell/tests/routing_test.rs
//
// Router behavior against in-memory stores: which jobs come out of lifecycle
// events and reminder sweeps, and which duplicates get suppressed.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use notification_cell::error::NotificationError;
use notification_cell::models::{
    AttemptOutcome, Channel, DeliveryLedgerEntry, JobStatus, RecipientContact, TemplateKind,
};
use notification_cell::services::NotificationRouter;
use notification_cell::store::{
    DeliveryLedger, InMemoryDeliveryLedger, InMemoryNotificationJobStore,
    InMemoryRecipientDirectory, NotificationJobStore,
};
use scheduling_cell::models::{
    Appointment, AppointmentEvent, AppointmentEventKind, AppointmentStatus,
    CreateAppointmentRequest, TimeRange,
};
use scheduling_cell::services::SchedulingService;
use scheduling_cell::store::{AppointmentStore, InMemoryAppointmentStore};
use shared_utils::test_utils::TestConfig;

struct TestContext {
    router: Arc<NotificationRouter>,
    jobs: Arc<InMemoryNotificationJobStore>,
    ledger: Arc<InMemoryDeliveryLedger>,
    directory: Arc<InMemoryRecipientDirectory>,
    appointments: Arc<InMemoryAppointmentStore>,
}

fn test_router() -> TestContext {
    let jobs = Arc::new(InMemoryNotificationJobStore::new());
    let ledger = Arc::new(InMemoryDeliveryLedger::new());
    let directory = Arc::new(InMemoryRecipientDirectory::new());
    let appointments = Arc::new(InMemoryAppointmentStore::new());
    let config = TestConfig::default().to_app_config();

    let router = Arc::new(NotificationRouter::new(
        jobs.clone(),
        ledger.clone(),
        directory.clone(),
        appointments.clone(),
        &config,
    ));

    TestContext {
        router,
        jobs,
        ledger,
        directory,
        appointments,
    }
}

async fn seed_appointment(
    ctx: &TestContext,
    organization_id: Uuid,
    patient_id: Uuid,
    start: DateTime<Utc>,
) -> Appointment {
    let now = Utc::now();
    let appointment = Appointment {
        id: Uuid::new_v4(),
        organization_id,
        patient_id,
        therapist_id: None,
        time_range: TimeRange {
            start,
            end: start + Duration::minutes(30),
        },
        status: AppointmentStatus::Scheduled,
        capacity_override_applied: false,
        created_at: now,
        updated_at: now,
    };

    let snapshot = ctx
        .appointments
        .load_window(
            organization_id,
            start - Duration::days(1),
            start + Duration::days(1),
        )
        .await
        .unwrap();
    ctx.appointments
        .insert(appointment.clone(), &snapshot.token, Uuid::new_v4())
        .await
        .unwrap();

    appointment
}

async fn seed_contact(ctx: &TestContext, organization_id: Uuid, patient_id: Uuid) {
    let contact = RecipientContact {
        patient_id,
        name: "Maria Silva".to_string(),
        email: Some("maria@example.com".to_string()),
        phone: Some("21 98765-4321".to_string()),
        push_tokens: vec!["push-token-1".to_string()],
        preferred_channels: Channel::ALL.to_vec(),
        opted_out: false,
    };
    ctx.directory
        .register_contact(organization_id, contact)
        .await;
}

fn event_for(appointment: &Appointment, kind: AppointmentEventKind) -> AppointmentEvent {
    AppointmentEvent {
        kind,
        appointment_id: appointment.id,
        organization_id: appointment.organization_id,
        previous_time_range: None,
        new_time_range: appointment.time_range,
    }
}

#[tokio::test]
async fn test_created_event_enqueues_confirmation_on_all_enabled_channels() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let appointment = seed_appointment(
        &ctx,
        organization_id,
        patient_id,
        Utc::now() + Duration::days(3),
    )
    .await;

    ctx.router
        .handle_event(&event_for(&appointment, AppointmentEventKind::Created))
        .await
        .unwrap();

    let jobs = ctx
        .jobs
        .jobs_for_appointment(appointment.id)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs
        .iter()
        .all(|job| job.template_kind == TemplateKind::Confirmation
            && job.status == JobStatus::Pending));

    let channels: Vec<Channel> = jobs.iter().map(|job| job.channel).collect();
    for channel in Channel::ALL {
        assert!(channels.contains(&channel), "missing channel {}", channel);
    }
}

#[tokio::test]
async fn test_confirmed_event_does_not_duplicate_confirmation() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let appointment = seed_appointment(
        &ctx,
        organization_id,
        patient_id,
        Utc::now() + Duration::days(3),
    )
    .await;

    ctx.router
        .handle_event(&event_for(&appointment, AppointmentEventKind::Created))
        .await
        .unwrap();
    ctx.router
        .handle_event(&event_for(&appointment, AppointmentEventKind::Confirmed))
        .await
        .unwrap();

    let jobs = ctx
        .jobs
        .jobs_for_appointment(appointment.id)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 3, "one confirmation per channel, not per event");
}

#[tokio::test]
async fn test_reminder_sweep_enqueues_once_and_dedupes_on_rerun() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let now = Utc::now();
    let appointment =
        seed_appointment(&ctx, organization_id, patient_id, now + Duration::hours(24)).await;

    let first = ctx
        .router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await
        .unwrap();
    assert_eq!(first.considered, 1);
    assert_eq!(first.enqueued, 3);
    assert_eq!(first.deduplicated, 0);

    let second = ctx
        .router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await
        .unwrap();
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.deduplicated, 3);

    let email_jobs = ctx
        .jobs
        .find(appointment.id, TemplateKind::Reminder24h, Channel::Email)
        .await
        .unwrap();
    assert_eq!(email_jobs.len(), 1);
}

#[tokio::test]
async fn test_two_hour_sweep_has_its_own_window() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let now = Utc::now();
    seed_appointment(&ctx, organization_id, patient_id, now + Duration::hours(2)).await;

    let two_hour = ctx
        .router
        .run_reminder_sweep(TemplateKind::Reminder2h, now)
        .await
        .unwrap();
    assert_eq!(two_hour.considered, 1);
    assert_eq!(two_hour.enqueued, 3);

    let day_ahead = ctx
        .router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await
        .unwrap();
    assert_eq!(day_ahead.considered, 0);
}

#[tokio::test]
async fn test_sweep_ignores_cancelled_appointments() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let now = Utc::now();
    let appointment =
        seed_appointment(&ctx, organization_id, patient_id, now + Duration::hours(24)).await;
    ctx.appointments
        .update_status(organization_id, appointment.id, AppointmentStatus::Cancelled)
        .await
        .unwrap();

    let report = ctx
        .router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await
        .unwrap();
    assert_eq!(report.considered, 0);
    assert!(ctx
        .jobs
        .jobs_for_appointment(appointment.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_sweep_rejects_non_reminder_kinds() {
    let ctx = test_router();
    let err = ctx
        .router
        .run_reminder_sweep(TemplateKind::Confirmation, Utc::now())
        .await
        .unwrap_err();
    assert_matches!(err, NotificationError::NotASweepKind(_));
}

#[tokio::test]
async fn test_ledger_delivery_blocks_reenqueue() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let now = Utc::now();
    let appointment =
        seed_appointment(&ctx, organization_id, patient_id, now + Duration::hours(24)).await;

    // A previous worker run delivered the email reminder; the job row is gone
    // but the ledger remembers.
    ctx.ledger
        .append(DeliveryLedgerEntry {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            appointment_id: appointment.id,
            template_kind: TemplateKind::Reminder24h,
            channel: Channel::Email,
            attempt_number: 1,
            timestamp: now,
            outcome: AttemptOutcome::Delivered,
            external_message_id: Some("msg-1".to_string()),
            http_status: Some(200),
            detail: None,
        })
        .await
        .unwrap();

    let report = ctx
        .router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await
        .unwrap();
    assert_eq!(report.enqueued, 2, "whatsapp and push still go out");
    assert_eq!(report.deduplicated, 1);
}

#[tokio::test]
async fn test_reschedule_skips_pending_reminders_and_notifies() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let now = Utc::now();
    let appointment =
        seed_appointment(&ctx, organization_id, patient_id, now + Duration::hours(24)).await;

    ctx.router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await
        .unwrap();

    let event = AppointmentEvent {
        kind: AppointmentEventKind::Rescheduled,
        appointment_id: appointment.id,
        organization_id,
        previous_time_range: Some(appointment.time_range),
        new_time_range: TimeRange {
            start: appointment.time_range.start + Duration::days(1),
            end: appointment.time_range.end + Duration::days(1),
        },
    };
    ctx.router.handle_event(&event).await.unwrap();

    let reminders = ctx
        .jobs
        .find(appointment.id, TemplateKind::Reminder24h, Channel::Email)
        .await
        .unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].status, JobStatus::Skipped);
    assert_eq!(
        reminders[0].skip_reason.as_deref(),
        Some("appointment rescheduled")
    );

    let reschedules = ctx
        .jobs
        .find(appointment.id, TemplateKind::Reschedule, Channel::Email)
        .await
        .unwrap();
    assert_eq!(reschedules.len(), 1);
    assert_eq!(reschedules[0].status, JobStatus::Pending);
}

#[tokio::test]
async fn test_cancellation_skips_pending_reminders_and_notifies() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;
    let now = Utc::now();
    let appointment =
        seed_appointment(&ctx, organization_id, patient_id, now + Duration::hours(24)).await;

    ctx.router
        .run_reminder_sweep(TemplateKind::Reminder24h, now)
        .await
        .unwrap();
    ctx.appointments
        .update_status(organization_id, appointment.id, AppointmentStatus::Cancelled)
        .await
        .unwrap();

    ctx.router
        .handle_event(&event_for(&appointment, AppointmentEventKind::Cancelled))
        .await
        .unwrap();

    let reminders = ctx
        .jobs
        .find(appointment.id, TemplateKind::Reminder24h, Channel::Whatsapp)
        .await
        .unwrap();
    assert_eq!(reminders[0].status, JobStatus::Skipped);
    assert_eq!(
        reminders[0].skip_reason.as_deref(),
        Some("appointment cancelled")
    );

    let cancellations = ctx
        .jobs
        .find(appointment.id, TemplateKind::Cancellation, Channel::Email)
        .await
        .unwrap();
    assert_eq!(cancellations.len(), 1);
    assert_eq!(cancellations[0].status, JobStatus::Pending);
}

#[tokio::test]
async fn test_missing_address_becomes_skipped_job_with_reason() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let contact = RecipientContact {
        patient_id,
        name: "João Souza".to_string(),
        email: None,
        phone: Some("21 98765-4321".to_string()),
        push_tokens: vec![],
        preferred_channels: Channel::ALL.to_vec(),
        opted_out: false,
    };
    ctx.directory
        .register_contact(organization_id, contact)
        .await;
    let appointment = seed_appointment(
        &ctx,
        organization_id,
        patient_id,
        Utc::now() + Duration::days(1),
    )
    .await;

    ctx.router
        .handle_event(&event_for(&appointment, AppointmentEventKind::Created))
        .await
        .unwrap();

    let email_jobs = ctx
        .jobs
        .find(appointment.id, TemplateKind::Confirmation, Channel::Email)
        .await
        .unwrap();
    assert_eq!(email_jobs.len(), 1);
    assert_eq!(email_jobs[0].status, JobStatus::Skipped);
    assert_eq!(
        email_jobs[0].skip_reason.as_deref(),
        Some("no email address on file")
    );

    let push_jobs = ctx
        .jobs
        .find(appointment.id, TemplateKind::Confirmation, Channel::Push)
        .await
        .unwrap();
    assert_eq!(push_jobs[0].status, JobStatus::Skipped);
    assert_eq!(
        push_jobs[0].skip_reason.as_deref(),
        Some("no registered devices")
    );

    let whatsapp_jobs = ctx
        .jobs
        .find(appointment.id, TemplateKind::Confirmation, Channel::Whatsapp)
        .await
        .unwrap();
    assert_eq!(whatsapp_jobs[0].status, JobStatus::Pending);
}

#[tokio::test]
async fn test_opted_out_patient_gets_no_jobs() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    let contact = RecipientContact {
        patient_id,
        name: "Ana Lima".to_string(),
        email: Some("ana@example.com".to_string()),
        phone: None,
        push_tokens: vec![],
        preferred_channels: Channel::ALL.to_vec(),
        opted_out: true,
    };
    ctx.directory
        .register_contact(organization_id, contact)
        .await;
    let appointment = seed_appointment(
        &ctx,
        organization_id,
        patient_id,
        Utc::now() + Duration::days(1),
    )
    .await;

    ctx.router
        .handle_event(&event_for(&appointment, AppointmentEventKind::Created))
        .await
        .unwrap();

    assert!(ctx
        .jobs
        .jobs_for_appointment(appointment.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_channel_selection_intersects_org_policy_with_preference() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    // Organization only sends email and whatsapp; patient only wants
    // whatsapp and push. The intersection is whatsapp.
    ctx.directory
        .set_organization_channels(organization_id, vec![Channel::Email, Channel::Whatsapp])
        .await;
    let contact = RecipientContact {
        patient_id,
        name: "Carlos Dias".to_string(),
        email: Some("carlos@example.com".to_string()),
        phone: Some("21 98765-4321".to_string()),
        push_tokens: vec!["push-token-1".to_string()],
        preferred_channels: vec![Channel::Whatsapp, Channel::Push],
        opted_out: false,
    };
    ctx.directory
        .register_contact(organization_id, contact)
        .await;
    let appointment = seed_appointment(
        &ctx,
        organization_id,
        patient_id,
        Utc::now() + Duration::days(1),
    )
    .await;

    ctx.router
        .handle_event(&event_for(&appointment, AppointmentEventKind::Created))
        .await
        .unwrap();

    let jobs = ctx
        .jobs
        .jobs_for_appointment(appointment.id)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].channel, Channel::Whatsapp);
}

#[tokio::test]
async fn test_router_receives_events_from_scheduling_service() {
    let ctx = test_router();
    let organization_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();
    seed_contact(&ctx, organization_id, patient_id).await;

    let config = TestConfig::default().to_app_config();
    let service = SchedulingService::new(ctx.appointments.clone(), ctx.router.clone(), &config);

    let start = Utc::now() + Duration::days(2);
    let appointment = service
        .create_appointment(
            organization_id,
            CreateAppointmentRequest {
                patient_id,
                therapist_id: None,
                time_range: TimeRange {
                    start,
                    end: start + Duration::minutes(30),
                },
                override_capacity: false,
                request_id: Uuid::new_v4(),
            },
        )
        .await
        .unwrap();

    let jobs = ctx
        .jobs
        .jobs_for_appointment(appointment.id)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs
        .iter()
        .all(|job| job.template_kind == TemplateKind::Confirmation));
}
