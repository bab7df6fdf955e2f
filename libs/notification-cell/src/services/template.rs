// libs/notification-cell/src/services/template.rs
use scheduling_cell::models::Appointment;

use crate::models::{RecipientContact, RenderedMessage, TemplateKind};

/// Name of the pre-approved WhatsApp template for each kind. These must match
/// the template names registered with the WhatsApp Business account.
pub fn whatsapp_template_name(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::Confirmation => "appointment_confirmation",
        TemplateKind::Reminder24h => "appointment_reminder_24h",
        TemplateKind::Reminder2h => "appointment_reminder_2h",
        TemplateKind::Cancellation => "appointment_cancelled",
        TemplateKind::Reschedule => "appointment_rescheduled",
    }
}

/// Render a template for one recipient. Positional params are always
/// `[name, date, time]`, the order the WhatsApp templates were registered
/// with; email and push use the prose `subject`/`body` instead.
pub fn render(
    appointment: &Appointment,
    contact: &RecipientContact,
    kind: TemplateKind,
) -> RenderedMessage {
    let date = appointment.time_range.start.format("%d/%m/%Y").to_string();
    let time = appointment.time_range.start.format("%H:%M").to_string();
    let name = contact.name.clone();

    let (subject, body) = match kind {
        TemplateKind::Confirmation => (
            "Consulta confirmada".to_string(),
            format!(
                "Olá {}, sua consulta está confirmada para {} às {}.",
                name, date, time
            ),
        ),
        TemplateKind::Reminder24h => (
            "Lembrete de consulta".to_string(),
            format!(
                "Olá {}, lembrete: sua consulta é amanhã, {} às {}.",
                name, date, time
            ),
        ),
        TemplateKind::Reminder2h => (
            "Sua consulta é hoje".to_string(),
            format!("Olá {}, sua consulta é hoje às {}. Até breve!", name, time),
        ),
        TemplateKind::Cancellation => (
            "Consulta cancelada".to_string(),
            format!(
                "Olá {}, sua consulta de {} às {} foi cancelada.",
                name, date, time
            ),
        ),
        TemplateKind::Reschedule => (
            "Consulta remarcada".to_string(),
            format!(
                "Olá {}, sua consulta foi remarcada para {} às {}.",
                name, date, time
            ),
        ),
    };

    RenderedMessage {
        subject,
        body,
        template_params: vec![name, date, time],
        recipient: contact.clone(),
    }
}
