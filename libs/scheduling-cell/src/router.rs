// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::organization_middleware;

use crate::handlers::{
    cancel_appointment_handler, create_appointment_handler, get_appointment_handler,
    reschedule_appointment_handler, update_status_handler,
};
use crate::services::SchedulingService;

/// Appointment routes; every route requires an organization context.
pub fn appointment_routes(service: Arc<SchedulingService>) -> Router {
    let routes = Router::new()
        .route("/", post(create_appointment_handler))
        .route(
            "/{appointment_id}",
            get(get_appointment_handler).patch(reschedule_appointment_handler),
        )
        .route("/{appointment_id}/cancel", post(cancel_appointment_handler))
        .route("/{appointment_id}/status", patch(update_status_handler))
        .layer(middleware::from_fn(organization_middleware));

    Router::new().merge(routes).with_state(service)
}
