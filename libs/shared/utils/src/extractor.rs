use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::tenancy::OrganizationContext;

pub const ORGANIZATION_HEADER: &str = "X-Organization-Id";

// Middleware for tenancy - the upstream gateway authenticates the caller and
// stamps the organization header; here it only has to be present and valid.
pub async fn organization_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(ORGANIZATION_HEADER)
        .ok_or_else(|| AppError::BadRequest(format!("Missing {} header", ORGANIZATION_HEADER)))?;

    let value = header
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("Invalid {} header", ORGANIZATION_HEADER)))?;

    let organization_id = Uuid::parse_str(value)
        .map_err(|_| AppError::BadRequest(format!("Invalid {} header", ORGANIZATION_HEADER)))?;

    request
        .extensions_mut()
        .insert(OrganizationContext { organization_id });

    Ok(next.run(request).await)
}

// Function to extract the organization from request extensions
pub async fn extract_organization<B>(request: &Request<B>) -> Result<OrganizationContext, AppError> {
    request
        .extensions()
        .get::<OrganizationContext>()
        .cloned()
        .ok_or_else(|| AppError::Internal("Organization not found in request extensions".to_string()))
}
