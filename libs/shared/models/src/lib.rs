pub mod error;
pub mod tenancy;

pub use error::AppError;
pub use tenancy::OrganizationContext;
