use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Organization partition a request operates in. Authentication itself is an
/// upstream concern; by the time a request reaches the core the tenancy
/// header is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationContext {
    pub organization_id: Uuid,
}
