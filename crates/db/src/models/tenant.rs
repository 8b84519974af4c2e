//! Tenant model.

use sqlx::FromRow;
use tether_core::types::{DbId, Timestamp};

/// A row from the `tenants` table.
#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub id: DbId,
    /// Public key a client sends at login to select the tenant.
    pub unique_admin_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: Timestamp,
}
