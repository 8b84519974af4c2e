//! Repository for the `tenants` table.

use sqlx::PgPool;

use crate::models::tenant::Tenant;

const COLUMNS: &str = "id, unique_admin_id, name, is_active, created_at";

pub struct TenantRepo;

impl TenantRepo {
    /// Insert a tenant, returning the created row.
    pub async fn create(
        pool: &PgPool,
        unique_admin_id: &str,
        name: &str,
    ) -> Result<Tenant, sqlx::Error> {
        let query = format!(
            "INSERT INTO tenants (unique_admin_id, name) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Tenant>(&query)
            .bind(unique_admin_id)
            .bind(name)
            .fetch_one(pool)
            .await
    }

    /// Resolve the tenant a login request addresses.
    pub async fn find_by_unique_admin_id(
        pool: &PgPool,
        unique_admin_id: &str,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tenants WHERE unique_admin_id = $1");
        sqlx::query_as::<_, Tenant>(&query)
            .bind(unique_admin_id)
            .fetch_optional(pool)
            .await
    }
}
