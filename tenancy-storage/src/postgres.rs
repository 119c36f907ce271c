//! PostgreSQL statement layer
//!
//! [`TenantPool`] is the statement-level surface the repository runs against
//! a leased pool. Each method is a single statement; composing them (and
//! deciding what "not found" means) is the repository's job.

use crate::lease::{ConnectionDescriptor, PoolOptions};
use crate::model::{ProvisioningLogEntry, Tenant, TenantStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

/// Builds a pool handle behind a freshly issued lease
#[async_trait]
pub trait PoolConnector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        options: &PoolOptions,
    ) -> Result<Arc<dyn TenantPool>>;
}

/// Statements the tenant repository issues.
///
/// Tenant reads and updates only see rows whose `deleted_at` is null.
/// Returned tenants carry the encrypted email only.
#[async_trait]
pub trait TenantPool: Send + Sync {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<()>;

    async fn fetch_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>>;

    async fn fetch_tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>>;

    /// Write all mutable fields, returning the number of rows changed
    async fn update_tenant(&self, tenant: &Tenant) -> Result<u64>;

    /// Stamp `deleted_at = at` on a live row, returning the number of rows changed
    async fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64>;

    /// Count rows for `id` whose `deleted_at` equals `at`
    async fn count_deleted_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<i64>;

    /// Invoke the `create_tenant_schema(tenant_id, subdomain)` routine
    async fn call_create_tenant_schema(&self, id: Uuid, subdomain: &str) -> Result<()>;

    async fn fetch_schema_name(&self, tenant_id: Uuid) -> Result<Option<String>>;

    async fn insert_provisioning_log(&self, entry: &ProvisioningLogEntry) -> Result<()>;

    /// Close the pool; later statements fail
    async fn close(&self);
}

/// Connector building sqlx PostgreSQL pools
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PoolConnector for PgConnector {
    #[instrument(skip(self, descriptor, options), fields(db.system = "postgresql"))]
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        options: &PoolOptions,
    ) -> Result<Arc<dyn TenantPool>> {
        if options.min_connections == 0 {
            return Err(Error::ValidationError(
                "min_connections must be > 0".to_string(),
            ));
        }
        if options.max_connections < options.min_connections {
            return Err(Error::ValidationError(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .max_lifetime(options.max_lifetime)
            .idle_timeout(options.idle_timeout)
            .connect(&descriptor.dsn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to open PostgreSQL pool");
                Error::ConnectionFailed(format!("Failed to open PostgreSQL pool: {}", e))
            })?;

        Ok(Arc::new(PgTenantPool::new(pool)))
    }
}

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    subdomain: String,
    encrypted_email: Option<Vec<u8>>,
    email_iv: Option<Vec<u8>>,
    status: String,
    provisioned: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = Error;

    fn try_from(row: TenantRow) -> Result<Self> {
        Ok(Tenant {
            id: row.id,
            name: row.name,
            subdomain: row.subdomain,
            contact_email: None,
            encrypted_email: row.encrypted_email.unwrap_or_default(),
            email_nonce: row.email_iv.unwrap_or_default(),
            status: row.status.parse::<TenantStatus>()?,
            provisioned: row.provisioned,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

fn optional_bytes(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.is_empty() {
        None
    } else {
        Some(bytes)
    }
}

/// [`TenantPool`] over a sqlx `PgPool`
#[derive(Debug, Clone)]
pub struct PgTenantPool {
    pool: PgPool,
}

impl PgTenantPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantPool for PgTenantPool {
    #[instrument(
        skip(self, tenant),
        fields(
            db.system = "postgresql",
            db.operation = "INSERT",
            db.sql.table = "tenants",
            tenant_id = %tenant.id
        )
    )]
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (
                id, name, subdomain, encrypted_email, email_iv, status, provisioned, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.subdomain)
        .bind(optional_bytes(&tenant.encrypted_email))
        .bind(optional_bytes(&tenant.email_nonce))
        .bind(tenant.status.as_str())
        .bind(tenant.provisioned)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "tenants")
    )]
    async fn fetch_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, subdomain, encrypted_email, email_iv, status, provisioned,
                   created_at, updated_at, deleted_at
            FROM tenants
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.map(Tenant::try_from).transpose()
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "tenants")
    )]
    async fn fetch_tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, subdomain, encrypted_email, email_iv, status, provisioned,
                   created_at, updated_at, deleted_at
            FROM tenants
            WHERE subdomain = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(subdomain)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.map(Tenant::try_from).transpose()
    }

    #[instrument(
        skip(self, tenant),
        fields(
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.sql.table = "tenants",
            tenant_id = %tenant.id
        )
    )]
    async fn update_tenant(&self, tenant: &Tenant) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET name = $2,
                subdomain = $3,
                encrypted_email = $4,
                email_iv = $5,
                status = $6,
                provisioned = $7,
                updated_at = $8
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.subdomain)
        .bind(optional_bytes(&tenant.encrypted_email))
        .bind(optional_bytes(&tenant.email_nonce))
        .bind(tenant.status.as_str())
        .bind(tenant.provisioned)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(result.rows_affected())
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "UPDATE", db.sql.table = "tenants")
    )]
    async fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET deleted_at = $2
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(result.rows_affected())
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "tenants")
    )]
    async fn count_deleted_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM tenants
            WHERE id = $1 AND deleted_at = $2
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(count)
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "tenant_schemas")
    )]
    async fn call_create_tenant_schema(&self, id: Uuid, subdomain: &str) -> Result<()> {
        sqlx::query("SELECT create_tenant_schema($1, $2)")
            .bind(id)
            .bind(subdomain)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

        Ok(())
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "tenant_schemas")
    )]
    async fn fetch_schema_name(&self, tenant_id: Uuid) -> Result<Option<String>> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT schema_name FROM tenant_schemas WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_error)?;

        Ok(name)
    }

    #[instrument(
        skip(self, entry),
        fields(
            db.system = "postgresql",
            db.operation = "INSERT",
            db.sql.table = "tenant_provisioning_logs",
            tenant_id = %entry.tenant_id,
            step = entry.step.as_str()
        )
    )]
    async fn insert_provisioning_log(&self, entry: &ProvisioningLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_provisioning_logs (tenant_id, step, status, details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.tenant_id)
        .bind(entry.step.as_str())
        .bind(entry.status.as_str())
        .bind(entry.details.as_ref().map(sqlx::types::Json))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Classify a sqlx error into a storage error
pub fn map_db_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::PoolTimedOut => {
            error!(error = %err, "Connection pool timed out");
            return Error::ConnectionFailed("Connection pool timed out".to_string());
        }
        sqlx::Error::PoolClosed => {
            error!(error = %err, "Connection pool closed");
            return Error::ConnectionFailed("Connection pool closed".to_string());
        }
        _ => {}
    }

    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code().as_deref() {
            match code {
                // unique_violation
                "23505" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Unique constraint violation"
                    );
                    return Error::AlreadyExists(db_err.message().to_string());
                }
                // foreign_key_violation
                "23503" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Foreign key violation"
                    );
                    return Error::NotFound(db_err.message().to_string());
                }
                // not_null_violation, check_violation
                "23502" | "23514" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Constraint violation"
                    );
                    return Error::ValidationError(format!(
                        "Constraint violation: {}",
                        db_err.message()
                    ));
                }
                _ => {}
            }
        }
    }

    Error::Database(err)
}
