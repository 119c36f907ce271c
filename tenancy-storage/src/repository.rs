//! Tenant repository
//!
//! Every database-bearing operation leases a pool, runs its statements and
//! releases the lease on every exit path. Reads by id go through the
//! tenant cache; writes invalidate it. The contact email is encrypted before
//! it reaches the pool and decrypted on the way out.

use crate::cache::TenantCache;
use crate::crypto::EmailCipher;
use crate::lease::LeaseClient;
use crate::metrics::REPOSITORY_OPERATION_SECONDS;
use crate::model::{validate_subdomain, NewTenant, ProvisioningLogEntry, Tenant, TenantSnapshot};
use crate::postgres::TenantPool;
use crate::{Error, Result};
use chrono::{DateTime, SubsecRound, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Leased operations slower than this are logged
const SLOW_OPERATION_MS: u128 = 100;

/// PostgreSQL stores microseconds; stamping at that precision keeps the
/// values we write comparable with what we read back.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub struct TenantRepository {
    leases: LeaseClient,
    cache: TenantCache,
    cipher: Arc<EmailCipher>,
}

impl TenantRepository {
    pub fn new(leases: LeaseClient, cache: TenantCache, cipher: Arc<EmailCipher>) -> Self {
        Self {
            leases,
            cache,
            cipher,
        }
    }

    /// Close every leased pool still held locally. Call once at shutdown.
    pub async fn close(&self) {
        self.leases.close_all().await;
    }

    /// Run `f` against a leased pool.
    ///
    /// The lease is released whether `f` succeeds or fails. A failed release
    /// is logged and does not replace the operation's result.
    async fn with_lease<'a, F, T>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn TenantPool>) -> BoxFuture<'a, Result<T>>,
        T: Send,
    {
        let start = Instant::now();
        let _timer = REPOSITORY_OPERATION_SECONDS
            .with_label_values(&[operation])
            .start_timer();

        let lease = self.leases.acquire().await?;
        let lease_id = lease.id().clone();

        let result = f(lease.pool()).await;

        if let Err(e) = self.leases.release(lease).await {
            warn!(
                lease_id = %lease_id,
                operation,
                error = %e,
                "Failed to release connection lease"
            );
        }

        let elapsed = start.elapsed();
        if elapsed.as_millis() > SLOW_OPERATION_MS {
            warn!(
                lease_id = %lease_id,
                operation,
                duration_ms = elapsed.as_millis(),
                "Slow database operation detected"
            );
        }

        result
    }

    /// Fill in the plaintext email of a tenant read from storage
    fn open(&self, mut tenant: Tenant) -> Result<Tenant> {
        tenant.contact_email = self
            .cipher
            .decrypt_optional(&tenant.encrypted_email, &tenant.email_nonce)?;
        Ok(tenant)
    }

    /// Replace the stored email with a freshly sealed one
    fn seal(&self, tenant: &mut Tenant) -> Result<()> {
        match tenant.contact_email.as_deref() {
            Some(email) if !email.is_empty() => {
                let sealed = self.cipher.encrypt(email)?;
                tenant.encrypted_email = sealed.ciphertext;
                tenant.email_nonce = sealed.nonce;
            }
            Some(_) => {
                tenant.encrypted_email.clear();
                tenant.email_nonce.clear();
            }
            None => {}
        }
        Ok(())
    }

    /// Create a tenant.
    ///
    /// Assigns the id and timestamps, encrypts the contact email and inserts
    /// the row. Fails with `AlreadyExists` when a non-deleted tenant already
    /// uses the subdomain.
    #[instrument(skip(self, new), fields(subdomain = %new.subdomain, tenant_id = tracing::field::Empty))]
    pub async fn create(&self, new: NewTenant) -> Result<Tenant> {
        validate_subdomain(&new.subdomain)?;

        let created_at = now();
        let mut tenant = Tenant {
            id: Uuid::new_v4(),
            name: new.name,
            subdomain: new.subdomain,
            contact_email: new.contact_email,
            encrypted_email: Vec::new(),
            email_nonce: Vec::new(),
            status: new.status,
            provisioned: new.provisioned,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        };
        self.seal(&mut tenant)?;
        tracing::Span::current().record("tenant_id", tracing::field::display(tenant.id));

        let row = &tenant;
        self.with_lease("create", |pool| {
            Box::pin(async move {
                if pool
                    .fetch_tenant_by_subdomain(&row.subdomain)
                    .await?
                    .is_some()
                {
                    return Err(Error::AlreadyExists(format!(
                        "Subdomain '{}' is already in use",
                        row.subdomain
                    )));
                }
                pool.insert_tenant(row).await
            })
        })
        .await?;

        self.cache.invalidate(tenant.id).await;
        info!(tenant_id = %tenant.id, status = %tenant.status, "Tenant created");
        Ok(tenant)
    }

    /// Look a tenant up by id.
    ///
    /// A cache hit is returned without touching the database. On a miss the
    /// row is read, decrypted and cached. Soft-deleted tenants are `None`.
    #[instrument(skip(self), fields(tenant_id = %id))]
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        if let Some(snapshot) = self.cache.get(id).await {
            match self.open(Tenant::from(snapshot)) {
                Ok(tenant) => return Ok(Some(tenant)),
                Err(e) => {
                    warn!(error = %e, "Cached tenant could not be decrypted, reading database");
                }
            }
        }

        let row = self
            .with_lease("get_by_id", |pool| {
                Box::pin(async move { pool.fetch_tenant_by_id(id).await })
            })
            .await?;

        let Some(row) = row else {
            debug!("Tenant not found");
            return Ok(None);
        };

        let tenant = self.open(row)?;
        self.cache.put(&TenantSnapshot::from(&tenant)).await;
        Ok(Some(tenant))
    }

    /// Look a non-deleted tenant up by subdomain. Not cached.
    #[instrument(skip(self))]
    pub async fn get_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>> {
        let row = self
            .with_lease("get_by_subdomain", |pool| {
                Box::pin(async move { pool.fetch_tenant_by_subdomain(subdomain).await })
            })
            .await?;

        row.map(|row| self.open(row)).transpose()
    }

    /// Persist all mutable fields of `tenant`.
    ///
    /// The email is re-encrypted when `contact_email` is set. Fails with
    /// `NotFound` for a missing or soft-deleted tenant and with
    /// `AlreadyExists` when moving onto a subdomain another live tenant uses.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id, status = %tenant.status))]
    pub async fn update(&self, tenant: &Tenant) -> Result<Tenant> {
        validate_subdomain(&tenant.subdomain)?;

        let mut updated = tenant.clone();
        self.seal(&mut updated)?;
        updated.updated_at = now();
        updated.deleted_at = None;

        let row = &updated;
        let created_at = self
            .with_lease("update", |pool| {
                Box::pin(async move {
                    let current = pool
                        .fetch_tenant_by_id(row.id)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("Tenant {}", row.id)))?;

                    if current.subdomain != row.subdomain {
                        if let Some(other) = pool.fetch_tenant_by_subdomain(&row.subdomain).await? {
                            if other.id != row.id {
                                return Err(Error::AlreadyExists(format!(
                                    "Subdomain '{}' is already in use",
                                    row.subdomain
                                )));
                            }
                        }
                    }

                    if pool.update_tenant(row).await? == 0 {
                        return Err(Error::NotFound(format!("Tenant {}", row.id)));
                    }
                    Ok(current.created_at)
                })
            })
            .await?;

        updated.created_at = created_at;
        self.cache.invalidate(updated.id).await;
        debug!("Tenant updated");
        Ok(updated)
    }

    /// Soft-delete a tenant.
    ///
    /// Stamps `deleted_at` on the live row, then reads back how many rows
    /// carry this call's stamp. Either count being zero means the tenant was
    /// missing, already deleted, or deleted by a concurrent call first; all
    /// report `NotFound`.
    #[instrument(skip(self), fields(tenant_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let deleted_at = now();

        self.with_lease("delete", |pool| {
            Box::pin(async move {
                if pool.mark_deleted(id, deleted_at).await? == 0 {
                    return Err(Error::NotFound(format!(
                        "Tenant {} not found or already deleted",
                        id
                    )));
                }

                let verified = pool.count_deleted_at(id, deleted_at).await?;
                if verified == 0 {
                    return Err(Error::NotFound(format!(
                        "Tenant {} not found or already deleted",
                        id
                    )));
                }
                Ok(())
            })
        })
        .await?;

        self.cache.invalidate(id).await;
        info!("Tenant soft-deleted");
        Ok(())
    }

    /// Create the tenant's database schema through the `create_tenant_schema` routine
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn create_tenant_schema(&self, tenant_id: Uuid, subdomain: &str) -> Result<()> {
        self.with_lease("create_tenant_schema", |pool| {
            Box::pin(async move { pool.call_create_tenant_schema(tenant_id, subdomain).await })
        })
        .await?;

        self.cache.invalidate(tenant_id).await;
        Ok(())
    }

    /// Name of the tenant's schema, or `None` if none was created
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn get_tenant_schema(&self, tenant_id: Uuid) -> Result<Option<String>> {
        self.with_lease("get_tenant_schema", |pool| {
            Box::pin(async move { pool.fetch_schema_name(tenant_id).await })
        })
        .await
    }

    /// Append a provisioning audit entry
    #[instrument(
        skip(self, entry),
        fields(
            tenant_id = %entry.tenant_id,
            step = entry.step.as_str(),
            status = entry.status.as_str()
        )
    )]
    pub async fn create_provisioning_log(&self, entry: ProvisioningLogEntry) -> Result<()> {
        let entry = &entry;
        self.with_lease("create_provisioning_log", |pool| {
            Box::pin(async move { pool.insert_provisioning_log(entry).await })
        })
        .await
    }
}
