//! Tenant request handling

use crate::validation::{parse_status, validate_email, validate_name, validate_subdomain_format};
use crate::{Result, ServiceError};
use std::sync::Arc;
use tenancy_runtime::ProvisioningPipeline;
use tenancy_storage::{NewTenant, Tenant, TenantRepository};
use tracing::{info, instrument};
use uuid::Uuid;

/// Replacement values for an existing tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantUpdate {
    pub name: String,
    pub subdomain: String,
    pub status: String,
    /// `None` keeps the stored email; `Some("")` clears it
    pub contact_email: Option<String>,
}

/// Tenant lifecycle operations exposed to the transport layer
pub struct TenantService {
    repository: Arc<TenantRepository>,
    pipeline: Arc<ProvisioningPipeline>,
}

impl TenantService {
    pub fn new(repository: Arc<TenantRepository>, pipeline: Arc<ProvisioningPipeline>) -> Self {
        Self {
            repository,
            pipeline,
        }
    }

    /// Create a tenant and queue it for provisioning.
    ///
    /// The tenant is returned in `provisioning` state as soon as it is
    /// queued. Waits while the provisioning queue is full.
    #[instrument(skip(self, name, subdomain, contact_email), fields(subdomain = %subdomain))]
    pub async fn create_tenant(
        &self,
        name: &str,
        subdomain: &str,
        contact_email: &str,
    ) -> Result<Tenant> {
        validate_name(name)?;
        validate_subdomain_format(subdomain)?;
        validate_email(contact_email)?;

        let tenant = self
            .repository
            .create(NewTenant::new(name, subdomain).with_contact_email(contact_email))
            .await?;

        self.pipeline.enqueue(tenant.clone()).await?;
        info!(tenant_id = %tenant.id, "Tenant accepted for provisioning");
        Ok(tenant)
    }

    #[instrument(skip(self), fields(tenant_id = %id))]
    pub async fn get_tenant(&self, id: Uuid) -> Result<Tenant> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("tenant {}", id)))
    }

    /// Replace a tenant's name, subdomain, status and optionally its email
    #[instrument(skip(self, update), fields(tenant_id = %id))]
    pub async fn update_tenant(&self, id: Uuid, update: TenantUpdate) -> Result<Tenant> {
        validate_name(&update.name)?;
        validate_subdomain_format(&update.subdomain)?;
        let status = parse_status(&update.status)?;
        if let Some(email) = update.contact_email.as_deref().filter(|e| !e.is_empty()) {
            validate_email(email)?;
        }

        let mut tenant = self.get_tenant(id).await?;
        tenant.name = update.name;
        tenant.subdomain = update.subdomain;
        tenant.status = status;
        if let Some(email) = update.contact_email {
            tenant.contact_email = Some(email);
        }

        let updated = self.repository.update(&tenant).await?;
        info!(status = %updated.status, "Tenant updated");
        Ok(updated)
    }

    /// Soft-delete a tenant. A second delete of the same tenant is `NotFound`.
    #[instrument(skip(self), fields(tenant_id = %id))]
    pub async fn delete_tenant(&self, id: Uuid) -> Result<()> {
        self.repository.delete(id).await?;
        Ok(())
    }

    /// Name of the schema provisioned for the tenant
    #[instrument(skip(self), fields(tenant_id = %id))]
    pub async fn tenant_schema(&self, id: Uuid) -> Result<String> {
        self.repository
            .get_tenant_schema(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("schema for tenant {}", id)))
    }
}
