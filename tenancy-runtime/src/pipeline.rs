//! Tenant provisioning pipeline.
//!
//! A bounded queue feeds exactly one worker task, so tenants are provisioned
//! one at a time in the order they were enqueued. Enqueueing into a full
//! queue waits until the worker takes the next tenant.
//!
//! Per tenant the worker:
//! 1. creates the tenant schema
//! 2. logs `init/pending`
//! 3. waits out the provisioning delay
//! 4. logs `db_setup/in_progress`
//! 5. decides the outcome
//! 6. logs `db_setup/success` and activates the tenant, or logs
//!    `db_setup/failed`, marks the tenant `error` and raises an alert
//! 7. records outcome metrics
//! 8. persists the tenant
//!
//! A failure in steps 1, 2, 4 or 6's log write stops the run for that tenant;
//! it is logged and the tenant stays `provisioning`.

use crate::alert::{Alert, AlertSink};
use crate::metrics::{PROVISIONING_DURATION, PROVISIONING_QUEUE_DEPTH, TENANTS_PROVISIONED_TOTAL};
use crate::outcome::OutcomeSource;
use crate::{Error, Result};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tenancy_storage::model::{ProvisioningStep, StepStatus};
use tenancy_storage::{ProvisioningLogEntry, Tenant, TenantRepository, TenantStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tenants that may wait in the queue
    pub queue_capacity: usize,

    /// Simulated external provisioning latency
    pub step_delay: Duration,

    /// Database host reported in the `db_setup/in_progress` entry
    pub provisioning_host: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            step_delay: Duration::from_secs(2),
            provisioning_host: "db.example.com".to_string(),
        }
    }
}

struct ProvisioningJob {
    tenant: Tenant,
    enqueued_at: Instant,
}

struct Worker {
    repository: Arc<TenantRepository>,
    outcome: Arc<dyn OutcomeSource>,
    alerts: Arc<dyn AlertSink>,
    config: PipelineConfig,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<ProvisioningJob>) {
        info!(
            queue_capacity = self.config.queue_capacity,
            "Provisioning worker started"
        );

        while let Some(job) = receiver.recv().await {
            PROVISIONING_QUEUE_DEPTH.set(receiver.len() as i64);
            let tenant_id = job.tenant.id;

            match self.provision(job).await {
                Ok(status) => {
                    info!(tenant_id = %tenant_id, status = %status, "Tenant provisioning finished");
                }
                Err(e) => {
                    error!(
                        tenant_id = %tenant_id,
                        error = %e,
                        "Tenant provisioning aborted, tenant left in provisioning"
                    );
                }
            }
        }

        info!("Provisioning worker stopped");
    }

    #[instrument(skip(self, job), fields(tenant_id = %job.tenant.id, subdomain = %job.tenant.subdomain))]
    async fn provision(&self, job: ProvisioningJob) -> Result<TenantStatus> {
        let ProvisioningJob {
            mut tenant,
            enqueued_at,
        } = job;

        self.repository
            .create_tenant_schema(tenant.id, &tenant.subdomain)
            .await
            .map_err(|source| Error::Step {
                step: "create_schema",
                source,
            })?;

        self.log(tenant.id, ProvisioningStep::Init, StepStatus::Pending, None)
            .await?;

        tokio::time::sleep(self.config.step_delay).await;

        self.log(
            tenant.id,
            ProvisioningStep::DbSetup,
            StepStatus::InProgress,
            Some(json!({ "host": self.config.provisioning_host })),
        )
        .await?;

        if self.outcome.succeeded() {
            self.log(tenant.id, ProvisioningStep::DbSetup, StepStatus::Success, None)
                .await?;
            tenant.status = TenantStatus::Active;
            tenant.provisioned = true;
        } else {
            let details = json!({ "error": "timeout" });
            self.log(
                tenant.id,
                ProvisioningStep::DbSetup,
                StepStatus::Failed,
                Some(details.clone()),
            )
            .await?;
            tenant.status = TenantStatus::Error;
            self.alerts
                .send(Alert::provisioning_failed(tenant.id, details))
                .await;
        }

        TENANTS_PROVISIONED_TOTAL
            .with_label_values(&[tenant.status.as_str()])
            .inc();
        PROVISIONING_DURATION.observe(enqueued_at.elapsed().as_secs_f64());

        self.repository
            .update(&tenant)
            .await
            .map_err(|source| Error::Step {
                step: "persist",
                source,
            })?;

        Ok(tenant.status)
    }

    async fn log(
        &self,
        tenant_id: Uuid,
        step: ProvisioningStep,
        status: StepStatus,
        details: Option<serde_json::Value>,
    ) -> Result<()> {
        debug!(step = step.as_str(), status = status.as_str(), "Recording provisioning step");
        self.repository
            .create_provisioning_log(ProvisioningLogEntry::new(tenant_id, step, status, details))
            .await
            .map_err(|source| Error::Step {
                step: step.as_str(),
                source,
            })
    }
}

/// Bounded provisioning queue with a single worker.
///
/// The worker runs on its own task; dropping or cancelling the caller of
/// [`enqueue`](ProvisioningPipeline::enqueue) has no effect on a tenant once
/// it is queued.
pub struct ProvisioningPipeline {
    sender: Mutex<Option<mpsc::Sender<ProvisioningJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    capacity: usize,
}

impl ProvisioningPipeline {
    /// Start the worker on the current Tokio runtime
    pub fn start(
        repository: Arc<TenantRepository>,
        outcome: Arc<dyn OutcomeSource>,
        alerts: Arc<dyn AlertSink>,
        config: PipelineConfig,
    ) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be > 0".to_string(),
            ));
        }

        let capacity = config.queue_capacity;
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = Worker {
            repository,
            outcome,
            alerts,
            config,
        };
        let handle = tokio::spawn(worker.run(receiver));

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender(&self) -> Result<mpsc::Sender<ProvisioningJob>> {
        self.sender
            .lock()
            .map_err(|_| Error::Internal("provisioning sender lock poisoned".to_string()))?
            .clone()
            .ok_or(Error::QueueClosed)
    }

    /// Queue a tenant for provisioning.
    ///
    /// Waits while the queue is full. Fails only once the pipeline has been
    /// shut down.
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id))]
    pub async fn enqueue(&self, tenant: Tenant) -> Result<()> {
        let sender = self.sender()?;
        let job = ProvisioningJob {
            tenant,
            enqueued_at: Instant::now(),
        };

        sender.send(job).await.map_err(|_| Error::QueueClosed)?;
        PROVISIONING_QUEUE_DEPTH.set((sender.max_capacity() - sender.capacity()) as i64);
        debug!("Tenant queued for provisioning");
        Ok(())
    }

    /// Stop accepting tenants and wait for the worker to finish the ones
    /// already queued.
    pub async fn shutdown(&self) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| Error::Internal("provisioning sender lock poisoned".to_string()))?
            .take();
        drop(sender);

        let handle = self
            .worker
            .lock()
            .map_err(|_| Error::Internal("provisioning worker lock poisoned".to_string()))?
            .take();

        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::Internal(format!("Provisioning worker panicked: {}", e)))?;
        }
        info!("Provisioning pipeline drained");
        Ok(())
    }
}
