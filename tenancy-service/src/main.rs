//! Tenant management service
//!
//! Wires the tenant repository (leased PostgreSQL pools, Redis cache, email
//! encryption) to the provisioning pipeline and runs until Ctrl-C or SIGTERM,
//! then drains the provisioning queue and closes the leased pools before
//! exiting. Redis is dialed on first use, so the service starts without it.
//!
//! See [`ServiceConfig::from_env`] for the environment variables read at
//! startup.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tenancy_runtime::{ProvisioningPipeline, RandomOutcome, TracingAlertSink};
use tenancy_service::tracing_config::{init_tracing, LogFormat};
use tenancy_service::{ServiceConfig, TenantService};
use tenancy_storage::broker::HttpLeaseBroker;
use tenancy_storage::{
    EmailCipher, LeaseClient, PgConnector, RedisCache, TenantCache, TenantRepository,
};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing(LogFormat::from_environment()) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    info!("Starting tenant management service");

    if let Err(e) = run().await {
        error!(error = %format!("{:#}", e), "Tenant management service failed");
        std::process::exit(1);
    }

    info!("Tenant management service shut down gracefully");
}

async fn run() -> Result<()> {
    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    info!(config = ?config, "Configuration loaded");

    let broker = HttpLeaseBroker::new(config.broker_url.clone())
        .context("Failed to build lease broker client")?;
    let leases = LeaseClient::new(
        Arc::new(broker),
        Arc::new(PgConnector::new()),
        config.descriptor(),
        config.pool.clone(),
    );

    let redis = RedisCache::open(&config.redis_url)
        .map_err(|e| anyhow!("Invalid Redis URL: {}", e))?;
    let cache = TenantCache::with_ttl(Arc::new(redis), config.cache_ttl);

    let cipher = EmailCipher::new(&config.encryption_key)
        .context("Failed to initialize email encryption")?;

    let repository = Arc::new(TenantRepository::new(leases, cache, Arc::new(cipher)));
    info!("Tenant repository initialized");

    let pipeline = Arc::new(
        ProvisioningPipeline::start(
            repository.clone(),
            Arc::new(RandomOutcome::default()),
            Arc::new(TracingAlertSink),
            config.pipeline(),
        )
        .context("Failed to start provisioning pipeline")?,
    );

    // Handed to the RPC transport once one is attached.
    let _service = TenantService::new(repository.clone(), pipeline.clone());
    info!(
        queue_capacity = pipeline.capacity(),
        "Tenant management service ready"
    );

    shutdown_signal().await?;

    pipeline
        .shutdown()
        .await
        .context("Failed to drain provisioning pipeline")?;
    repository.close().await;
    Ok(())
}

/// Wait for SIGTERM or Ctrl-C
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to listen for Ctrl-C") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl-C, shutting down");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, shutting down");
        }
    }
    Ok(())
}
