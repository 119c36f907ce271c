//! Service configuration
//!
//! Loaded from `TENANCY_*` environment variables and validated before any
//! connection is made.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tenancy_runtime::PipelineConfig;
use tenancy_storage::lease::mask_dsn;
use tenancy_storage::{ConnectionDescriptor, EncryptionKey, PoolOptions};

const DEFAULT_LEASE_OWNER: &str = "tenant-management-service";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_PROVISIONING_HOST: &str = "db.example.com";

/// Tenant service configuration
#[derive(Clone)]
pub struct ServiceConfig {
    /// DSN handed to the lease broker in the connection descriptor
    pub database_url: String,
    pub lease_owner: String,
    /// Lease broker base URL
    pub broker_url: String,
    pub redis_url: String,
    pub encryption_key: EncryptionKey,
    pub cache_ttl: Duration,
    pub pool: PoolOptions,
    pub queue_capacity: usize,
    pub provisioning_delay: Duration,
    pub provisioning_host: String,
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `TENANCY_DATABASE_URL`: tenant database DSN (required)
    /// - `TENANCY_LEASE_OWNER`: owner reported to the broker (default: tenant-management-service)
    /// - `TENANCY_BROKER_URL`: lease broker base URL (required)
    /// - `TENANCY_REDIS_URL`: cache server (default: redis://localhost:6379)
    /// - `TENANCY_ENCRYPTION_KEY`: base64 of a 32-byte key (required)
    /// - `TENANCY_CACHE_TTL_SECS`: cached tenant lifetime (default: 3600)
    /// - `TENANCY_PROVISIONING_QUEUE_CAPACITY`: queued tenants (default: 10)
    /// - `TENANCY_PROVISIONING_DELAY_MS`: simulated provisioning latency (default: 2000)
    /// - `TENANCY_PROVISIONING_HOST`: host reported in provisioning logs (default: db.example.com)
    /// - `TENANCY_POOL_MAX_CONNECTIONS` (20), `TENANCY_POOL_MIN_CONNECTIONS` (5),
    ///   `TENANCY_POOL_MAX_LIFETIME_SECS` (1800), `TENANCY_POOL_IDLE_TIMEOUT_SECS` (300)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow!("{} environment variable not set", key))
        };

        let database_url = required("TENANCY_DATABASE_URL")?;
        let broker_url = required("TENANCY_BROKER_URL")?;
        let encryption_key = EncryptionKey::from_base64(&required("TENANCY_ENCRYPTION_KEY")?)
            .context("TENANCY_ENCRYPTION_KEY must be base64 of exactly 32 bytes")?;

        let defaults = PoolOptions::default();
        let pool = PoolOptions {
            max_connections: parse_or(
                &lookup,
                "TENANCY_POOL_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            min_connections: parse_or(
                &lookup,
                "TENANCY_POOL_MIN_CONNECTIONS",
                defaults.min_connections,
            )?,
            max_lifetime: Duration::from_secs(parse_or(
                &lookup,
                "TENANCY_POOL_MAX_LIFETIME_SECS",
                defaults.max_lifetime.as_secs(),
            )?),
            idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TENANCY_POOL_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )?),
        };

        let config = Self {
            database_url,
            lease_owner: lookup("TENANCY_LEASE_OWNER")
                .unwrap_or_else(|| DEFAULT_LEASE_OWNER.to_string()),
            broker_url,
            redis_url: lookup("TENANCY_REDIS_URL")
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            encryption_key,
            cache_ttl: Duration::from_secs(parse_or(&lookup, "TENANCY_CACHE_TTL_SECS", 3600)?),
            pool,
            queue_capacity: parse_or(&lookup, "TENANCY_PROVISIONING_QUEUE_CAPACITY", 10)?,
            provisioning_delay: Duration::from_millis(parse_or(
                &lookup,
                "TENANCY_PROVISIONING_DELAY_MS",
                2000,
            )?),
            provisioning_host: lookup("TENANCY_PROVISIONING_HOST")
                .unwrap_or_else(|| DEFAULT_PROVISIONING_HOST.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.lease_owner.trim().is_empty() {
            bail!("lease_owner cannot be empty");
        }
        if !(self.broker_url.starts_with("http://") || self.broker_url.starts_with("https://")) {
            bail!("broker_url must be an http or https URL");
        }
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            bail!("redis_url must use the redis:// or rediss:// scheme");
        }
        if self.queue_capacity == 0 {
            bail!("provisioning queue capacity must be > 0");
        }
        if self.pool.min_connections == 0 {
            bail!("pool min_connections must be > 0");
        }
        if self.pool.max_connections < self.pool.min_connections {
            bail!(
                "pool max_connections ({}) must be >= min_connections ({})",
                self.pool.max_connections,
                self.pool.min_connections
            );
        }
        Ok(())
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(self.lease_owner.clone(), self.database_url.clone())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.queue_capacity,
            step_delay: self.provisioning_delay,
            provisioning_host: self.provisioning_host.clone(),
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("database_url", &mask_dsn(&self.database_url))
            .field("lease_owner", &self.lease_owner)
            .field("broker_url", &self.broker_url)
            .field("redis_url", &mask_dsn(&self.redis_url))
            .field("encryption_key", &self.encryption_key)
            .field("cache_ttl", &self.cache_ttl)
            .field("pool", &self.pool)
            .field("queue_capacity", &self.queue_capacity)
            .field("provisioning_delay", &self.provisioning_delay)
            .field("provisioning_host", &self.provisioning_host)
            .finish()
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tenancy_tests::fixtures::keys::test_key_base64;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut vars: HashMap<String, String> = [
            ("TENANCY_DATABASE_URL", "postgresql://svc:hunter2@db:5432/tenants"),
            ("TENANCY_BROKER_URL", "http://broker:8080"),
            ("TENANCY_ENCRYPTION_KEY", test_key_base64()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.lease_owner, "tenant-management-service");
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.provisioning_delay, Duration::from_millis(2000));
        assert_eq!(config.provisioning_host, "db.example.com");
        assert_eq!(config.pool, PoolOptions::default());
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(env(&[
            ("TENANCY_LEASE_OWNER", "billing"),
            ("TENANCY_PROVISIONING_QUEUE_CAPACITY", "3"),
            ("TENANCY_PROVISIONING_DELAY_MS", "50"),
            ("TENANCY_POOL_MAX_CONNECTIONS", "8"),
            ("TENANCY_POOL_MIN_CONNECTIONS", "2"),
        ]))
        .unwrap();

        assert_eq!(config.descriptor().owner, "billing");
        let pipeline = config.pipeline();
        assert_eq!(pipeline.queue_capacity, 3);
        assert_eq!(pipeline.step_delay, Duration::from_millis(50));
        assert_eq!(config.pool.max_connections, 8);
        assert_eq!(config.pool.min_connections, 2);
    }

    #[test]
    fn test_missing_required_values() {
        for key in [
            "TENANCY_DATABASE_URL",
            "TENANCY_BROKER_URL",
            "TENANCY_ENCRYPTION_KEY",
        ] {
            let result = ServiceConfig::from_lookup(env(&[(key, "")]));
            let message = format!("{:#}", result.unwrap_err());
            assert!(message.contains(key), "{}", message);
        }
    }

    #[test]
    fn test_short_key_rejected() {
        let result = ServiceConfig::from_lookup(env(&[("TENANCY_ENCRYPTION_KEY", "c2hvcnQ=")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        assert!(ServiceConfig::from_lookup(env(&[("TENANCY_CACHE_TTL_SECS", "soon")])).is_err());
        assert!(
            ServiceConfig::from_lookup(env(&[("TENANCY_PROVISIONING_QUEUE_CAPACITY", "0")]))
                .is_err()
        );
    }

    #[test]
    fn test_pool_bounds_validated() {
        assert!(ServiceConfig::from_lookup(env(&[("TENANCY_POOL_MIN_CONNECTIONS", "0")])).is_err());
        assert!(ServiceConfig::from_lookup(env(&[
            ("TENANCY_POOL_MAX_CONNECTIONS", "2"),
            ("TENANCY_POOL_MIN_CONNECTIONS", "4"),
        ]))
        .is_err());
    }

    #[test]
    fn test_broker_url_scheme() {
        assert!(ServiceConfig::from_lookup(env(&[("TENANCY_BROKER_URL", "broker:8080")])).is_err());
    }

    #[test]
    fn test_debug_masks_secrets() {
        let config = ServiceConfig::from_lookup(env(&[])).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains(test_key_base64()));
        assert!(rendered.contains("****"));
    }
}
