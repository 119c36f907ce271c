//! Cache-aside store for tenant reads.
//!
//! Reads check the cache first and populate it on a miss; writes invalidate
//! the tenant's key. Cache failures are logged and swallowed, so the cache
//! never fails a database operation.

use crate::metrics::record_cache_request;
use crate::model::TenantSnapshot;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default lifetime of a cached tenant
pub const DEFAULT_TENANT_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on dialing the cache server
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors from a cache backend
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// Key/value cache with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), CacheError>;

    async fn invalidate(&self, key: &str) -> Result<(), CacheError>;
}

/// Redis-backed cache (`GET`, `SETEX`, `DEL`).
///
/// The connection is made on first use and retried on the next call if it
/// fails, so an unreachable server only turns cache calls into errors.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    connection: Arc<OnceCell<ConnectionManager>>,
}

impl RedisCache {
    /// Cache client for the server at `url`. Only the URL is checked here.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: Arc::new(OnceCell::new()),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let connection = self
            .connection
            .get_or_try_init(|| {
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(1)
                    .set_connection_timeout(CONNECT_TIMEOUT);
                ConnectionManager::new_with_config(self.client.clone(), config)
            })
            .await?;
        Ok(connection.clone())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// Tenant-shaped view over a [`CacheStore`], keyed as `tenant:<id>`.
#[derive(Clone)]
pub struct TenantCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl TenantCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TENANT_TTL)
    }

    pub fn with_ttl(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(id: Uuid) -> String {
        format!("tenant:{}", id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached snapshot for `id`, or `None` on a miss.
    ///
    /// Backend errors and undecodable entries are reported as misses.
    pub async fn get(&self, id: Uuid) -> Option<TenantSnapshot> {
        let key = Self::key(id);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                record_cache_request("miss");
                return None;
            }
            Err(e) => {
                record_cache_request("error");
                warn!(tenant_id = %id, error = %e, "Tenant cache read failed");
                return None;
            }
        };

        match serde_json::from_str::<TenantSnapshot>(&raw) {
            Ok(snapshot) => {
                record_cache_request("hit");
                debug!(tenant_id = %id, "Tenant cache hit");
                Some(snapshot)
            }
            Err(e) => {
                record_cache_request("error");
                warn!(tenant_id = %id, error = %e, "Discarding undecodable tenant cache entry");
                None
            }
        }
    }

    /// Store a snapshot, best-effort
    pub async fn put(&self, snapshot: &TenantSnapshot) {
        let value = match serde_json::to_string(snapshot) {
            Ok(value) => value,
            Err(e) => {
                warn!(tenant_id = %snapshot.id, error = %e, "Failed to encode tenant for cache");
                return;
            }
        };

        if let Err(e) = self
            .store
            .set_with_ttl(&Self::key(snapshot.id), &value, self.ttl)
            .await
        {
            warn!(tenant_id = %snapshot.id, error = %e, "Tenant cache write failed");
        }
    }

    /// Drop the cached entry for `id`, best-effort
    pub async fn invalidate(&self, id: Uuid) {
        if let Err(e) = self.store.invalidate(&Self::key(id)).await {
            warn!(tenant_id = %id, error = %e, "Tenant cache invalidation failed");
        }
    }
}
