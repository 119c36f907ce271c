//! # Tenancy Storage
//!
//! Tenant records for the control plane, stored in PostgreSQL through
//! connection pools leased from an external broker, with cache-aside reads
//! and an encrypted contact email.

pub mod broker;
pub mod cache;
pub mod crypto;
pub mod lease;
pub mod metrics;
pub mod model;
pub mod postgres;
pub mod repository;

// Re-export commonly used types
pub use cache::{CacheStore, RedisCache, TenantCache};
pub use crypto::{EmailCipher, EncryptionKey, SealedField};
pub use lease::{ConnectionDescriptor, LeaseBroker, LeaseClient, LeaseGrant, LeaseId, PoolOptions};
pub use model::{NewTenant, ProvisioningLogEntry, Tenant, TenantSnapshot, TenantStatus};
pub use postgres::{PgConnector, PgTenantPool, PoolConnector, TenantPool};
pub use repository::TenantRepository;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Lease broker error: {0}")]
    Lease(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
