//! # Tenancy Service
//!
//! Transport-agnostic request façade over the tenant repository and the
//! provisioning pipeline, plus the configuration and tracing setup used by
//! the `tenancy-service` binary.

pub mod config;
pub mod service;
pub mod tracing_config;
pub mod validation;

pub use config::ServiceConfig;
pub use service::{TenantService, TenantUpdate};

use tracing::error;

/// Result type for service requests
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Request-level errors.
///
/// Storage and runtime failures that callers cannot act on surface as
/// `Internal`; their details go to the log only.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error")]
    Internal,
}

impl From<tenancy_storage::Error> for ServiceError {
    fn from(err: tenancy_storage::Error) -> Self {
        use tenancy_storage::Error as StorageError;

        match err {
            StorageError::ValidationError(msg) => ServiceError::Validation(msg),
            StorageError::AlreadyExists(msg) => ServiceError::Conflict(msg),
            StorageError::NotFound(msg) => ServiceError::NotFound(msg),
            other => {
                error!(error = %other, "Storage operation failed");
                ServiceError::Internal
            }
        }
    }
}

impl From<tenancy_runtime::Error> for ServiceError {
    fn from(err: tenancy_runtime::Error) -> Self {
        error!(error = %err, "Provisioning pipeline rejected request");
        ServiceError::Internal
    }
}
