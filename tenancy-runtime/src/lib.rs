//! # Tenancy Runtime
//!
//! Background provisioning for tenants: a bounded FIFO queue feeding a
//! single worker that walks each tenant through its provisioning steps.

pub mod alert;
pub mod metrics;
pub mod outcome;
pub mod pipeline;

// Re-export commonly used types
pub use alert::{Alert, AlertSink, Severity, TracingAlertSink};
pub use outcome::{FixedOutcome, OutcomeSource, RandomOutcome};
pub use pipeline::{PipelineConfig, ProvisioningPipeline};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for runtime operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Provisioning queue is closed")]
    QueueClosed,

    #[error("Provisioning step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: tenancy_storage::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
