//! Operational alerts raised by the provisioning worker

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// An operational alert about a tenant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub name: &'static str,
    pub severity: Severity,
    pub tenant_id: Uuid,
    pub summary: String,
    pub details: serde_json::Value,
}

impl Alert {
    /// Alert for a provisioning run that ended in failure
    pub fn provisioning_failed(tenant_id: Uuid, details: serde_json::Value) -> Self {
        Self {
            name: "tenant_provisioning_failed",
            severity: Severity::Critical,
            tenant_id,
            summary: "Provisioning issue detected".to_string(),
            details,
        }
    }
}

/// Destination for operational alerts.
///
/// Delivery is best-effort; a sink must not fail the caller.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: Alert);
}

/// Alert sink that emits alerts as tracing events
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: Alert) {
        match alert.severity {
            Severity::Critical => error!(
                alert = alert.name,
                tenant_id = %alert.tenant_id,
                details = %alert.details,
                "ALERT: {}",
                alert.summary
            ),
            Severity::Warning => warn!(
                alert = alert.name,
                tenant_id = %alert.tenant_id,
                details = %alert.details,
                "ALERT: {}",
                alert.summary
            ),
        }
    }
}
