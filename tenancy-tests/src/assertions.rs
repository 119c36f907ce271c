//! Custom assertions for common verification patterns

use tenancy_storage::model::{ProvisioningStep, StepStatus};
use tenancy_storage::{ProvisioningLogEntry, TenantStatus};

/// Steps and statuses of a log, in order
pub fn trail(logs: &[ProvisioningLogEntry]) -> Vec<(ProvisioningStep, StepStatus)> {
    logs.iter().map(|entry| (entry.step, entry.status)).collect()
}

/// Assert a completed provisioning run wrote exactly
/// `init/pending, db_setup/in_progress, db_setup/<outcome>`, with the
/// outcome matching the tenant's final status.
pub fn assert_provisioning_trail(logs: &[ProvisioningLogEntry], final_status: TenantStatus) {
    let outcome = match final_status {
        TenantStatus::Active => StepStatus::Success,
        TenantStatus::Error => StepStatus::Failed,
        other => panic!("Provisioning cannot end in status {}", other),
    };

    assert_eq!(
        trail(logs),
        vec![
            (ProvisioningStep::Init, StepStatus::Pending),
            (ProvisioningStep::DbSetup, StepStatus::InProgress),
            (ProvisioningStep::DbSetup, outcome),
        ],
        "Unexpected provisioning trail for final status {}",
        final_status
    );
}

/// Assert a result is a storage `NotFound` error
pub fn assert_not_found<T: std::fmt::Debug>(result: tenancy_storage::Result<T>) {
    match result {
        Err(tenancy_storage::Error::NotFound(_)) => {}
        other => panic!("Expected NotFound, got {:?}", other),
    }
}

/// Assert a result is a storage `AlreadyExists` error
pub fn assert_already_exists<T: std::fmt::Debug>(result: tenancy_storage::Result<T>) {
    match result {
        Err(tenancy_storage::Error::AlreadyExists(_)) => {}
        other => panic!("Expected AlreadyExists, got {:?}", other),
    }
}
