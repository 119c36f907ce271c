//! Tenant repository tests against the in-memory collaborators

use std::time::Duration;
use tenancy_storage::model::{ProvisioningStep, StepStatus};
use tenancy_storage::{
    Error, NewTenant, ProvisioningLogEntry, TenantCache, TenantSnapshot, TenantStatus,
};
use tenancy_tests::assertions::{assert_already_exists, assert_not_found};
use tenancy_tests::{fixtures, InMemoryBroker, TestStack};
use uuid::Uuid;

fn assert_all_leases_released(stack: &TestStack) {
    assert_eq!(stack.broker.outstanding(), 0, "leases left outstanding");
    assert_eq!(stack.leases.pool_count(), 0, "pools left registered");
}

// ========== create ==========

#[tokio::test]
async fn test_create_assigns_identity_and_encrypts_email() {
    let stack = TestStack::new();

    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    assert_eq!(tenant.name, "Acme");
    assert_eq!(tenant.status, TenantStatus::Provisioning);
    assert!(!tenant.provisioned);
    assert_eq!(tenant.created_at, tenant.updated_at);
    assert_eq!(tenant.contact_email.as_deref(), Some("a@acme.io"));

    let row = stack.database.row(tenant.id).unwrap();
    assert!(row.contact_email.is_none());
    assert!(row.has_encrypted_email());
    assert!(!String::from_utf8_lossy(&row.encrypted_email).contains("a@acme.io"));

    let opened = fixtures::keys::cipher()
        .decrypt(&row.encrypted_email, &row.email_nonce)
        .unwrap();
    assert_eq!(opened, "a@acme.io");
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_create_without_email_stores_nothing() {
    let stack = TestStack::new();

    let tenant = stack
        .repository
        .create(fixtures::tenant::without_email("quiet"))
        .await
        .unwrap();

    let row = stack.database.row(tenant.id).unwrap();
    assert!(!row.has_encrypted_email());
    let fetched = stack.repository.get_by_id(tenant.id).await.unwrap().unwrap();
    assert!(fetched.contact_email.is_none());
}

#[tokio::test]
async fn test_create_invalidates_cache_key() {
    let stack = TestStack::new();

    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    assert_eq!(stack.cache.invalidation_count(), 1);
    assert!(!stack.cache.contains(&TenantCache::key(tenant.id)));
}

#[tokio::test]
async fn test_create_duplicate_subdomain_conflicts() {
    let stack = TestStack::new();
    stack
        .repository
        .create(fixtures::tenant::with_subdomain("dup"))
        .await
        .unwrap();

    assert_already_exists(
        stack
            .repository
            .create(fixtures::tenant::with_subdomain("dup"))
            .await,
    );
    assert_eq!(stack.database.rows().len(), 1);
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_create_rejects_invalid_subdomain_without_lease() {
    let stack = TestStack::new();

    let result = stack
        .repository
        .create(NewTenant::new("Bad", "Not_A_Label"))
        .await;

    assert!(matches!(result, Err(Error::ValidationError(_))));
    assert_eq!(stack.broker.acquire_count(), 0);
}

#[tokio::test]
async fn test_soft_deleted_subdomain_can_be_reused() {
    let stack = TestStack::new();
    let first = stack
        .repository
        .create(fixtures::tenant::with_subdomain("reuse"))
        .await
        .unwrap();
    stack.repository.delete(first.id).await.unwrap();

    let second = stack
        .repository
        .create(fixtures::tenant::with_subdomain("reuse"))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    let found = stack
        .repository
        .get_by_subdomain("reuse")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, second.id);
}

// ========== reads ==========

#[tokio::test]
async fn test_get_by_id_missing_is_none() {
    let stack = TestStack::new();

    let result = stack.repository.get_by_id(Uuid::new_v4()).await.unwrap();

    assert!(result.is_none());
    assert_eq!(stack.cache.set_count(), 0, "misses are not cached");
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_get_by_id_populates_cache_with_ciphertext_only() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    let fetched = stack.repository.get_by_id(tenant.id).await.unwrap().unwrap();
    assert_eq!(fetched.contact_email.as_deref(), Some("a@acme.io"));

    let key = TenantCache::key(tenant.id);
    let raw = stack.cache.raw(&key).unwrap();
    assert!(!raw.contains("a@acme.io"));
    let snapshot: TenantSnapshot = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot.id, tenant.id);
    assert_eq!(stack.cache.ttl_of(&key), Some(Duration::from_secs(3600)));
}

#[tokio::test]
async fn test_cache_hit_skips_database_and_broker() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack.repository.get_by_id(tenant.id).await.unwrap();

    let leases = stack.broker.acquire_count();
    let fetches = stack.database.fetch_by_id_count();
    let hit = stack.repository.get_by_id(tenant.id).await.unwrap().unwrap();

    assert_eq!(hit.id, tenant.id);
    assert_eq!(hit.contact_email.as_deref(), Some("a@acme.io"));
    assert_eq!(stack.broker.acquire_count(), leases);
    assert_eq!(stack.database.fetch_by_id_count(), fetches);
}

#[tokio::test]
async fn test_corrupt_cache_entry_falls_back_to_database() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack
        .cache
        .insert_raw(&TenantCache::key(tenant.id), "{not json");

    let fetched = stack.repository.get_by_id(tenant.id).await.unwrap().unwrap();

    assert_eq!(fetched.name, "Acme");
    assert_eq!(stack.database.fetch_by_id_count(), 1);
}

#[tokio::test]
async fn test_cache_outage_does_not_fail_operations() {
    let stack = TestStack::new();
    stack.cache.fail(true);

    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    let fetched = stack.repository.get_by_id(tenant.id).await.unwrap().unwrap();
    assert_eq!(fetched.contact_email.as_deref(), Some("a@acme.io"));

    let mut changed = fetched.clone();
    changed.name = "Acme Two".to_string();
    stack.repository.update(&changed).await.unwrap();
    stack.repository.delete(tenant.id).await.unwrap();
}

#[tokio::test]
async fn test_get_by_subdomain_decrypts_and_skips_cache() {
    let stack = TestStack::new();
    stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    let found = stack
        .repository
        .get_by_subdomain("acme")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.contact_email.as_deref(), Some("a@acme.io"));
    assert_eq!(stack.cache.get_count(), 0);
    assert_eq!(stack.cache.set_count(), 0);
    assert!(stack
        .repository
        .get_by_subdomain("nobody")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_soft_deleted_tenant_is_invisible() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    stack.repository.delete(tenant.id).await.unwrap();

    assert!(stack.repository.get_by_id(tenant.id).await.unwrap().is_none());
    assert!(stack
        .repository
        .get_by_subdomain("acme")
        .await
        .unwrap()
        .is_none());
    assert!(stack.database.row(tenant.id).unwrap().is_deleted());
}

// ========== update ==========

#[tokio::test]
async fn test_update_writes_fields_and_invalidates() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack.repository.get_by_id(tenant.id).await.unwrap();

    let mut changed = tenant.clone();
    changed.name = "Acme Europe".to_string();
    changed.subdomain = "acme-eu".to_string();
    changed.status = TenantStatus::Active;
    changed.provisioned = true;
    changed.contact_email = Some("eu@acme.io".to_string());
    let updated = stack.repository.update(&changed).await.unwrap();

    assert!(updated.updated_at >= tenant.updated_at);
    assert_eq!(updated.created_at, tenant.created_at);
    assert!(!stack.cache.contains(&TenantCache::key(tenant.id)));

    let fetched = stack.repository.get_by_id(tenant.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "Acme Europe");
    assert_eq!(fetched.subdomain, "acme-eu");
    assert_eq!(fetched.status, TenantStatus::Active);
    assert!(fetched.provisioned);
    assert_eq!(fetched.contact_email.as_deref(), Some("eu@acme.io"));
}

#[tokio::test]
async fn test_update_reencrypts_with_fresh_nonce() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    let before = stack.database.row(tenant.id).unwrap();

    stack.repository.update(&tenant).await.unwrap();

    let after = stack.database.row(tenant.id).unwrap();
    assert_ne!(before.email_nonce, after.email_nonce);
    assert_ne!(before.encrypted_email, after.encrypted_email);
}

#[tokio::test]
async fn test_update_can_set_any_status() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    for status in TenantStatus::ALL {
        let mut changed = tenant.clone();
        changed.status = status;
        stack.repository.update(&changed).await.unwrap();
        assert_eq!(stack.database.row(tenant.id).unwrap().status, status);
    }
}

#[tokio::test]
async fn test_update_onto_taken_subdomain_conflicts() {
    let stack = TestStack::new();
    stack
        .repository
        .create(fixtures::tenant::with_subdomain("taken"))
        .await
        .unwrap();
    let mover = stack
        .repository
        .create(fixtures::tenant::with_subdomain("mover"))
        .await
        .unwrap();

    let mut changed = mover.clone();
    changed.subdomain = "taken".to_string();

    assert_already_exists(stack.repository.update(&changed).await);
    assert_eq!(stack.database.row(mover.id).unwrap().subdomain, "mover");
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_update_missing_or_deleted_is_not_found() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    let mut ghost = tenant.clone();
    ghost.id = Uuid::new_v4();
    assert_not_found(stack.repository.update(&ghost).await);

    stack.repository.delete(tenant.id).await.unwrap();
    assert_not_found(stack.repository.update(&tenant).await);
    assert!(stack.database.row(tenant.id).unwrap().is_deleted());
}

// ========== delete ==========

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let stack = TestStack::new();

    assert_not_found(stack.repository.delete(Uuid::new_v4()).await);
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_delete_invalidates_cache() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack.repository.get_by_id(tenant.id).await.unwrap();
    assert!(stack.cache.contains(&TenantCache::key(tenant.id)));

    stack.repository.delete(tenant.id).await.unwrap();

    assert!(!stack.cache.contains(&TenantCache::key(tenant.id)));
}

// ========== schema and provisioning log ==========

#[tokio::test]
async fn test_schema_creation_and_lookup() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::with_subdomain("acme-eu"))
        .await
        .unwrap();

    assert!(stack
        .repository
        .get_tenant_schema(tenant.id)
        .await
        .unwrap()
        .is_none());

    stack
        .repository
        .create_tenant_schema(tenant.id, &tenant.subdomain)
        .await
        .unwrap();

    assert_eq!(
        stack
            .repository
            .get_tenant_schema(tenant.id)
            .await
            .unwrap()
            .as_deref(),
        Some("tenant_acme_eu")
    );
}

#[tokio::test]
async fn test_schema_creation_failure_propagates() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack.database.fail_schema_creation(true);

    let result = stack
        .repository
        .create_tenant_schema(tenant.id, &tenant.subdomain)
        .await;

    assert!(result.is_err());
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_provisioning_log_is_appended() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    stack
        .repository
        .create_provisioning_log(ProvisioningLogEntry::new(
            tenant.id,
            ProvisioningStep::DbSetup,
            StepStatus::InProgress,
            Some(serde_json::json!({"host": "db.example.com"})),
        ))
        .await
        .unwrap();

    let logs = stack.database.logs_for(tenant.id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].step, ProvisioningStep::DbSetup);
    assert_eq!(logs[0].status, StepStatus::InProgress);
}

// ========== lease discipline ==========

#[tokio::test]
async fn test_every_operation_releases_its_lease() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack.repository.get_by_id(tenant.id).await.unwrap();
    stack.repository.get_by_subdomain("acme").await.unwrap();
    stack.repository.update(&tenant).await.unwrap();
    stack
        .repository
        .create_tenant_schema(tenant.id, "acme")
        .await
        .unwrap();
    stack.repository.get_tenant_schema(tenant.id).await.unwrap();
    stack.repository.delete(tenant.id).await.unwrap();

    assert_eq!(stack.broker.acquire_count(), 7);
    assert_eq!(stack.broker.release_count(), 7);
    assert_eq!(stack.connector.close_count(), 7);
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_statement_failure_still_releases_lease() {
    let stack = TestStack::new();
    stack.database.fail_statements(true);

    let result = stack.repository.create(fixtures::tenant::acme()).await;

    assert!(matches!(result, Err(Error::ConnectionFailed(_))));
    assert_eq!(stack.broker.acquire_count(), 1);
    assert_all_leases_released(&stack);
}

#[tokio::test]
async fn test_broker_outage_fails_without_database_access() {
    let stack = TestStack::new();
    stack.broker.fail_acquire(true);

    let result = stack.repository.get_by_id(Uuid::new_v4()).await;

    assert!(matches!(result, Err(Error::Lease(_))));
    assert_eq!(stack.database.statement_count(), 0);
    assert_eq!(stack.connector.connect_count(), 0);
}

#[tokio::test]
async fn test_broker_refusal_fails_without_retry() {
    let stack = TestStack::new();
    stack.broker.refuse_with(Some("pool exhausted"));

    let result = stack.repository.create(fixtures::tenant::acme()).await;

    match result {
        Err(Error::Lease(msg)) => assert!(msg.contains("pool exhausted")),
        other => panic!("expected lease error, got {:?}", other),
    }
    assert_eq!(stack.broker.descriptors().len(), 1);
    assert!(stack.database.rows().is_empty());
}

#[tokio::test]
async fn test_failed_release_does_not_fail_operation() {
    let stack = TestStack::new();
    stack.broker.fail_release(true);

    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    assert!(stack.database.row(tenant.id).is_some());
    assert_eq!(stack.broker.outstanding(), 1);
}

#[tokio::test]
async fn test_lease_requests_carry_descriptor() {
    let stack = TestStack::with_broker(InMemoryBroker::new());
    stack.repository.get_by_id(Uuid::new_v4()).await.unwrap();

    let descriptors = stack.broker.descriptors();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].owner, "tenant-management-service");
    assert!(descriptors[0].dsn.starts_with("postgresql://"));
}

#[tokio::test]
async fn test_close_reclaims_pools_after_failed_releases() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack.broker.fail_release(true);

    for _ in 0..3 {
        stack.repository.get_tenant_schema(tenant.id).await.unwrap();
    }
    assert_eq!(stack.leases.pool_count(), 3);

    stack.repository.close().await;

    assert_eq!(stack.leases.pool_count(), 0);
    assert_eq!(stack.connector.close_count(), stack.connector.connect_count());
}
