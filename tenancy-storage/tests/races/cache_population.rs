//! A read that started before a write can repopulate the cache with the
//! pre-write row after the write has invalidated it.

use tenancy_storage::TenantCache;
use tenancy_tests::{fixtures, TestStack};

#[tokio::test]
async fn stale_read_repopulates_cache_after_update() {
    let stack = TestStack::new();
    let repository = stack.repository.clone();
    let tenant = repository.create(fixtures::tenant::acme()).await.unwrap();

    let mut held = stack.database.hold_next_fetch();
    let reader = {
        let repository = repository.clone();
        let id = tenant.id;
        tokio::spawn(async move { repository.get_by_id(id).await })
    };
    held.wait_until_reached().await;

    // Reader holds the pre-update row; the writer commits and invalidates.
    let mut renamed = tenant.clone();
    renamed.name = "Acme Renamed".to_string();
    repository.update(&renamed).await.unwrap();
    assert!(!stack.cache.contains(&TenantCache::key(tenant.id)));

    held.resume();
    let read = reader.await.unwrap().unwrap().unwrap();
    assert_eq!(read.name, "Acme");

    // The stale snapshot is now cached and served until it expires.
    assert!(stack.cache.contains(&TenantCache::key(tenant.id)));
    let fetches = stack.database.fetch_by_id_count();
    let cached = repository.get_by_id(tenant.id).await.unwrap().unwrap();
    assert_eq!(cached.name, "Acme");
    assert_eq!(stack.database.fetch_by_id_count(), fetches);

    // The database itself holds the update.
    assert_eq!(stack.database.row(tenant.id).unwrap().name, "Acme Renamed");
}

#[tokio::test]
async fn stale_read_resurrects_deleted_tenant_in_cache() {
    let stack = TestStack::new();
    let repository = stack.repository.clone();
    let tenant = repository.create(fixtures::tenant::acme()).await.unwrap();

    let mut held = stack.database.hold_next_fetch();
    let reader = {
        let repository = repository.clone();
        let id = tenant.id;
        tokio::spawn(async move { repository.get_by_id(id).await })
    };
    held.wait_until_reached().await;

    repository.delete(tenant.id).await.unwrap();

    held.resume();
    assert!(reader.await.unwrap().unwrap().is_some());

    // Served from the cache despite the soft delete.
    assert!(repository.get_by_id(tenant.id).await.unwrap().is_some());
}

#[tokio::test]
async fn read_after_completed_update_sees_new_values() {
    let stack = TestStack::new();
    let repository = stack.repository.clone();
    let tenant = repository.create(fixtures::tenant::acme()).await.unwrap();

    // Warm the cache, then update.
    repository.get_by_id(tenant.id).await.unwrap();
    let mut renamed = tenant.clone();
    renamed.name = "Acme Renamed".to_string();
    repository.update(&renamed).await.unwrap();

    let read = repository.get_by_id(tenant.id).await.unwrap().unwrap();
    assert_eq!(read.name, "Acme Renamed");
}
