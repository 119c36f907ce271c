//! Concurrent soft deletes: exactly one caller wins, the other observes
//! `NotFound` even though the row ends up deleted.

use tenancy_storage::Error;
use tenancy_tests::{fixtures, TestStack};

#[tokio::test]
async fn concurrent_delete_loser_sees_not_found() {
    let stack = TestStack::new();
    let repository = stack.repository.clone();
    let tenant = repository.create(fixtures::tenant::acme()).await.unwrap();

    // First delete stamps the row, then parks before verifying.
    let mut held = stack.database.hold_next_delete_verification();
    let first = {
        let repository = repository.clone();
        let id = tenant.id;
        tokio::spawn(async move { repository.delete(id).await })
    };
    held.wait_until_reached().await;

    let second = repository.delete(tenant.id).await;
    assert!(matches!(second, Err(Error::NotFound(_))), "{:?}", second);

    held.resume();
    first.await.unwrap().unwrap();

    let row = stack.database.row(tenant.id).unwrap();
    assert!(row.is_deleted());
    assert_eq!(stack.broker.outstanding(), 0);
}

#[tokio::test]
async fn delete_of_already_deleted_tenant_is_not_found() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();

    stack.repository.delete(tenant.id).await.unwrap();
    let deleted_at = stack.database.row(tenant.id).unwrap().deleted_at;

    assert!(matches!(
        stack.repository.delete(tenant.id).await,
        Err(Error::NotFound(_))
    ));
    // The original stamp is untouched.
    assert_eq!(stack.database.row(tenant.id).unwrap().deleted_at, deleted_at);
}

#[tokio::test]
async fn delete_with_colliding_stamp_is_not_found() {
    let stack = TestStack::new();
    let tenant = stack
        .repository
        .create(fixtures::tenant::acme())
        .await
        .unwrap();
    stack.repository.delete(tenant.id).await.unwrap();

    // Verification alone would accept the earlier delete's stamp.
    stack.database.ignore_delete_stamp(true);
    assert!(matches!(
        stack.repository.delete(tenant.id).await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(stack.broker.outstanding(), 0);
}
