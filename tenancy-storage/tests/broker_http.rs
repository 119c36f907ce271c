//! HTTP lease broker client against a wiremock server

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tenancy_storage::broker::HttpLeaseBroker;
use tenancy_storage::{
    ConnectionDescriptor, Error, LeaseBroker, LeaseClient, LeaseId, PoolOptions, TenantCache,
    TenantRepository,
};
use tenancy_tests::{fixtures, InMemoryCache, InMemoryConnector, InMemoryDatabase, MockBrokerServer};
use wiremock::ResponseTemplate;

fn descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new(
        "tenant-management-service",
        "postgresql://svc:secret@db:5432/tenants",
    )
}

#[tokio::test]
async fn test_acquire_posts_descriptor_and_parses_grant() {
    let server = MockBrokerServer::granting("lease-abc").await;
    let broker = HttpLeaseBroker::new(server.uri()).unwrap();

    let grant = broker.acquire_lease(&descriptor()).await.unwrap();
    assert_eq!(grant.into_lease_id().unwrap().as_str(), "lease-abc");

    let requests = server.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/v1/leases");
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["owner"], "tenant-management-service");
    assert_eq!(body["dsn"], "postgresql://svc:secret@db:5432/tenants");
}

#[tokio::test]
async fn test_refusal_payload_becomes_lease_error() {
    let server = MockBrokerServer::refusing("quota exceeded").await;
    let broker = HttpLeaseBroker::new(server.uri()).unwrap();

    let grant = broker.acquire_lease(&descriptor()).await.unwrap();
    let err = grant.into_lease_id().unwrap_err();

    assert!(matches!(err, Error::Lease(_)));
    assert!(err.to_string().contains("quota exceeded"));
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockBrokerServer::start().await;
    server
        .respond_to_acquire(ResponseTemplate::new(503).set_body_string("draining"))
        .await;
    let broker = HttpLeaseBroker::new(server.uri()).unwrap();

    let err = broker.acquire_lease(&descriptor()).await.unwrap_err();

    assert!(matches!(err, Error::Lease(_)));
    assert!(err.to_string().contains("503"));
    assert_eq!(server.received_requests().await.len(), 1, "no retry");
}

#[tokio::test]
async fn test_malformed_grant_is_an_error() {
    let server = MockBrokerServer::start().await;
    server
        .respond_to_acquire(ResponseTemplate::new(200).set_body_string("not json"))
        .await;
    let broker = HttpLeaseBroker::new(server.uri()).unwrap();

    assert!(matches!(
        broker.acquire_lease(&descriptor()).await,
        Err(Error::Lease(_))
    ));
}

#[tokio::test]
async fn test_release_posts_to_lease_path() {
    let server = MockBrokerServer::granting("lease-abc").await;
    let broker = HttpLeaseBroker::new(server.uri()).unwrap();

    broker
        .release_lease(&LeaseId::new("lease-abc"))
        .await
        .unwrap();

    let requests = server.received_requests().await;
    assert_eq!(requests[0].url.path(), "/v1/leases/lease-abc/release");
}

#[tokio::test]
async fn test_release_failure_is_reported() {
    let server = MockBrokerServer::start().await;
    server
        .respond_to_release(ResponseTemplate::new(404).set_body_string("unknown lease"))
        .await;
    let broker = HttpLeaseBroker::new(server.uri()).unwrap();

    let err = broker
        .release_lease(&LeaseId::new("lease-gone"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_unreachable_broker_is_an_error() {
    let broker =
        HttpLeaseBroker::with_timeout("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();

    assert!(matches!(
        broker.acquire_lease(&descriptor()).await,
        Err(Error::Lease(_))
    ));
}

#[tokio::test]
async fn test_repository_over_http_broker() {
    let server = MockBrokerServer::granting("lease-http").await;
    let database = Arc::new(InMemoryDatabase::new());
    let leases = LeaseClient::new(
        Arc::new(HttpLeaseBroker::new(server.uri()).unwrap()),
        Arc::new(InMemoryConnector::new(database.clone())),
        descriptor(),
        PoolOptions::default(),
    );
    let repository = TenantRepository::new(
        leases,
        TenantCache::new(Arc::new(InMemoryCache::new())),
        fixtures::keys::cipher(),
    );

    let tenant = repository.create(fixtures::tenant::acme()).await.unwrap();
    assert!(database.row(tenant.id).is_some());

    let paths: Vec<String> = server
        .received_requests()
        .await
        .iter()
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/v1/leases", "/v1/leases/lease-http/release"]);
}
