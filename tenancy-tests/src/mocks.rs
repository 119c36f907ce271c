//! Mock servers for external services

use serde_json::json;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

/// Mock lease broker speaking the broker's HTTP+JSON protocol
///
/// # Example
///
/// ```ignore
/// use tenancy_tests::mocks::MockBrokerServer;
///
/// #[tokio::test]
/// async fn test_acquire() {
///     let broker = MockBrokerServer::granting("lease-1").await;
///     let client = HttpLeaseBroker::new(broker.uri()).unwrap();
///     // ...
/// }
/// ```
pub struct MockBrokerServer {
    server: MockServer,
}

impl MockBrokerServer {
    /// Start a server with no routes mounted
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Start a server that grants `lease_id` and accepts every release
    pub async fn granting(lease_id: &str) -> Self {
        let broker = Self::start().await;
        broker
            .respond_to_acquire(ResponseTemplate::new(200).set_body_json(json!({
                "lease_id": lease_id
            })))
            .await;
        broker.respond_to_release(ResponseTemplate::new(204)).await;
        broker
    }

    /// Start a server that answers acquire with an error field
    pub async fn refusing(reason: &str) -> Self {
        let broker = Self::start().await;
        broker
            .respond_to_acquire(ResponseTemplate::new(200).set_body_json(json!({
                "error": reason
            })))
            .await;
        broker
    }

    pub async fn respond_to_acquire(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/v1/leases"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub async fn respond_to_release(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1/leases/[^/]+/release$"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Base URL of the mock server
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Requests received so far
    pub async fn received_requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }
}
