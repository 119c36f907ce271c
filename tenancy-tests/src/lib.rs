//! Shared test utilities for tenancy crates
//!
//! This crate provides:
//! - **Fixtures**: Pre-built tenants and encryption keys
//! - **Fakes**: In-memory lease broker, database, cache and alert sink with
//!   failure injection and statement holds
//! - **Stack**: A repository wired to the fakes
//! - **Mocks**: A wiremock lease broker for the HTTP client
//! - **Assertions**: Provisioning trail and error-kind checks
//!
//! # Example
//!
//! ```ignore
//! use tenancy_tests::{fixtures, TestStack};
//!
//! #[tokio::test]
//! async fn test_create() {
//!     let stack = TestStack::new();
//!     let tenant = stack.repository.create(fixtures::tenant::acme()).await.unwrap();
//!     assert!(stack.database.row(tenant.id).is_some());
//! }
//! ```

pub mod assertions;
pub mod fakes;
pub mod fixtures;
pub mod mocks;
pub mod stack;

// Re-export commonly used items
pub use fakes::{
    HeldStatement, InMemoryBroker, InMemoryCache, InMemoryConnector, InMemoryDatabase,
    RecordingAlertSink,
};
pub use fixtures::{keys, tenant};
pub use mocks::MockBrokerServer;
pub use stack::TestStack;
