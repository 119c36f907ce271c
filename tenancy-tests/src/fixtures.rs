//! Test data factories for tenancy types
//!
//! Provides pre-built test data with sensible defaults.

use std::sync::Arc;
use tenancy_storage::{EmailCipher, EncryptionKey, NewTenant};

/// Tenant fixture factories
pub mod tenant {
    use super::*;

    /// The canonical "Acme" tenant
    pub fn acme() -> NewTenant {
        NewTenant::new("Acme", "acme").with_contact_email("a@acme.io")
    }

    /// A tenant with a specific subdomain
    pub fn with_subdomain(subdomain: &str) -> NewTenant {
        NewTenant::new(format!("Tenant {}", subdomain), subdomain)
            .with_contact_email(format!("ops@{}.example.com", subdomain))
    }

    /// A tenant without a contact email
    pub fn without_email(subdomain: &str) -> NewTenant {
        NewTenant::new("No Email Ltd", subdomain)
    }
}

/// Encryption key fixtures
pub mod keys {
    use super::*;

    /// Deterministic key for tests
    pub fn test_key() -> EncryptionKey {
        EncryptionKey::new([42u8; 32])
    }

    /// Base64 form of [`test_key`], as it appears in configuration
    pub fn test_key_base64() -> &'static str {
        "KioqKioqKioqKioqKioqKioqKioqKioqKioqKioqKio="
    }

    pub fn cipher() -> Arc<EmailCipher> {
        Arc::new(EmailCipher::new(&test_key()).expect("test key is valid"))
    }
}
