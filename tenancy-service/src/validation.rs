//! Request validation

use crate::{Result, ServiceError};
use regex::Regex;
use std::sync::LazyLock;
use tenancy_storage::model::validate_subdomain;
use tenancy_storage::TenantStatus;

/// Contains an `@` and a `.`, in either order
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)@.*\.|\..*@").expect("Invalid email regex"));

/// Validate a tenant display name
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::Validation("name is required".to_string()));
    }
    Ok(())
}

/// Validate a contact email: at least three characters containing `@` and `.`
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(ServiceError::Validation("contact email is required".to_string()));
    }
    if email.len() < 3 || !EMAIL_PATTERN.is_match(email) {
        return Err(ServiceError::Validation("invalid email format".to_string()));
    }
    Ok(())
}

pub fn validate_subdomain_format(subdomain: &str) -> Result<()> {
    if subdomain.is_empty() {
        return Err(ServiceError::Validation("subdomain is required".to_string()));
    }
    validate_subdomain(subdomain).map_err(ServiceError::from)
}

/// Parse a status label (`provisioning`, `active`, `inactive`, `error`)
pub fn parse_status(status: &str) -> Result<TenantStatus> {
    status
        .parse()
        .map_err(|_| ServiceError::Validation(format!("invalid status: '{}'", status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        assert!(validate_name("Acme").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn test_email() {
        assert!(validate_email("a@b.c").is_ok());
        assert!(validate_email("ops@acme.io").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("acme.io").is_err());
        assert!(validate_email("ops@acme").is_err());
        assert!(validate_email("@.").is_err());
        assert!(validate_email("first.last@acme").is_ok());
        assert!(validate_email("ops@@").is_err());
    }

    #[test]
    fn test_subdomain() {
        assert!(validate_subdomain_format("acme-eu").is_ok());
        assert!(matches!(
            validate_subdomain_format(""),
            Err(ServiceError::Validation(msg)) if msg == "subdomain is required"
        ));
        assert!(validate_subdomain_format("Acme").is_err());
        assert!(validate_subdomain_format("-acme").is_err());
    }

    #[test]
    fn test_status() {
        assert_eq!(parse_status("inactive").unwrap(), TenantStatus::Inactive);
        assert!(parse_status("archived").is_err());
        assert!(parse_status("").is_err());
    }
}
