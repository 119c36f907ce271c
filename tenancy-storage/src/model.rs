//! Tenant records and provisioning audit entries

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

/// Maximum length of a tenant subdomain (one DNS label)
pub const MAX_SUBDOMAIN_LEN: usize = 63;

/// Lifecycle status of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// Created and waiting for (or going through) provisioning
    Provisioning,

    /// Provisioned and serving traffic
    Active,

    /// Administratively disabled
    Inactive,

    /// Provisioning failed
    Error,
}

impl TenantStatus {
    /// All statuses, in declaration order
    pub const ALL: [TenantStatus; 4] = [
        TenantStatus::Provisioning,
        TenantStatus::Active,
        TenantStatus::Inactive,
        TenantStatus::Error,
    ];

    /// Persisted text form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::ValidationError(format!(
                "Invalid tenant status: {}",
                other
            ))),
        }
    }
}

/// One lowercase DNS label: alphanumeric at both ends, hyphens inside
static SUBDOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("Invalid subdomain regex")
});

/// Validate a tenant subdomain.
///
/// A subdomain is a single lowercase DNS label: 1 to 63 characters drawn from
/// `a-z`, `0-9` and `-`, starting and ending with an alphanumeric character.
pub fn validate_subdomain(subdomain: &str) -> crate::Result<()> {
    if SUBDOMAIN_PATTERN.is_match(subdomain) {
        return Ok(());
    }

    let reason = if subdomain.is_empty() {
        "must not be empty"
    } else if subdomain.len() > MAX_SUBDOMAIN_LEN {
        "must be at most 63 characters"
    } else {
        "must be lowercase letters, digits and inner hyphens"
    };
    Err(crate::Error::ValidationError(format!(
        "Invalid subdomain '{}': {}",
        subdomain, reason
    )))
}

/// A tenant record.
///
/// `contact_email` is the plaintext form and only ever lives in memory; the
/// persisted form is `encrypted_email` plus `email_nonce`.
#[derive(Clone, PartialEq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    pub contact_email: Option<String>,
    pub encrypted_email: Vec<u8>,
    pub email_nonce: Vec<u8>,
    pub status: TenantStatus,
    pub provisioned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    /// Whether the tenant has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether an encrypted email is stored for this tenant
    pub fn has_encrypted_email(&self) -> bool {
        !self.encrypted_email.is_empty() && !self.email_nonce.is_empty()
    }
}

// Keep the plaintext email out of logs and panic messages.
impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("subdomain", &self.subdomain)
            .field(
                "contact_email",
                &self.contact_email.as_ref().map(|_| "[REDACTED]"),
            )
            .field("encrypted_email_len", &self.encrypted_email.len())
            .field("status", &self.status)
            .field("provisioned", &self.provisioned)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// Payload for creating a tenant
#[derive(Debug, Clone, PartialEq)]
pub struct NewTenant {
    pub name: String,
    pub subdomain: String,
    pub contact_email: Option<String>,
    pub status: TenantStatus,
    pub provisioned: bool,
}

impl NewTenant {
    /// A tenant that will go through provisioning
    pub fn new(name: impl Into<String>, subdomain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subdomain: subdomain.into(),
            contact_email: None,
            status: TenantStatus::Provisioning,
            provisioned: false,
        }
    }

    pub fn with_contact_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }
}

/// Cached form of a tenant.
///
/// Carries the email in its encrypted form only, so the cache never holds
/// plaintext PII.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    #[serde(with = "base64_bytes")]
    pub encrypted_email: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub email_nonce: Vec<u8>,
    pub status: TenantStatus,
    pub provisioned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&Tenant> for TenantSnapshot {
    fn from(tenant: &Tenant) -> Self {
        Self {
            id: tenant.id,
            name: tenant.name.clone(),
            subdomain: tenant.subdomain.clone(),
            encrypted_email: tenant.encrypted_email.clone(),
            email_nonce: tenant.email_nonce.clone(),
            status: tenant.status,
            provisioned: tenant.provisioned,
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
            deleted_at: tenant.deleted_at,
        }
    }
}

impl From<TenantSnapshot> for Tenant {
    fn from(snapshot: TenantSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name,
            subdomain: snapshot.subdomain,
            contact_email: None,
            encrypted_email: snapshot.encrypted_email,
            email_nonce: snapshot.email_nonce,
            status: snapshot.status,
            provisioned: snapshot.provisioned,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            deleted_at: snapshot.deleted_at,
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Provisioning step recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    Init,
    DbSetup,
}

impl ProvisioningStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::DbSetup => "db_setup",
        }
    }
}

/// Status of a provisioning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Append-only provisioning audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningLogEntry {
    pub tenant_id: Uuid,
    pub step: ProvisioningStep,
    pub status: StepStatus,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ProvisioningLogEntry {
    pub fn new(
        tenant_id: Uuid,
        step: ProvisioningStep,
        status: StepStatus,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            tenant_id,
            step,
            status,
            details,
            created_at: Utc::now(),
        }
    }
}
