//! In-memory fakes for the control plane's collaborators
//!
//! Every fake supports failure injection. [`InMemoryDatabase`] can also park
//! a statement mid-flight so tests can interleave concurrent operations
//! deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenancy_runtime::{Alert, AlertSink};
use tenancy_storage::cache::CacheError;
use tenancy_storage::model::{ProvisioningStep, StepStatus};
use tenancy_storage::{
    CacheStore, ConnectionDescriptor, Error, LeaseBroker, LeaseGrant, LeaseId, PoolConnector,
    PoolOptions, ProvisioningLogEntry, Result, Tenant, TenantPool,
};
use tokio::sync::oneshot;
use uuid::Uuid;

// ========== Lease broker ==========

/// Lease broker that issues sequential lease ids
#[derive(Default)]
pub struct InMemoryBroker {
    next_id: AtomicU64,
    fixed_lease: Mutex<Option<String>>,
    refusal: Mutex<Option<String>>,
    fail_acquire: AtomicBool,
    fail_release: AtomicBool,
    outstanding: Mutex<HashSet<String>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    descriptors: Mutex<Vec<ConnectionDescriptor>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the same lease id for every request
    pub fn with_fixed_lease(id: &str) -> Self {
        let broker = Self::default();
        *broker.fixed_lease.lock().unwrap() = Some(id.to_string());
        broker
    }

    /// Make acquire calls fail as if the broker were unreachable
    pub fn fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    /// Answer acquire calls with an error field
    pub fn refuse_with(&self, reason: Option<&str>) {
        *self.refusal.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Leases granted and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }

    /// Descriptors seen on acquire, in order
    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        self.descriptors.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeaseBroker for InMemoryBroker {
    async fn acquire_lease(&self, descriptor: &ConnectionDescriptor) -> Result<LeaseGrant> {
        self.descriptors.lock().unwrap().push(descriptor.clone());

        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(Error::Lease("broker unreachable".to_string()));
        }
        if let Some(reason) = self.refusal.lock().unwrap().clone() {
            return Ok(LeaseGrant::refused(reason));
        }

        let id = match self.fixed_lease.lock().unwrap().clone() {
            Some(id) => id,
            None => format!("lease-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.outstanding.lock().unwrap().insert(id.clone());
        Ok(LeaseGrant::granted(id))
    }

    async fn release_lease(&self, lease_id: &LeaseId) -> Result<()> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(Error::Lease("release rejected".to_string()));
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        self.outstanding.lock().unwrap().remove(lease_id.as_str());
        Ok(())
    }
}

// ========== Statement holds ==========

struct Gate {
    reached: oneshot::Sender<()>,
    resume: oneshot::Receiver<()>,
}

impl Gate {
    async fn pass(self) {
        let _ = self.reached.send(());
        let _ = self.resume.await;
    }
}

/// A statement parked by the fake database.
///
/// Wait for the statement to reach the hold point, do other work, then
/// [`resume`](HeldStatement::resume) it.
pub struct HeldStatement {
    reached: oneshot::Receiver<()>,
    resume: oneshot::Sender<()>,
}

impl HeldStatement {
    pub async fn wait_until_reached(&mut self) {
        let _ = (&mut self.reached).await;
    }

    pub fn resume(self) {
        let _ = self.resume.send(());
    }
}

fn arm(slot: &Mutex<Option<Gate>>) -> HeldStatement {
    let (reached_tx, reached_rx) = oneshot::channel();
    let (resume_tx, resume_rx) = oneshot::channel();
    *slot.lock().unwrap() = Some(Gate {
        reached: reached_tx,
        resume: resume_rx,
    });
    HeldStatement {
        reached: reached_rx,
        resume: resume_tx,
    }
}

// ========== Database ==========

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    schemas: HashMap<Uuid, String>,
    logs: Vec<ProvisioningLogEntry>,
}

/// In-memory stand-in for the tenant tables.
///
/// Shared by every pool an [`InMemoryConnector`] hands out, the way pools
/// for different leases reach the same database.
#[derive(Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
    fail_statements: AtomicBool,
    fail_schema_creation: AtomicBool,
    failing_log_steps: Mutex<Vec<(ProvisioningStep, StepStatus)>>,
    fetch_hold: Mutex<Option<Gate>>,
    verify_hold: Mutex<Option<Gate>>,
    schema_hold: Mutex<Option<Gate>>,
    ignore_delete_stamp: AtomicBool,
    statements: AtomicUsize,
    fetches_by_id: AtomicUsize,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every statement fail
    pub fn fail_statements(&self, fail: bool) {
        self.fail_statements.store(fail, Ordering::SeqCst);
    }

    pub fn fail_schema_creation(&self, fail: bool) {
        self.fail_schema_creation.store(fail, Ordering::SeqCst);
    }

    /// Make inserting a log entry with this step and status fail
    pub fn fail_log(&self, step: ProvisioningStep, status: StepStatus) {
        self.failing_log_steps.lock().unwrap().push((step, status));
    }

    /// Park the next fetch-by-id after it has read its row
    pub fn hold_next_fetch(&self) -> HeldStatement {
        arm(&self.fetch_hold)
    }

    /// Park the next soft delete between its write and its verification read
    pub fn hold_next_delete_verification(&self) -> HeldStatement {
        arm(&self.verify_hold)
    }

    /// Make delete verification count any soft-deleted row, as if every
    /// delete stamped the same instant
    pub fn ignore_delete_stamp(&self, ignore: bool) {
        self.ignore_delete_stamp.store(ignore, Ordering::SeqCst);
    }

    /// Park the next schema creation before it runs
    pub fn hold_next_schema_creation(&self) -> HeldStatement {
        arm(&self.schema_hold)
    }

    /// Number of statements executed
    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    pub fn fetch_by_id_count(&self) -> usize {
        self.fetches_by_id.load(Ordering::SeqCst)
    }

    /// Stored row, including soft-deleted ones
    pub fn row(&self, id: Uuid) -> Option<Tenant> {
        self.tables.lock().unwrap().tenants.get(&id).cloned()
    }

    pub fn rows(&self) -> Vec<Tenant> {
        self.tables.lock().unwrap().tenants.values().cloned().collect()
    }

    /// Log entries for a tenant in insertion order
    pub fn logs_for(&self, tenant_id: Uuid) -> Vec<ProvisioningLogEntry> {
        self.tables
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Every log entry in insertion order
    pub fn logs(&self) -> Vec<ProvisioningLogEntry> {
        self.tables.lock().unwrap().logs.clone()
    }

    pub fn schema_for(&self, tenant_id: Uuid) -> Option<String> {
        self.tables.lock().unwrap().schemas.get(&tenant_id).cloned()
    }

    fn begin(&self) -> Result<()> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        if self.fail_statements.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("database unavailable".to_string()));
        }
        Ok(())
    }

    fn take_gate(slot: &Mutex<Option<Gate>>) -> Option<Gate> {
        slot.lock().unwrap().take()
    }

    fn stored(tenant: &Tenant) -> Tenant {
        let mut row = tenant.clone();
        row.contact_email = None;
        row
    }

    fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.begin()?;
        let mut tables = self.tables.lock().unwrap();
        let clash = tables
            .tenants
            .values()
            .any(|row| row.id == tenant.id || (row.subdomain == tenant.subdomain && row.deleted_at.is_none()));
        if clash {
            return Err(Error::AlreadyExists(format!(
                "duplicate key value violates unique constraint on subdomain '{}'",
                tenant.subdomain
            )));
        }
        tables.tenants.insert(tenant.id, Self::stored(tenant));
        Ok(())
    }

    async fn fetch_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        self.begin()?;
        self.fetches_by_id.fetch_add(1, Ordering::SeqCst);
        let row = self
            .tables
            .lock()
            .unwrap()
            .tenants
            .get(&id)
            .filter(|row| row.deleted_at.is_none())
            .cloned();

        if let Some(gate) = Self::take_gate(&self.fetch_hold) {
            gate.pass().await;
        }
        Ok(row)
    }

    fn fetch_tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>> {
        self.begin()?;
        Ok(self
            .tables
            .lock()
            .unwrap()
            .tenants
            .values()
            .find(|row| row.subdomain == subdomain && row.deleted_at.is_none())
            .cloned())
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<u64> {
        self.begin()?;
        let mut tables = self.tables.lock().unwrap();
        let clash = tables.tenants.values().any(|row| {
            row.id != tenant.id && row.subdomain == tenant.subdomain && row.deleted_at.is_none()
        });
        if clash {
            return Err(Error::AlreadyExists(format!(
                "duplicate key value violates unique constraint on subdomain '{}'",
                tenant.subdomain
            )));
        }

        match tables.tenants.get_mut(&tenant.id) {
            Some(row) if row.deleted_at.is_none() => {
                row.name = tenant.name.clone();
                row.subdomain = tenant.subdomain.clone();
                row.encrypted_email = tenant.encrypted_email.clone();
                row.email_nonce = tenant.email_nonce.clone();
                row.status = tenant.status;
                row.provisioned = tenant.provisioned;
                row.updated_at = tenant.updated_at;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        self.begin()?;
        let mut tables = self.tables.lock().unwrap();
        match tables.tenants.get_mut(&id) {
            Some(row) if row.deleted_at.is_none() => {
                row.deleted_at = Some(at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn count_deleted_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<i64> {
        if let Some(gate) = Self::take_gate(&self.verify_hold) {
            gate.pass().await;
        }

        self.begin()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .tenants
            .get(&id)
            .filter(|row| match row.deleted_at {
                Some(_) if self.ignore_delete_stamp.load(Ordering::SeqCst) => true,
                stamp => stamp == Some(at),
            })
            .map_or(0, |_| 1))
    }

    async fn create_tenant_schema(&self, id: Uuid, subdomain: &str) -> Result<()> {
        if let Some(gate) = Self::take_gate(&self.schema_hold) {
            gate.pass().await;
        }

        self.begin()?;
        if self.fail_schema_creation.load(Ordering::SeqCst) {
            return Err(Error::Internal(
                "create_tenant_schema: permission denied".to_string(),
            ));
        }
        let mut tables = self.tables.lock().unwrap();
        if !tables.tenants.contains_key(&id) {
            return Err(Error::NotFound(format!("Tenant {}", id)));
        }
        tables
            .schemas
            .insert(id, format!("tenant_{}", subdomain.replace('-', "_")));
        Ok(())
    }

    fn fetch_schema_name(&self, tenant_id: Uuid) -> Result<Option<String>> {
        self.begin()?;
        Ok(self.tables.lock().unwrap().schemas.get(&tenant_id).cloned())
    }

    fn insert_provisioning_log(&self, entry: &ProvisioningLogEntry) -> Result<()> {
        self.begin()?;
        let failing = self
            .failing_log_steps
            .lock()
            .unwrap()
            .contains(&(entry.step, entry.status));
        if failing {
            return Err(Error::ConnectionFailed(format!(
                "insert into tenant_provisioning_logs failed at {}/{}",
                entry.step.as_str(),
                entry.status.as_str()
            )));
        }
        self.tables.lock().unwrap().logs.push(entry.clone());
        Ok(())
    }
}

/// Pool handle over an [`InMemoryDatabase`]; statements fail once closed
pub struct InMemoryPool {
    database: Arc<InMemoryDatabase>,
    closed: AtomicBool,
    connector: Arc<ConnectorCounters>,
}

impl InMemoryPool {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("Connection pool closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantPool for InMemoryPool {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.check_open()?;
        self.database.insert_tenant(tenant)
    }

    async fn fetch_tenant_by_id(&self, id: Uuid) -> Result<Option<Tenant>> {
        self.check_open()?;
        self.database.fetch_tenant_by_id(id).await
    }

    async fn fetch_tenant_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>> {
        self.check_open()?;
        self.database.fetch_tenant_by_subdomain(subdomain)
    }

    async fn update_tenant(&self, tenant: &Tenant) -> Result<u64> {
        self.check_open()?;
        self.database.update_tenant(tenant)
    }

    async fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        self.check_open()?;
        self.database.mark_deleted(id, at)
    }

    async fn count_deleted_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<i64> {
        self.check_open()?;
        self.database.count_deleted_at(id, at).await
    }

    async fn call_create_tenant_schema(&self, id: Uuid, subdomain: &str) -> Result<()> {
        self.check_open()?;
        self.database.create_tenant_schema(id, subdomain).await
    }

    async fn fetch_schema_name(&self, tenant_id: Uuid) -> Result<Option<String>> {
        self.check_open()?;
        self.database.fetch_schema_name(tenant_id)
    }

    async fn insert_provisioning_log(&self, entry: &ProvisioningLogEntry) -> Result<()> {
        self.check_open()?;
        self.database.insert_provisioning_log(entry)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.connector.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct ConnectorCounters {
    connected: AtomicUsize,
    closed: AtomicUsize,
}

/// Connector handing out [`InMemoryPool`]s over one shared database
pub struct InMemoryConnector {
    database: Arc<InMemoryDatabase>,
    counters: Arc<ConnectorCounters>,
    fail_connect: AtomicBool,
    options_seen: Mutex<Vec<PoolOptions>>,
}

impl InMemoryConnector {
    pub fn new(database: Arc<InMemoryDatabase>) -> Self {
        Self {
            database,
            counters: Arc::new(ConnectorCounters::default()),
            fail_connect: AtomicBool::new(false),
            options_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Pools built so far
    pub fn connect_count(&self) -> usize {
        self.counters.connected.load(Ordering::SeqCst)
    }

    /// Pools closed so far
    pub fn close_count(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn options_seen(&self) -> Vec<PoolOptions> {
        self.options_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PoolConnector for InMemoryConnector {
    async fn connect(
        &self,
        _descriptor: &ConnectionDescriptor,
        options: &PoolOptions,
    ) -> Result<Arc<dyn TenantPool>> {
        self.options_seen.lock().unwrap().push(options.clone());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::ConnectionFailed("connection refused".to_string()));
        }
        self.counters.connected.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemoryPool {
            database: Arc::clone(&self.database),
            closed: AtomicBool::new(false),
            connector: Arc::clone(&self.counters),
        }))
    }
}

// ========== Cache ==========

/// Cache store backed by a map; expiry is recorded, not enforced
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (String, Duration)>>,
    fail: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
    invalidations: AtomicUsize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every cache call fail
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).map(|(value, _)| value.clone())
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Duration::from_secs(3600)));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    fn check(&self) -> std::result::Result<(), CacheError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.raw(key))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), ttl));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> std::result::Result<(), CacheError> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ========== Alerts ==========

/// Alert sink that keeps every alert it receives
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}
