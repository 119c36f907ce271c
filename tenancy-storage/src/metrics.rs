//! Prometheus metrics for storage operations
//!
//! This module defines metrics for:
//! - Connection lease acquire/release outcomes
//! - Leases currently held
//! - Tenant cache hits and misses
//! - Repository operation latency

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

lazy_static! {
    /// Lease broker operations counter
    ///
    /// Labels:
    /// - operation: "acquire" or "release"
    /// - result: "success" or "failure"
    pub static ref LEASE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tenancy_lease_operations_total",
        "Total number of connection lease operations",
        &["operation", "result"]
    )
    .expect("Failed to register lease_operations_total metric");

    /// Leases acquired and not yet released
    pub static ref ACTIVE_LEASES: IntGauge = register_int_gauge!(
        "tenancy_active_leases",
        "Number of connection leases currently held"
    )
    .expect("Failed to register active_leases metric");

    /// Tenant cache lookups
    ///
    /// Labels:
    /// - result: "hit", "miss" or "error"
    pub static ref CACHE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tenancy_cache_requests_total",
        "Total number of tenant cache lookups",
        &["result"]
    )
    .expect("Failed to register cache_requests_total metric");

    /// Repository operation latency
    ///
    /// Labels:
    /// - operation: repository method name (e.g., "create", "get_by_id")
    pub static ref REPOSITORY_OPERATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tenancy_repository_operation_seconds",
        "Tenant repository operation latency in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register repository_operation_seconds metric");
}

pub(crate) fn record_lease_operation(operation: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    LEASE_OPERATIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

pub(crate) fn record_cache_request(result: &str) {
    CACHE_REQUESTS_TOTAL.with_label_values(&[result]).inc();
}
