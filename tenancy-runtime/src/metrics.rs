//! Prometheus metrics for tenant provisioning
//!
//! This module defines metrics for tracking provisioning outcomes, latency
//! and queue backlog.

use lazy_static::lazy_static;
use prometheus::{
    linear_buckets, register_histogram, register_int_counter_vec, register_int_gauge, Histogram,
    IntCounterVec, IntGauge,
};

lazy_static! {
    /// Total number of completed provisioning runs
    ///
    /// Labels:
    /// - status: final tenant status ("active", "error")
    pub static ref TENANTS_PROVISIONED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tenancy_tenants_provisioned_total",
        "Total number of tenants provisioned, by final status",
        &["status"]
    )
    .expect("tenancy_tenants_provisioned_total metric registration");

    /// Time from enqueue to provisioning outcome, in seconds
    ///
    /// Buckets: 0s to 9s in 1s steps
    pub static ref PROVISIONING_DURATION: Histogram = register_histogram!(
        "tenancy_provisioning_duration_seconds",
        "Time taken to provision a tenant",
        linear_buckets(0.0, 1.0, 10).expect("valid linear buckets")
    )
    .expect("tenancy_provisioning_duration_seconds metric registration");

    /// Tenants waiting in the provisioning queue
    pub static ref PROVISIONING_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "tenancy_provisioning_queue_depth",
        "Number of tenants waiting to be provisioned"
    )
    .expect("tenancy_provisioning_queue_depth metric registration");
}
