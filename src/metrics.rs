/// Metrics and telemetry for Veilgate
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Account lifecycle (created, removed, extended)
/// - Config document publishes per family
/// - Expiration sweep runs and their duration
/// - Rejected callers

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ========== Account Metrics ==========

    /// Accounts created by protocol
    pub static ref ACCOUNTS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "veilgate_accounts_created_total",
        "Total number of accounts created",
        &["protocol"]
    )
    .expect("register veilgate_accounts_created_total");

    /// Accounts removed by reason (delete, expired)
    pub static ref ACCOUNTS_REMOVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "veilgate_accounts_removed_total",
        "Total number of accounts removed",
        &["reason"]
    )
    .expect("register veilgate_accounts_removed_total");

    /// Successful extensions
    pub static ref ACCOUNTS_EXTENDED_TOTAL: IntCounter = register_int_counter!(
        "veilgate_accounts_extended_total",
        "Total number of account extensions"
    )
    .expect("register veilgate_accounts_extended_total");

    // ========== Publish Metrics ==========

    /// Config document publishes by family and status
    pub static ref CONFIG_PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "veilgate_config_publish_total",
        "Total number of config document publishes",
        &["family", "status"]
    )
    .expect("register veilgate_config_publish_total");

    // ========== Sweep Metrics ==========

    /// Sweep ticks by status
    pub static ref SWEEP_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "veilgate_sweep_runs_total",
        "Total number of expiration sweep runs",
        &["status"]
    )
    .expect("register veilgate_sweep_runs_total");

    /// Sweep duration in seconds
    pub static ref SWEEP_DURATION_SECONDS: Histogram = register_histogram!(
        "veilgate_sweep_duration_seconds",
        "Expiration sweep duration in seconds",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .expect("register veilgate_sweep_duration_seconds");

    // ========== Auth Metrics ==========

    /// Events rejected because the caller is not the operator
    pub static ref AUTH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "veilgate_auth_failures_total",
        "Total number of rejected callers"
    )
    .expect("register veilgate_auth_failures_total");
}

/// Render all metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an account creation
pub fn record_account_created(protocol: &str) {
    ACCOUNTS_CREATED_TOTAL.with_label_values(&[protocol]).inc();
}

/// Record an account removal
pub fn record_account_removed(reason: &str) {
    ACCOUNTS_REMOVED_TOTAL.with_label_values(&[reason]).inc();
}

/// Record an account extension
pub fn record_account_extended() {
    ACCOUNTS_EXTENDED_TOTAL.inc();
}

/// Record a config document publish
pub fn record_config_publish(family: &str, success: bool) {
    CONFIG_PUBLISH_TOTAL
        .with_label_values(&[family, if success { "success" } else { "failure" }])
        .inc();
}

/// Record a sweep tick
pub fn record_sweep_run(status: &str, duration: f64) {
    SWEEP_RUNS_TOTAL.with_label_values(&[status]).inc();
    SWEEP_DURATION_SECONDS.observe(duration);
}

/// Record a rejected caller
pub fn record_auth_failure() {
    AUTH_FAILURES_TOTAL.inc();
}
