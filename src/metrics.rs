//! Metrics collection for data-protection operations
//!
//! Provides Prometheus-compatible metrics for monitoring backups, key usage,
//! migrations, validation findings and recovery activity.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};

lazy_static! {
    /// Counter for finished backups
    static ref BACKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "safeguard_backups_total",
        "Total number of backups by kind and terminal status",
        &["kind", "status"]
    ).unwrap();

    /// Histogram for backup duration
    static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "safeguard_backup_duration_seconds",
        "Backup pipeline duration in seconds",
        &["kind"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0, 3600.0]
    ).unwrap();

    /// Counter for archived bytes
    static ref BACKUP_BYTES: IntCounterVec = register_int_counter_vec!(
        "safeguard_backup_bytes_total",
        "Total bytes written to backup artifacts",
        &["kind"]
    ).unwrap();

    /// Gauge for running backups
    static ref ACTIVE_BACKUPS: IntGauge = register_int_gauge!(
        "safeguard_active_backups",
        "Number of currently running backups"
    ).unwrap();

    /// Counter for encrypt/decrypt operations
    static ref ENCRYPTION_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "safeguard_encryption_operations_total",
        "Total number of encryption operations",
        &["operation", "algorithm", "status"]
    ).unwrap();

    /// Counter for key lifecycle transitions
    static ref KEY_LIFECYCLE: IntCounterVec = register_int_counter_vec!(
        "safeguard_key_lifecycle_total",
        "Key generations, rotations and purges",
        &["event"]
    ).unwrap();

    /// Counter for migration outcomes
    static ref MIGRATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "safeguard_migrations_total",
        "Total number of migration executions by terminal status",
        &["status"]
    ).unwrap();

    /// Histogram for migration step duration
    static ref MIGRATION_STEP_DURATION: HistogramVec = register_histogram_vec!(
        "safeguard_migration_step_duration_seconds",
        "Migration step duration in seconds",
        &["direction"],
        vec![0.001, 0.01, 0.1, 1.0, 10.0, 60.0, 300.0]
    ).unwrap();

    /// Counter for validation runs
    static ref VALIDATION_RUNS: IntCounterVec = register_int_counter_vec!(
        "safeguard_validation_runs_total",
        "Total number of integrity validation runs",
        &["level", "status"]
    ).unwrap();

    /// Counter for integrity issues found
    static ref INTEGRITY_ISSUES: IntCounterVec = register_int_counter_vec!(
        "safeguard_integrity_issues_total",
        "Total number of integrity issues detected",
        &["issue_type", "severity"]
    ).unwrap();

    /// Counter for declared disasters
    static ref DISASTER_EVENTS: IntCounterVec = register_int_counter_vec!(
        "safeguard_disaster_events_total",
        "Total number of declared disaster events",
        &["disaster_type"]
    ).unwrap();

    /// Counter for recovery plan executions
    static ref PLAN_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "safeguard_recovery_plan_executions_total",
        "Total number of recovery plan executions",
        &["plan_id", "status"]
    ).unwrap();

    /// Gauge for component health (0 healthy, 1 degraded, 2 critical, 3 failed)
    static ref COMPONENT_HEALTH: IntGaugeVec = register_int_gauge_vec!(
        "safeguard_component_health",
        "Most recent health status per monitored component",
        &["component"]
    ).unwrap();
}

/// Metrics collector for the data-protection subsystem
pub struct ProtectionMetrics;

impl ProtectionMetrics {
    /// Record a backup that reached a terminal status
    pub fn record_backup(kind: &str, status: &str, duration_secs: f64, bytes: u64) {
        BACKUPS_TOTAL.with_label_values(&[kind, status]).inc();
        BACKUP_DURATION.with_label_values(&[kind]).observe(duration_secs);
        BACKUP_BYTES.with_label_values(&[kind]).inc_by(bytes);
    }

    /// Track a backup entering or leaving the running state
    pub fn backup_started() {
        ACTIVE_BACKUPS.inc();
    }

    /// Counterpart of `backup_started`
    pub fn backup_finished() {
        ACTIVE_BACKUPS.dec();
    }

    /// Count an encrypt or decrypt call
    pub fn record_encryption(operation: &str, algorithm: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        ENCRYPTION_OPERATIONS
            .with_label_values(&[operation, algorithm, status])
            .inc();
    }

    /// Count a key lifecycle event
    pub fn record_key_event(event: &str) {
        KEY_LIFECYCLE.with_label_values(&[event]).inc();
    }

    /// Count a migration reaching `status`
    pub fn record_migration(status: &str) {
        MIGRATIONS_TOTAL.with_label_values(&[status]).inc();
    }

    /// Observe one step's runtime
    pub fn record_migration_step(direction: &str, duration_secs: f64) {
        MIGRATION_STEP_DURATION
            .with_label_values(&[direction])
            .observe(duration_secs);
    }

    /// Count a validation run
    pub fn record_validation(level: &str, status: &str) {
        VALIDATION_RUNS.with_label_values(&[level, status]).inc();
    }

    /// Count one integrity issue
    pub fn record_issue(issue_type: &str, severity: &str) {
        INTEGRITY_ISSUES.with_label_values(&[issue_type, severity]).inc();
    }

    /// Count a detected disaster
    pub fn record_disaster(disaster_type: &str) {
        DISASTER_EVENTS.with_label_values(&[disaster_type]).inc();
    }

    /// Count a recovery plan run
    pub fn record_plan_execution(plan_id: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        PLAN_EXECUTIONS.with_label_values(&[plan_id, status]).inc();
    }

    /// Gauge: 0 healthy .. 3 failed
    pub fn set_component_health(component: &str, level: i64) {
        COMPONENT_HEALTH.with_label_values(&[component]).set(level);
    }

    /// Get all metrics in Prometheus text format
    pub fn export_metrics() -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("Failed to encode metrics: {}", e))?;
        String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
    }
}
