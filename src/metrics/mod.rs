//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Active retry sessions and retry ticks
//! - Child jobs created and transactions resent
//! - Nonce checks, calibrations and recoveries

use crate::error::SentryResult;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Session metrics
    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sentry_sessions_active",
        "Number of retry sessions currently running"
    ).unwrap();

    pub static ref SESSION_RETRIES: IntCounter = register_int_counter!(
        "sentry_session_retries_total",
        "Total retry ticks executed across all sessions"
    ).unwrap();

    pub static ref CHILD_JOBS_CREATED: IntCounter = register_int_counter!(
        "sentry_child_jobs_created_total",
        "Total child jobs created with an escalated gas price"
    ).unwrap();

    pub static ref TX_RESENT: IntCounter = register_int_counter!(
        "sentry_transactions_resent_total",
        "Total transactions rebroadcast without re-pricing"
    ).unwrap();

    // Nonce metrics
    pub static ref NONCE_CHECKS: CounterVec = register_counter_vec!(
        "sentry_nonce_checks_total",
        "Total nonce checks by result",
        &["result"]
    ).unwrap();

    pub static ref NONCE_CALIBRATIONS: IntCounter = register_int_counter!(
        "sentry_nonce_calibrations_total",
        "Total nonce calibrations against the chain"
    ).unwrap();

    pub static ref NONCE_RECOVERIES: IntCounter = register_int_counter!(
        "sentry_nonce_recoveries_total",
        "Total nonce recovery attempts"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SentryResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::SentryError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::SentryError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn set_active_sessions(count: usize) {
    SESSIONS_ACTIVE.set(count as i64);
}

pub fn record_session_retry() {
    SESSION_RETRIES.inc();
}

pub fn record_child_job_created() {
    CHILD_JOBS_CREATED.inc();
}

pub fn record_tx_resent() {
    TX_RESENT.inc();
}

pub fn record_nonce_check(result: &str) {
    NONCE_CHECKS.with_label_values(&[result]).inc();
}

pub fn record_nonce_calibration() {
    NONCE_CALIBRATIONS.inc();
}

pub fn record_nonce_recovery() {
    NONCE_RECOVERIES.inc();
}
