// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for dnschain runs.
//!
//! All metric names carry the prefix `dnschain_`. A run is short-lived, so nothing is
//! served over HTTP: the binary renders the registry with [`gather_metrics`] at exit and
//! writes it to the file named by `--metrics-output` (node-exporter textfile collector
//! format).
//!
//! # Metrics
//!
//! - `dnschain_stage_duration_seconds{stage,outcome}` - wall time per pipeline stage
//! - `dnschain_stages_total{stage,outcome,error_kind}` - stage outcomes
//! - `dnschain_probe_attempts_total{mode,outcome}` - individual probe executions
//! - `dnschain_reload_wait_seconds{cluster}` - time from Corefile change to observed reload

use crate::client::AddressingMode;
use crate::context::Stage;
use crate::errors::ErrorKind;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all dnschain metrics
const METRICS_NAMESPACE: &str = "dnschain";

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Duration of pipeline stages in seconds
///
/// Labels:
/// - `stage`: stage identifier (e.g. `cluster-ready`)
/// - `outcome`: `success` or `failure`
pub static STAGE_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_stage_duration_seconds"),
        "Duration of pipeline stages in seconds",
    )
    .buckets(vec![0.1, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]);
    let histogram = HistogramVec::new(opts, &["stage", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Stage outcomes
///
/// Labels:
/// - `stage`: stage identifier
/// - `outcome`: `success` or `failure`
/// - `error_kind`: error classification, empty on success
pub static STAGES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_stages_total"),
        "Total number of pipeline stages by outcome",
    );
    let counter = CounterVec::new(opts, &["stage", "outcome", "error_kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Individual probe executions
///
/// Labels:
/// - `mode`: `direct` or `dns`
/// - `outcome`: `success` or `failure`
pub static PROBE_ATTEMPTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_probe_attempts_total"),
        "Total number of reachability probe executions by mode and outcome",
    );
    let counter = CounterVec::new(opts, &["mode", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Time between a Corefile change and the observed CoreDNS reload
pub static RELOAD_WAIT_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reload_wait_seconds"),
        "Time from Corefile change to observed CoreDNS reload in seconds",
    )
    .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]);
    let histogram = HistogramVec::new(opts, &["cluster"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

pub fn record_stage_success(stage: Stage, duration: Duration) {
    STAGE_DURATION_SECONDS
        .with_label_values(&[stage.as_str(), "success"])
        .observe(duration.as_secs_f64());
    STAGES_TOTAL
        .with_label_values(&[stage.as_str(), "success", ""])
        .inc();
}

pub fn record_stage_failure(stage: Stage, duration: Duration, kind: ErrorKind) {
    STAGE_DURATION_SECONDS
        .with_label_values(&[stage.as_str(), "failure"])
        .observe(duration.as_secs_f64());
    STAGES_TOTAL
        .with_label_values(&[stage.as_str(), "failure", kind.as_str()])
        .inc();
}

pub fn record_probe_attempt(mode: AddressingMode, succeeded: bool) {
    let mode = mode.to_string();
    let outcome = if succeeded { "success" } else { "failure" };
    PROBE_ATTEMPTS_TOTAL
        .with_label_values(&[mode.as_str(), outcome])
        .inc();
}

pub fn record_reload_wait(cluster: &str, waited: Duration) {
    RELOAD_WAIT_SECONDS
        .with_label_values(&[cluster])
        .observe(waited.as_secs_f64());
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
