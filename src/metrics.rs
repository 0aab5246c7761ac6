// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the quota engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `quota_engine_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size gauges
//!
//! # Labels
//! - `operation`: admission, init, init_storage, initialize_origin, reset, clear
//! - `status`: success, rejected, error
//! - `reason`: request, group, shrink, clear

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an operation outcome
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "quota_engine_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "quota_engine_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record evicted origins and reclaimed bytes
pub fn record_eviction(reason: &str, origins: usize, bytes: u64) {
    counter!(
        "quota_engine_evictions_total",
        "reason" => reason.to_string()
    )
    .increment(origins as u64);
    counter!(
        "quota_engine_evicted_bytes_total",
        "reason" => reason.to_string()
    )
    .increment(bytes);
}

/// Record an origin whose data could not be deleted during eviction
pub fn record_eviction_failure(reason: &str) {
    counter!(
        "quota_engine_eviction_failures_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record bytes admitted for writing
pub fn record_admitted_bytes(bytes: u64) {
    counter!("quota_engine_admitted_bytes_total").increment(bytes);
}

/// Set total tracked usage in bytes
pub fn set_usage_bytes(bytes: u64) {
    gauge!("quota_engine_usage_bytes").set(bytes as f64);
}

/// Set the current global limit in bytes
pub fn set_limit_bytes(bytes: u64) {
    gauge!("quota_engine_limit_bytes").set(bytes as f64);
}

/// Set the number of tracked origins
pub fn set_origin_count(count: usize) {
    gauge!("quota_engine_origins").set(count as f64);
}

/// Record duration of an init phase
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "quota_engine_startup_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set manager state (as string label)
pub fn set_manager_state(state: &str) {
    gauge!(
        "quota_engine_state",
        "state" => state.to_string()
    )
    .set(1.0);
}

/// RAII timer that records operation latency on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
