// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync queue.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `sync_queue_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: queue item kind (`finalSubmit`, `feedback`, ...) or cache kind
//! - `outcome`: success, retry, exhausted, fatal, timeout
//! - `result`: hit, stale, miss

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record an enqueued item
pub fn record_enqueued(kind: &str) {
    counter!("sync_queue_enqueued_total", "kind" => kind.to_string()).increment(1);
}

/// Record the result of one submission attempt
pub fn record_attempt(kind: &str, outcome: &str) {
    counter!(
        "sync_queue_attempts_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record adapter call latency
pub fn record_submit_latency(kind: &str, duration: Duration) {
    histogram!("sync_queue_submit_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record a completed drain pass
pub fn record_drain(processed: usize, succeeded: usize, duration: Duration) {
    counter!("sync_queue_drain_passes_total").increment(1);
    histogram!("sync_queue_drain_items").record(processed as f64);
    counter!("sync_queue_drain_succeeded_total").increment(succeeded as u64);
    histogram!("sync_queue_drain_seconds").record(duration.as_secs_f64());
}

/// Record a drain request that did not run (`reason`: draining, offline)
pub fn record_drain_skipped(reason: &str) {
    counter!("sync_queue_drain_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Set active queue depth
pub fn set_queue_depth(count: usize) {
    gauge!("sync_queue_depth").set(count as f64);
}

/// Set dead-letter depth
pub fn set_failed_items(count: usize) {
    gauge!("sync_queue_failed_items").set(count as f64);
}

/// Set connectivity (1 = online)
pub fn set_online(online: bool) {
    gauge!("sync_queue_online").set(if online { 1.0 } else { 0.0 });
}

/// Record a fallback from the durable store to the volatile one
pub fn record_store_fallback() {
    counter!("sync_queue_store_fallback_total").increment(1);
}

/// Record a cache lookup
pub fn record_cache_lookup(kind: &str, result: &str) {
    counter!(
        "sync_queue_cache_lookups_total",
        "kind" => kind.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record entries removed by a cache purge
pub fn record_cache_purge(removed: u64) {
    counter!("sync_queue_cache_purged_total").increment(removed);
}

/// Record operation latency against the record store
pub fn record_store_latency(operation: &'static str, duration: Duration) {
    histogram!("sync_queue_store_seconds", "operation" => operation).record(duration.as_secs_f64());
}

/// A timing guard that records store latency on drop
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
        record_store_latency(self.operation, self.start.elapsed());
    }
}
