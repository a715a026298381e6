// src/metrics.rs

//! Defines and registers Prometheus metrics for the crawler core.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the process lifetime.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    /// Outcomes of a completed fetch attempt, labeled "updated" / "unchanged" / "failed".
    pub static ref FETCHES_TOTAL: CounterVec =
        register_counter_vec!("crawl_fetches_total", "Total number of completed fetch attempts, labeled by outcome.", &["outcome"]).unwrap();

    /// Cache reads that found a usable entry on disk.
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("crawl_cache_hits_total", "Total number of cache lookups that found an entry.").unwrap();

    /// Cache reads that found nothing on disk.
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("crawl_cache_misses_total", "Total number of cache lookups that found nothing.").unwrap();

    /// Current depth of the eligible-for-fetch portion of the queue, sampled by the driver.
    pub static ref QUEUE_DEPTH: Gauge =
        register_gauge!("crawl_queue_depth", "Approximate number of resources currently eligible for fetch.").unwrap();

    /// Latency of a single fetch attempt, end to end (policy gate through callback).
    pub static ref FETCH_LATENCY_SECONDS: Histogram =
        register_histogram!("crawl_fetch_latency_seconds", "Latency of a single fetch attempt in seconds.").unwrap();

    /// Number of times a queue transaction was retried after a transient (deadlock) failure.
    pub static ref QUEUE_RETRIES_TOTAL: Counter =
        register_counter!("crawl_queue_retries_total", "Total number of queue transaction retries due to transient failures.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
