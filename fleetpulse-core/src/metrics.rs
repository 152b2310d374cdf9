//! Prometheus metrics for the ingestion and fan-out paths
//!
//! Exposed via the `/metrics` endpoint. Nothing here influences control flow.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, Encoder,
    IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Records accepted (persisted) per producer
pub static RECORDS_INGESTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "telemetry_records_ingested_total",
        "Telemetry records persisted and handed to the hub",
        &["source"],
        REGISTRY.clone()
    )
    .expect("Failed to register RECORDS_INGESTED")
});

/// Records refused per producer and reason (malformed, validation, persistence)
pub static RECORDS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "telemetry_records_rejected_total",
        "Telemetry records that were not persisted",
        &["source", "reason"],
        REGISTRY.clone()
    )
    .expect("Failed to register RECORDS_REJECTED")
});

/// Per-observer delivery outcomes (delivered, dropped)
pub static HUB_DELIVERIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "hub_deliveries_total",
        "Broadcast delivery attempts per observer",
        &["outcome"],
        REGISTRY.clone()
    )
    .expect("Failed to register HUB_DELIVERIES")
});

/// Live observers per transport
pub static ACTIVE_OBSERVERS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec_with_registry!(
        "hub_active_observers",
        "Streaming connections currently registered with the hub",
        &["transport"],
        REGISTRY.clone()
    )
    .expect("Failed to register ACTIVE_OBSERVERS")
});

pub fn record_ingested(source: &str) {
    RECORDS_INGESTED.with_label_values(&[source]).inc();
}

pub fn record_rejected(source: &str, reason: &str) {
    RECORDS_REJECTED.with_label_values(&[source, reason]).inc();
}

pub fn record_deliveries(delivered: usize, dropped: usize) {
    if delivered > 0 {
        HUB_DELIVERIES
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
    }
    if dropped > 0 {
        HUB_DELIVERIES
            .with_label_values(&["dropped"])
            .inc_by(dropped as u64);
    }
}

/// Render all metrics in Prometheus text exposition format
#[must_use]
pub fn gather_metrics() -> String {
    // Register every family before gathering
    LazyLock::force(&RECORDS_INGESTED);
    LazyLock::force(&RECORDS_REJECTED);
    LazyLock::force(&HUB_DELIVERIES);
    LazyLock::force(&ACTIVE_OBSERVERS);

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_counters() {
        record_ingested("http");
        record_rejected("broker", "validation");
        record_deliveries(2, 1);

        let text = gather_metrics();
        assert!(text.contains("telemetry_records_ingested_total"));
        assert!(text.contains("telemetry_records_rejected_total"));
        assert!(text.contains("hub_deliveries_total"));
    }
}
