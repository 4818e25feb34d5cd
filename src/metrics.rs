//! Prometheus metrics for the plasma store
//!
//! Features:
//! - Memory metrics (consumed, fallback)
//! - Object metrics (created, live)
//! - Pressure metrics (spill cycles, store-full events)

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // Memory metrics
    pub static ref CONSUMED_BYTES: IntGauge = IntGauge::new(
        "plasma_consumed_bytes",
        "Bytes currently allocated to objects"
    ).unwrap();

    pub static ref FALLBACK_ALLOCATED_BYTES: IntGauge = IntGauge::new(
        "plasma_fallback_allocated_bytes",
        "Bytes currently served from the fallback region"
    ).unwrap();

    // Object metrics
    pub static ref OBJECTS_CREATED: IntCounter = IntCounter::new(
        "plasma_objects_created_total",
        "Objects successfully created"
    ).unwrap();

    pub static ref LIVE_OBJECTS: IntGauge = IntGauge::new(
        "plasma_live_objects",
        "Object records held by the store"
    ).unwrap();

    // Pressure metrics
    pub static ref SPILL_CYCLES: IntCounter = IntCounter::new(
        "plasma_spill_cycles_total",
        "Reclaim cycles triggered by failed allocations"
    ).unwrap();

    pub static ref STORE_FULL_EVENTS: IntCounter = IntCounter::new(
        "plasma_store_full_total",
        "Creations rejected after reclaiming failed"
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(CONSUMED_BYTES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(FALLBACK_ALLOCATED_BYTES.clone())).ok();

    METRICS_REGISTRY.register(Box::new(OBJECTS_CREATED.clone())).ok();
    METRICS_REGISTRY.register(Box::new(LIVE_OBJECTS.clone())).ok();

    METRICS_REGISTRY.register(Box::new(SPILL_CYCLES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(STORE_FULL_EVENTS.clone())).ok();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
