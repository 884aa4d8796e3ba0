//! Process-wide Prometheus collectors, registered in the default registry.
//!
//! All collectors are `Lazy` statics so any crate can bump a counter
//! without threading a registry handle through every constructor. The
//! gateway's `/metrics` endpoint gathers the default registry.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};

pub static MESSAGES_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slabot_messages_received_total",
        "Inbound transport messages by chat type and sender class",
        &["chat_type", "sender"]
    )
    .unwrap()
});

pub static MESSAGE_PROCESSING_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "slabot_message_processing_seconds",
        "Wall-clock time spent handling one transport update",
        &["chat_type"]
    )
    .unwrap()
});

pub static WEBHOOK_AUTH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "slabot_webhook_auth_failures_total",
        "Webhook requests rejected for a missing or mismatched secret"
    )
    .unwrap()
});

pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "slabot_queue_depth",
        "Pending jobs per named queue",
        &["queue"]
    )
    .unwrap()
});

pub static CLASSIFIER_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slabot_classifier_requests_total",
        "Classification outcomes by producing model and category",
        &["model", "category"]
    )
    .unwrap()
});

pub static CLASSIFIER_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "slabot_classifier_latency_seconds",
        "Classifier step latency by producing model",
        &["model"]
    )
    .unwrap()
});

pub static CLASSIFIER_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slabot_classifier_errors_total",
        "AI classifier failures by error category",
        &["model", "kind"]
    )
    .unwrap()
});

pub static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "slabot_classification_cache_hits_total",
        "Classification cache hits"
    )
    .unwrap()
});

pub static CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "slabot_classification_cache_misses_total",
        "Classification cache misses"
    )
    .unwrap()
});

/// 0 = closed, 1 = half-open, 2 = open.
pub static BREAKER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "slabot_circuit_breaker_state",
        "AI circuit breaker state (0 closed, 1 half-open, 2 open)"
    )
    .unwrap()
});

pub static BREAKER_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slabot_circuit_breaker_transitions_total",
        "Circuit breaker transitions by target state",
        &["to"]
    )
    .unwrap()
});

pub static ALERT_DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "slabot_alert_deliveries_total",
        "Alert delivery attempts by terminal status",
        &["status"]
    )
    .unwrap()
});
