//! `OpenTelemetry` meter provider initialization and the pipeline's named
//! counters (messages received/processed/deleted/failed, batch outcomes,
//! error classes, drops).
//!
//! When `config.otel_enabled` is `false` the global meter provider is left as
//! the no-op default installed by the `opentelemetry` crate, so every
//! `record_*` call below is a harmless no-op — the counters still compile
//! and update for free either way. There is no metrics-exposition HTTP
//! endpoint here, only the counters themselves.

use std::sync::OnceLock;

use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;

use crate::config::Config;

static MESSAGES_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
static MESSAGES_PROCESSED: OnceLock<Counter<u64>> = OnceLock::new();
static MESSAGES_DELETED: OnceLock<Counter<u64>> = OnceLock::new();
static MESSAGES_FAILED: OnceLock<Counter<u64>> = OnceLock::new();
static BATCH_SUCCESS: OnceLock<Counter<u64>> = OnceLock::new();
static PARTIAL_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
static PERMANENT_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
static RETRIABLE_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
static DROPPED_AFTER_RETRIES: OnceLock<Counter<u64>> = OnceLock::new();
static RECORD_TOO_LARGE: OnceLock<Counter<u64>> = OnceLock::new();
static FILTER_REJECT: OnceLock<Counter<u64>> = OnceLock::new();
static PARSE_ERROR: OnceLock<Counter<u64>> = OnceLock::new();
static SHUTDOWN_ABANDONED: OnceLock<Counter<u64>> = OnceLock::new();

fn build_resource(config: &Config) -> Resource {
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes([KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build()
}

/// Initialise the global `OTel` `SdkMeterProvider`. Returns `None` when
/// `config.otel_enabled` is `false`.
pub fn init(config: &Config) -> Option<SdkMeterProvider> {
    if !config.otel_enabled {
        return None;
    }

    let resource = build_resource(config);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .expect("failed to build OTLP metric exporter");

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_periodic_exporter(exporter)
        .build();

    global::set_meter_provider(provider.clone());
    Some(provider)
}

/// Registers all named counters. Call once at startup, after `init()`.
pub fn register_metrics() {
    let meter = global::meter("wifi-ingest");

    MESSAGES_RECEIVED.get_or_init(|| meter.u64_counter("wifi_ingest_messages_received_total").build());
    MESSAGES_PROCESSED.get_or_init(|| meter.u64_counter("wifi_ingest_messages_processed_total").build());
    MESSAGES_DELETED.get_or_init(|| meter.u64_counter("wifi_ingest_messages_deleted_total").build());
    MESSAGES_FAILED.get_or_init(|| meter.u64_counter("wifi_ingest_messages_failed_total").build());
    BATCH_SUCCESS.get_or_init(|| meter.u64_counter("wifi_ingest_batch_success_total").build());
    PARTIAL_FAILURES.get_or_init(|| meter.u64_counter("wifi_ingest_partial_failures_total").build());
    PERMANENT_ERRORS.get_or_init(|| meter.u64_counter("wifi_ingest_permanent_errors_total").build());
    RETRIABLE_ERRORS.get_or_init(|| meter.u64_counter("wifi_ingest_retriable_errors_total").build());
    DROPPED_AFTER_RETRIES
        .get_or_init(|| meter.u64_counter("wifi_ingest_dropped_after_retries_total").build());
    RECORD_TOO_LARGE.get_or_init(|| meter.u64_counter("wifi_ingest_record_too_large_total").build());
    FILTER_REJECT.get_or_init(|| meter.u64_counter("wifi_ingest_filter_reject_total").build());
    PARSE_ERROR.get_or_init(|| meter.u64_counter("wifi_ingest_parse_error_total").build());
    SHUTDOWN_ABANDONED
        .get_or_init(|| meter.u64_counter("wifi_ingest_shutdown_abandoned_total").build());
}

fn add(counter: &OnceLock<Counter<u64>>, value: u64, attrs: &[KeyValue]) {
    if let Some(c) = counter.get() {
        c.add(value, attrs);
    }
}

pub fn messages_received(n: u64) {
    add(&MESSAGES_RECEIVED, n, &[]);
}
pub fn messages_processed(n: u64) {
    add(&MESSAGES_PROCESSED, n, &[]);
}
pub fn messages_deleted(n: u64) {
    add(&MESSAGES_DELETED, n, &[]);
}
pub fn messages_failed(n: u64) {
    add(&MESSAGES_FAILED, n, &[]);
}
pub fn batch_success() {
    add(&BATCH_SUCCESS, 1, &[]);
}
pub fn partial_failures(n: u64) {
    add(&PARTIAL_FAILURES, n, &[]);
}
pub fn permanent_errors() {
    add(&PERMANENT_ERRORS, 1, &[]);
}
pub fn retriable_errors(kind: &'static str) {
    add(&RETRIABLE_ERRORS, 1, &[KeyValue::new("type", kind)]);
}
pub fn dropped_after_retries(n: u64) {
    add(&DROPPED_AFTER_RETRIES, n, &[]);
}
pub fn record_too_large() {
    add(&RECORD_TOO_LARGE, 1, &[]);
}
pub fn filter_reject(reason: &'static str) {
    add(&FILTER_REJECT, 1, &[KeyValue::new("reason", reason)]);
}
pub fn parse_error(kind: &'static str) {
    add(&PARSE_ERROR, 1, &[KeyValue::new("kind", kind)]);
}
pub fn shutdown_abandoned(n: u64) {
    add(&SHUTDOWN_ABANDONED, n, &[]);
}
