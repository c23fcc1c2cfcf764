//! Process configuration, loaded once from environment variables at startup
//! and passed by `Arc` to every component — no global/singleton state.

use std::collections::HashSet;

use anyhow::{Context, Result};
use std::env;

use crate::validator::HotspotAction;

#[derive(Debug, Clone)]
pub struct Config {
    // Queue
    pub queue_url: String,
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout_seconds: i32,
    pub max_concurrent_batches: usize,
    pub delete_on_parse_failure: bool,
    pub expected_event_source: String,

    // Object ingestion
    pub max_object_bytes: u64,
    pub max_inflated_bytes: u64,

    // Validation
    pub max_location_accuracy: f64,
    pub rssi_min: i32,
    pub rssi_max: i32,

    // Quality weights
    pub connected_weight: f64,
    pub scan_weight: f64,
    pub low_link_speed_weight: f64,

    // Mobile hotspot detection
    pub mobile_hotspot_enabled: bool,
    pub mobile_hotspot_oui_blacklist: HashSet<String>,
    pub mobile_hotspot_action: HotspotAction,

    // Delivery stream / publisher
    pub delivery_stream_name: String,
    pub max_batch_records: usize,
    pub max_batch_bytes: usize,
    pub batch_timeout_ms: u64,
    pub max_record_bytes: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,

    // Shutdown
    pub shutdown_deadline_ms: u64,

    // Observability
    pub otel_enabled: bool,
    pub otlp_endpoint: String,
    pub service_name: String,
    pub log_level: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let mobile_hotspot_oui_blacklist = env::var("MOBILE_HOTSPOT_OUI_BLACKLIST")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_ascii_uppercase())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mobile_hotspot_action = env::var("MOBILE_HOTSPOT_ACTION")
            .ok()
            .and_then(|v| HotspotAction::parse(&v))
            .unwrap_or(HotspotAction::Flag);

        Ok(Self {
            queue_url: env::var("QUEUE_URL").context("QUEUE_URL must be set")?,
            max_messages: env_parse("MAX_MESSAGES", 10),
            wait_time_seconds: env_parse::<i32>("WAIT_TIME_SECONDS", 20).min(20),
            visibility_timeout_seconds: env_parse("VISIBILITY_TIMEOUT_SECONDS", 60),
            max_concurrent_batches: env_parse("MAX_CONCURRENT_BATCHES", 8),
            delete_on_parse_failure: env_bool("DELETE_ON_PARSE_FAILURE", true),
            expected_event_source: env::var("EXPECTED_EVENT_SOURCE")
                .unwrap_or_else(|_| "aws:s3".into()),

            max_object_bytes: env_parse("MAX_OBJECT_BYTES", 5_000_000_000),
            max_inflated_bytes: env_parse("MAX_INFLATED_BYTES", 500 * 1024 * 1024),

            max_location_accuracy: env_parse("MAX_LOCATION_ACCURACY", 150.0),
            rssi_min: env_parse("RSSI_MIN", -100),
            rssi_max: env_parse("RSSI_MAX", 0),

            connected_weight: env_parse("CONNECTED_WEIGHT", 2.0),
            scan_weight: env_parse("SCAN_WEIGHT", 1.0),
            low_link_speed_weight: env_parse("LOW_LINK_SPEED_WEIGHT", 1.5),

            mobile_hotspot_enabled: env_bool("MOBILE_HOTSPOT_ENABLED", false),
            mobile_hotspot_oui_blacklist,
            mobile_hotspot_action,

            delivery_stream_name: env::var("FIREHOSE_DELIVERY_STREAM")
                .context("FIREHOSE_DELIVERY_STREAM must be set")?,
            max_batch_records: env_parse("FIREHOSE_MAX_BATCH_RECORDS", 500),
            max_batch_bytes: env_parse("FIREHOSE_MAX_BATCH_BYTES", 4 * 1024 * 1024),
            batch_timeout_ms: env_parse("FIREHOSE_BATCH_TIMEOUT_MS", 5_000),
            max_record_bytes: env_parse("FIREHOSE_MAX_RECORD_BYTES", 1000 * 1024),
            max_retries: env_parse("FIREHOSE_MAX_RETRIES", 3),
            base_backoff_ms: env_parse("FIREHOSE_BASE_BACKOFF_MS", 1_000),

            shutdown_deadline_ms: env_parse("SHUTDOWN_DEADLINE_MS", 30_000),

            otel_enabled: env_bool("OTEL_ENABLED", false),
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".into()),
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "wifi-ingest".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        })
    }

    /// A deterministic configuration for tests.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            queue_url: "https://sqs.us-east-1.amazonaws.com/000000000000/test-queue".into(),
            max_messages: 10,
            wait_time_seconds: 20,
            visibility_timeout_seconds: 60,
            max_concurrent_batches: 4,
            delete_on_parse_failure: true,
            expected_event_source: "aws:s3".into(),

            max_object_bytes: 5_000_000_000,
            max_inflated_bytes: 500 * 1024 * 1024,

            max_location_accuracy: 150.0,
            rssi_min: -100,
            rssi_max: 0,

            connected_weight: 2.0,
            scan_weight: 1.0,
            low_link_speed_weight: 1.5,

            mobile_hotspot_enabled: false,
            mobile_hotspot_oui_blacklist: HashSet::new(),
            mobile_hotspot_action: HotspotAction::Flag,

            delivery_stream_name: "test-delivery-stream".into(),
            max_batch_records: 500,
            max_batch_bytes: 4 * 1024 * 1024,
            batch_timeout_ms: 5_000,
            max_record_bytes: 1000 * 1024,
            max_retries: 3,
            base_backoff_ms: 1_000,

            shutdown_deadline_ms: 30_000,

            otel_enabled: false,
            otlp_endpoint: "http://localhost:4317".into(),
            service_name: "wifi-ingest-test".into(),
            log_level: "info".into(),
        }
    }
}
