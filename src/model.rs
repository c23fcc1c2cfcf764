//! Data model shared across the ingestion pipeline.
//!
//! Mirrors the shapes in the scan-bundle payload and the flat `Measurement`
//! record the pipeline emits downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single upload notification extracted from a queue message envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEvent {
    pub region_hint: Option<String>,
    pub bucket: String,
    pub object_key: String,
    pub object_size: u64,
    pub e_tag: Option<String>,
    pub sequencer: Option<String>,
    pub event_time: DateTime<Utc>,
    pub request_id: Option<String>,
}

/// Per-object processing context, carried through decode/transform/publish.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub batch_id: Uuid,
    pub stream_name: String,
    pub object_key: String,
    pub start_ts: DateTime<Utc>,
}

impl ProcessingContext {
    pub fn new(stream_name: String, object_key: String) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            stream_name,
            object_key,
            start_ts: Utc::now(),
        }
    }
}

/// Device metadata carried by a scan bundle and echoed onto every
/// `Measurement` produced from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub os_name: Option<String>,
    #[serde(default)]
    pub os_build: Option<String>,
    #[serde(default)]
    pub app_name_version: Option<String>,
    #[serde(default)]
    pub data_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub provider: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    pub accuracy: f64,
    /// Device-reported epoch-millis fix timestamp.
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiConnectedInfo {
    #[serde(default)]
    pub bssid: Option<String>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub num_scan_results: Option<i32>,
    #[serde(default)]
    pub link_speed: Option<i32>,
    #[serde(default)]
    pub frequency: Option<i32>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub capabilities: Option<String>,
    #[serde(default)]
    pub center_freq0: Option<i32>,
    #[serde(default)]
    pub center_freq1: Option<i32>,
    #[serde(default)]
    pub channel_width: Option<i32>,
    #[serde(default)]
    pub is80211mc_responder: Option<bool>,
    #[serde(default)]
    pub is_passpoint_network: Option<bool>,
    #[serde(default)]
    pub is_captive: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedEvent {
    /// Device-reported epoch-millis timestamp.
    pub ts: i64,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub wifi_info: Option<WifiConnectedInfo>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub bssid: Option<String>,
    /// Per-entry timestamp; falls back to the enclosing scan's `ts` when absent.
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub frequency: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub ts: i64,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub entries: Vec<ScanEntry>,
}

/// One decoded, gzip+base64 line from an object: a device's scan bundle.
///
/// `scan_events` is retained on the wire shape for forward compatibility
/// with producers but carries no emission rule of its own — only
/// `connected_events` and `scan_results` are turned into `Measurement`s.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanBundle {
    #[serde(flatten)]
    pub device: DeviceMetadata,
    #[serde(default)]
    pub connected_events: Vec<ConnectedEvent>,
    #[serde(default)]
    pub scan_events: Vec<serde_json::Value>,
    #[serde(default)]
    pub scan_results: Vec<ScanResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Connected,
    Scan,
}

/// Connection-specific fields, present only for `CONNECTED` records.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionBlock {
    pub link_speed: Option<i32>,
    pub channel_width: Option<i32>,
    pub center_freq0: Option<i32>,
    pub center_freq1: Option<i32>,
    pub capabilities: Option<String>,
    pub is80211mc_responder: bool,
    pub is_passpoint_network: bool,
    pub is_captive: bool,
    pub num_scan_results: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub accuracy: f64,
    /// Human-readable audit timestamp (ISO-8601); the device-fix epoch-millis
    /// reading, when present on the source location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// The flat, normalized output record. One per observed (CONNECTED or SCAN)
/// access-point sighting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    // Primary identity
    pub bssid: String,
    pub measurement_ts: i64,
    pub event_id: String,

    // Device metadata
    #[serde(flatten)]
    pub device: DeviceMetadata,

    // Location
    pub location: MeasurementLocation,

    // Signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    pub rssi: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<i32>,

    // Connection (nullable for SCAN records)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionBlock>,

    // Classification
    pub connection_status: ConnectionStatus,
    pub quality_weight: f64,
    pub quality_score: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hotspot_flagged: bool,

    // Processing
    pub ingestion_ts: i64,
    pub processing_batch_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_version: Option<String>,
}

pub const ALL_ZERO_BSSID: &str = "00:00:00:00:00:00";
pub const ALL_FF_BSSID: &str = "ff:ff:ff:ff:ff:ff";
