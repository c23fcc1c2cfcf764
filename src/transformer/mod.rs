//! Transform + validation engine.
//!
//! Turns one `ScanBundle` into zero or more normalized `Measurement`
//! records, applying field validation and the filter/quality policy.

use chrono::Utc;

use crate::config::Config;
use crate::model::{
    ConnectedEvent, ConnectionBlock, ConnectionStatus, Location, Measurement, MeasurementLocation,
    ProcessingContext, ScanBundle, ScanResult,
};
use crate::observability::metrics;
use crate::validator::{self, HotspotAction};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("transform input was null")]
    InvalidInput,
}

/// Approximate normalization baseline for the accuracy component of
/// `quality_score`: accuracy at or beyond this value contributes ~0 to the
/// score. Chosen well above the default `maxLocationAccuracy` (150m) so
/// records near the rejection boundary still score low rather than zero.
const ACCURACY_SCORE_BASELINE_METERS: f64 = 200.0;

/// Deterministic, monotonic mapping from `(qualityWeight, rssi, accuracy)`
/// to a `[0, 1]` quality score; see DESIGN.md for the formula rationale.
fn quality_score(weight: f64, rssi: i32, accuracy: f64) -> f64 {
    let weight_component = ((weight - 1.0) / 1.0).clamp(0.0, 1.0);
    let signal_component = (1.0 - (rssi.unsigned_abs() as f64 / 100.0)).clamp(0.0, 1.0);
    let accuracy_component = (1.0 - (accuracy / ACCURACY_SCORE_BASELINE_METERS)).clamp(0.0, 1.0);
    (weight_component * 0.4 + signal_component * 0.4 + accuracy_component * 0.2).clamp(0.0, 1.0)
}

fn to_measurement_location(loc: &Location) -> MeasurementLocation {
    MeasurementLocation {
        lat: loc.lat,
        lon: loc.lon,
        altitude: loc.altitude,
        accuracy: loc.accuracy,
        ts: loc.ts.and_then(chrono::DateTime::from_timestamp_millis),
        provider: loc.provider.clone(),
        source: loc.source.clone(),
    }
}

/// Trims an SSID and rejects it if empty after trimming or containing a NUL
/// code point. Returns `Ok(None)` when no SSID was present at all.
fn process_ssid(raw: Option<&str>) -> Result<Option<String>, &'static str> {
    match raw {
        None => Ok(None),
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.contains('\0') {
                Err("ssid_invalid")
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
    }
}

/// Entry point. `bundle = None` models a null/missing input and fails with
/// `InvalidInput`; an empty bundle (no events, no scan results) yields an
/// empty, non-error sequence.
pub fn transform(
    bundle: Option<&ScanBundle>,
    ctx: &ProcessingContext,
    config: &Config,
) -> Result<Vec<Measurement>, TransformError> {
    let bundle = bundle.ok_or(TransformError::InvalidInput)?;
    let mut out = Vec::new();

    for event in &bundle.connected_events {
        if let Some(m) = transform_connected_event(event, bundle, ctx, config) {
            out.push(m);
        }
    }
    for scan in &bundle.scan_results {
        transform_scan_result(scan, bundle, ctx, config, &mut out);
    }

    Ok(out)
}

fn reject(reason: &'static str) {
    metrics::filter_reject(reason);
    tracing::debug!(reason, "record rejected");
}

fn transform_connected_event(
    event: &ConnectedEvent,
    bundle: &ScanBundle,
    ctx: &ProcessingContext,
    config: &Config,
) -> Option<Measurement> {
    let wifi_info = event.wifi_info.as_ref()?;
    let location = event.location.as_ref()?;

    let canonical = wifi_info
        .bssid
        .as_deref()
        .and_then(validator::canonicalize_bssid);

    let bssid_check = validator::validate_bssid(canonical.as_deref());
    if !bssid_check.ok {
        reject(bssid_check.reason.unwrap_or("bssid_invalid"));
        return None;
    }
    let bssid = canonical.expect("validated bssid is always canonical");

    let rssi_check = validator::validate_rssi(wifi_info.rssi, config.rssi_min, config.rssi_max);
    if !rssi_check.ok {
        reject(rssi_check.reason.unwrap_or("rssi_invalid"));
        return None;
    }
    let rssi = wifi_info.rssi.expect("validated rssi is always present");

    let loc_check = validator::validate_location(Some(location), config.max_location_accuracy);
    if !loc_check.ok {
        reject(loc_check.reason.unwrap_or("location_invalid"));
        return None;
    }

    let ts_check = validator::validate_timestamp(Some(event.ts));
    if !ts_check.ok {
        reject(ts_check.reason.unwrap_or("timestamp_invalid"));
        return None;
    }

    let ssid = match process_ssid(wifi_info.ssid.as_deref()) {
        Ok(s) => s,
        Err(reason) => {
            reject(reason);
            return None;
        }
    };

    let hotspot = validator::detect_mobile_hotspot(
        &bssid,
        config.mobile_hotspot_enabled,
        &config.mobile_hotspot_oui_blacklist,
        config.mobile_hotspot_action,
    );
    if hotspot.detected && hotspot.action == HotspotAction::Exclude {
        reject("hotspot_excluded");
        return None;
    }

    let quality_weight = if wifi_info.link_speed.is_some_and(|s| s < 50) && rssi > -50 {
        config.low_link_speed_weight
    } else {
        config.connected_weight
    };

    let event_id = event
        .event_id
        .clone()
        .unwrap_or_else(|| format!("{bssid}:{}", event.ts));

    Some(Measurement {
        bssid: bssid.clone(),
        measurement_ts: event.ts,
        event_id,
        device: bundle.device.clone(),
        location: to_measurement_location(location),
        ssid,
        rssi,
        frequency: wifi_info.frequency,
        connection: Some(ConnectionBlock {
            link_speed: wifi_info.link_speed,
            channel_width: wifi_info.channel_width,
            center_freq0: wifi_info.center_freq0,
            center_freq1: wifi_info.center_freq1,
            capabilities: wifi_info.capabilities.clone(),
            is80211mc_responder: wifi_info.is80211mc_responder.unwrap_or(false),
            is_passpoint_network: wifi_info.is_passpoint_network.unwrap_or(false),
            is_captive: wifi_info.is_captive.unwrap_or(false),
            num_scan_results: wifi_info.num_scan_results,
        }),
        connection_status: ConnectionStatus::Connected,
        quality_weight,
        quality_score: quality_score(quality_weight, rssi, location.accuracy),
        hotspot_flagged: hotspot.detected && hotspot.action == HotspotAction::Flag,
        ingestion_ts: Utc::now().timestamp_millis(),
        processing_batch_id: ctx.batch_id,
        data_version: bundle.device.data_version.clone(),
    })
}

fn transform_scan_result(
    scan: &ScanResult,
    bundle: &ScanBundle,
    ctx: &ProcessingContext,
    config: &Config,
    out: &mut Vec<Measurement>,
) {
    let Some(location) = scan.location.as_ref() else {
        reject("location_missing");
        return;
    };

    for entry in &scan.entries {
        let canonical = entry.bssid.as_deref().and_then(validator::canonicalize_bssid);

        let bssid_check = validator::validate_bssid(canonical.as_deref());
        if !bssid_check.ok {
            reject(bssid_check.reason.unwrap_or("bssid_invalid"));
            continue;
        }
        let bssid = canonical.expect("validated bssid is always canonical");

        let rssi_check = validator::validate_rssi(entry.rssi, config.rssi_min, config.rssi_max);
        if !rssi_check.ok {
            reject(rssi_check.reason.unwrap_or("rssi_invalid"));
            continue;
        }
        let rssi = entry.rssi.expect("validated rssi is always present");

        let loc_check = validator::validate_location(Some(location), config.max_location_accuracy);
        if !loc_check.ok {
            reject(loc_check.reason.unwrap_or("location_invalid"));
            continue;
        }

        let effective_ts = entry.ts.unwrap_or(scan.ts);
        let ts_check = validator::validate_timestamp(Some(effective_ts));
        if !ts_check.ok {
            reject(ts_check.reason.unwrap_or("timestamp_invalid"));
            continue;
        }

        let ssid = match process_ssid(entry.ssid.as_deref()) {
            Ok(s) => s,
            Err(reason) => {
                reject(reason);
                continue;
            }
        };

        let hotspot = validator::detect_mobile_hotspot(
            &bssid,
            config.mobile_hotspot_enabled,
            &config.mobile_hotspot_oui_blacklist,
            config.mobile_hotspot_action,
        );
        if hotspot.detected && hotspot.action == HotspotAction::Exclude {
            reject("hotspot_excluded");
            continue;
        }

        let event_id = format!("{}:{bssid}:{effective_ts}", ctx.batch_id);

        out.push(Measurement {
            bssid: bssid.clone(),
            measurement_ts: effective_ts,
            event_id,
            device: bundle.device.clone(),
            location: to_measurement_location(location),
            ssid,
            rssi,
            frequency: entry.frequency,
            connection: None,
            connection_status: ConnectionStatus::Scan,
            quality_weight: config.scan_weight,
            quality_score: quality_score(config.scan_weight, rssi, location.accuracy),
            hotspot_flagged: hotspot.detected && hotspot.action == HotspotAction::Flag,
            ingestion_ts: Utc::now().timestamp_millis(),
            processing_batch_id: ctx.batch_id,
            data_version: bundle.device.data_version.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceMetadata, ScanEntry, WifiConnectedInfo};
    use uuid::Uuid;

    fn ctx() -> ProcessingContext {
        ProcessingContext {
            batch_id: Uuid::new_v4(),
            stream_name: "test-stream".into(),
            object_key: "raw/test-stream/file.gz".into(),
            start_ts: Utc::now(),
        }
    }

    fn location(accuracy: f64) -> Location {
        Location {
            provider: None,
            lat: 40.6768816,
            lon: -74.416391,
            altitude: None,
            accuracy,
            ts: None,
            source: None,
            speed: None,
            bearing: None,
        }
    }

    fn bundle_with(connected: Vec<ConnectedEvent>, scans: Vec<ScanResult>) -> ScanBundle {
        ScanBundle {
            device: DeviceMetadata {
                data_version: Some("1".into()),
                ..Default::default()
            },
            connected_events: connected,
            scan_events: vec![],
            scan_results: scans,
        }
    }

    fn connected_event(bssid: &str, rssi: i32, link_speed: Option<i32>, accuracy: f64) -> ConnectedEvent {
        ConnectedEvent {
            ts: Utc::now().timestamp_millis(),
            event_id: Some("evt-1".into()),
            event_type: None,
            device_id: None,
            wifi_info: Some(WifiConnectedInfo {
                bssid: Some(bssid.into()),
                ssid: Some("home-network".into()),
                num_scan_results: Some(3),
                link_speed,
                frequency: Some(5180),
                rssi: Some(rssi),
                capabilities: Some("[WPA2]".into()),
                center_freq0: None,
                center_freq1: None,
                channel_width: None,
                is80211mc_responder: Some(false),
                is_passpoint_network: Some(false),
                is_captive: Some(false),
            }),
            location: Some(location(accuracy)),
        }
    }

    fn scan_result(bssid: &str, rssi: i32, accuracy: f64) -> ScanResult {
        ScanResult {
            ts: Utc::now().timestamp_millis(),
            source: Some("wifi".into()),
            location: Some(location(accuracy)),
            entries: vec![ScanEntry {
                ssid: Some("neighbor-net".into()),
                bssid: Some(bssid.into()),
                ts: None,
                rssi: Some(rssi),
                frequency: Some(2412),
            }],
        }
    }

    #[test]
    fn null_input_is_invalid() {
        let result = transform(None, &ctx(), &Config::default_for_test());
        assert!(matches!(result, Err(TransformError::InvalidInput)));
    }

    #[test]
    fn empty_bundle_yields_empty_sequence() {
        let bundle = bundle_with(vec![], vec![]);
        let result = transform(Some(&bundle), &ctx(), &Config::default_for_test()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn happy_path_connected_and_scan() {
        let bundle = bundle_with(
            vec![connected_event("b8:f8:53:c0:1e:ff", -58, Some(351), 100.0)],
            vec![scan_result("aa:bb:cc:dd:ee:ff", -65, 100.0)],
        );
        let c = ctx();
        let out = transform(Some(&bundle), &c, &Config::default_for_test()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].connection_status, ConnectionStatus::Connected);
        assert_eq!(out[0].quality_weight, 2.0);
        assert_eq!(out[1].connection_status, ConnectionStatus::Scan);
        assert_eq!(out[1].quality_weight, 1.0);
        assert!(out[1].connection.is_none());
        assert_eq!(out[0].processing_batch_id, out[1].processing_batch_id);
    }

    #[test]
    fn accuracy_over_threshold_rejects() {
        let bundle = bundle_with(
            vec![connected_event("b8:f8:53:c0:1e:ff", -58, Some(351), 300.0)],
            vec![scan_result("aa:bb:cc:dd:ee:ff", -65, 300.0)],
        );
        let mut config = Config::default_for_test();
        config.max_location_accuracy = 150.0;
        let out = transform(Some(&bundle), &ctx(), &config).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn low_link_speed_adjustment() {
        let bundle = bundle_with(
            vec![connected_event("b8:f8:53:c0:1e:ff", -45, Some(25), 50.0)],
            vec![],
        );
        let out = transform(Some(&bundle), &ctx(), &Config::default_for_test()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quality_weight, 1.5);
    }

    #[test]
    fn hotspot_exclude_drops_record() {
        let bundle = bundle_with(
            vec![connected_event("00:11:22:aa:bb:cc", -58, Some(351), 50.0)],
            vec![],
        );
        let mut config = Config::default_for_test();
        config.mobile_hotspot_enabled = true;
        config.mobile_hotspot_oui_blacklist.insert("00:11:22".into());
        config.mobile_hotspot_action = HotspotAction::Exclude;
        let out = transform(Some(&bundle), &ctx(), &config).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn hotspot_flag_marks_but_keeps_record() {
        let bundle = bundle_with(
            vec![connected_event("00:11:22:aa:bb:cc", -58, Some(351), 50.0)],
            vec![],
        );
        let mut config = Config::default_for_test();
        config.mobile_hotspot_enabled = true;
        config.mobile_hotspot_oui_blacklist.insert("00:11:22".into());
        config.mobile_hotspot_action = HotspotAction::Flag;
        let out = transform(Some(&bundle), &ctx(), &config).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].hotspot_flagged);
    }

    #[test]
    fn quality_score_is_monotonic_and_bounded() {
        let low = quality_score(1.0, -100, 200.0);
        let high = quality_score(2.0, -30, 10.0);
        assert!((0.0..=1.0).contains(&low));
        assert!((0.0..=1.0).contains(&high));
        assert!(high > low);
    }

    #[test]
    fn missing_wifi_info_or_location_skips() {
        let mut event = connected_event("b8:f8:53:c0:1e:ff", -58, Some(351), 50.0);
        event.wifi_info = None;
        let bundle = bundle_with(vec![event], vec![]);
        let out = transform(Some(&bundle), &ctx(), &Config::default_for_test()).unwrap();
        assert!(out.is_empty());
    }
}
