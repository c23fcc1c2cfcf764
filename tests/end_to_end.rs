//! End-to-end scenarios driven through Ingestor -> Publisher against the
//! in-memory fakes: happy path, accuracy-based rejection, low-link-speed
//! weighting, hotspot exclusion, and malformed-envelope handling.

mod common;

use std::sync::Arc;

use wifi_ingest::clients::fakes::{FakeDeliveryStream, FakeObjectStore};
use wifi_ingest::config::Config;
use wifi_ingest::ingestor::Ingestor;
use wifi_ingest::model::UploadEvent;
use wifi_ingest::publisher::Publisher;
use wifi_ingest::receiver;

fn upload_event(object_key: &str, size: u64) -> UploadEvent {
    UploadEvent {
        region_hint: Some("us-east-1".into()),
        bucket: "wifi-uploads".into(),
        object_key: object_key.into(),
        object_size: size,
        e_tag: None,
        sequencer: None,
        event_time: chrono::Utc::now(),
        request_id: None,
    }
}

async fn run_object(config: Config, body: Vec<u8>) -> (Arc<FakeDeliveryStream>, usize) {
    let config = Arc::new(config);
    let delivery = Arc::new(FakeDeliveryStream::new());
    let object_store = Arc::new(FakeObjectStore::new(body.clone()));
    let publisher = Publisher::new(Arc::clone(&config), delivery.clone());
    let ingestor = Ingestor::new(config, object_store, Arc::clone(&publisher));

    ingestor.process(&upload_event("devices/d1/scan.gz", body.len() as u64)).await.unwrap();
    publisher.flush().await.unwrap();

    let admitted: usize = delivery.batches().iter().map(std::vec::Vec::len).sum();
    (delivery, admitted)
}

#[tokio::test]
async fn happy_path_emits_connected_and_scan() {
    let bundle = r#"{
        "dataVersion": "1",
        "connectedEvents": [{
            "ts": 1700000000000,
            "eventId": "evt-1",
            "wifiInfo": {"bssid": "b8:f8:53:c0:1e:ff", "rssi": -58, "linkSpeed": 351},
            "location": {"lat": 40.6768816, "lon": -74.416391, "accuracy": 100.0}
        }],
        "scanResults": [{
            "ts": 1700000000000,
            "location": {"lat": 40.6768816, "lon": -74.416391, "accuracy": 100.0},
            "entries": [{"bssid": "aa:bb:cc:dd:ee:ff", "rssi": -65}]
        }]
    }"#;
    let body = common::object_body(&[bundle]);
    let (_delivery, admitted) = run_object(Config::default_for_test(), body).await;
    assert_eq!(admitted, 2);
}

#[tokio::test]
async fn filter_reject_on_accuracy() {
    let bundle = r#"{
        "connectedEvents": [{
            "ts": 1700000000000,
            "wifiInfo": {"bssid": "b8:f8:53:c0:1e:ff", "rssi": -58, "linkSpeed": 351},
            "location": {"lat": 40.6768816, "lon": -74.416391, "accuracy": 300.0}
        }],
        "scanResults": []
    }"#;
    let body = common::object_body(&[bundle]);
    let mut config = Config::default_for_test();
    config.max_location_accuracy = 150.0;
    let (_delivery, admitted) = run_object(config, body).await;
    assert_eq!(admitted, 0);
}

#[tokio::test]
async fn low_link_speed_adjustment() {
    let bundle = r#"{
        "connectedEvents": [{
            "ts": 1700000000000,
            "wifiInfo": {"bssid": "b8:f8:53:c0:1e:ff", "rssi": -45, "linkSpeed": 25},
            "location": {"lat": 40.6768816, "lon": -74.416391, "accuracy": 50.0}
        }],
        "scanResults": []
    }"#;
    let body = common::object_body(&[bundle]);
    let (delivery, admitted) = run_object(Config::default_for_test(), body).await;
    assert_eq!(admitted, 1);
    let batch = &delivery.batches()[0];
    let record: serde_json::Value = serde_json::from_slice(&batch[0]).unwrap();
    assert_eq!(record["qualityWeight"], 1.5);
}

#[tokio::test]
async fn hotspot_exclude_drops_record() {
    let bundle = r#"{
        "connectedEvents": [{
            "ts": 1700000000000,
            "wifiInfo": {"bssid": "00:11:22:aa:bb:cc", "rssi": -58, "linkSpeed": 351},
            "location": {"lat": 40.6768816, "lon": -74.416391, "accuracy": 50.0}
        }],
        "scanResults": []
    }"#;
    let body = common::object_body(&[bundle]);
    let mut config = Config::default_for_test();
    config.mobile_hotspot_enabled = true;
    config.mobile_hotspot_oui_blacklist.insert("00:11:22".into());
    config.mobile_hotspot_action = wifi_ingest::validator::HotspotAction::Exclude;
    let (_delivery, admitted) = run_object(config, body).await;
    assert_eq!(admitted, 0);
}

#[test]
fn poison_message_fails_without_invoking_ingestor() {
    let result = receiver::parse_envelope("not json", "aws:s3");
    assert!(result.is_err());
}

#[tokio::test]
async fn empty_object_yields_no_measurements_without_error() {
    let bundle = r#"{"connectedEvents": [], "scanResults": []}"#;
    let body = common::object_body(&[bundle]);
    let (_delivery, admitted) = run_object(Config::default_for_test(), body).await;
    assert_eq!(admitted, 0);
}
