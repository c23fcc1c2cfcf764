//! Receiver state-machine transitions and at-least-once delivery: a
//! message that fails ingestion stays on the queue rather than being
//! deleted.

mod common;

use std::sync::Arc;
use std::time::Duration;

use wifi_ingest::clients::fakes::{FakeDeliveryStream, FakeObjectStore, FakeQueue};
use wifi_ingest::config::Config;
use wifi_ingest::ingestor::Ingestor;
use wifi_ingest::publisher::Publisher;
use wifi_ingest::receiver::Receiver;

#[tokio::test]
async fn idempotent_stop_and_not_running_after() {
    let config = Arc::new(Config::default_for_test());
    let queue = Arc::new(FakeQueue::new(vec![]));
    let delivery = Arc::new(FakeDeliveryStream::new());
    let object_store = Arc::new(FakeObjectStore::new(Vec::new()));
    let publisher = Publisher::new(Arc::clone(&config), delivery);
    let ingestor = Arc::new(Ingestor::new(Arc::clone(&config), object_store, publisher));
    let receiver = Arc::new(Receiver::new(config, queue, ingestor));

    let handle = {
        let receiver = Arc::clone(&receiver);
        tokio::spawn(async move { receiver.start().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(receiver.is_running());

    receiver.stop();
    receiver.stop(); // idempotent: calling twice must not panic or change outcome
    handle.await.unwrap();

    assert!(!receiver.is_running());
}

#[tokio::test]
async fn failed_ingest_leaves_message_undeleted() {
    // Forces ingest failure via a path-traversing object key so
    // validate_upload_event rejects it before the object store is ever
    // touched, exercising the "ingest fails -> no delete" path.
    let body = serde_json::json!({
        "Records": [{
            "eventSource": "aws:s3",
            "eventTime": chrono::Utc::now().to_rfc3339(),
            "s3": { "bucket": {"name": "b"}, "object": {"key": "../etc/passwd", "size": 10} }
        }]
    })
    .to_string();

    let queue = Arc::new(FakeQueue::new(vec![body]));
    let config = Arc::new(Config::default_for_test());
    let delivery = Arc::new(FakeDeliveryStream::new());
    let object_store = Arc::new(FakeObjectStore::new(Vec::new()));
    let publisher = Publisher::new(Arc::clone(&config), delivery);
    let ingestor = Arc::new(Ingestor::new(Arc::clone(&config), object_store, publisher));
    let receiver = Arc::new(Receiver::new(config, Arc::clone(&queue), ingestor));

    let handle = {
        let receiver = Arc::clone(&receiver);
        tokio::spawn(async move { receiver.start().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    receiver.stop();
    handle.await.unwrap();

    // path traversal in the object key makes validate_upload_event reject
    // it, so the Ingestor never succeeds and the message stays queued.
    assert_eq!(queue.remaining(), 1);
}
