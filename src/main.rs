//! WiFi Ingest - Entry Point
//!
//! Streaming transformation pipeline from queue notification to batched
//! delivery-stream publish.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use wifi_ingest::clients::delivery::FirehoseDelivery;
use wifi_ingest::clients::object_store::S3ObjectStore;
use wifi_ingest::clients::queue::SqsQueue;
use wifi_ingest::config::Config;
use wifi_ingest::ingestor::Ingestor;
use wifi_ingest::observability;
use wifi_ingest::publisher::Publisher;
use wifi_ingest::receiver::Receiver;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    observability::init_tracing(&config);
    let _meter_provider = observability::init_metrics(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "starting wifi-ingest");

    let object_store = Arc::new(S3ObjectStore::new().await);
    let queue = Arc::new(SqsQueue::new(config.queue_url.clone()).await);
    let delivery = Arc::new(FirehoseDelivery::new().await);

    let publisher = Publisher::new(Arc::clone(&config), delivery);
    let _flush_timer = publisher.spawn_flush_timer();

    let ingestor = Arc::new(Ingestor::new(Arc::clone(&config), object_store, Arc::clone(&publisher)));
    let receiver = Arc::new(Receiver::new(Arc::clone(&config), queue, ingestor));

    let run_handle = {
        let receiver = Arc::clone(&receiver);
        tokio::spawn(async move { receiver.start().await })
    };

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    receiver.stop();
    if let Err(e) = run_handle.await {
        tracing::error!(error = %e, "receiver task panicked during shutdown");
    }

    publisher.close().await.ok();
    _flush_timer.abort();
    info!("shutdown complete");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
