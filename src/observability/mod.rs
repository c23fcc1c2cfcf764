//! Observability — structured logging and `OpenTelemetry` metrics.
//!
//! ```rust,no_run
//! # use wifi_ingest::{config::Config, observability};
//! # let config = Config::default_for_test();
//! observability::init_tracing(&config);
//! let _meter_provider = observability::init_metrics(&config);
//! ```

pub mod metrics;

use opentelemetry_sdk::metrics::SdkMeterProvider;

use crate::config::Config;

/// Initialise the `tracing_subscriber` global default: JSON output, level
/// from `RUST_LOG` if set, otherwise `config.log_level`.
pub fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("wifi_ingest={}", config.log_level)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
    tracing::info!(service = %config.service_name, "observability initialised");
}

/// Initialise the metrics pipeline and register the named counters.
///
/// Returns `None` when metrics export is disabled; the counters remain
/// registered against the global no-op meter either way.
pub fn init_metrics(config: &Config) -> Option<SdkMeterProvider> {
    let provider = metrics::init(config);
    metrics::register_metrics();
    provider
}
