//! Batching publisher.
//!
//! Coalesces serialized Measurements into size/count/time-bounded batches
//! and ships them to the delivery stream, retrying partial and transient
//! failures with exponential backoff and jitter. The buffer lock is only
//! ever taken to drain the batch into a plain `Vec`; it is never held
//! across the network call that sends it.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::clients::{DeliveryError, DeliveryStreamClient, RecordOutcome};
use crate::config::Config;
use crate::model::Measurement;
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("transient delivery error: {0}")]
    Transient(String),
    #[error("permanent delivery error: {0}")]
    Permanent(String),
    #[error("publisher is closed")]
    Closed,
}

struct PendingRecord {
    bytes: Vec<u8>,
}

struct BatchState {
    records: Vec<PendingRecord>,
    total_bytes: usize,
    oldest_entered: Option<Instant>,
    closed: bool,
}

impl BatchState {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            total_bytes: 0,
            oldest_entered: None,
            closed: false,
        }
    }

    fn take(&mut self) -> Vec<PendingRecord> {
        self.total_bytes = 0;
        self.oldest_entered = None;
        std::mem::take(&mut self.records)
    }
}

/// Size/count/time-bounded batcher owning the single shared buffer.
pub struct Publisher {
    config: Arc<Config>,
    client: Arc<dyn DeliveryStreamClient>,
    state: Mutex<BatchState>,
}

impl Publisher {
    pub fn new(config: Arc<Config>, client: Arc<dyn DeliveryStreamClient>) -> Arc<Self> {
        Arc::new(Self {
            config,
            client,
            state: Mutex::new(BatchState::new()),
        })
    }

    /// Spawns the background flush-timer task. The returned handle should
    /// be aborted (or left to exit via the shutdown signal) on shutdown.
    pub fn spawn_flush_timer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            let tick = Duration::from_millis(publisher.config.batch_timeout_ms.max(50));
            loop {
                tokio::time::sleep(tick).await;
                let due = {
                    let state = publisher.state.lock().await;
                    state
                        .oldest_entered
                        .is_some_and(|t| t.elapsed() >= Duration::from_millis(publisher.config.batch_timeout_ms))
                };
                if due {
                    if let Err(e) = publisher.flush().await {
                        tracing::warn!(error = %e, "background flush failed");
                    }
                }
            }
        })
    }

    /// Serializes and admits one Measurement into the current batch.
    /// Returns `Ok(true)` if admitted, `Ok(false)` if dropped for being
    /// oversized (counted via `recordTooLarge`), `Err` if the publisher is
    /// closed.
    #[tracing::instrument(skip(self, measurement), fields(bssid = %measurement.bssid))]
    pub async fn submit(&self, measurement: &Measurement) -> Result<bool, PublishError> {
        let mut bytes = serde_json::to_vec(measurement)
            .map_err(|e| PublishError::Permanent(format!("serialize failure: {e}")))?;
        bytes.push(b'\n');

        if bytes.len() > self.config.max_record_bytes {
            metrics::record_too_large();
            tracing::warn!(size = bytes.len(), "dropping oversized record");
            return Ok(false);
        }

        let to_flush = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(PublishError::Closed);
            }

            let would_exceed_count = state.records.len() + 1 > self.config.max_batch_records;
            let would_exceed_bytes = state.total_bytes + bytes.len() > self.config.max_batch_bytes;

            let mut drained = None;
            if (would_exceed_count || would_exceed_bytes) && !state.records.is_empty() {
                drained = Some(state.take());
            }

            if state.oldest_entered.is_none() {
                state.oldest_entered = Some(Instant::now());
            }
            state.total_bytes += bytes.len();
            state.records.push(PendingRecord { bytes });
            drained
        };

        if let Some(batch) = to_flush {
            self.send_batch(batch).await;
        }

        Ok(true)
    }

    /// Drains and sends whatever is currently buffered.
    pub async fn flush(&self) -> Result<(), PublishError> {
        let batch = {
            let mut state = self.state.lock().await;
            if state.records.is_empty() {
                return Ok(());
            }
            state.take()
        };
        self.send_batch(batch).await;
        Ok(())
    }

    /// Flushes synchronously and marks the publisher closed, bounded by
    /// `shutdownDeadlineMs`. Records still unsent when the deadline elapses
    /// are abandoned and counted.
    pub async fn close(&self) -> Result<(), PublishError> {
        {
            let mut state = self.state.lock().await;
            state.closed = true;
        }
        let deadline = Duration::from_millis(self.config.shutdown_deadline_ms);
        match tokio::time::timeout(deadline, self.flush()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("shutdown deadline elapsed while flushing publisher");
                metrics::shutdown_abandoned(1);
                Ok(())
            }
        }
    }

    /// Sends one batch, retrying only the failed subset, honoring
    /// `maxRetries` with exponential backoff and jitter.
    async fn send_batch(&self, mut records: Vec<PendingRecord>) {
        let mut attempt: u32 = 0;
        loop {
            let payload: Vec<Vec<u8>> = records.iter().map(|r| r.bytes.clone()).collect();
            let stream = &self.config.delivery_stream_name;

            match self.client.put_record_batch(stream, payload).await {
                Ok(outcomes) => {
                    let failed = failed_indices(&outcomes);
                    if failed.is_empty() {
                        metrics::batch_success();
                        return;
                    }

                    metrics::partial_failures(failed.len() as u64);
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        tracing::warn!(count = failed.len(), "dropping records after exhausting retries");
                        metrics::dropped_after_retries(failed.len() as u64);
                        return;
                    }

                    let failed_set: std::collections::HashSet<usize> = failed.into_iter().collect();
                    records = records
                        .into_iter()
                        .enumerate()
                        .filter(|(i, _)| failed_set.contains(i))
                        .map(|(_, r)| r)
                        .collect();
                    self.backoff_sleep(attempt).await;
                }
                Err(DeliveryError::Transient(msg)) => {
                    metrics::retriable_errors("transient");
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        tracing::warn!(error = %msg, count = records.len(), "dropping batch after exhausting retries");
                        metrics::dropped_after_retries(records.len() as u64);
                        return;
                    }
                    self.backoff_sleep(attempt).await;
                }
                Err(DeliveryError::Permanent(msg)) => {
                    metrics::permanent_errors();
                    tracing::error!(error = %msg, count = records.len(), "dropping batch: permanent delivery error");
                    return;
                }
            }
        }
    }

    async fn backoff_sleep(&self, attempt: u32) {
        let base = self.config.base_backoff_ms as f64;
        let exp = base * 2f64.powi(attempt as i32 - 1);
        let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
        let delay_ms = (exp * (1.0 + jitter)).max(0.0) as u64;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

fn failed_indices(outcomes: &[RecordOutcome]) -> Vec<usize> {
    outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.index)
        .collect()
}
