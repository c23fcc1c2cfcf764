//! Firehose-backed `DeliveryStreamClient`.

use async_trait::async_trait;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record;
use aws_sdk_firehose::Client;
use tracing::info;

use super::{DeliveryError, DeliveryStreamClient, RecordOutcome};

#[derive(Clone)]
pub struct FirehoseDelivery {
    client: Client,
}

impl FirehoseDelivery {
    pub async fn new() -> Self {
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        info!("Firehose delivery client initialized");
        Self {
            client: Client::new(&shared_config),
        }
    }
}

#[async_trait]
impl DeliveryStreamClient for FirehoseDelivery {
    async fn put_record_batch(
        &self,
        stream: &str,
        records: Vec<Vec<u8>>,
    ) -> Result<Vec<RecordOutcome>, DeliveryError> {
        let entries: Vec<Record> = records
            .iter()
            .map(|bytes| Record::builder().data(Blob::new(bytes.clone())).build().unwrap())
            .collect();

        let output = self
            .client
            .put_record_batch()
            .delivery_stream_name(stream)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(|e| classify_send_error(&e.to_string()))?;

        let outcomes = output
            .request_responses
            .into_iter()
            .enumerate()
            .map(|(index, resp)| RecordOutcome {
                index,
                success: resp.error_code.is_none(),
                error_code: resp.error_code,
            })
            .collect();

        Ok(outcomes)
    }
}

/// Classifies a Firehose send-level failure as transient or permanent:
/// throttling, service/internal failures, and timeouts are transient;
/// anything else (validation, access-denied, etc.) is permanent.
fn classify_send_error(message: &str) -> DeliveryError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("throttl")
        || lower.contains("serviceunavailable")
        || lower.contains("internalfailure")
        || lower.contains("timeout")
        || lower.contains("timed out")
    {
        DeliveryError::Transient(message.to_string())
    } else {
        DeliveryError::Permanent(message.to_string())
    }
}
