//! SQS-backed `QueueClient`.

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tracing::info;

use super::{QueueClient, QueueError, QueueMessage};

#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub async fn new(queue_url: String) -> Self {
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        info!(queue_url = %queue_url, "SQS queue client initialized");
        Self {
            client: Client::new(&shared_config),
            queue_url,
        }
    }
}

#[async_trait]
impl QueueClient for SqsQueue {
    async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_seconds)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                Some(QueueMessage {
                    body: m.body?,
                    receipt_handle: m.receipt_handle?,
                    message_id: m.message_id.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
