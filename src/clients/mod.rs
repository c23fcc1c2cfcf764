//! External collaborator interfaces: queue, object store, delivery stream.
//! Only these trait boundaries are defined here — the `aws-sdk-*`-backed
//! implementations below are thin, config-driven wrappers, and `fakes`
//! gives in-memory stand-ins for tests.

pub mod delivery;
pub mod fakes;
pub mod object_store;
pub mod queue;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// One queue message as received from the broker.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
    pub message_id: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("receipt handle rejected: {0}")]
    InvalidReceipt(String),
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store read failed: {0}")]
    Read(String),
}

/// A fallible stream of object bytes, opened without buffering the whole
/// object in memory.
pub type ObjectByteStream = BoxStream<'static, Result<Bytes, ObjectStoreError>>;

#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn open_stream(&self, bucket: &str, key: &str) -> Result<ObjectByteStream, ObjectStoreError>;
}

/// Outcome of one record within a `put_record_batch` call.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub index: usize,
    pub success: bool,
    pub error_code: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery stream throttled or unavailable: {0}")]
    Transient(String),
    #[error("delivery stream rejected the request: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait DeliveryStreamClient: Send + Sync {
    async fn put_record_batch(
        &self,
        stream: &str,
        records: Vec<Vec<u8>>,
    ) -> Result<Vec<RecordOutcome>, DeliveryError>;
}
