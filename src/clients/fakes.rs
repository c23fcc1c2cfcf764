//! In-memory fakes for the three external-collaborator traits, used by
//! unit and integration tests so they run without touching real AWS
//! endpoints.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    DeliveryError, DeliveryStreamClient, ObjectByteStream, ObjectStoreClient, ObjectStoreError,
    QueueClient, QueueError, QueueMessage, RecordOutcome,
};

/// A queue backed by an in-process FIFO. `receive` returns (and does not
/// remove) up to `max_messages`; `delete` removes by receipt handle.
pub struct FakeQueue {
    messages: Mutex<VecDeque<QueueMessage>>,
}

impl FakeQueue {
    pub fn new(bodies: Vec<String>) -> Self {
        let messages = bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| QueueMessage {
                body,
                receipt_handle: format!("receipt-{i}"),
                message_id: format!("msg-{i}"),
            })
            .collect();
        Self {
            messages: Mutex::new(messages),
        }
    }

    pub fn remaining(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl QueueClient for FakeQueue {
    async fn receive(
        &self,
        max_messages: i32,
        _wait_time_seconds: i32,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let queue = self.messages.lock().unwrap();
        Ok(queue.iter().take(max_messages as usize).cloned().collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut queue = self.messages.lock().unwrap();
        queue.retain(|m| m.receipt_handle != receipt_handle);
        Ok(())
    }
}

/// An object store backed by a fixed in-memory byte buffer, yielded in
/// small chunks to exercise streaming consumers.
pub struct FakeObjectStore {
    bytes: Bytes,
}

impl FakeObjectStore {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Bytes::from(bytes),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for FakeObjectStore {
    async fn open_stream(&self, _bucket: &str, _key: &str) -> Result<ObjectByteStream, ObjectStoreError> {
        const CHUNK: usize = 4096;
        let whole = self.bytes.clone();
        let chunks: Vec<Bytes> = (0..whole.len())
            .step_by(CHUNK)
            .map(|start| whole.slice(start..(start + CHUNK).min(whole.len())))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

/// A delivery stream that records every batch it receives and can be
/// configured to fail the first `N` records of the first `fail_rounds`
/// calls, modeling a partial-failure scenario on send.
pub struct FakeDeliveryStream {
    state: Mutex<FakeDeliveryState>,
}

struct FakeDeliveryState {
    batches: Vec<Vec<Vec<u8>>>,
    fail_first_n: usize,
    fail_rounds_remaining: u32,
}

impl FakeDeliveryStream {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeDeliveryState {
                batches: Vec::new(),
                fail_first_n: 0,
                fail_rounds_remaining: 0,
            }),
        }
    }

    pub fn with_partial_failure(fail_first_n: usize, fail_rounds: u32) -> Self {
        Self {
            state: Mutex::new(FakeDeliveryState {
                batches: Vec::new(),
                fail_first_n,
                fail_rounds_remaining: fail_rounds,
            }),
        }
    }

    pub fn batches(&self) -> Vec<Vec<Vec<u8>>> {
        self.state.lock().unwrap().batches.clone()
    }
}

impl Default for FakeDeliveryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryStreamClient for FakeDeliveryStream {
    async fn put_record_batch(
        &self,
        _stream: &str,
        records: Vec<Vec<u8>>,
    ) -> Result<Vec<RecordOutcome>, DeliveryError> {
        let mut state = self.state.lock().unwrap();
        state.batches.push(records.clone());

        let fail_n = if state.fail_rounds_remaining > 0 {
            state.fail_rounds_remaining -= 1;
            state.fail_first_n
        } else {
            0
        };

        Ok(records
            .iter()
            .enumerate()
            .map(|(index, _)| RecordOutcome {
                index,
                success: index >= fail_n,
                error_code: if index < fail_n {
                    Some("ServiceUnavailableException".to_string())
                } else {
                    None
                },
            })
            .collect())
    }
}
