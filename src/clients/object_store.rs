//! S3-backed `ObjectStoreClient`.

use async_trait::async_trait;
use aws_sdk_s3::config::{IdentityCache, StalledStreamProtectionConfig};
use aws_sdk_s3::Client;
use futures::StreamExt;
use tracing::info;

use super::{ObjectByteStream, ObjectStoreClient, ObjectStoreError};

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new() -> Self {
        let region_provider =
            aws_config::Region::new(std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into()));
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .identity_cache(IdentityCache::lazy())
            .build();

        info!("S3 object store client initialized");
        Self {
            client: Client::from_conf(s3_config),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn open_stream(&self, bucket: &str, key: &str) -> Result<ObjectByteStream, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Read(e.to_string()))?;

        let byte_stream = futures::stream::unfold(output.body, |mut body| async move {
            match body.next().await {
                Some(Ok(bytes)) => Some((Ok(bytes), body)),
                Some(Err(e)) => Some((Err(ObjectStoreError::Read(e.to_string())), body)),
                None => None,
            }
        });

        Ok(Box::pin(byte_stream))
    }
}
