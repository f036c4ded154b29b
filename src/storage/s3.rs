//! S3 (or any S3-compatible service) as the deferred-delivery backend.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Builder as S3Builder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::time::Duration;

use crate::storage::{ObjectStore, StorageError};

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Credentials come from the standard AWS chain. A custom endpoint
    /// (MinIO, LocalStack) switches to path-style addressing.
    pub async fn new(bucket: impl Into<String>, region: impl Into<String>, endpoint: Option<String>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.into()))
            .load()
            .await;

        let mut builder = S3Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str, filename: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_disposition(format!("attachment; filename=\"{}\"", filename))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Put {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let presign_err = |reason: String| StorageError::Presign {
            key: key.to_string(),
            reason,
        };
        let config = PresigningConfig::expires_in(expires_in).map_err(|e| presign_err(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| presign_err(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
