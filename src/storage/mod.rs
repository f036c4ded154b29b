//! Deferred delivery: park the artifact in object storage and hand the
//! client a short-lived link instead of the bytes.

#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::models::StoredDownload;
use crate::processor::Artifact;
use crate::quota::BYTES_PER_MB;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload of '{key}' failed: {reason}")]
    Put { key: String, reason: String },
    #[error("presigning '{key}' failed: {reason}")]
    Presign { key: String, reason: String },
    #[error("delete of '{key}' failed: {reason}")]
    Delete { key: String, reason: String },
}

impl From<StorageError> for DownloadError {
    fn from(err: StorageError) -> Self {
        DownloadError::UpstreamUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes, content_type: &str, filename: &str) -> Result<(), StorageError>;

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

pub struct DeferredStorage {
    store: Arc<dyn ObjectStore>,
    url_expiry: Duration,
    retention: Duration,
    seq: AtomicU64,
}

impl DeferredStorage {
    pub fn new(store: Arc<dyn ObjectStore>, url_expiry: Duration, retention: Duration) -> Self {
        Self {
            store,
            url_expiry,
            retention,
            seq: AtomicU64::new(0),
        }
    }

    fn schedule_delete(&self, key: String) {
        let store = self.store.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            match store.delete(&key).await {
                Ok(()) => debug!(key = %key, "stored artifact deleted"),
                // best effort, a bucket lifecycle rule is the backstop
                Err(e) => warn!(error = %e, "failed to delete stored artifact"),
            }
        });
    }

    // unique, unguessable-enough key that still ends in the download name
    fn object_key(&self, filename: &str) -> String {
        let now = Utc::now();
        let mut hasher = Sha256::new();
        hasher.update(filename.as_bytes());
        hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(self.seq.fetch_add(1, Ordering::Relaxed).to_le_bytes());
        let digest = format!("{:x}", hasher.finalize());

        format!("downloads/{}/{}/{}", now.format("%Y-%m-%d"), &digest[..16], filename)
    }

    /// Upload, schedule the object's deletion, then presign.
    pub async fn hand_off(&self, artifact: &Artifact) -> Result<StoredDownload, StorageError> {
        let key = self.object_key(&artifact.filename);

        self.store
            .put(&key, artifact.bytes.clone(), artifact.content_type, &artifact.filename)
            .await?;
        // an uploaded object is always cleaned up, even if presigning fails
        self.schedule_delete(key.clone());

        let download_url = self.store.presign_get(&key, self.url_expiry).await?;
        info!(key = %key, bytes = artifact.len(), "artifact stored");

        let size = artifact.len();
        Ok(StoredDownload {
            download_url,
            filename: artifact.filename.clone(),
            content_type: artifact.content_type.to_string(),
            file_size_bytes: size,
            file_size_mb: (size as f64 / BYTES_PER_MB as f64 * 100.0).round() / 100.0,
            expires_at: Utc::now() + chrono::Duration::seconds(self.url_expiry.as_secs() as i64),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dashmap::DashMap;

    /// Keeps objects in a map; presigned URLs are fake.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub objects: DashMap<String, Bytes>,
        pub fail_presign: bool,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, key: &str, body: Bytes, _content_type: &str, _filename: &str) -> Result<(), StorageError> {
            self.objects.insert(key.to_string(), body);
            Ok(())
        }

        async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
            if self.fail_presign {
                return Err(StorageError::Presign {
                    key: key.to_string(),
                    reason: "signing credentials unavailable".to_string(),
                });
            }
            Ok(format!("https://bucket.test/{}?expires={}", key, expires_in.as_secs()))
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.objects.remove(key);
            Ok(())
        }
    }

    fn artifact() -> Artifact {
        Artifact {
            bytes: Bytes::from_static(b"II*\0tiff"),
            content_type: "image/tiff",
            filename: "sentinel-2-l2a_S2_X_B04.tif".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stores_then_deletes_after_retention() {
        let store = Arc::new(MemoryStore::default());
        let deferred = DeferredStorage::new(store.clone(), Duration::from_secs(3600), Duration::from_secs(7200));

        let stored = deferred.hand_off(&artifact()).await.unwrap();
        assert_eq!(store.objects.len(), 1);
        assert!(stored.download_url.contains("sentinel-2-l2a_S2_X_B04.tif"));
        assert!(stored.download_url.ends_with("expires=3600"));
        assert_eq!(stored.file_size_bytes, 8);

        tokio::time::sleep(Duration::from_secs(7201)).await;
        assert!(store.objects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_presign_still_deletes_the_upload() {
        let store = Arc::new(MemoryStore {
            fail_presign: true,
            ..Default::default()
        });
        let deferred = DeferredStorage::new(store.clone(), Duration::from_secs(3600), Duration::from_secs(7200));

        let err = deferred.hand_off(&artifact()).await.unwrap_err();
        assert!(matches!(err, StorageError::Presign { .. }));
        assert_eq!(store.objects.len(), 1);

        tokio::time::sleep(Duration::from_secs(7201)).await;
        assert!(store.objects.is_empty());
    }

    #[tokio::test]
    async fn keys_are_unique_per_upload() {
        let deferred = DeferredStorage::new(
            Arc::new(MemoryStore::default()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let a = deferred.object_key("same.tif");
        let b = deferred.object_key("same.tif");
        assert_ne!(a, b);
        assert!(a.starts_with("downloads/"));
        assert!(a.ends_with("/same.tif"));
    }
}
