//! The download pipeline, one request at a time:
//!
//! RECEIVED -> VERIFIED -> RATE_OK -> QUOTA_OK -> RESOLVED -> PROCESSED -> DELIVERED
//!
//! Each stage either advances or ends the request with a [`DownloadError`].
//! Admission reserves quota headroom; the reservation is settled at delivery
//! for the bytes that actually left, or released untouched on failure.

use axum::body::Body;
use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::admission::AdmissionControl;
use crate::catalog::AssetResolver;
use crate::client::ClientId;
use crate::error::{DownloadError, DownloadResult};
use crate::metrics::{BYTES_DELIVERED, OUTCOMES};
use crate::models::{StoredDownload, TileRequest};
use crate::processor::Artifact;
use crate::quota::BYTES_PER_MB;
use crate::storage::DeferredStorage;
use crate::worker::ProcessingQueue;

const CHUNK_SIZE: usize = 64 * 1024;

pub enum Delivery {
    Stream(MeteredArtifact),
    Stored(StoredDownload),
}

/// Owns one admission's quota reservation. On drop it settles the
/// reservation against whatever was sent, whether the transfer finished,
/// the client hung up half way, or the request failed before any output.
pub struct UsageMeter {
    admission: Arc<AdmissionControl>,
    client: ClientId,
    reserved: u64,
    sent: u64,
    // set once there is an artifact to deliver
    total: Option<u64>,
}

impl UsageMeter {
    fn new(admission: Arc<AdmissionControl>, client: ClientId, reserved: u64) -> Self {
        Self {
            admission,
            client,
            reserved,
            sent: 0,
            total: None,
        }
    }

    fn expect_total(&mut self, total: u64) {
        self.total = Some(total);
    }

    fn add(&mut self, bytes: u64) {
        self.sent += bytes;
    }
}

impl Drop for UsageMeter {
    fn drop(&mut self) {
        self.admission.settle(&self.client, self.reserved, self.sent);

        let Some(total) = self.total else {
            return;
        };
        let outcome = if self.sent >= total { "delivered" } else { "aborted" };
        OUTCOMES.with_label_values(&[outcome]).inc();
        if self.sent > 0 {
            BYTES_DELIVERED.inc_by(self.sent);
        }
        debug!(client = %self.client, bytes = self.sent, total, outcome, "usage recorded");
    }
}

pub struct MeteredArtifact {
    artifact: Artifact,
    meter: UsageMeter,
}

impl MeteredArtifact {
    pub fn content_type(&self) -> &'static str {
        self.artifact.content_type
    }

    pub fn filename(&self) -> &str {
        &self.artifact.filename
    }

    pub fn len(&self) -> u64 {
        self.artifact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifact.is_empty()
    }

    /// Response body in fixed-size chunks; the meter rides along.
    pub fn into_body(self) -> Body {
        let MeteredArtifact { artifact, mut meter } = self;
        let bytes = artifact.bytes;
        let chunks: Vec<Bytes> = (0..bytes.len())
            .step_by(CHUNK_SIZE)
            .map(|start| bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len())))
            .collect();

        let stream = futures::stream::iter(chunks).map(move |chunk| {
            meter.add(chunk.len() as u64);
            Ok::<_, Infallible>(chunk)
        });
        Body::from_stream(stream)
    }
}

pub struct Orchestrator {
    admission: Arc<AdmissionControl>,
    resolver: Arc<dyn AssetResolver>,
    queue: ProcessingQueue,
    storage: Option<DeferredStorage>,
    max_file_size: u64,
}

impl Orchestrator {
    pub fn new(
        admission: Arc<AdmissionControl>,
        resolver: Arc<dyn AssetResolver>,
        queue: ProcessingQueue,
        storage: Option<DeferredStorage>,
        max_file_size: u64,
    ) -> Self {
        Self {
            admission,
            resolver,
            queue,
            storage,
            max_file_size,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    pub fn is_deferred(&self) -> bool {
        self.storage.is_some()
    }

    pub async fn handle(&self, client: &ClientId, request: TileRequest) -> DownloadResult<Delivery> {
        let reserved = self
            .admission
            .admit(client, &request.turnstile_token, Instant::now())
            .await?;
        let mut meter = UsageMeter::new(self.admission.clone(), client.clone(), reserved);

        let asset = self
            .resolver
            .resolve(request.collection, &request.item_id, &request.asset_key)
            .await?;
        info!(
            client = %client,
            collection = %asset.collection,
            item = %asset.item_id,
            asset = %asset.asset_key,
            format = ?request.format,
            "asset resolved"
        );

        let artifact = self.queue.submit(asset, request).await?;
        if artifact.len() > self.max_file_size {
            return Err(DownloadError::TooLarge {
                limit_mb: self.max_file_size / BYTES_PER_MB,
            });
        }

        match &self.storage {
            Some(storage) => {
                let stored = storage.hand_off(&artifact).await?;
                meter.expect_total(stored.file_size_bytes);
                meter.add(stored.file_size_bytes);
                Ok(Delivery::Stored(stored))
            }
            None => {
                meter.expect_total(artifact.len());
                Ok(Delivery::Stream(MeteredArtifact { meter, artifact }))
            }
        }
    }
}
