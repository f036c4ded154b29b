//! Turning a resolved source asset into the bytes the client asked for.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use crate::catalog::ResolvedAsset;
use crate::error::{DownloadError, DownloadResult};
use crate::models::{OutputFormat, TileRequest};
use crate::quota::BYTES_PER_MB;
use crate::raster::{RasterError, geotiff, projection, render};
use crate::worker::CancelFlag;

// decoded samples may take up to this multiple of the source size cap
const DECODE_EXPANSION: u64 = 4;

/// Finished output, fully in memory so its size is known before any byte
/// goes out.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub filename: String,
}

impl Artifact {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
pub trait TileProcessor: Send + Sync {
    async fn process(
        &self,
        asset: &ResolvedAsset,
        request: &TileRequest,
        cancel: &CancelFlag,
    ) -> DownloadResult<Artifact>;
}

pub struct RasterProcessor {
    client: reqwest::Client,
    max_output_bytes: u64,
    max_source_bytes: u64,
    timeout: Duration,
}

impl RasterProcessor {
    pub fn new(client: reqwest::Client, max_output_bytes: u64, max_source_bytes: u64, timeout: Duration) -> Self {
        Self {
            client,
            max_output_bytes,
            max_source_bytes,
            timeout,
        }
    }

    fn too_large(limit: u64) -> DownloadError {
        DownloadError::TooLarge {
            limit_mb: limit / BYTES_PER_MB,
        }
    }

    // Read the whole asset, giving up as soon as it is known to exceed `limit`.
    async fn fetch(&self, asset: &ResolvedAsset, limit: u64, cancel: &CancelFlag) -> DownloadResult<Bytes> {
        let upstream = |e: reqwest::Error| DownloadError::UpstreamUnavailable(format!("fetching asset: {}", e));

        let res = self
            .client
            .get(&asset.href)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(upstream)?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DownloadError::AssetNotFound(format!(
                "source file for {}/{} is missing",
                asset.item_id, asset.asset_key
            )));
        }
        if !res.status().is_success() {
            return Err(DownloadError::UpstreamUnavailable(format!(
                "asset storage returned {}",
                res.status()
            )));
        }

        if let Some(len) = res.content_length() {
            debug!(item = %asset.item_id, bytes = len, "source size known up front");
            if len > limit {
                return Err(Self::too_large(limit));
            }
        }

        let mut buf = BytesMut::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(DownloadError::ProcessingFailed(RasterError::Cancelled.to_string()));
            }
            let chunk = chunk.map_err(upstream)?;
            if buf.len() as u64 + chunk.len() as u64 > limit {
                return Err(Self::too_large(limit));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
impl TileProcessor for RasterProcessor {
    async fn process(
        &self,
        asset: &ResolvedAsset,
        request: &TileRequest,
        cancel: &CancelFlag,
    ) -> DownloadResult<Artifact> {
        let filename = request.filename();
        let content_type = request.format.content_type();

        // whole file as-is: no need to decode it
        if request.format == OutputFormat::Geotiff && request.bbox.is_none() {
            let bytes = self.fetch(asset, self.max_output_bytes, cancel).await?;
            info!(item = %asset.item_id, bytes = bytes.len(), "passing source through");
            return Ok(Artifact { bytes, content_type, filename });
        }

        let source = self.fetch(asset, self.max_source_bytes, cancel).await?;
        let request = request.clone();
        let epsg_hint = asset.epsg;
        let cancel = cancel.clone();

        let max_decoded = self.max_source_bytes.saturating_mul(DECODE_EXPANSION) as usize;
        let output = tokio::task::spawn_blocking(move || transform(&source, &request, epsg_hint, max_decoded, &cancel))
            .await
            .map_err(|e| DownloadError::ProcessingFailed(format!("processing task failed: {}", e)))??;

        if output.len() as u64 > self.max_output_bytes {
            return Err(Self::too_large(self.max_output_bytes));
        }

        info!(item = %asset.item_id, bytes = output.len(), "processed");
        Ok(Artifact {
            bytes: Bytes::from(output),
            content_type,
            filename,
        })
    }
}

// CPU-bound part, runs on the blocking pool
fn transform(
    source: &[u8],
    request: &TileRequest,
    epsg_hint: Option<u32>,
    max_decoded: usize,
    cancel: &CancelFlag,
) -> Result<Vec<u8>, RasterError> {
    let mut raster = geotiff::decode(source, max_decoded)?;
    if cancel.is_cancelled() {
        return Err(RasterError::Cancelled);
    }

    if let Some(bbox) = &request.bbox {
        let geo = raster
            .geo
            .as_ref()
            .ok_or_else(|| RasterError::Unsupported("asset has no georeferencing".to_string()))?;
        let epsg = geo
            .epsg()
            .or(epsg_hint)
            .ok_or_else(|| RasterError::Unsupported("asset CRS is unknown".to_string()))?;

        let bounds = projection::transform_bbox(bbox, epsg)?;
        let window = geo
            .window_for(bounds, raster.width, raster.height)
            .ok_or(RasterError::OutsideBounds)?;
        debug!(?window, epsg, "cropping");
        raster = raster.crop(&window);
    }

    if cancel.is_cancelled() {
        return Err(RasterError::Cancelled);
    }

    match request.format {
        OutputFormat::Geotiff => geotiff::encode(&raster),
        OutputFormat::Png => render::to_png(&raster, request.rescale, request.colormap),
    }
}
