//! STAC catalog lookups (Microsoft Planetary Computer by default).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::DownloadError;

pub const MPC_STAC_URL: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";
pub const MPC_SAS_URL: &str = "https://planetarycomputer.microsoft.com/api/sas/v1";

// refresh SAS tokens this long before they actually expire
fn token_expiry_margin() -> chrono::Duration {
    chrono::Duration::minutes(5)
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    NotFound(String),
    #[error("catalog request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("catalog returned {status} for {url}")]
    Status { status: reqwest::StatusCode, url: String },
}

impl From<CatalogError> for DownloadError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(msg) => DownloadError::AssetNotFound(msg),
            other => DownloadError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// Where a source asset lives and what the catalog says about it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAsset {
    pub collection: String,
    pub item_id: String,
    pub asset_key: String,
    /// Fetchable (already signed) URL.
    pub href: String,
    pub media_type: Option<String>,
    /// EPSG code from the item's `proj:epsg`, used when the file itself
    /// carries no geokeys.
    pub epsg: Option<u32>,
}

#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(
        &self,
        collection: &str,
        item_id: &str,
        asset_key: &str,
    ) -> Result<ResolvedAsset, CatalogError>;
}

#[derive(Deserialize)]
struct StacItem {
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    assets: HashMap<String, StacAsset>,
}

#[derive(Deserialize)]
struct StacAsset {
    href: String,
    #[serde(default, rename = "type")]
    media_type: Option<String>,
}

#[derive(Deserialize)]
struct SasToken {
    token: String,
    #[serde(rename = "msft:expiry")]
    expiry: DateTime<Utc>,
}

// cached SAS token with its expiry
#[derive(Clone)]
struct TokenEntry {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct StacCatalog {
    client: reqwest::Client,
    base_url: String,
    /// SAS token endpoint; `None` leaves hrefs unsigned.
    sas_url: Option<String>,
    tokens: DashMap<String, TokenEntry>,
    timeout: Duration,
}

impl StacCatalog {
    pub fn new(client: reqwest::Client, base_url: &str, sas_url: Option<&str>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sas_url: sas_url
                .map(|s| s.trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty()),
            tokens: DashMap::new(),
            timeout,
        }
    }

    async fn fetch_item(&self, collection: &str, item_id: &str) -> Result<StacItem, CatalogError> {
        let url = format!("{}/collections/{}/items/{}", self.base_url, collection, item_id);
        debug!(url = %url, "fetching STAC item");

        let res = self.client.get(&url).timeout(self.timeout).send().await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(format!(
                "item '{}' not found in collection '{}'",
                item_id, collection
            )));
        }
        if !res.status().is_success() {
            return Err(CatalogError::Status { status: res.status(), url });
        }
        Ok(res.json::<StacItem>().await?)
    }

    async fn token_for(&self, sas_url: &str, collection: &str) -> Result<String, CatalogError> {
        if let Some(entry) = self.tokens.get(collection) {
            if entry.expires_at - token_expiry_margin() > Utc::now() {
                return Ok(entry.token.clone());
            }
        }

        let url = format!("{}/token/{}", sas_url, collection);
        let res = self.client.get(&url).timeout(self.timeout).send().await?;
        if !res.status().is_success() {
            return Err(CatalogError::Status { status: res.status(), url });
        }
        let sas: SasToken = res.json().await?;
        info!(collection = %collection, expires_at = %sas.expiry, "obtained SAS token");

        self.tokens.insert(
            collection.to_string(),
            TokenEntry {
                token: sas.token.clone(),
                expires_at: sas.expiry,
            },
        );
        Ok(sas.token)
    }
}

fn sign_href(href: &str, token: &str) -> String {
    let sep = if href.contains('?') { '&' } else { '?' };
    format!("{}{}{}", href, sep, token)
}

#[async_trait]
impl AssetResolver for StacCatalog {
    async fn resolve(
        &self,
        collection: &str,
        item_id: &str,
        asset_key: &str,
    ) -> Result<ResolvedAsset, CatalogError> {
        let mut item = self.fetch_item(collection, item_id).await?;

        let Some(asset) = item.assets.remove(asset_key) else {
            let mut available: Vec<_> = item.assets.keys().cloned().collect();
            available.sort();
            return Err(CatalogError::NotFound(format!(
                "asset '{}' not found on item '{}', available: {}",
                asset_key,
                item_id,
                available.join(", ")
            )));
        };

        let href = match &self.sas_url {
            Some(sas_url) => sign_href(&asset.href, &self.token_for(sas_url, collection).await?),
            None => asset.href,
        };

        let epsg = item
            .properties
            .get("proj:epsg")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok());

        Ok(ResolvedAsset {
            collection: collection.to_string(),
            item_id: item_id.to_string(),
            asset_key: asset_key.to_string(),
            href,
            media_type: asset.media_type,
            epsg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item_body(server: &MockServer) -> serde_json::Value {
        json!({
            "type": "Feature",
            "id": "S2_X",
            "properties": { "proj:epsg": 32632 },
            "assets": {
                "B04": { "href": format!("{}/blobs/B04.tif", server.uri()), "type": "image/tiff; application=geotiff" },
                "B08": { "href": format!("{}/blobs/B08.tif", server.uri()) }
            }
        })
    }

    #[tokio::test]
    async fn resolves_unsigned_asset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/sentinel-2-l2a/items/S2_X"))
            .respond_with(ResponseTemplate::new(200).set_body_json(item_body(&server)))
            .mount(&server)
            .await;

        let catalog = StacCatalog::new(reqwest::Client::new(), &server.uri(), None, Duration::from_secs(5));
        let asset = catalog.resolve("sentinel-2-l2a", "S2_X", "B04").await.unwrap();

        assert_eq!(asset.href, format!("{}/blobs/B04.tif", server.uri()));
        assert_eq!(asset.epsg, Some(32632));
        assert!(asset.media_type.unwrap().starts_with("image/tiff"));
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let catalog = StacCatalog::new(reqwest::Client::new(), &server.uri(), None, Duration::from_secs(5));
        let err = catalog.resolve("sentinel-2-l2a", "nope", "B04").await.unwrap_err();
        assert!(matches!(DownloadError::from(err), DownloadError::AssetNotFound(_)));
    }

    #[tokio::test]
    async fn missing_asset_lists_alternatives() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/sentinel-2-l2a/items/S2_X"))
            .respond_with(ResponseTemplate::new(200).set_body_json(item_body(&server)))
            .mount(&server)
            .await;

        let catalog = StacCatalog::new(reqwest::Client::new(), &server.uri(), None, Duration::from_secs(5));
        let err = catalog.resolve("sentinel-2-l2a", "S2_X", "SCL").await.unwrap_err();
        assert!(err.to_string().contains("B04, B08"));
    }

    #[tokio::test]
    async fn server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let catalog = StacCatalog::new(reqwest::Client::new(), &server.uri(), None, Duration::from_secs(5));
        let err = DownloadError::from(catalog.resolve("sentinel-2-l2a", "S2_X", "B04").await.unwrap_err());
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn signs_and_caches_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/sentinel-2-l2a/items/S2_X"))
            .respond_with(ResponseTemplate::new(200).set_body_json(item_body(&server)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sas/token/sentinel-2-l2a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "msft:expiry": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                "token": "st=1&se=2&sig=abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sas = format!("{}/sas", server.uri());
        let catalog = StacCatalog::new(reqwest::Client::new(), &server.uri(), Some(&sas), Duration::from_secs(5));

        let first = catalog.resolve("sentinel-2-l2a", "S2_X", "B04").await.unwrap();
        let second = catalog.resolve("sentinel-2-l2a", "S2_X", "B08").await.unwrap();

        assert!(first.href.ends_with("/blobs/B04.tif?st=1&se=2&sig=abc"));
        assert!(second.href.ends_with("/blobs/B08.tif?st=1&se=2&sig=abc"));
    }

    #[test]
    fn sign_appends_to_existing_query() {
        assert_eq!(sign_href("https://x/a.tif?v=1", "sig=2"), "https://x/a.tif?v=1&sig=2");
    }
}
