use serde::{Deserialize, Serialize};

use crate::collections;
use crate::error::DownloadError;
use crate::raster::colormap::Colormap;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Geotiff,
    Png,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Geotiff => "image/tiff",
            OutputFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Geotiff => "tif",
            OutputFormat::Png => "png",
        }
    }
}

// POST /download body, as sent by the viewer
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DownloadRequest {
    pub collection: String,
    pub item_id: String,
    pub asset_key: String,
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub rescale: Option<String>,
    #[serde(default)]
    pub colormap: Option<String>,
    #[serde(default)]
    pub turnstile_token: Option<String>,
}

/// Geographic rectangle in EPSG:4326 degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bbox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

/// A download request that passed entry validation. Immutable from here on.
#[derive(Clone, Debug)]
pub struct TileRequest {
    pub collection: &'static str,
    pub item_id: String,
    pub asset_key: String,
    pub bbox: Option<Bbox>,
    pub format: OutputFormat,
    pub rescale: Option<(f64, f64)>,
    pub colormap: Option<Colormap>,
    pub turnstile_token: String,
}

const MAX_ITEM_ID_LEN: usize = 256;

impl DownloadRequest {
    pub fn validate(self) -> Result<TileRequest, DownloadError> {
        let collection = collections::find(&self.collection).ok_or_else(|| {
            DownloadError::InvalidRequest(format!("unknown collection '{}'", self.collection))
        })?;

        if let Some(reason) = collection.disabled_reason {
            return Err(DownloadError::InvalidRequest(format!(
                "downloads are disabled for {}: {}",
                collection.id, reason
            )));
        }

        if !collection.has_asset(&self.asset_key) {
            return Err(DownloadError::InvalidRequest(format!(
                "asset '{}' not available for {}, available: {}",
                self.asset_key,
                collection.id,
                collection.asset_keys().join(", ")
            )));
        }

        let item_id = self.item_id.trim();
        if !is_item_id(item_id) {
            return Err(DownloadError::InvalidRequest(format!(
                "invalid item id '{}'",
                self.item_id
            )));
        }

        let bbox = self.bbox.map(Bbox::try_from).transpose()?;
        let rescale = self.rescale.as_deref().map(parse_rescale).transpose()?;
        let colormap = self
            .colormap
            .as_deref()
            .map(|name| {
                name.parse::<Colormap>()
                    .map_err(|_| DownloadError::InvalidRequest(format!("unknown colormap '{}'", name)))
            })
            .transpose()?;

        Ok(TileRequest {
            collection: collection.id,
            item_id: item_id.to_string(),
            asset_key: self.asset_key,
            bbox,
            format: self.format,
            rescale,
            colormap,
            turnstile_token: self.turnstile_token.unwrap_or_default(),
        })
    }
}

impl TryFrom<[f64; 4]> for Bbox {
    type Error = DownloadError;

    fn try_from([min_lon, min_lat, max_lon, max_lat]: [f64; 4]) -> Result<Self, Self::Error> {
        let finite = [min_lon, min_lat, max_lon, max_lat].iter().all(|v| v.is_finite());
        let in_range = (-180.0..=180.0).contains(&min_lon)
            && (-180.0..=180.0).contains(&max_lon)
            && (-90.0..=90.0).contains(&min_lat)
            && (-90.0..=90.0).contains(&max_lat);

        if !finite || !in_range || min_lon >= max_lon || min_lat >= max_lat {
            return Err(DownloadError::InvalidRequest(format!(
                "bbox must be [minLon, minLat, maxLon, maxLat] in degrees, got [{}, {}, {}, {}]",
                min_lon, min_lat, max_lon, max_lat
            )));
        }

        Ok(Bbox { min_lon, min_lat, max_lon, max_lat })
    }
}

// STAC item ids are plain tokens; anything that could change the path of the
// item URL is refused
fn is_item_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ITEM_ID_LEN
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

// "min,max", e.g. "0,4000" or "-2000,10000"
fn parse_rescale(raw: &str) -> Result<(f64, f64), DownloadError> {
    let invalid = || DownloadError::InvalidRequest(format!("rescale must be 'min,max', got '{}'", raw));

    let (min, max) = raw.split_once(',').ok_or_else(invalid)?;
    let min: f64 = min.trim().parse().map_err(|_| invalid())?;
    let max: f64 = max.trim().parse().map_err(|_| invalid())?;

    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(invalid());
    }
    Ok((min, max))
}

impl TileRequest {
    /// Name offered to the browser in Content-Disposition.
    pub fn filename(&self) -> String {
        let item: String = self.item_id.chars().take(50).collect();
        format!(
            "{}_{}_{}.{}",
            self.collection,
            item,
            self.asset_key,
            self.format.extension()
        )
    }
}

// Deferred delivery response
#[derive(Serialize, Deserialize, Debug)]
pub struct StoredDownload {
    pub download_url: String,
    pub filename: String,
    pub content_type: String,
    pub file_size_bytes: u64,
    pub file_size_mb: f64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DownloadRequest {
        DownloadRequest {
            collection: "sentinel-2-l2a".into(),
            item_id: "S2A_MSIL2A_20240101T104441_R008_T32UNF".into(),
            asset_key: "B04".into(),
            bbox: None,
            format: OutputFormat::Geotiff,
            rescale: None,
            colormap: None,
            turnstile_token: Some("tok".into()),
        }
    }

    #[test]
    fn valid_request_passes() {
        let tile = request().validate().unwrap();
        assert_eq!(tile.collection, "sentinel-2-l2a");
        assert_eq!(tile.turnstile_token, "tok");
    }

    #[test]
    fn format_defaults_to_geotiff() {
        let raw = r#"{"collection":"cop-dem-glo-30","item_id":"x","asset_key":"data"}"#;
        let req: DownloadRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.format, OutputFormat::Geotiff);
        assert!(req.turnstile_token.is_none());
    }

    #[test]
    fn rejects_asset_from_other_collection() {
        let mut req = request();
        req.asset_key = "nir08".into();
        assert!(matches!(req.validate(), Err(DownloadError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_disabled_collection() {
        let mut req = request();
        req.collection = "sentinel-1-grd".into();
        req.asset_key = "vv".into();
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("SAR tiles are too large"));
    }

    #[test]
    fn rejects_inverted_bbox() {
        let mut req = request();
        req.bbox = Some([10.5, 55.0, 10.0, 55.5]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_path_in_item_id() {
        for bad in ["../../secrets", "..", ".", "S2_X%2F..%2Fadmin", "%2e%2e", "a b", "S2_X/../x"] {
            let mut req = request();
            req.item_id = bad.into();
            assert!(req.validate().is_err(), "{bad}");
        }
    }

    #[test]
    fn accepts_real_item_ids() {
        for good in [
            "S2A_MSIL2A_20240101T104441_R008_T32UNF",
            "LC09_L2SP_047027_20240101_02_T1",
            "MOD09A1.A2024001.h08v05.061",
            "S1A_IW_GRDH_1SDV-20240101",
        ] {
            let mut req = request();
            req.item_id = good.into();
            assert!(req.validate().is_ok(), "{good}");
        }
    }

    #[test]
    fn parses_negative_rescale() {
        assert_eq!(parse_rescale("-2000,10000").unwrap(), (-2000.0, 10000.0));
        assert!(parse_rescale("4000").is_err());
        assert!(parse_rescale("10,1").is_err());
    }

    #[test]
    fn unknown_colormap_is_invalid() {
        let mut req = request();
        req.colormap = Some("sparkles".into());
        assert!(req.validate().is_err());
    }

    #[test]
    fn filename_truncates_long_item_ids() {
        let mut req = request();
        req.item_id = "x".repeat(80);
        req.format = OutputFormat::Png;
        let tile = req.validate().unwrap();
        assert_eq!(tile.filename(), format!("sentinel-2-l2a_{}_B04.png", "x".repeat(50)));
    }
}
