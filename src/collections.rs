//! Static catalog of the collections and assets the gateway will serve.

use serde::Serialize;

pub struct Collection {
    pub id: &'static str,
    pub name: &'static str,
    pub assets: &'static [(&'static str, &'static str)],
    pub disabled_reason: Option<&'static str>,
}

const SAR_TOO_LARGE: &str = "SAR tiles are too large (1.2 GB per band)";

pub static COLLECTIONS: &[Collection] = &[
    Collection {
        id: "sentinel-2-l2a",
        name: "Sentinel-2 Level-2A",
        assets: &[
            ("visual", "True Color (RGB)"),
            ("B02", "Blue (490nm)"),
            ("B03", "Green (560nm)"),
            ("B04", "Red (665nm)"),
            ("B05", "Red Edge (705nm)"),
            ("B08", "NIR (842nm)"),
            ("B11", "SWIR (1610nm)"),
            ("SCL", "Scene Classification"),
        ],
        disabled_reason: None,
    },
    Collection {
        id: "landsat-c2-l2",
        name: "Landsat Collection 2 Level-2",
        assets: &[
            ("red", "Red"),
            ("green", "Green"),
            ("blue", "Blue"),
            ("nir08", "NIR"),
            ("swir16", "SWIR 1.6μm"),
            ("lwir11", "Thermal (LWIR 11μm)"),
            ("qa_pixel", "Quality Assessment"),
        ],
        disabled_reason: None,
    },
    Collection {
        id: "sentinel-1-grd",
        name: "Sentinel-1 GRD",
        assets: &[("vv", "VV Polarization"), ("vh", "VH Polarization")],
        disabled_reason: Some(SAR_TOO_LARGE),
    },
    Collection {
        id: "sentinel-1-rtc",
        name: "Sentinel-1 RTC",
        assets: &[("vv", "VV Polarization"), ("vh", "VH Polarization")],
        disabled_reason: Some(SAR_TOO_LARGE),
    },
    Collection {
        id: "modis-09A1-061",
        name: "MODIS Surface Reflectance",
        assets: &[
            ("sur_refl_b01", "Red (620-670nm)"),
            ("sur_refl_b02", "NIR (841-876nm)"),
            ("sur_refl_b03", "Blue (459-479nm)"),
            ("sur_refl_b04", "Green (545-565nm)"),
        ],
        disabled_reason: None,
    },
    Collection {
        id: "modis-13Q1-061",
        name: "MODIS Vegetation Indices",
        assets: &[("250m_16_days_NDVI", "NDVI"), ("250m_16_days_EVI", "EVI")],
        disabled_reason: None,
    },
    Collection {
        id: "cop-dem-glo-30",
        name: "Copernicus DEM 30m",
        assets: &[("data", "Elevation")],
        disabled_reason: None,
    },
];

pub fn find(id: &str) -> Option<&'static Collection> {
    COLLECTIONS.iter().find(|c| c.id == id)
}

impl Collection {
    pub fn asset_keys(&self) -> Vec<&'static str> {
        self.assets.iter().map(|(key, _)| *key).collect()
    }

    pub fn has_asset(&self, key: &str) -> bool {
        self.assets.iter().any(|(k, _)| *k == key)
    }

    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            id: self.id,
            name: self.name,
            available_assets: self.asset_keys(),
            disabled: self.disabled_reason.is_some(),
            disabled_reason: self.disabled_reason,
        }
    }
}

// GET /collections entry
#[derive(Serialize)]
pub struct CollectionSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub available_assets: Vec<&'static str>,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel2_has_red_band() {
        let s2 = find("sentinel-2-l2a").unwrap();
        assert!(s2.has_asset("B04"));
        assert!(!s2.has_asset("vv"));
        assert!(s2.disabled_reason.is_none());
    }

    #[test]
    fn sar_collections_are_disabled() {
        assert!(find("sentinel-1-grd").unwrap().disabled_reason.is_some());
        assert!(find("sentinel-1-rtc").unwrap().summary().disabled);
    }

    #[test]
    fn unknown_collection() {
        assert!(find("naip").is_none());
    }
}
