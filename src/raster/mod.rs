//! In-memory rasters: decode a GeoTIFF, crop it to a window, re-encode it as
//! GeoTIFF or render it to PNG.

pub mod colormap;
pub mod geotiff;
pub mod projection;
pub mod render;

use thiserror::Error;

use crate::error::DownloadError;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("tiff: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("image encoding: {0}")]
    Image(#[from] image::ImageError),
    #[error("unsupported raster: {0}")]
    Unsupported(String),
    #[error("bounding box does not intersect the asset")]
    OutsideBounds,
    #[error("cancelled")]
    Cancelled,
}

impl From<RasterError> for DownloadError {
    fn from(err: RasterError) -> Self {
        match err {
            RasterError::OutsideBounds => DownloadError::InvalidRequest(err.to_string()),
            other => DownloadError::ProcessingFailed(other.to_string()),
        }
    }
}

/// Pixel data, band-interleaved (chunky) as TIFF stores it.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! each_samples {
    ($samples:expr, $v:ident => $body:expr) => {
        match $samples {
            Samples::U8($v) => $body,
            Samples::U16($v) => $body,
            Samples::I16($v) => $body,
            Samples::U32($v) => $body,
            Samples::I32($v) => $body,
            Samples::F32($v) => $body,
            Samples::F64($v) => $body,
        }
    };
}

impl Samples {
    pub fn len(&self) -> usize {
        each_samples!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One band pulled out of the interleaved buffer, widened to f32.
    pub fn band(&self, bands: usize, band: usize) -> Vec<f32> {
        each_samples!(self, v => v.iter().skip(band).step_by(bands).map(|s| *s as f32).collect())
    }

    fn crop(&self, width: usize, bands: usize, window: &PixelWindow) -> Samples {
        match self {
            Samples::U8(v) => Samples::U8(crop_rows(v, width, bands, window)),
            Samples::U16(v) => Samples::U16(crop_rows(v, width, bands, window)),
            Samples::I16(v) => Samples::I16(crop_rows(v, width, bands, window)),
            Samples::U32(v) => Samples::U32(crop_rows(v, width, bands, window)),
            Samples::I32(v) => Samples::I32(crop_rows(v, width, bands, window)),
            Samples::F32(v) => Samples::F32(crop_rows(v, width, bands, window)),
            Samples::F64(v) => Samples::F64(crop_rows(v, width, bands, window)),
        }
    }
}

fn crop_rows<T: Copy>(data: &[T], width: usize, bands: usize, window: &PixelWindow) -> Vec<T> {
    let row_len = window.width * bands;
    let mut out = Vec::with_capacity(row_len * window.height);
    for row in window.row_off..window.row_off + window.height {
        let start = (row * width + window.col_off) * bands;
        out.extend_from_slice(&data[start..start + row_len]);
    }
    out
}

/// Rectangle of pixels, already clamped to the raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

/// GeoTIFF georeferencing: pixel scale, a single tie point and the geokeys.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    pub pixel_scale: [f64; 3],
    pub tiepoint: [f64; 6],
    pub geokeys: Vec<u16>,
    pub geo_doubles: Vec<f64>,
    pub geo_ascii: Option<String>,
}

const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;

impl GeoReference {
    /// EPSG code from the geokey directory, if it names one directly.
    pub fn epsg(&self) -> Option<u32> {
        // header is 4 shorts, then (key, location, count, value) entries
        let entries = self.geokeys.get(4..)?;
        let mut found = None;
        for entry in entries.chunks_exact(4) {
            let (key, location, value) = (entry[0], entry[1], entry[3]);
            if location != 0 || value == 0 || value == USER_DEFINED {
                continue;
            }
            match key {
                PROJECTED_CS_TYPE_KEY => return Some(value as u32),
                GEOGRAPHIC_TYPE_KEY => found = Some(value as u32),
                _ => {}
            }
        }
        found
    }

    /// Model coordinates of the upper-left corner of pixel (0, 0).
    pub fn origin(&self) -> (f64, f64) {
        let [i, j, _, x, y, _] = self.tiepoint;
        (x - i * self.pixel_scale[0], y + j * self.pixel_scale[1])
    }

    /// Pixel window covering `bounds` (`[min_x, min_y, max_x, max_y]` in the
    /// raster CRS), clamped to the raster. `None` when they don't overlap.
    pub fn window_for(&self, bounds: [f64; 4], width: u32, height: u32) -> Option<PixelWindow> {
        let (ox, oy) = self.origin();
        let (sx, sy) = (self.pixel_scale[0], self.pixel_scale[1]);
        if sx <= 0.0 || sy <= 0.0 {
            return None;
        }

        let [min_x, min_y, max_x, max_y] = bounds;
        let col_min = ((min_x - ox) / sx).floor().max(0.0);
        let col_max = ((max_x - ox) / sx).ceil().min(width as f64);
        let row_min = ((oy - max_y) / sy).floor().max(0.0);
        let row_max = ((oy - min_y) / sy).ceil().min(height as f64);

        if col_max <= col_min || row_max <= row_min {
            return None;
        }

        Some(PixelWindow {
            col_off: col_min as usize,
            row_off: row_min as usize,
            width: (col_max - col_min) as usize,
            height: (row_max - row_min) as usize,
        })
    }

    /// Same georeferencing, re-anchored at the window's top-left pixel.
    pub fn shifted(&self, window: &PixelWindow) -> GeoReference {
        let (ox, oy) = self.origin();
        let x = ox + window.col_off as f64 * self.pixel_scale[0];
        let y = oy - window.row_off as f64 * self.pixel_scale[1];
        GeoReference {
            tiepoint: [0.0, 0.0, 0.0, x, y, 0.0],
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    /// Samples per pixel.
    pub bands: usize,
    pub samples: Samples,
    pub geo: Option<GeoReference>,
    pub nodata: Option<f64>,
}

impl Raster {
    pub fn crop(&self, window: &PixelWindow) -> Raster {
        Raster {
            width: window.width as u32,
            height: window.height as u32,
            bands: self.bands,
            samples: self.samples.crop(self.width as usize, self.bands, window),
            geo: self.geo.as_ref().map(|g| g.shifted(window)),
            nodata: self.nodata,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}
