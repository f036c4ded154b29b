//! Rendering rasters as 8-bit PNG previews.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::raster::colormap::Colormap;
use crate::raster::{Raster, RasterError};

// percentile clip used when no explicit rescale range is given
const AUTO_CLIP: (f64, f64) = (2.0, 98.0);

/// A band scaled to 0..=255 plus which pixels carry no data.
struct Scaled {
    values: Vec<u8>,
    nodata: Vec<bool>,
}

/// Render to PNG. Three or more bands become RGB from the first three;
/// a single band is grayscale, or RGB through `colormap`. Nodata pixels
/// (the file's nodata value, 0 when it has none, or NaN) come out black.
pub fn to_png(
    raster: &Raster,
    rescale: Option<(f64, f64)>,
    colormap: Option<Colormap>,
) -> Result<Vec<u8>, RasterError> {
    if raster.pixel_count() == 0 {
        return Err(RasterError::Unsupported("empty raster".to_string()));
    }
    let nodata = raster.nodata.unwrap_or(0.0) as f32;

    let (buf, color) = if raster.bands >= 3 {
        let bands: Vec<Scaled> = (0..3)
            .map(|b| scale(&raster.samples.band(raster.bands, b), nodata, rescale))
            .collect();

        let mut rgb = Vec::with_capacity(raster.pixel_count() * 3);
        for px in 0..raster.pixel_count() {
            // any band missing blanks the whole pixel
            if bands.iter().any(|b| b.nodata[px]) {
                rgb.extend_from_slice(&[0, 0, 0]);
            } else {
                rgb.extend(bands.iter().map(|b| b.values[px]));
            }
        }
        (rgb, ExtendedColorType::Rgb8)
    } else {
        let band = scale(&raster.samples.band(raster.bands, 0), nodata, rescale);
        match colormap {
            Some(cmap) => {
                let lut = cmap.lut();
                let mut rgb = Vec::with_capacity(band.values.len() * 3);
                for (v, missing) in band.values.iter().zip(&band.nodata) {
                    if *missing {
                        rgb.extend_from_slice(&[0, 0, 0]);
                    } else {
                        rgb.extend_from_slice(&lut[*v as usize]);
                    }
                }
                (rgb, ExtendedColorType::Rgb8)
            }
            None => (band.values, ExtendedColorType::L8),
        }
    };

    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(&buf, raster.width, raster.height, color)?;
    Ok(out)
}

fn scale(band: &[f32], nodata: f32, rescale: Option<(f64, f64)>) -> Scaled {
    let mask: Vec<bool> = band.iter().map(|v| v.is_nan() || *v == nodata).collect();

    let range = match rescale {
        Some(range) => Some(range),
        None => {
            let mut valid: Vec<f64> = band
                .iter()
                .zip(&mask)
                .filter(|(_, missing)| !**missing)
                .map(|(v, _)| *v as f64)
                .collect();
            valid.sort_by(|a, b| a.total_cmp(b));
            percentile(&valid, AUTO_CLIP.0).zip(percentile(&valid, AUTO_CLIP.1))
        }
    };

    let values = match range {
        Some((lo, hi)) if hi > lo => band
            .iter()
            .zip(&mask)
            .map(|(v, missing)| {
                if *missing {
                    0
                } else {
                    let clipped = (*v as f64).clamp(lo, hi);
                    ((clipped - lo) / (hi - lo) * 255.0) as u8
                }
            })
            .collect(),
        _ => vec![0; band.len()],
    };

    Scaled { values, nodata: mask }
}

/// Linear-interpolated percentile of already sorted values.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = p / 100.0 * last as f64;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    let frac = rank - below as f64;
    Some(sorted[below] + (sorted[above] - sorted[below]) * frac)
}
