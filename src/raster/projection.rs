//! Forward projection of WGS84 longitude/latitude into the handful of CRSs
//! the supported collections are published in.

use crate::models::Bbox;
use crate::raster::RasterError;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

// points sampled per bbox edge, so curved edges in the target CRS are covered
const EDGE_SAMPLES: usize = 21;

pub fn project(epsg: u32, lon: f64, lat: f64) -> Result<(f64, f64), RasterError> {
    match epsg {
        4326 => Ok((lon, lat)),
        3857 => Ok(web_mercator(lon, lat)),
        32601..=32660 => Ok(utm(lon, lat, epsg - 32600, false)),
        32701..=32760 => Ok(utm(lon, lat, epsg - 32700, true)),
        other => Err(RasterError::Unsupported(format!(
            "cropping is not supported for EPSG:{}",
            other
        ))),
    }
}

/// Bounds of `bbox` once transformed into `epsg`, as
/// `[min_x, min_y, max_x, max_y]`.
pub fn transform_bbox(bbox: &Bbox, epsg: u32) -> Result<[f64; 4], RasterError> {
    let mut bounds = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];

    let steps = (EDGE_SAMPLES - 1) as f64;
    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / steps;
        let lon = bbox.min_lon + (bbox.max_lon - bbox.min_lon) * t;
        let lat = bbox.min_lat + (bbox.max_lat - bbox.min_lat) * t;

        for (x, y) in [
            project(epsg, lon, bbox.min_lat)?,
            project(epsg, lon, bbox.max_lat)?,
            project(epsg, bbox.min_lon, lat)?,
            project(epsg, bbox.max_lon, lat)?,
        ] {
            bounds[0] = bounds[0].min(x);
            bounds[1] = bounds[1].min(y);
            bounds[2] = bounds[2].max(x);
            bounds[3] = bounds[3].max(y);
        }
    }
    Ok(bounds)
}

fn web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-85.051_128_78, 85.051_128_78);
    let x = WGS84_A * lon.to_radians();
    let y = WGS84_A * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

// Transverse Mercator on the WGS84 ellipsoid (Snyder, USGS PP 1395, 8-9/8-10).
fn utm(lon: f64, lat: f64, zone: u32, south: bool) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let lon0 = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
    let phi = lat.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lon - lon0).to_radians();

    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;

    let mut y = UTM_K0
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if south {
        y += UTM_FALSE_NORTHING_SOUTH;
    }
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn central_meridian_on_equator() {
        let (x, y) = project(32632, 9.0, 0.0).unwrap();
        assert!(close(x, 500_000.0, 1e-6));
        assert!(close(y, 0.0, 1e-6));
    }

    #[test]
    fn meridian_arc_at_45_degrees() {
        let (x, y) = project(32632, 9.0, 45.0).unwrap();
        assert!(close(x, 500_000.0, 1e-6));
        assert!(close(y, 4_982_950.4, 1.0), "y = {y}");
    }

    #[test]
    fn east_of_meridian_increases_easting() {
        let (x, _) = project(32632, 10.0, 55.0).unwrap();
        assert!(x > 500_000.0 && x < 600_000.0);
    }

    #[test]
    fn southern_hemisphere_false_northing() {
        let (_, y) = project(32733, 15.0, -10.0).unwrap();
        assert!(y > 8_000_000.0 && y < 10_000_000.0);
    }

    #[test]
    fn web_mercator_origin() {
        let (x, y) = project(3857, 0.0, 0.0).unwrap();
        assert!(close(x, 0.0, 1e-9) && close(y, 0.0, 1e-6));
    }

    #[test]
    fn sinusoidal_is_unsupported() {
        assert!(project(6842, 0.0, 0.0).is_err());
    }

    #[test]
    fn bbox_bounds_cover_corners() {
        let bbox = Bbox { min_lon: 10.0, min_lat: 55.0, max_lon: 10.5, max_lat: 55.5 };
        let [min_x, min_y, max_x, max_y] = transform_bbox(&bbox, 32632).unwrap();
        for (lon, lat) in [(10.0, 55.0), (10.5, 55.5), (10.0, 55.5), (10.5, 55.0)] {
            let (x, y) = project(32632, lon, lat).unwrap();
            assert!(x >= min_x && x <= max_x && y >= min_y && y <= max_y);
        }
    }

    #[test]
    fn geographic_bbox_is_identity() {
        let bbox = Bbox { min_lon: -1.0, min_lat: 2.0, max_lon: 3.0, max_lat: 4.0 };
        assert_eq!(transform_bbox(&bbox, 4326).unwrap(), [-1.0, 2.0, 3.0, 4.0]);
    }
}
