use std::io::{Cursor, Read, Seek, Write};

use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::compression::Deflate;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, TiffValue, colortype};
use tiff::tags::Tag;

use crate::raster::{GeoReference, Raster, RasterError, Samples};

/// Decode the full-resolution image (first IFD) of a GeoTIFF/COG, refusing
/// images whose decoded samples would exceed `max_decoded` bytes.
pub fn decode(bytes: &[u8], max_decoded: usize) -> Result<Raster, RasterError> {
    let mut limits = Limits::default();
    limits.decoding_buffer_size = max_decoded;
    limits.intermediate_buffer_size = max_decoded;
    let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(limits);

    let (width, height) = decoder.dimensions()?;
    let bands = match decoder.colortype()? {
        ColorType::Gray(_) => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => return Err(RasterError::Unsupported(format!("color type {:?}", other))),
    };

    let geo = read_geo(&mut decoder);
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches('\0').trim().parse::<f64>().ok());

    let samples = match decoder.read_image()? {
        DecodingResult::U8(v) => Samples::U8(v),
        DecodingResult::U16(v) => Samples::U16(v),
        DecodingResult::I16(v) => Samples::I16(v),
        DecodingResult::U32(v) => Samples::U32(v),
        DecodingResult::I32(v) => Samples::I32(v),
        DecodingResult::F32(v) => Samples::F32(v),
        DecodingResult::F64(v) => Samples::F64(v),
        _ => return Err(RasterError::Unsupported("sample format".to_string())),
    };

    Ok(Raster { width, height, bands, samples, geo, nodata })
}

fn read_geo<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoReference> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tie = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 3 || tie.len() < 6 {
        return None;
    }

    Some(GeoReference {
        pixel_scale: [scale[0], scale[1], scale[2]],
        tiepoint: [tie[0], tie[1], tie[2], tie[3], tie[4], tie[5]],
        geokeys: decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).unwrap_or_default(),
        geo_doubles: decoder.get_tag_f64_vec(Tag::GeoDoubleParamsTag).unwrap_or_default(),
        geo_ascii: decoder.get_tag_ascii_string(Tag::GeoAsciiParamsTag).ok(),
    })
}

/// Deflate-compressed GeoTIFF, carrying over georeferencing and nodata.
pub fn encode(raster: &Raster) -> Result<Vec<u8>, RasterError> {
    match (raster.bands, &raster.samples) {
        (1, Samples::U8(d)) => write::<colortype::Gray8>(raster, d),
        (1, Samples::U16(d)) => write::<colortype::Gray16>(raster, d),
        (1, Samples::I16(d)) => write::<colortype::GrayI16>(raster, d),
        (1, Samples::U32(d)) => write::<colortype::Gray32>(raster, d),
        (1, Samples::I32(d)) => write::<colortype::GrayI32>(raster, d),
        (1, Samples::F32(d)) => write::<colortype::Gray32Float>(raster, d),
        (1, Samples::F64(d)) => write::<colortype::Gray64Float>(raster, d),
        (3, Samples::U8(d)) => write::<colortype::RGB8>(raster, d),
        (3, Samples::U16(d)) => write::<colortype::RGB16>(raster, d),
        (3, Samples::F32(d)) => write::<colortype::RGB32Float>(raster, d),
        (4, Samples::U8(d)) => write::<colortype::RGBA8>(raster, d),
        (4, Samples::U16(d)) => write::<colortype::RGBA16>(raster, d),
        (bands, _) => Err(RasterError::Unsupported(format!(
            "cannot write {} band(s) of this sample type",
            bands
        ))),
    }
}

fn write<C>(raster: &Raster, data: &[C::Inner]) -> Result<Vec<u8>, RasterError>
where
    C: colortype::ColorType,
    [C::Inner]: TiffValue,
{
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf)?;
        let mut image =
            encoder.new_image_with_compression::<C, _>(raster.width, raster.height, Deflate::default())?;

        if let Some(geo) = &raster.geo {
            write_geo_tags(image.encoder(), geo)?;
        }
        if let Some(nodata) = raster.nodata {
            image.encoder().write_tag(Tag::GdalNodata, nodata.to_string().as_str())?;
        }
        image.write_data(data)?;
    }
    Ok(buf.into_inner())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    geo: &GeoReference,
) -> tiff::TiffResult<()> {
    dir.write_tag(Tag::ModelPixelScaleTag, &geo.pixel_scale[..])?;
    dir.write_tag(Tag::ModelTiepointTag, &geo.tiepoint[..])?;
    if !geo.geokeys.is_empty() {
        dir.write_tag(Tag::GeoKeyDirectoryTag, &geo.geokeys[..])?;
    }
    if !geo.geo_doubles.is_empty() {
        dir.write_tag(Tag::GeoDoubleParamsTag, &geo.geo_doubles[..])?;
    }
    if let Some(ascii) = &geo.geo_ascii {
        dir.write_tag(Tag::GeoAsciiParamsTag, ascii.as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 16 * 1024 * 1024;
    use crate::raster::PixelWindow;

    fn utm_raster() -> Raster {
        Raster {
            width: 4,
            height: 3,
            bands: 1,
            samples: Samples::U16((0..12).map(|v| v * 100).collect()),
            geo: Some(GeoReference {
                pixel_scale: [10.0, 10.0, 0.0],
                tiepoint: [0.0, 0.0, 0.0, 600_000.0, 6_100_000.0, 0.0],
                geokeys: vec![1, 1, 0, 1, 3072, 0, 1, 32632],
                geo_doubles: Vec::new(),
                geo_ascii: Some("WGS 84 / UTM zone 32N|".to_string()),
            }),
            nodata: Some(0.0),
        }
    }

    #[test]
    fn cropped_raster_survives_encoding() {
        let window = PixelWindow { col_off: 1, row_off: 1, width: 2, height: 2 };
        let cropped = utm_raster().crop(&window);

        let bytes = encode(&cropped).unwrap();
        let decoded = decode(&bytes, LIMIT).unwrap();

        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.height, 2);
        assert_eq!(decoded.samples, Samples::U16(vec![500, 600, 900, 1000]));
        assert_eq!(decoded.nodata, Some(0.0));

        let geo = decoded.geo.unwrap();
        assert_eq!(geo.epsg(), Some(32632));
        assert_eq!(geo.origin(), (600_010.0, 6_099_990.0));
    }

    #[test]
    fn rgb_without_georeferencing() {
        let raster = Raster {
            width: 2,
            height: 1,
            bands: 3,
            samples: Samples::U8(vec![255, 0, 0, 0, 255, 0]),
            geo: None,
            nodata: None,
        };
        let decoded = decode(&encode(&raster).unwrap(), LIMIT).unwrap();
        assert_eq!(decoded.bands, 3);
        assert!(decoded.geo.is_none());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode(b"definitely not a tiff", LIMIT).is_err());
    }

    #[test]
    fn decoded_size_is_capped() {
        // 1024x1024 zeros deflate to a few KB but decode to 1 MB
        let raster = Raster {
            width: 1024,
            height: 1024,
            bands: 1,
            samples: Samples::U8(vec![0; 1024 * 1024]),
            geo: None,
            nodata: None,
        };
        let bytes = encode(&raster).unwrap();
        assert!(bytes.len() < 64 * 1024);

        assert!(matches!(decode(&bytes, 64 * 1024), Err(RasterError::Tiff(_))));
        assert_eq!(decode(&bytes, 2 * 1024 * 1024).unwrap().width, 1024);
    }
}
