//! Native GeoTIFF reading/writing
//!
//! Uses the `tiff` crate for basic TIFF I/O. Only the georeferencing tags
//! needed to place a raster (pixel scale, tiepoint, GDAL no-data) are read.

use crate::error::{Error, Result};
use crate::raster::{DataType, GeoTransform};
use ndarray::Array2;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::TiffEncoder;
use tiff::encoder::colortype::Gray32Float;
use tiff::tags::Tag;

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GDAL_NODATA_TAG: u16 = 42113;

/// Decoded contents of a GeoTIFF: one grid per band plus georeferencing
#[derive(Debug, Clone)]
pub struct GeoTiffData {
    /// Band grids in (rows, cols) order
    pub bands: Vec<Array2<f64>>,
    /// Sample type stored in the file
    pub data_type: DataType,
    pub transform: GeoTransform,
    /// GDAL no-data value, if tagged
    pub no_data: Option<f64>,
}

impl GeoTiffData {
    pub fn rows(&self) -> usize {
        self.bands.first().map_or(0, |b| b.nrows())
    }

    pub fn cols(&self) -> usize {
        self.bands.first().map_or(0, |b| b.ncols())
    }
}

/// Read a GeoTIFF file, splitting interleaved samples into bands
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<GeoTiffData> {
    let file = File::open(path.as_ref())?;
    decode_geotiff(file)
}

/// Read a GeoTIFF from an in-memory buffer
pub fn read_geotiff_from_buffer(data: &[u8]) -> Result<GeoTiffData> {
    decode_geotiff(Cursor::new(data))
}

fn to_f64<T: Copy + Into<f64>>(buf: Vec<T>) -> Vec<f64> {
    buf.into_iter().map(Into::into).collect()
}

fn decode_geotiff<R>(reader: R) -> Result<GeoTiffData>
where
    R: std::io::Read + std::io::Seek,
{
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let rows = height as usize;
    let cols = width as usize;

    let (data_type, samples): (DataType, Vec<f64>) = match decoder.read_image()? {
        DecodingResult::U8(buf) => (DataType::Byte, to_f64(buf)),
        DecodingResult::I8(buf) => (DataType::Int8, to_f64(buf)),
        DecodingResult::U16(buf) => (DataType::UInt16, to_f64(buf)),
        DecodingResult::I16(buf) => (DataType::Int16, to_f64(buf)),
        DecodingResult::U32(buf) => (DataType::UInt32, to_f64(buf)),
        DecodingResult::I32(buf) => (DataType::Int32, to_f64(buf)),
        DecodingResult::U64(buf) => (DataType::UInt64, buf.into_iter().map(|v| v as f64).collect()),
        DecodingResult::I64(buf) => (DataType::Int64, buf.into_iter().map(|v| v as f64).collect()),
        DecodingResult::F32(buf) => (DataType::Float32, to_f64(buf)),
        DecodingResult::F64(buf) => (DataType::Float64, buf),
        #[allow(unreachable_patterns)]
        _ => return Err(Error::UnsupportedDataType("Unsupported TIFF pixel format".to_string())),
    };

    let pixels = rows * cols;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    // Chunky (pixel-interleaved) layout: sample k of pixel i at i * n + k
    let band_count = samples.len() / pixels;
    let bands = (0..band_count)
        .map(|k| Array2::from_shape_fn((rows, cols), |(r, c)| samples[(r * cols + c) * band_count + k]))
        .collect();

    let transform = read_geotransform(&mut decoder).unwrap_or_default();
    let no_data = decoder
        .get_tag_ascii_string(Tag::Unknown(GDAL_NODATA_TAG))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    Ok(GeoTiffData {
        bands,
        data_type,
        transform,
        no_data,
    })
}

/// Attempt to read GeoTransform from TIFF tags
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::Unknown(MODEL_PIXEL_SCALE_TAG))
        .map_err(|_| Error::Other("No pixel scale tag".into()))?;

    let tiepoint = decoder
        .get_tag_f64_vec(Tag::Unknown(MODEL_TIEPOINT_TAG))
        .map_err(|_| Error::Other("No tiepoint tag".into()))?;

    if scale.len() >= 2 && tiepoint.len() >= 6 {
        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        return Ok(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]));
    }

    Err(Error::Other("Cannot determine geotransform".into()))
}

/// Write one band to a Float32 GeoTIFF file; NaN cells are written as `no_data`
pub fn write_geotiff<P: AsRef<Path>>(
    band: &Array2<f64>,
    transform: &GeoTransform,
    no_data: Option<f64>,
    path: P,
) -> Result<()> {
    let file = File::create(path.as_ref())?;
    encode_geotiff(band, transform, no_data, file)
}

/// Write one band to an in-memory Float32 GeoTIFF
pub fn write_geotiff_to_buffer(
    band: &Array2<f64>,
    transform: &GeoTransform,
    no_data: Option<f64>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_geotiff(band, transform, no_data, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn encode_geotiff<W>(
    band: &Array2<f64>,
    transform: &GeoTransform,
    no_data: Option<f64>,
    writer: W,
) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    let mut encoder = TiffEncoder::new(writer)?;
    let (rows, cols) = band.dim();

    let fill = no_data.unwrap_or(f64::NAN) as f32;
    let data: Vec<f32> = band
        .iter()
        .map(|&v| if v.is_nan() { fill } else { v as f32 })
        .collect();

    let mut image = encoder.new_image::<Gray32Float>(cols as u32, rows as u32)?;

    let scale = [transform.pixel_width, transform.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE_TAG), &scale[..])?;

    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT_TAG), &tiepoint[..])?;

    // Version 1.1.0 with two keys: GTModelTypeGeoKey=Projected, GTRasterTypeGeoKey=PixelIsArea
    let geokeys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, 1, 1025, 0, 1, 1];
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), &geokeys[..])?;

    if let Some(nd) = no_data {
        image
            .encoder()
            .write_tag(Tag::Unknown(GDAL_NODATA_TAG), nd.to_string().as_str())?;
    }

    image.write_data(&data)?;
    Ok(())
}
