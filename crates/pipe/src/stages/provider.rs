//! In-memory raster source

use std::path::Path;

use ndarray::Array2;
use tracing::{debug, warn};

use strata_core::io::{GeoTiffData, read_geotiff};
use strata_core::xml::Element;
use strata_core::{DataType, Error, GeoTransform, RasterBlock, Rectangle, Result};

use crate::capabilities::Capabilities;
use crate::feedback::{self, BlockFeedback};
use crate::interface::{Chain, RasterInterface};
use crate::stages::unavailable;

const DEFAULT_BLOCK_SIZE: usize = 256;

/// Terminal stage serving bands held in memory.
///
/// Values are stored as f64 grids and converted to the declared data type
/// when blocks are produced. Requests are answered by sampling the pixel
/// whose centre is nearest to each output pixel centre; output pixels
/// outside the raster extent are no-data.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    bands: Vec<Array2<f64>>,
    data_type: DataType,
    extent: Rectangle,
    no_data: Option<f64>,
    block_size: usize,
    source: Option<String>,
}

impl MemoryProvider {
    /// Create a provider; every band must have the same non-zero shape
    pub fn new(extent: Rectangle, data_type: DataType, bands: Vec<Array2<f64>>) -> Result<Self> {
        let Some(first) = bands.first() else {
            return Err(Error::InvalidParameter {
                name: "bands",
                value: "0".into(),
                reason: "at least one band is required".into(),
            });
        };
        let (rows, cols) = first.dim();
        if rows == 0 || cols == 0 || bands.iter().any(|b| b.dim() != (rows, cols)) {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        if extent.is_empty() {
            return Err(Error::InvalidParameter {
                name: "extent",
                value: extent.to_string(),
                reason: "extent must have positive width and height".into(),
            });
        }
        if data_type == DataType::Unknown {
            return Err(Error::UnsupportedDataType(data_type.to_string()));
        }

        Ok(Self {
            bands,
            data_type,
            extent,
            no_data: None,
            block_size: DEFAULT_BLOCK_SIZE,
            source: None,
        })
    }

    /// Build from decoded GeoTIFF contents
    pub fn from_geotiff(data: GeoTiffData) -> Result<Self> {
        let extent = data.transform.extent(data.cols(), data.rows());
        Ok(Self::new(extent, data.data_type, data.bands)?.with_no_data(data.no_data))
    }

    /// Read a GeoTIFF file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut provider = Self::from_geotiff(read_geotiff(path)?)?;
        provider.source = Some(path.display().to_string());
        debug!(
            source = %path.display(),
            bands = provider.bands.len(),
            cols = provider.cols(),
            rows = provider.rows(),
            "loaded raster"
        );
        Ok(provider)
    }

    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = no_data;
        self
    }

    /// Block size reported to consumers; zero is treated as one
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Path the data was loaded from, if any
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn no_data(&self) -> Option<f64> {
        self.no_data
    }

    pub fn rows(&self) -> usize {
        self.bands[0].nrows()
    }

    pub fn cols(&self) -> usize {
        self.bands[0].ncols()
    }

    /// Georeferencing of the native grid
    pub fn transform(&self) -> GeoTransform {
        GeoTransform::from_extent(&self.extent, self.cols(), self.rows())
    }

    fn band_grid(&self, band: usize) -> Option<&Array2<f64>> {
        band.checked_sub(1).and_then(|i| self.bands.get(i))
    }

    fn is_no_data_value(&self, v: f64) -> bool {
        v.is_nan() || self.no_data.is_some_and(|nd| v == nd)
    }

    /// Native (row, col) holding the point, if inside the raster
    fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        if !self.extent.contains_point(x, y) {
            return None;
        }
        let (row, col) = self.transform().position(x, y);
        if row.is_nan() || col.is_nan() {
            return None;
        }
        Some(((row as usize).min(self.rows() - 1), (col as usize).min(self.cols() - 1)))
    }

    /// Value of every band at a map position; `None` outside the raster,
    /// `None` entries for no-data
    pub fn identify(&self, x: f64, y: f64) -> Option<Vec<Option<f64>>> {
        let (row, col) = self.pixel_at(x, y)?;
        Some(
            self.bands
                .iter()
                .map(|b| {
                    let v = b[(row, col)];
                    (!self.is_no_data_value(v)).then_some(v)
                })
                .collect(),
        )
    }
}

impl RasterInterface for MemoryProvider {
    fn type_name(&self) -> &'static str {
        "provider"
    }

    fn clone_box(&self) -> Box<dyn RasterInterface> {
        Box::new(self.clone())
    }

    fn capabilities(&self, _input: Option<Chain<'_>>) -> Capabilities {
        Capabilities::SIZE | Capabilities::IDENTIFY | Capabilities::IDENTIFY_VALUE
    }

    fn data_type(&self, _input: Option<Chain<'_>>, band: usize) -> DataType {
        if self.band_grid(band).is_some() {
            self.data_type
        } else {
            DataType::Unknown
        }
    }

    fn source_data_type(&self, input: Option<Chain<'_>>, band: usize) -> DataType {
        self.data_type(input, band)
    }

    fn band_count(&self, _input: Option<Chain<'_>>) -> usize {
        self.bands.len()
    }

    fn x_size(&self, _input: Option<Chain<'_>>) -> usize {
        self.cols()
    }

    fn y_size(&self, _input: Option<Chain<'_>>) -> usize {
        self.rows()
    }

    fn x_block_size(&self, _input: Option<Chain<'_>>) -> usize {
        self.block_size
    }

    fn y_block_size(&self, _input: Option<Chain<'_>>) -> usize {
        self.block_size
    }

    fn extent(&self, _input: Option<Chain<'_>>) -> Rectangle {
        self.extent
    }

    fn block(
        &self,
        _input: Option<Chain<'_>>,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock {
        let Some(grid) = self.band_grid(band) else {
            warn!(band, bands = self.bands.len(), "band out of range");
            return unavailable(self.data_type, width, height);
        };
        if extent.is_empty() || width == 0 || height == 0 {
            return unavailable(self.data_type, width, height);
        }

        let mut block = RasterBlock::new(self.data_type, width, height).with_no_data_value(self.no_data);
        let x_res = extent.width() / width as f64;
        let y_res = extent.height() / height as f64;

        for row in 0..height {
            if feedback::cancelled(feedback) {
                debug!(row, height, "block read cancelled");
                for index in row * width..width * height {
                    block.set_is_no_data_at(index);
                }
                break;
            }

            let y = extent.ymax - (row as f64 + 0.5) * y_res;
            for col in 0..width {
                let x = extent.xmin + (col as f64 + 0.5) * x_res;
                let index = row * width + col;
                match self.pixel_at(x, y).map(|p| grid[p]) {
                    Some(v) if !self.is_no_data_value(v) => block.set_value_at(index, v),
                    _ => block.set_is_no_data_at(index),
                }
            }
        }
        block
    }

    fn accepts_input(&self, input: Option<Chain<'_>>) -> bool {
        input.is_none()
    }

    fn write_xml(&self, element: &mut Element) {
        element.set_attribute("dataType", self.data_type.name());
        element.set_attribute("bandCount", self.bands.len());
        element.set_attribute("cols", self.cols());
        element.set_attribute("rows", self.rows());
        if let Some(nd) = self.no_data {
            element.set_attribute("noData", nd);
        }
        if let Some(source) = &self.source {
            element.set_attribute("source", source);
        }
    }
}
