//! North-up georeferencing of a pixel grid

use crate::raster::Rectangle;
use serde::{Deserialize, Serialize};

/// Maps pixel positions of a north-up grid to map coordinates.
///
/// `origin` is the outer corner of the top-left cell; `pixel_height` is
/// negative when rows run southwards, as in GeoTIFF files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Transform placing a `cols` x `rows` grid over `extent`
    pub fn from_extent(extent: &Rectangle, cols: usize, rows: usize) -> Self {
        Self::new(
            extent.xmin,
            extent.ymax,
            extent.width() / cols.max(1) as f64,
            -extent.height() / rows.max(1) as f64,
        )
    }

    /// Map coordinates of the centre of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map position; NaN for a degenerate grid
    pub fn position(&self, x: f64, y: f64) -> (f64, f64) {
        if self.pixel_width == 0.0 || self.pixel_height == 0.0 {
            return (f64::NAN, f64::NAN);
        }
        (
            (y - self.origin_y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }

    /// Rectangle covered by a `cols` x `rows` grid
    pub fn extent(&self, cols: usize, rows: usize) -> Rectangle {
        let x1 = self.origin_x + cols as f64 * self.pixel_width;
        let y1 = self.origin_y + rows as f64 * self.pixel_height;
        Rectangle::new(
            self.origin_x.min(x1),
            self.origin_y.min(y1),
            self.origin_x.max(x1),
            self.origin_y.max(y1),
        )
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}
