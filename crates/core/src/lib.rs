//! # strata core
//!
//! Core types and I/O shared by the strata raster pipeline and vector layers.
//!
//! This crate provides:
//! - `DataType` / `RasterElement`: sample types and typed byte access
//! - `RasterBlock`: a typed pixel block with a no-data mask
//! - `Rectangle` and `GeoTransform`: extents and georeferencing
//! - `xml::Element`: owned XML tree used for persisting configuration
//! - GeoTIFF reading and writing

pub mod error;
pub mod io;
pub mod raster;
pub mod xml;

pub use error::{Error, Result};
pub use raster::{DataType, GeoTransform, RasterBlock, RasterElement, Rectangle};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::raster::{DataType, GeoTransform, RasterBlock, RasterElement, Rectangle};
    pub use crate::xml::Element;
}
