//! Raster data types, blocks and georeferencing

mod block;
mod data_type;
pub(crate) mod element;
mod extent;
mod geotransform;

pub use block::RasterBlock;
pub use data_type::DataType;
pub use element::{RasterElement, read_sample, write_sample};
pub use extent::Rectangle;
pub use geotransform::GeoTransform;
