//! I/O operations for reading and writing GeoTIFF rasters

mod native;

pub use native::{
    GeoTiffData, read_geotiff, read_geotiff_from_buffer, write_geotiff, write_geotiff_to_buffer,
};
