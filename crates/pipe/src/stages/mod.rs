//! Built-in pipeline stages

mod nuller;
mod provider;
mod renderer;
mod resample_filter;

pub use nuller::{NoDataRange, Nuller};
pub use provider::MemoryProvider;
pub use renderer::{ColorRamp, ColorStop, Rgb, SingleBandRenderer};
pub use resample_filter::ResampleFilter;

use strata_core::{DataType, RasterBlock};

/// Block returned when a stage cannot produce data
pub(crate) fn unavailable(data_type: DataType, width: usize, height: usize) -> RasterBlock {
    RasterBlock::new_no_data(data_type, width, height)
}
