//! # strata pipe
//!
//! Raster filter pipeline: a chain of stages from a provider through
//! no-data masking, rendering and resampling to the blocks a consumer
//! reads.
//!
//! - [`RasterPipe`] owns the stages in order and validates edits
//! - [`RasterInterface`] is the protocol each stage implements
//! - [`Stage`] wraps an implementation with its on flag and the cached
//!   statistics and histograms computed on it
//! - [`Resampler`] kernels plug into [`ResampleFilter`]
//!
//! ```ignore
//! use strata_pipe::prelude::*;
//!
//! let mut pipe = RasterPipe::with_provider(MemoryProvider::from_path("dem.tif")?);
//! pipe.set(ResampleFilter::new().with_zoomed_in_resampler(Box::new(BilinearResampler)).into());
//! let block = pipe.block(1, &extent, 512, 512, None);
//! ```

pub mod capabilities;
pub mod feedback;
pub mod interface;
mod maybe_rayon;
pub mod pipe;
pub mod resampler;
pub mod stage;
pub mod stages;
pub mod stats;
pub mod tiles;

pub use capabilities::Capabilities;
pub use feedback::BlockFeedback;
pub use interface::{Chain, RasterInterface};
pub use pipe::RasterPipe;
pub use resampler::{BilinearResampler, CubicResampler, NearestResampler, Resampler, resampler_from_kind};
pub use stage::{Stage, StageKind, StageRole};
pub use stages::{ColorRamp, ColorStop, MemoryProvider, NoDataRange, Nuller, ResampleFilter, Rgb, SingleBandRenderer};
pub use stats::{BandStats, Histogram, Stats};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BandStats, BilinearResampler, BlockFeedback, Capabilities, Chain, ColorRamp, CubicResampler, Histogram,
        MemoryProvider, NearestResampler, NoDataRange, Nuller, RasterInterface, RasterPipe, ResampleFilter,
        Resampler, SingleBandRenderer, Stage, StageKind, StageRole, Stats,
    };
    pub use strata_core::prelude::*;
}
