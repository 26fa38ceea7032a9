//! A pipeline stage: the interface implementation plus its on flag and caches

use tracing::debug;

use strata_core::{DataType, RasterBlock, Rectangle};

use crate::capabilities::Capabilities;
use crate::feedback::BlockFeedback;
use crate::interface::{Chain, RasterInterface};
use crate::stages::{MemoryProvider, Nuller, ResampleFilter, SingleBandRenderer};
use crate::stats::{BandStats, Histogram, Stats, StatsAccumulator};
use crate::tiles::TileIterator;

/// Tile size used for statistics reads when a stage reports no block size
const DEFAULT_STATS_BLOCK_SIZE: usize = 500;
/// Sampling grid side when the native size is unknown
const DEFAULT_SAMPLE_GRID: usize = 1000;
const MAX_HISTOGRAM_BINS: usize = 1000;

/// Position of a stage in a pipe; stages set by role are kept in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageRole {
    Provider,
    Nuller,
    Renderer,
    Resampler,
    Custom,
}

/// The concrete implementation behind a stage
#[derive(Debug)]
pub enum StageKind {
    Provider(MemoryProvider),
    Nuller(Nuller),
    Renderer(SingleBandRenderer),
    Resample(ResampleFilter),
    Custom(Box<dyn RasterInterface>),
}

impl Clone for StageKind {
    fn clone(&self) -> Self {
        match self {
            Self::Provider(p) => Self::Provider(p.clone()),
            Self::Nuller(n) => Self::Nuller(n.clone()),
            Self::Renderer(r) => Self::Renderer(r.clone()),
            Self::Resample(r) => Self::Resample(r.clone()),
            Self::Custom(c) => Self::Custom(c.clone_box()),
        }
    }
}

impl StageKind {
    pub fn role(&self) -> StageRole {
        match self {
            Self::Provider(_) => StageRole::Provider,
            Self::Nuller(_) => StageRole::Nuller,
            Self::Renderer(_) => StageRole::Renderer,
            Self::Resample(_) => StageRole::Resampler,
            Self::Custom(_) => StageRole::Custom,
        }
    }

    pub fn interface(&self) -> &dyn RasterInterface {
        match self {
            Self::Provider(p) => p,
            Self::Nuller(n) => n,
            Self::Renderer(r) => r,
            Self::Resample(r) => r,
            Self::Custom(c) => c.as_ref(),
        }
    }

    pub fn interface_mut(&mut self) -> &mut dyn RasterInterface {
        match self {
            Self::Provider(p) => p,
            Self::Nuller(n) => n,
            Self::Renderer(r) => r,
            Self::Resample(r) => r,
            Self::Custom(c) => c.as_mut(),
        }
    }
}

/// One link of a raster chain.
///
/// A stage that is switched off passes every query through to its input.
/// Statistics and histograms computed on the stage are cached on it and
/// cloned with it; mutable access to the implementation drops the caches.
#[derive(Debug, Clone)]
pub struct Stage {
    kind: StageKind,
    on: bool,
    statistics: Vec<BandStats>,
    histograms: Vec<Histogram>,
}

impl Stage {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            on: true,
            statistics: Vec::new(),
            histograms: Vec::new(),
        }
    }

    /// Wrap a user implementation
    pub fn custom(interface: Box<dyn RasterInterface>) -> Self {
        Self::new(StageKind::Custom(interface))
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    /// Mutable access to the implementation; clears cached aggregates
    pub fn kind_mut(&mut self) -> &mut StageKind {
        self.clear_caches();
        &mut self.kind
    }

    pub fn role(&self) -> StageRole {
        self.kind.role()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.interface().type_name()
    }

    pub fn interface(&self) -> &dyn RasterInterface {
        self.kind.interface()
    }

    /// Mutable access to the implementation; clears cached aggregates
    pub fn interface_mut(&mut self) -> &mut dyn RasterInterface {
        self.clear_caches();
        self.kind.interface_mut()
    }

    pub fn as_provider(&self) -> Option<&MemoryProvider> {
        match &self.kind {
            StageKind::Provider(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_resample_filter_mut(&mut self) -> Option<&mut ResampleFilter> {
        self.clear_caches();
        match &mut self.kind {
            StageKind::Resample(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Switch the stage on or off; a change drops the caches
    pub fn set_on(&mut self, on: bool) {
        if self.on != on {
            self.on = on;
            self.clear_caches();
        }
    }

    pub fn clear_caches(&mut self) {
        self.statistics.clear();
        self.histograms.clear();
    }

    /// The input to forward to when this stage is switched off
    fn bypass<'a>(&self, input: Option<Chain<'a>>) -> Option<Chain<'a>> {
        if self.on { None } else { input }
    }

    pub fn capabilities(&self, input: Option<Chain<'_>>) -> Capabilities {
        match self.bypass(input) {
            Some(i) => i.capabilities(),
            None => self.interface().capabilities(input),
        }
    }

    pub fn data_type(&self, input: Option<Chain<'_>>, band: usize) -> DataType {
        match self.bypass(input) {
            Some(i) => i.data_type(band),
            None => self.interface().data_type(input, band),
        }
    }

    pub fn source_data_type(&self, input: Option<Chain<'_>>, band: usize) -> DataType {
        match self.bypass(input) {
            Some(i) => i.source_data_type(band),
            None => self.interface().source_data_type(input, band),
        }
    }

    pub fn band_count(&self, input: Option<Chain<'_>>) -> usize {
        match self.bypass(input) {
            Some(i) => i.band_count(),
            None => self.interface().band_count(input),
        }
    }

    pub fn x_size(&self, input: Option<Chain<'_>>) -> usize {
        match self.bypass(input) {
            Some(i) => i.x_size(),
            None => self.interface().x_size(input),
        }
    }

    pub fn y_size(&self, input: Option<Chain<'_>>) -> usize {
        match self.bypass(input) {
            Some(i) => i.y_size(),
            None => self.interface().y_size(input),
        }
    }

    pub fn x_block_size(&self, input: Option<Chain<'_>>) -> usize {
        match self.bypass(input) {
            Some(i) => i.x_block_size(),
            None => self.interface().x_block_size(input),
        }
    }

    pub fn y_block_size(&self, input: Option<Chain<'_>>) -> usize {
        match self.bypass(input) {
            Some(i) => i.y_block_size(),
            None => self.interface().y_block_size(input),
        }
    }

    pub fn extent(&self, input: Option<Chain<'_>>) -> Rectangle {
        match self.bypass(input) {
            Some(i) => i.extent(),
            None => self.interface().extent(input),
        }
    }

    pub fn block(
        &self,
        input: Option<Chain<'_>>,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock {
        match self.bypass(input) {
            Some(i) => i.block(band, extent, width, height, feedback),
            None => self.interface().block(input, band, extent, width, height, feedback),
        }
    }

    pub fn accepts_input(&self, input: Option<Chain<'_>>) -> bool {
        self.interface().accepts_input(input)
    }

    /// Requested extent clipped to the stage extent; empty means full extent
    fn effective_extent(&self, input: Option<Chain<'_>>, extent: &Rectangle) -> Rectangle {
        let full = self.extent(input);
        if extent.is_empty() { full } else { full.intersect(extent) }
    }

    /// Size of the grid sampled for statistics over `extent`
    fn sample_grid(&self, input: Option<Chain<'_>>, extent: &Rectangle, sample_size: usize) -> (usize, usize) {
        if extent.is_empty() {
            return (0, 0);
        }

        let native = if self.capabilities(input).contains(Capabilities::SIZE) {
            let full = self.extent(input);
            let (cols, rows) = (self.x_size(input), self.y_size(input));
            (cols > 0 && rows > 0).then(|| (full.width() / cols as f64, full.height() / rows as f64))
        } else {
            None
        };

        let (x_res, y_res) = match (sample_size, native) {
            (0, Some(res)) => res,
            (0, None) => return (DEFAULT_SAMPLE_GRID, DEFAULT_SAMPLE_GRID),
            (n, native) => {
                let cell = (extent.area() / n as f64).sqrt();
                match native {
                    Some((nx, ny)) => (cell.max(nx), cell.max(ny)),
                    None => (cell, cell),
                }
            }
        };

        let width = ((extent.width() / x_res).round() as usize).max(1);
        let height = ((extent.height() / y_res).round() as usize).max(1);
        (width, height)
    }

    /// Feed every valid sample of `band` on a `width` x `height` grid over `extent`
    fn for_each_sample(
        &self,
        input: Option<Chain<'_>>,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        mut f: impl FnMut(f64),
    ) {
        let tile_cols = match self.x_block_size(input) {
            0 => DEFAULT_STATS_BLOCK_SIZE,
            n => n,
        };
        let tile_rows = match self.y_block_size(input) {
            0 => DEFAULT_STATS_BLOCK_SIZE,
            n => n,
        };
        let x_res = extent.width() / width as f64;
        let y_res = extent.height() / height as f64;

        for tile in TileIterator::new(height, width, tile_rows, tile_cols) {
            let tile_extent = Rectangle::new(
                extent.xmin + tile.col_offset as f64 * x_res,
                extent.ymax - (tile.row_offset + tile.rows) as f64 * y_res,
                extent.xmin + (tile.col_offset + tile.cols) as f64 * x_res,
                extent.ymax - tile.row_offset as f64 * y_res,
            );
            let block = self.block(input, band, &tile_extent, tile.cols, tile.rows, None);
            for index in 0..block.len() {
                if !block.is_no_data_at(index) {
                    f(block.value_at(index));
                }
            }
        }
    }

    /// Whether statistics answering the query are cached
    pub fn has_statistics(&self, band: usize, stats: Stats, extent: &Rectangle, sample_size: usize) -> bool {
        self.statistics
            .iter()
            .any(|s| s.matches(band, stats, extent, sample_size))
    }

    /// Statistics of `band` over `extent` (empty = full extent).
    ///
    /// A cached entry for the same band, extent and sample size holding at
    /// least the requested statistics is returned without reading data.
    pub fn band_statistics(
        &mut self,
        input: Option<Chain<'_>>,
        band: usize,
        stats: Stats,
        extent: &Rectangle,
        sample_size: usize,
    ) -> BandStats {
        if let Some(cached) = self
            .statistics
            .iter()
            .find(|s| s.matches(band, stats, extent, sample_size))
        {
            return cached.clone();
        }

        debug!(stage = self.type_name(), band, sample_size, "computing band statistics");
        let mut result = BandStats::new(band, stats, *extent, sample_size);
        let final_extent = self.effective_extent(input, extent);
        let (width, height) = self.sample_grid(input, &final_extent, sample_size);
        result.width = width;
        result.height = height;

        let mut acc = StatsAccumulator::new();
        if width > 0 && height > 0 {
            self.for_each_sample(input, band, &final_extent, width, height, |v| acc.push(v));
        }
        acc.finish(&mut result);

        self.statistics.push(result.clone());
        result
    }

    fn is_integer_source(&self, input: Option<Chain<'_>>, band: usize) -> bool {
        let source = match self.source_data_type(input, band) {
            DataType::Unknown => self.data_type(input, band),
            dt => dt,
        };
        source.is_integer()
    }

    /// Histogram entry with defaults resolved, counts empty
    #[allow(clippy::too_many_arguments)]
    fn init_histogram(
        &self,
        input: Option<Chain<'_>>,
        band: usize,
        bin_count: usize,
        minimum: f64,
        maximum: f64,
        extent: &Rectangle,
        sample_size: usize,
        include_out_of_range: bool,
    ) -> Histogram {
        let bin_count = match bin_count {
            0 if self.is_integer_source(input, band) => {
                let span = (maximum - minimum + 1.0).max(1.0);
                (span as usize).min(MAX_HISTOGRAM_BINS)
            }
            0 => MAX_HISTOGRAM_BINS,
            n => n,
        };
        Histogram {
            band,
            bin_count,
            minimum,
            maximum,
            extent: *extent,
            width: 0,
            height: 0,
            sample_size,
            include_out_of_range,
            counts: Vec::new(),
            non_null_count: 0,
            valid: false,
        }
    }

    /// Min/max taken from statistics of the same key when not given
    fn histogram_range(
        &mut self,
        input: Option<Chain<'_>>,
        band: usize,
        minimum: Option<f64>,
        maximum: Option<f64>,
        extent: &Rectangle,
        sample_size: usize,
    ) -> (f64, f64) {
        if let (Some(min), Some(max)) = (minimum, maximum) {
            return (min, max);
        }
        let stats = self.band_statistics(input, band, Stats::MIN | Stats::MAX, extent, sample_size);
        let (smin, smax) = if stats.element_count == 0 {
            (0.0, 0.0)
        } else {
            (stats.min, stats.max)
        };
        (minimum.unwrap_or(smin), maximum.unwrap_or(smax))
    }

    /// Whether a histogram answering the query is cached.
    ///
    /// Missing min/max can only be resolved from cached statistics; if none
    /// are cached the histogram cannot be cached either.
    #[allow(clippy::too_many_arguments)]
    pub fn has_histogram(
        &self,
        input: Option<Chain<'_>>,
        band: usize,
        bin_count: usize,
        minimum: Option<f64>,
        maximum: Option<f64>,
        extent: &Rectangle,
        sample_size: usize,
        include_out_of_range: bool,
    ) -> bool {
        let (min, max) = match (minimum, maximum) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                let Some(stats) = self
                    .statistics
                    .iter()
                    .find(|s| s.matches(band, Stats::MIN | Stats::MAX, extent, sample_size))
                else {
                    return false;
                };
                let (smin, smax) = if stats.element_count == 0 {
                    (0.0, 0.0)
                } else {
                    (stats.min, stats.max)
                };
                (minimum.unwrap_or(smin), maximum.unwrap_or(smax))
            }
        };
        let key = self.init_histogram(input, band, bin_count, min, max, extent, sample_size, include_out_of_range);
        self.histograms.iter().any(|h| h.valid && h.matches(&key))
    }

    /// Histogram of `band` over `extent` (empty = full extent).
    ///
    /// `bin_count == 0` picks one bin per integer value for integer sources
    /// (at most 1000) and 1000 bins otherwise. Missing bounds come from the
    /// band statistics.
    #[allow(clippy::too_many_arguments)]
    pub fn histogram(
        &mut self,
        input: Option<Chain<'_>>,
        band: usize,
        bin_count: usize,
        minimum: Option<f64>,
        maximum: Option<f64>,
        extent: &Rectangle,
        sample_size: usize,
        include_out_of_range: bool,
    ) -> Histogram {
        let (min, max) = self.histogram_range(input, band, minimum, maximum, extent, sample_size);
        let mut histogram =
            self.init_histogram(input, band, bin_count, min, max, extent, sample_size, include_out_of_range);

        if let Some(cached) = self.histograms.iter().find(|h| h.valid && h.matches(&histogram)) {
            return cached.clone();
        }

        debug!(
            stage = self.type_name(),
            band,
            bins = histogram.bin_count,
            min,
            max,
            "computing histogram"
        );
        let final_extent = self.effective_extent(input, extent);
        let (width, height) = self.sample_grid(input, &final_extent, sample_size);
        histogram.width = width;
        histogram.height = height;

        let mut counts = vec![0u64; histogram.bin_count];
        let mut non_null = 0u64;
        if width > 0 && height > 0 {
            self.for_each_sample(input, band, &final_extent, width, height, |v| {
                non_null += 1;
                if let Some(bin) = histogram.bin_of(v) {
                    counts[bin] += 1;
                }
            });
        }
        histogram.counts = counts;
        histogram.non_null_count = non_null;
        histogram.valid = true;

        self.histograms.push(histogram.clone());
        histogram
    }

    /// Values below which `lower_fraction` and `upper_fraction` of the
    /// pixels fall, read from a histogram spanning the band's min/max.
    ///
    /// Returns `None` when the band has no valid pixels.
    pub fn cumulative_cut(
        &mut self,
        input: Option<Chain<'_>>,
        band: usize,
        lower_fraction: f64,
        upper_fraction: f64,
        extent: &Rectangle,
        sample_size: usize,
    ) -> Option<(f64, f64)> {
        let stats = self.band_statistics(input, band, Stats::MIN | Stats::MAX, extent, sample_size);
        if stats.element_count == 0 || stats.max < stats.min {
            return None;
        }

        let source = self.source_data_type(input, band);
        let bin_count = if source == DataType::Byte {
            (stats.max - stats.min + 1.0).ceil() as usize
        } else {
            0
        };
        let histogram = self.histogram(
            input,
            band,
            bin_count,
            Some(stats.min),
            Some(stats.max),
            extent,
            sample_size,
            false,
        );

        let step = histogram.bin_width();
        let min_count = (lower_fraction * histogram.non_null_count as f64).round() as u64;
        let max_count = (upper_fraction * histogram.non_null_count as f64).round() as u64;

        let mut lower = None;
        let mut upper = None;
        let mut cumulative = 0u64;
        for (bin, &count) in histogram.counts.iter().enumerate() {
            cumulative += count;
            let value = histogram.minimum + bin as f64 * step;
            if lower.is_none() && cumulative > min_count {
                lower = Some(value);
            }
            if cumulative >= max_count {
                upper = Some(value);
                break;
            }
        }

        let (mut lower, mut upper) = (lower?, upper?);
        if self.is_integer_source(input, band) {
            lower = lower.floor();
            upper = upper.ceil();
        }
        Some((lower, upper))
    }
}

impl From<MemoryProvider> for Stage {
    fn from(provider: MemoryProvider) -> Self {
        Self::new(StageKind::Provider(provider))
    }
}

impl From<Nuller> for Stage {
    fn from(nuller: Nuller) -> Self {
        Self::new(StageKind::Nuller(nuller))
    }
}

impl From<SingleBandRenderer> for Stage {
    fn from(renderer: SingleBandRenderer) -> Self {
        Self::new(StageKind::Renderer(renderer))
    }
}

impl From<ResampleFilter> for Stage {
    fn from(filter: ResampleFilter) -> Self {
        Self::new(StageKind::Resample(filter))
    }
}
