//! Band statistics and histograms cached by pipeline stages

use std::ops::{BitAnd, BitOr};

use strata_core::Rectangle;

/// Set of statistics to compute for a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stats(u32);

impl Stats {
    pub const NONE: Self = Self(0);
    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(1 << 1);
    pub const RANGE: Self = Self(1 << 2);
    pub const SUM: Self = Self(1 << 3);
    pub const MEAN: Self = Self(1 << 4);
    pub const STD_DEV: Self = Self(1 << 5);
    pub const SUM_OF_SQUARES: Self = Self(1 << 6);
    pub const ALL: Self = Self(0x7F);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Stats {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Stats {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Statistics of one band over an extent at a given sample size
#[derive(Debug, Clone, PartialEq)]
pub struct BandStats {
    /// 1-based band number
    pub band: usize,
    /// Statistics that were computed
    pub stats: Stats,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub mean: f64,
    pub sum: f64,
    pub sum_of_squares: f64,
    pub std_dev: f64,
    /// Number of valid (non no-data) pixels sampled
    pub element_count: u64,
    /// Sampling grid size
    pub width: usize,
    pub height: usize,
    /// Requested extent; empty means full extent
    pub extent: Rectangle,
    pub sample_size: usize,
}

impl BandStats {
    /// Empty entry for a cache key
    pub fn new(band: usize, stats: Stats, extent: Rectangle, sample_size: usize) -> Self {
        Self {
            band,
            stats,
            min: f64::MAX,
            max: f64::MIN,
            range: 0.0,
            mean: 0.0,
            sum: 0.0,
            sum_of_squares: 0.0,
            std_dev: 0.0,
            element_count: 0,
            width: 0,
            height: 0,
            extent,
            sample_size,
        }
    }

    /// Whether this entry answers a query; the cached set may hold more
    /// statistics than requested
    pub fn matches(&self, band: usize, stats: Stats, extent: &Rectangle, sample_size: usize) -> bool {
        self.band == band
            && self.stats.contains(stats)
            && self.extent == *extent
            && self.sample_size == sample_size
    }
}

/// Streaming min/max/sum and Welford variance
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    sum: f64,
    sum_of_squares: f64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            min: f64::MAX,
            max: f64::MIN,
            ..Default::default()
        }
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.sum_of_squares += value * value;
    }

    pub fn finish(self, stats: &mut BandStats) {
        stats.element_count = self.count;
        if self.count == 0 {
            return;
        }
        stats.min = self.min;
        stats.max = self.max;
        stats.range = self.max - self.min;
        stats.sum = self.sum;
        stats.sum_of_squares = self.sum_of_squares;
        stats.mean = self.mean;
        stats.std_dev = (self.m2 / self.count as f64).sqrt();
    }
}

/// Histogram of one band over an extent at a given sample size
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// 1-based band number
    pub band: usize,
    pub bin_count: usize,
    pub minimum: f64,
    pub maximum: f64,
    /// Requested extent; empty means full extent
    pub extent: Rectangle,
    /// Sampling grid size
    pub width: usize,
    pub height: usize,
    pub sample_size: usize,
    /// Values outside [minimum, maximum] are clamped into the edge bins
    pub include_out_of_range: bool,
    pub counts: Vec<u64>,
    /// Number of valid pixels sampled (including ones outside the range)
    pub non_null_count: u64,
    /// Whether counts were computed
    pub valid: bool,
}

impl Histogram {
    pub fn matches(&self, other: &Histogram) -> bool {
        self.band == other.band
            && self.bin_count == other.bin_count
            && self.minimum == other.minimum
            && self.maximum == other.maximum
            && self.extent == other.extent
            && self.sample_size == other.sample_size
            && self.include_out_of_range == other.include_out_of_range
    }

    /// Bin index of a value, or `None` when it is dropped
    pub fn bin_of(&self, value: f64) -> Option<usize> {
        if self.bin_count == 0 {
            return None;
        }
        let last = self.bin_count - 1;
        if value < self.minimum || value > self.maximum {
            if !self.include_out_of_range {
                return None;
            }
            return Some(if value < self.minimum { 0 } else { last });
        }
        let width = (self.maximum - self.minimum) / self.bin_count as f64;
        if width <= 0.0 {
            return Some(0);
        }
        let index = ((value - self.minimum) / width).floor() as usize;
        // value == maximum lands in the last bin
        Some(index.min(last))
    }

    /// Width of one bin
    pub fn bin_width(&self) -> f64 {
        if self.bin_count == 0 {
            return 0.0;
        }
        (self.maximum - self.minimum) / self.bin_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_accumulator() {
        let mut acc = StatsAccumulator::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.push(v);
        }
        let mut stats = BandStats::new(1, Stats::ALL, Rectangle::default(), 0);
        acc.finish(&mut stats);
        assert_eq!(stats.element_count, 8);
        assert_relative_eq!(stats.mean, 5.0);
        assert_relative_eq!(stats.std_dev, 2.0);
        assert_relative_eq!(stats.range, 7.0);
        assert_relative_eq!(stats.sum, 40.0);
        assert_relative_eq!(stats.sum_of_squares, 232.0);
    }

    #[test]
    fn test_stats_superset_match() {
        let stats = BandStats::new(2, Stats::MIN | Stats::MAX | Stats::MEAN, Rectangle::default(), 0);
        assert!(stats.matches(2, Stats::MIN, &Rectangle::default(), 0));
        assert!(!stats.matches(2, Stats::STD_DEV, &Rectangle::default(), 0));
        assert!(!stats.matches(1, Stats::MIN, &Rectangle::default(), 0));
        assert!(!stats.matches(2, Stats::MIN, &Rectangle::new(0.0, 0.0, 1.0, 1.0), 0));
    }

    #[test]
    fn test_bins() {
        let mut h = Histogram {
            band: 1,
            bin_count: 4,
            minimum: 0.0,
            maximum: 8.0,
            extent: Rectangle::default(),
            width: 0,
            height: 0,
            sample_size: 0,
            include_out_of_range: false,
            counts: vec![0; 4],
            non_null_count: 0,
            valid: false,
        };
        assert_eq!(h.bin_of(0.0), Some(0));
        assert_eq!(h.bin_of(2.5), Some(1));
        assert_eq!(h.bin_of(8.0), Some(3));
        assert_eq!(h.bin_of(9.0), None);

        h.include_out_of_range = true;
        assert_eq!(h.bin_of(-1.0), Some(0));
        assert_eq!(h.bin_of(9.0), Some(3));
    }
}
