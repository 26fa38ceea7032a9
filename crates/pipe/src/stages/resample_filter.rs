//! Resolution-aware resampling stage

use ndarray::Array2;
use tracing::{debug, warn};

use strata_core::xml::Element;
use strata_core::{DataType, RasterBlock, Rectangle};

use crate::capabilities::Capabilities;
use crate::feedback::{self, BlockFeedback};
use crate::interface::{Chain, RasterInterface};
use crate::resampler::{Resampler, resampler_from_kind};
use crate::stages::unavailable;

/// Upper bound on how much finer than requested data is fetched when zooming out
pub const DEFAULT_MAX_OVERSAMPLING: f64 = 2.0;

/// Resamples its input when the requested resolution differs from the
/// source resolution.
///
/// Zoomed in (output finer than the source) the input is read at source
/// resolution and upsampled with the zoomed-in resampler. Zoomed out the
/// input is read oversampled by at most `max_oversampling` and downsampled
/// with the zoomed-out resampler. Requests are forwarded untouched when no
/// resampler applies, when the source size is unknown, or in preview mode.
#[derive(Debug, Clone)]
pub struct ResampleFilter {
    zoomed_in: Option<Box<dyn Resampler>>,
    zoomed_out: Option<Box<dyn Resampler>>,
    max_oversampling: f64,
}

impl Default for ResampleFilter {
    fn default() -> Self {
        Self {
            zoomed_in: None,
            zoomed_out: None,
            max_oversampling: DEFAULT_MAX_OVERSAMPLING,
        }
    }
}

impl ResampleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zoomed_in_resampler(mut self, resampler: Box<dyn Resampler>) -> Self {
        self.zoomed_in = Some(resampler);
        self
    }

    pub fn with_zoomed_out_resampler(mut self, resampler: Box<dyn Resampler>) -> Self {
        self.zoomed_out = Some(resampler);
        self
    }

    pub fn zoomed_in_resampler(&self) -> Option<&dyn Resampler> {
        self.zoomed_in.as_deref()
    }

    pub fn set_zoomed_in_resampler(&mut self, resampler: Option<Box<dyn Resampler>>) {
        self.zoomed_in = resampler;
    }

    pub fn zoomed_out_resampler(&self) -> Option<&dyn Resampler> {
        self.zoomed_out.as_deref()
    }

    pub fn set_zoomed_out_resampler(&mut self, resampler: Option<Box<dyn Resampler>>) {
        self.zoomed_out = resampler;
    }

    pub fn max_oversampling(&self) -> f64 {
        self.max_oversampling
    }

    /// Values below 1 are raised to 1
    pub fn set_max_oversampling(&mut self, max_oversampling: f64) {
        self.max_oversampling = max_oversampling.max(1.0);
    }

    /// Ratio of requested pixel size to source pixel size, if the source size is known
    fn pixel_ratio(input: Chain<'_>, extent: &Rectangle, width: usize) -> Option<f64> {
        let source = input.source_input();
        if !source.capabilities().contains(Capabilities::SIZE) || source.x_size() == 0 || width == 0 {
            return None;
        }
        let source_res = source.extent().width() / source.x_size() as f64;
        let requested_res = extent.width() / width as f64;
        (source_res > 0.0).then(|| requested_res / source_res)
    }
}

/// Resample one colour block channel by channel
fn resample_argb(src: &RasterBlock, resampler: &dyn Resampler, width: usize, height: usize) -> RasterBlock {
    let (sw, sh) = (src.width(), src.height());
    let mut channels: Vec<Array2<f64>> = (0..4).map(|_| Array2::zeros((sh, sw))).collect();
    for row in 0..sh {
        for col in 0..sw {
            let argb = if src.is_no_data_at(row * sw + col) {
                0
            } else {
                src.color(row, col).unwrap_or(0)
            };
            for (k, channel) in channels.iter_mut().enumerate() {
                channel[(row, col)] = f64::from((argb >> (24 - 8 * k)) & 0xFF);
            }
        }
    }

    let resampled: Vec<Array2<f64>> = channels
        .iter()
        .map(|c| {
            let mut dst = Array2::zeros((height, width));
            resampler.resample(c.view(), &mut dst);
            dst
        })
        .collect();

    let mut out = RasterBlock::new(src.data_type(), width, height);
    for row in 0..height {
        for col in 0..width {
            let argb = resampled.iter().fold(0u32, |acc, c| {
                let v = c[(row, col)];
                let byte = if v.is_nan() { 0 } else { v.round().clamp(0.0, 255.0) as u32 };
                (acc << 8) | byte
            });
            out.set_color_at(row * width + col, argb);
        }
    }
    out
}

impl RasterInterface for ResampleFilter {
    fn type_name(&self) -> &'static str {
        "resample"
    }

    fn clone_box(&self) -> Box<dyn RasterInterface> {
        Box::new(self.clone())
    }

    fn capabilities(&self, input: Option<Chain<'_>>) -> Capabilities {
        input.map_or(Capabilities::NONE, |i| i.capabilities() & Capabilities::SIZE)
    }

    fn data_type(&self, input: Option<Chain<'_>>, band: usize) -> DataType {
        input.map_or(DataType::Unknown, |i| i.data_type(band))
    }

    fn band_count(&self, input: Option<Chain<'_>>) -> usize {
        input.map_or(0, |i| i.band_count())
    }

    fn accepts_input(&self, input: Option<Chain<'_>>) -> bool {
        input.is_some_and(|i| {
            let dt = i.data_type(1);
            dt.is_color() || (dt.is_numeric() && !dt.is_complex())
        })
    }

    fn block(
        &self,
        input: Option<Chain<'_>>,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock {
        let Some(input) = input else {
            warn!("resample filter has no input");
            return unavailable(DataType::Unknown, width, height);
        };

        if feedback::preview_only(feedback) || (self.zoomed_in.is_none() && self.zoomed_out.is_none()) {
            return input.block(band, extent, width, height, feedback);
        }

        let Some(ratio) = Self::pixel_ratio(input, extent, width) else {
            return input.block(band, extent, width, height, feedback);
        };

        let oversampling = ratio.min(self.max_oversampling);
        let resampler = match oversampling {
            o if o < 1.0 => self.zoomed_in.as_deref(),
            o if o > 1.0 => self.zoomed_out.as_deref(),
            _ => None,
        };
        let Some(resampler) = resampler else {
            return input.block(band, extent, width, height, feedback);
        };

        let src_width = ((width as f64 * oversampling).round() as usize).max(1);
        let src_height = ((height as f64 * oversampling).round() as usize).max(1);
        debug!(
            resampler = resampler.kind(),
            oversampling,
            src_width,
            src_height,
            width,
            height,
            "resampling block"
        );

        let src = input.block(band, extent, src_width, src_height, feedback);
        if feedback::cancelled(feedback) {
            return unavailable(src.data_type(), width, height);
        }

        if src.data_type().is_color() {
            return resample_argb(&src, resampler, width, height);
        }

        let mut dst = Array2::from_elem((height, width), f64::NAN);
        resampler.resample(src.to_array().view(), &mut dst);
        RasterBlock::from_array(src.data_type(), &dst, src.no_data_value())
    }

    fn write_xml(&self, element: &mut Element) {
        element.set_attribute("maxOversampling", self.max_oversampling);
        if let Some(r) = &self.zoomed_in {
            element.set_attribute("zoomedInResampler", r.kind());
        }
        if let Some(r) = &self.zoomed_out {
            element.set_attribute("zoomedOutResampler", r.kind());
        }
    }

    fn read_xml(&mut self, element: &Element) {
        self.max_oversampling = element
            .parse_attribute("maxOversampling")
            .unwrap_or(DEFAULT_MAX_OVERSAMPLING);
        self.zoomed_in = element.attribute("zoomedInResampler").and_then(resampler_from_kind);
        self.zoomed_out = element.attribute("zoomedOutResampler").and_then(resampler_from_kind);
    }
}
