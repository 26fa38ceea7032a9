//! Single band pseudo-colour renderer

use tracing::warn;

use strata_core::xml::Element;
use strata_core::{DataType, RasterBlock, Rectangle};

use crate::capabilities::Capabilities;
use crate::feedback::BlockFeedback;
use crate::interface::{Chain, RasterInterface};
use crate::stages::unavailable;

/// Cells per side read to derive an unset stretch range
const STRETCH_SAMPLE: usize = 256;

/// RGB color with 8 bits per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack with the given alpha as 0xAARRGGBB
    pub fn to_argb(self, alpha: u8) -> u32 {
        u32::from(alpha) << 24 | u32::from(self.r) << 16 | u32::from(self.g) << 8 | u32::from(self.b)
    }

    /// Parse `#rrggbb`
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// A position in [0, 1] of the stretched value range mapped to a color
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub t: f64,
    pub color: Rgb,
}

impl ColorStop {
    pub const fn new(t: f64, r: u8, g: u8, b: u8) -> Self {
        Self {
            t,
            color: Rgb::new(r, g, b),
        }
    }
}

const TERRAIN_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 34, 139, 34),
    ColorStop::new(0.25, 144, 190, 60),
    ColorStop::new(0.50, 220, 200, 80),
    ColorStop::new(0.75, 180, 120, 60),
    ColorStop::new(1.00, 255, 255, 255),
];

const BLUE_WHITE_RED_STOPS: &[ColorStop] = &[
    ColorStop::new(0.00, 33, 102, 172),
    ColorStop::new(0.50, 247, 247, 247),
    ColorStop::new(1.00, 178, 24, 43),
];

/// How stretched values are turned into colors
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ColorRamp {
    /// Black to white
    #[default]
    Grayscale,
    /// Green, yellow, brown, white
    Terrain,
    /// Diverging blue to red through white
    BlueWhiteRed,
    /// User stops sorted by position
    Stops(Vec<ColorStop>),
}

impl ColorRamp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Terrain => "terrain",
            Self::BlueWhiteRed => "blue-white-red",
            Self::Stops(_) => "stops",
        }
    }

    /// Built-in ramp by name; `"stops"` gives an empty stop list
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "grayscale" | "gray" => Some(Self::Grayscale),
            "terrain" => Some(Self::Terrain),
            "blue-white-red" => Some(Self::BlueWhiteRed),
            "stops" => Some(Self::Stops(Vec::new())),
            _ => None,
        }
    }

    /// Color at normalised position `t`, clamped to [0, 1]
    pub fn evaluate(&self, t: f64) -> Rgb {
        match self {
            Self::Grayscale => {
                let v = (t.clamp(0.0, 1.0) * 255.0).round() as u8;
                Rgb::new(v, v, v)
            }
            Self::Terrain => multi_stop(TERRAIN_STOPS, t),
            Self::BlueWhiteRed => multi_stop(BLUE_WHITE_RED_STOPS, t),
            Self::Stops(stops) => multi_stop(stops, t),
        }
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn lerp_color(c1: Rgb, c2: Rgb, t: f64) -> Rgb {
    Rgb::new(
        lerp(f64::from(c1.r), f64::from(c2.r), t).round() as u8,
        lerp(f64::from(c1.g), f64::from(c2.g), t).round() as u8,
        lerp(f64::from(c1.b), f64::from(c2.b), t).round() as u8,
    )
}

fn multi_stop(stops: &[ColorStop], t: f64) -> Rgb {
    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return Rgb::new(0, 0, 0);
    };
    if t <= first.t {
        return first.color;
    }
    if t >= last.t {
        return last.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.t {
            let span = b.t - a.t;
            let ratio = if span > 0.0 { (t - a.t) / span } else { 1.0 };
            return lerp_color(a.color, b.color, ratio);
        }
    }
    last.color
}

/// Renders one band of its input to an ARGB32 block.
///
/// Values are stretched linearly between `min` and `max`; bounds left unset
/// are taken from the valid pixels of each block. No-data pixels become
/// fully transparent.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleBandRenderer {
    band: usize,
    ramp: ColorRamp,
    min: Option<f64>,
    max: Option<f64>,
    opacity: f64,
}

impl Default for SingleBandRenderer {
    fn default() -> Self {
        Self {
            band: 1,
            ramp: ColorRamp::default(),
            min: None,
            max: None,
            opacity: 1.0,
        }
    }
}

impl SingleBandRenderer {
    pub fn new(band: usize, ramp: ColorRamp) -> Self {
        Self {
            band,
            ramp,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn band(&self) -> usize {
        self.band
    }

    pub fn set_band(&mut self, band: usize) {
        self.band = band;
    }

    pub fn ramp(&self) -> &ColorRamp {
        &self.ramp
    }

    pub fn set_ramp(&mut self, ramp: ColorRamp) {
        self.ramp = ramp;
    }

    pub fn range(&self) -> (Option<f64>, Option<f64>) {
        (self.min, self.max)
    }

    pub fn set_range(&mut self, min: Option<f64>, max: Option<f64>) {
        self.min = min;
        self.max = max;
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    /// Clamped to [0, 1]
    pub fn set_opacity(&mut self, opacity: f64) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Stretch bounds, filling unset bounds from the valid pixels of the
    /// band over the whole input extent.
    ///
    /// Inputs larger than `STRETCH_SAMPLE` cells per side are sampled, so
    /// the bounds are then estimates; every block of the band still shares
    /// them.
    fn stretch(&self, input: Chain<'_>, feedback: Option<&BlockFeedback>) -> (f64, f64) {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            return (min, max);
        }
        let (cols, rows) = match (input.x_size(), input.y_size()) {
            (0, _) | (_, 0) => (STRETCH_SAMPLE, STRETCH_SAMPLE),
            (cols, rows) => (cols.min(STRETCH_SAMPLE), rows.min(STRETCH_SAMPLE)),
        };
        let sample = input.block(self.band, &input.extent(), cols, rows, feedback);
        let (lo, hi) = (0..sample.len())
            .filter(|&i| !sample.is_no_data_at(i))
            .map(|i| sample.value_at(i))
            .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        (self.min.unwrap_or(lo), self.max.unwrap_or(hi))
    }
}

impl RasterInterface for SingleBandRenderer {
    fn type_name(&self) -> &'static str {
        "singlebandpseudocolor"
    }

    fn clone_box(&self) -> Box<dyn RasterInterface> {
        Box::new(self.clone())
    }

    fn capabilities(&self, input: Option<Chain<'_>>) -> Capabilities {
        input.map_or(Capabilities::NONE, |i| i.capabilities() & Capabilities::SIZE)
    }

    fn data_type(&self, _input: Option<Chain<'_>>, _band: usize) -> DataType {
        DataType::Argb32
    }

    fn band_count(&self, _input: Option<Chain<'_>>) -> usize {
        1
    }

    fn accepts_input(&self, input: Option<Chain<'_>>) -> bool {
        input.is_some_and(|i| {
            let dt = i.data_type(self.band);
            dt.is_numeric() && !dt.is_complex()
        })
    }

    fn block(
        &self,
        input: Option<Chain<'_>>,
        _band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock {
        let Some(input) = input else {
            warn!("renderer has no input");
            return unavailable(DataType::Argb32, width, height);
        };

        let src = input.block(self.band, extent, width, height, feedback);
        let (min, max) = self.stretch(input, feedback);
        let span = max - min;
        let alpha = (self.opacity * 255.0).round() as u8;

        let mut out = RasterBlock::new(DataType::Argb32, width, height);
        for index in 0..src.len().min(out.len()) {
            if src.is_no_data_at(index) {
                continue;
            }
            let v = src.value_at(index);
            let t = if span > 0.0 { (v - min) / span } else { 0.0 };
            out.set_color_at(index, self.ramp.evaluate(t).to_argb(alpha));
        }
        out
    }

    fn write_xml(&self, element: &mut Element) {
        element.set_attribute("band", self.band);
        element.set_attribute("ramp", self.ramp.name());
        element.set_attribute("opacity", self.opacity);
        if let Some(min) = self.min {
            element.set_attribute("min", min);
        }
        if let Some(max) = self.max {
            element.set_attribute("max", max);
        }
        if let ColorRamp::Stops(stops) = &self.ramp {
            for stop in stops {
                element.append_child(
                    Element::new("colorStop")
                        .with_attribute("t", stop.t)
                        .with_attribute("color", stop.color.to_hex()),
                );
            }
        }
    }

    fn read_xml(&mut self, element: &Element) {
        self.band = element.parse_attribute("band").unwrap_or(1);
        self.opacity = element.parse_attribute::<f64>("opacity").unwrap_or(1.0).clamp(0.0, 1.0);
        self.min = element.parse_attribute("min");
        self.max = element.parse_attribute("max");
        self.ramp = match element.attribute("ramp").and_then(ColorRamp::from_name) {
            Some(ColorRamp::Stops(_)) => ColorRamp::Stops(
                element
                    .children_named("colorStop")
                    .filter_map(|s| {
                        Some(ColorStop {
                            t: s.parse_attribute("t")?,
                            color: Rgb::from_hex(s.attribute("color")?)?,
                        })
                    })
                    .collect(),
            ),
            Some(ramp) => ramp,
            None => ColorRamp::default(),
        };
    }
}
