//! The stage protocol and the chain view used to evaluate it
//!
//! A pipe owns its stages in order; stage `i` reads from stage `i - 1` and
//! stage 0 (the provider) has no input. Stages never hold a pointer to their
//! input. Instead every call receives the chain below the stage as an
//! `Option<Chain>`, so the graph stays acyclic and deep cloning a stage
//! never aliases another stage's state.

use std::fmt;

use strata_core::xml::Element;
use strata_core::{DataType, RasterBlock, Rectangle};

use crate::capabilities::Capabilities;
use crate::feedback::BlockFeedback;
use crate::stage::Stage;

/// Behaviour shared by all pipeline stages.
///
/// Metadata queries default to the input's answer, or a neutral value when
/// the stage has no input. Only [`data_type`](Self::data_type),
/// [`band_count`](Self::band_count) and [`block`](Self::block) must be
/// provided.
pub trait RasterInterface: Send + Sync + fmt::Debug {
    /// Persistence type tag, e.g. `"resample"`
    fn type_name(&self) -> &'static str;

    /// Deep copy
    fn clone_box(&self) -> Box<dyn RasterInterface>;

    fn capabilities(&self, _input: Option<Chain<'_>>) -> Capabilities {
        Capabilities::NONE
    }

    /// Data type of the blocks this stage returns for `band` (1-based)
    fn data_type(&self, input: Option<Chain<'_>>, band: usize) -> DataType;

    /// Data type of the original source
    fn source_data_type(&self, input: Option<Chain<'_>>, band: usize) -> DataType {
        input.map_or(DataType::Unknown, |i| i.source_data_type(band))
    }

    fn band_count(&self, input: Option<Chain<'_>>) -> usize;

    /// Native width in pixels, 0 when unknown
    fn x_size(&self, input: Option<Chain<'_>>) -> usize {
        input.map_or(0, |i| i.x_size())
    }

    /// Native height in pixels, 0 when unknown
    fn y_size(&self, input: Option<Chain<'_>>) -> usize {
        input.map_or(0, |i| i.y_size())
    }

    fn x_block_size(&self, input: Option<Chain<'_>>) -> usize {
        input.map_or(0, |i| i.x_block_size())
    }

    fn y_block_size(&self, input: Option<Chain<'_>>) -> usize {
        input.map_or(0, |i| i.y_block_size())
    }

    fn extent(&self, input: Option<Chain<'_>>) -> Rectangle {
        input.map_or_else(Rectangle::default, |i| i.extent())
    }

    /// Read `band` over `extent` resampled to `width` x `height`.
    ///
    /// Always returns a block of exactly the requested size. When data is
    /// unavailable the block is entirely no-data; when `feedback` cancels
    /// mid-read the rows not yet produced are no-data.
    fn block(
        &self,
        input: Option<Chain<'_>>,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock;

    /// Whether this stage can read from `input`
    fn accepts_input(&self, _input: Option<Chain<'_>>) -> bool {
        true
    }

    /// Write this stage's own parameters as attributes/children of `element`
    fn write_xml(&self, _element: &mut Element) {}

    /// Restore parameters written by [`write_xml`](Self::write_xml)
    fn read_xml(&mut self, _element: &Element) {}
}

impl Clone for Box<dyn RasterInterface> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Read-only view of a stage together with everything upstream of it.
///
/// The last stage of the slice is the chain's top; queries on the chain are
/// answered by that stage.
#[derive(Debug, Clone, Copy)]
pub struct Chain<'a> {
    stages: &'a [Stage],
}

impl<'a> Chain<'a> {
    /// `None` for an empty slice
    pub fn new(stages: &'a [Stage]) -> Option<Self> {
        if stages.is_empty() { None } else { Some(Self { stages }) }
    }

    /// Number of stages in the chain
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The stage answering queries on this chain
    pub fn top(&self) -> &'a Stage {
        &self.stages[self.stages.len() - 1]
    }

    /// The chain below the top stage
    pub fn input(&self) -> Option<Chain<'a>> {
        Chain::new(&self.stages[..self.stages.len() - 1])
    }

    /// Walk inputs back to the stage that has none
    pub fn source_input(&self) -> Chain<'a> {
        let mut current = *self;
        while let Some(input) = current.input() {
            current = input;
        }
        current
    }

    pub fn capabilities(&self) -> Capabilities {
        self.top().capabilities(self.input())
    }

    /// Comma separated names of the capabilities
    pub fn capabilities_string(&self) -> String {
        self.capabilities().to_string()
    }

    pub fn data_type(&self, band: usize) -> DataType {
        self.top().data_type(self.input(), band)
    }

    pub fn source_data_type(&self, band: usize) -> DataType {
        self.top().source_data_type(self.input(), band)
    }

    /// Bytes per sample of `band`
    pub fn data_type_size(&self, band: usize) -> usize {
        self.data_type(band).type_size()
    }

    pub fn band_count(&self) -> usize {
        self.top().band_count(self.input())
    }

    pub fn x_size(&self) -> usize {
        self.top().x_size(self.input())
    }

    pub fn y_size(&self) -> usize {
        self.top().y_size(self.input())
    }

    pub fn x_block_size(&self) -> usize {
        self.top().x_block_size(self.input())
    }

    pub fn y_block_size(&self) -> usize {
        self.top().y_block_size(self.input())
    }

    pub fn extent(&self) -> Rectangle {
        self.top().extent(self.input())
    }

    /// Display name of a band, zero padded to the digits of the band count
    pub fn generate_band_name(&self, band: usize) -> String {
        band_name(band, self.band_count())
    }

    pub fn block(
        &self,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock {
        self.top().block(self.input(), band, extent, width, height, feedback)
    }
}

pub(crate) fn band_name(band: usize, band_count: usize) -> String {
    let digits = band_count.max(1).ilog10() as usize + 1;
    format!("Band {band:0digits$}")
}
