//! Ordered ownership of a raster chain

use tracing::{debug, warn};

use strata_core::xml::Element;
use strata_core::{DataType, Error, RasterBlock, Rectangle, Result};

use crate::feedback::BlockFeedback;
use crate::interface::Chain;
use crate::stage::{Stage, StageKind, StageRole};
use crate::stages::{MemoryProvider, Nuller, ResampleFilter, SingleBandRenderer, unavailable};

/// A raster chain from provider (index 0) to the stage consumers read from.
///
/// Every edit checks that the edited stage accepts its new input and that
/// the stage downstream accepts the edited one. A rejected edit returns
/// `false` and leaves the pipe as it was.
#[derive(Debug, Clone, Default)]
pub struct RasterPipe {
    stages: Vec<Stage>,
}

impl RasterPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipe holding only a provider
    pub fn with_provider(provider: MemoryProvider) -> Self {
        Self {
            stages: vec![provider.into()],
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Mutable access to one stage. Only that stage's caches follow edits
    /// made through it; the editing methods of the pipe also reset the
    /// stages downstream.
    pub fn stage_mut(&mut self, index: usize) -> Option<&mut Stage> {
        self.stages.get_mut(index)
    }

    /// Index of the first stage with `role`
    pub fn index_of(&self, role: StageRole) -> Option<usize> {
        self.stages.iter().position(|s| s.role() == role)
    }

    /// The whole chain; `None` for an empty pipe
    pub fn chain(&self) -> Option<Chain<'_>> {
        Chain::new(&self.stages)
    }

    /// The chain ending at stage `index`
    pub fn chain_at(&self, index: usize) -> Option<Chain<'_>> {
        if index >= self.stages.len() {
            return None;
        }
        Chain::new(&self.stages[..=index])
    }

    /// Stage `index` mutably, together with its input chain
    pub fn split_at_stage(&mut self, index: usize) -> Option<(&mut Stage, Option<Chain<'_>>)> {
        if index >= self.stages.len() {
            return None;
        }
        let (upstream, rest) = self.stages.split_at_mut(index);
        Some((&mut rest[0], Chain::new(upstream)))
    }

    /// Whether stage `index` and the stage after it accept their inputs
    fn links_valid(&self, index: usize) -> bool {
        let stage_ok = self.stages[index].accepts_input(Chain::new(&self.stages[..index]));
        let downstream_ok = self
            .stages
            .get(index + 1)
            .is_none_or(|next| next.accepts_input(Chain::new(&self.stages[..=index])));
        stage_ok && downstream_ok
    }

    /// Insert a stage so that it ends up at `index`
    pub fn insert(&mut self, index: usize, stage: Stage) -> bool {
        if index > self.stages.len() {
            return false;
        }
        self.stages.insert(index, stage);
        if !self.links_valid(index) {
            debug!(index, "stage rejected by pipe");
            self.stages.remove(index);
            return false;
        }
        self.invalidate_from(index);
        true
    }

    /// Replace stage `index`
    pub fn replace(&mut self, index: usize, stage: Stage) -> bool {
        if index >= self.stages.len() {
            return false;
        }
        let previous = std::mem::replace(&mut self.stages[index], stage);
        if !self.links_valid(index) {
            debug!(index, "replacement rejected by pipe");
            self.stages[index] = previous;
            return false;
        }
        self.invalidate_from(index);
        true
    }

    /// Remove stage `index` if the remaining chain stays valid
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.stages.len() {
            return false;
        }
        let removed = self.stages.remove(index);
        let valid = self
            .stages
            .get(index)
            .is_none_or(|next| next.accepts_input(Chain::new(&self.stages[..index])));
        if !valid {
            self.stages.insert(index, removed);
            return false;
        }
        self.invalidate_from(index);
        true
    }

    /// Put a stage at the position of its role.
    ///
    /// An existing stage with the same role is replaced; otherwise the stage
    /// is inserted after every stage whose role comes first. Custom stages
    /// are always appended.
    pub fn set(&mut self, stage: Stage) -> bool {
        let role = stage.role();
        if role != StageRole::Custom
            && let Some(index) = self.index_of(role)
        {
            return self.replace(index, stage);
        }
        let index = match role {
            StageRole::Custom => self.stages.len(),
            _ => self
                .stages
                .iter()
                .rposition(|s| s.role() < role)
                .map_or(0, |i| i + 1),
        };
        self.insert(index, stage)
    }

    /// Remove the first stage with `role`
    pub fn remove_role(&mut self, role: StageRole) -> bool {
        self.index_of(role).is_some_and(|index| self.remove(index))
    }

    pub fn provider(&self) -> Option<&MemoryProvider> {
        self.stages.first().and_then(Stage::as_provider)
    }

    /// The resample filter; its caches and those downstream are dropped
    pub fn resample_filter_mut(&mut self) -> Option<&mut ResampleFilter> {
        let index = self.index_of(StageRole::Resampler)?;
        self.invalidate_from(index);
        self.stages[index].as_resample_filter_mut()
    }

    /// Switch stage `index` on or off
    pub fn set_on(&mut self, index: usize, on: bool) -> bool {
        match self.stages.get_mut(index) {
            Some(stage) => {
                if stage.is_on() != on {
                    stage.set_on(on);
                    self.invalidate_from(index);
                }
                true
            }
            None => false,
        }
    }

    /// Drop the statistics and histograms of stage `index` and every stage
    /// reading from it
    fn invalidate_from(&mut self, index: usize) {
        for stage in self.stages.iter_mut().skip(index) {
            stage.clear_caches();
        }
    }

    /// Read a block from the end of the chain
    pub fn block(
        &self,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock {
        match self.chain() {
            Some(chain) => chain.block(band, extent, width, height, feedback),
            None => {
                warn!("block requested from an empty pipe");
                unavailable(DataType::Unknown, width, height)
            }
        }
    }

    /// Append a `<pipe>` element describing every stage in chain order
    pub fn write_xml(&self, parent: &mut Element) {
        let pipe = parent.append_child(Element::new("pipe"));
        for stage in &self.stages {
            let element = pipe.append_child(
                Element::new("rasterstage")
                    .with_attribute("type", stage.type_name())
                    .with_attribute("on", u8::from(stage.is_on())),
            );
            stage.interface().write_xml(element);
        }
    }

    /// Rebuild the filters from a `<pipe>` element (or its parent), keeping
    /// the current provider.
    ///
    /// Stages of unknown type and stages the chain rejects are skipped.
    pub fn read_xml(&mut self, element: &Element) -> Result<()> {
        let pipe = if element.name() == "pipe" {
            element
        } else {
            element
                .child("pipe")
                .ok_or_else(|| Error::Xml("missing <pipe> element".into()))?
        };

        let has_provider = self
            .stages
            .first()
            .is_some_and(|s| s.role() == StageRole::Provider);
        self.stages.truncate(usize::from(has_provider));

        for stage_element in pipe.children_named("rasterstage") {
            let type_name = stage_element.required_attribute("type")?;
            let on = stage_element.bool_attribute("on").unwrap_or(true);

            let kind = match type_name {
                "provider" => {
                    match self.stages.first_mut() {
                        Some(first) if first.role() == StageRole::Provider => first.set_on(on),
                        _ => warn!("pipe has no provider to restore"),
                    }
                    continue;
                }
                "nuller" => StageKind::Nuller(Nuller::new()),
                "resample" => StageKind::Resample(ResampleFilter::new()),
                "singlebandpseudocolor" => StageKind::Renderer(SingleBandRenderer::default()),
                other => {
                    warn!(stage = other, "unknown raster stage type skipped");
                    continue;
                }
            };

            let mut stage = Stage::new(kind);
            stage.interface_mut().read_xml(stage_element);
            stage.set_on(on);
            if !self.insert(self.stages.len(), stage) {
                warn!(stage = type_name, "restored stage rejected by chain");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn provider() -> MemoryProvider {
        MemoryProvider::new(
            Rectangle::new(0.0, 0.0, 10.0, 10.0),
            DataType::Float32,
            vec![Array2::from_elem((10, 10), 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_set_orders_by_role() {
        let mut pipe = RasterPipe::with_provider(provider());
        assert!(pipe.set(ResampleFilter::new().into()));
        assert!(pipe.set(SingleBandRenderer::default().into()));
        assert!(pipe.set(Nuller::new().into()));

        let roles: Vec<_> = pipe.stages().iter().map(Stage::role).collect();
        assert_eq!(
            roles,
            vec![
                StageRole::Provider,
                StageRole::Nuller,
                StageRole::Renderer,
                StageRole::Resampler
            ]
        );

        // Same role replaces
        assert!(pipe.set(Nuller::new().into()));
        assert_eq!(pipe.len(), 4);
    }

    #[test]
    fn test_rejected_edit_leaves_pipe_unchanged() {
        let mut pipe = RasterPipe::new();
        // A filter cannot be the first stage
        assert!(!pipe.insert(0, Nuller::new().into()));
        assert!(pipe.is_empty());

        assert!(pipe.insert(0, provider().into()));
        // A second provider cannot take an input
        assert!(!pipe.insert(1, provider().into()));
        assert!(pipe.set(SingleBandRenderer::default().into()));
        // A nuller cannot read ARGB output
        assert!(!pipe.insert(2, Nuller::new().into()));
        assert_eq!(pipe.len(), 2);
        // Removing the provider would leave the renderer without input
        assert!(!pipe.remove(0));
        assert_eq!(pipe.len(), 2);
    }

    #[test]
    fn test_empty_pipe_block() {
        let pipe = RasterPipe::new();
        let block = pipe.block(1, &Rectangle::new(0.0, 0.0, 1.0, 1.0), 4, 2, None);
        assert_eq!((block.width(), block.height()), (4, 2));
        assert!(!block.is_valid());
    }

    #[test]
    fn test_read_xml_requires_pipe() {
        let mut pipe = RasterPipe::with_provider(provider());
        assert!(pipe.read_xml(&Element::new("layer")).is_err());
        assert_eq!(pipe.len(), 1);
    }
}
