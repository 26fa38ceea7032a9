//! User defined no-data ranges

use tracing::warn;

use strata_core::xml::Element;
use strata_core::{DataType, RasterBlock, Rectangle};

use crate::capabilities::Capabilities;
use crate::feedback::BlockFeedback;
use crate::interface::{Chain, RasterInterface};
use crate::stages::unavailable;

/// Closed interval of values treated as no-data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoDataRange {
    pub min: f64,
    pub max: f64,
}

impl NoDataRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Range holding a single value
    pub fn single(value: f64) -> Self {
        Self::new(value, value)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Marks pixels whose value falls in a per-band list of ranges as no-data.
///
/// An output no-data value can be set per band; otherwise the input block's
/// own no-data representation is reused.
#[derive(Debug, Clone, Default)]
pub struct Nuller {
    /// Index 0 holds band 1
    ranges: Vec<Vec<NoDataRange>>,
    output_no_data: Vec<Option<f64>>,
}

impl Nuller {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot<T: Clone + Default>(list: &mut Vec<T>, band: usize) -> Option<&mut T> {
        let index = band.checked_sub(1)?;
        if list.len() <= index {
            list.resize(index + 1, T::default());
        }
        list.get_mut(index)
    }

    /// Replace the ranges of a band (1-based)
    pub fn set_no_data(&mut self, band: usize, ranges: Vec<NoDataRange>) {
        if let Some(slot) = Self::slot(&mut self.ranges, band) {
            *slot = ranges;
        }
    }

    pub fn no_data(&self, band: usize) -> &[NoDataRange] {
        band.checked_sub(1)
            .and_then(|i| self.ranges.get(i))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn set_output_no_data_value(&mut self, band: usize, value: Option<f64>) {
        if let Some(slot) = Self::slot(&mut self.output_no_data, band) {
            *slot = value;
        }
    }

    pub fn output_no_data_value(&self, band: usize) -> Option<f64> {
        band.checked_sub(1)
            .and_then(|i| self.output_no_data.get(i).copied())
            .flatten()
    }

    fn in_ranges(ranges: &[NoDataRange], value: f64) -> bool {
        ranges.iter().any(|r| r.contains(value))
    }
}

impl RasterInterface for Nuller {
    fn type_name(&self) -> &'static str {
        "nuller"
    }

    fn clone_box(&self) -> Box<dyn RasterInterface> {
        Box::new(self.clone())
    }

    fn capabilities(&self, input: Option<Chain<'_>>) -> Capabilities {
        input.map_or(Capabilities::NONE, |i| i.capabilities())
    }

    fn data_type(&self, input: Option<Chain<'_>>, band: usize) -> DataType {
        input.map_or(DataType::Unknown, |i| i.data_type(band))
    }

    fn band_count(&self, input: Option<Chain<'_>>) -> usize {
        input.map_or(0, |i| i.band_count())
    }

    fn accepts_input(&self, input: Option<Chain<'_>>) -> bool {
        input.is_some_and(|i| {
            i.band_count() > 0 && (1..=i.band_count()).all(|b| i.data_type(b).is_numeric())
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
            warn!("nuller has no input");
            return unavailable(DataType::Unknown, width, height);
        };

        let mut block = input.block(band, extent, width, height, feedback);
        let ranges = self.no_data(band);

        match self.output_no_data_value(band) {
            Some(nd) => {
                let mut out =
                    RasterBlock::new(block.data_type(), width, height).with_no_data_value(Some(nd));
                for index in 0..block.len() {
                    let v = block.value_at(index);
                    if block.is_no_data_at(index) || Self::in_ranges(ranges, v) {
                        out.set_is_no_data_at(index);
                    } else {
                        out.set_value_at(index, v);
                    }
                }
                out
            }
            None => {
                if !ranges.is_empty() {
                    for index in 0..block.len() {
                        if !block.is_no_data_at(index) && Self::in_ranges(ranges, block.value_at(index)) {
                            block.set_is_no_data_at(index);
                        }
                    }
                }
                block
            }
        }
    }

    fn write_xml(&self, element: &mut Element) {
        let bands = self.ranges.len().max(self.output_no_data.len());
        for band in 1..=bands {
            let ranges = self.no_data(band);
            let output = self.output_no_data_value(band);
            if ranges.is_empty() && output.is_none() {
                continue;
            }
            let child = element.append_child(Element::new("noDataList").with_attribute("bandNo", band));
            if let Some(nd) = output {
                child.set_attribute("outputNoData", nd);
            }
            for range in ranges {
                child.append_child(
                    Element::new("noDataRange")
                        .with_attribute("min", range.min)
                        .with_attribute("max", range.max),
                );
            }
        }
    }

    fn read_xml(&mut self, element: &Element) {
        self.ranges.clear();
        self.output_no_data.clear();
        for list in element.children_named("noDataList") {
            let Some(band) = list.parse_attribute::<usize>("bandNo") else {
                warn!("noDataList without bandNo");
                continue;
            };
            let ranges = list
                .children_named("noDataRange")
                .filter_map(|r| Some(NoDataRange::new(r.parse_attribute("min")?, r.parse_attribute("max")?)))
                .collect();
            self.set_no_data(band, ranges);
            self.set_output_no_data_value(band, list.parse_attribute("outputNoData"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        let mut nuller = Nuller::new();
        nuller.set_no_data(2, vec![NoDataRange::new(0.0, 1.0), NoDataRange::single(9.0)]);
        assert!(nuller.no_data(1).is_empty());
        assert_eq!(nuller.no_data(2).len(), 2);
        assert!(nuller.no_data(0).is_empty());
        assert!(Nuller::in_ranges(nuller.no_data(2), 9.0));
        assert!(!Nuller::in_ranges(nuller.no_data(2), 1.5));
    }

    #[test]
    fn test_xml_roundtrip() {
        let mut nuller = Nuller::new();
        nuller.set_no_data(1, vec![NoDataRange::new(-5.0, 0.0)]);
        nuller.set_output_no_data_value(3, Some(-1.0));

        let mut element = Element::new("rasterstage");
        nuller.write_xml(&mut element);
        let mut restored = Nuller::new();
        restored.read_xml(&element);

        assert_eq!(restored.no_data(1), &[NoDataRange::new(-5.0, 0.0)]);
        assert_eq!(restored.output_no_data_value(3), Some(-1.0));
        assert_eq!(restored.output_no_data_value(1), None);
    }
}
