//! End-to-end behaviour of raster pipes

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use ndarray::Array2;
use strata_core::xml::Element;
use strata_core::{DataType, RasterBlock, Rectangle};
use strata_pipe::prelude::*;

fn full_extent(size: usize) -> Rectangle {
    Rectangle::new(0.0, 0.0, size as f64, size as f64)
}

fn two_band_provider(size: usize) -> MemoryProvider {
    let ramp = Array2::from_shape_fn((size, size), |(r, c)| (r * size + c) as f64);
    let flat = Array2::from_elem((size, size), 7.0);
    MemoryProvider::new(full_extent(size), DataType::Float32, vec![ramp, flat]).unwrap()
}

fn bilinear_filter() -> ResampleFilter {
    ResampleFilter::new()
        .with_zoomed_in_resampler(Box::new(BilinearResampler))
        .with_zoomed_out_resampler(Box::new(BilinearResampler))
}

/// Pass-through stage counting how often it is asked for data
#[derive(Debug, Clone)]
struct CountingStage {
    reads: Arc<AtomicUsize>,
}

impl RasterInterface for CountingStage {
    fn type_name(&self) -> &'static str {
        "counting"
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

    fn block(
        &self,
        input: Option<Chain<'_>>,
        band: usize,
        extent: &Rectangle,
        width: usize,
        height: usize,
        feedback: Option<&BlockFeedback>,
    ) -> RasterBlock {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match input {
            Some(input) => input.block(band, extent, width, height, feedback),
            None => RasterBlock::new_no_data(DataType::Unknown, width, height),
        }
    }
}

#[test]
fn upsample_two_band_float32_with_bilinear() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(256));
    assert!(pipe.set(bilinear_filter().into()));

    let block = pipe.block(2, &full_extent(256), 512, 512, None);
    assert_eq!(block.data_type(), DataType::Float32);
    assert_eq!((block.width(), block.height()), (512, 512));
    assert_eq!(block.bytes().len(), 512 * 512 * 4);
    assert_eq!(block.no_data_count(), 0);
    assert_relative_eq!(block.value(100, 300).unwrap(), 7.0, epsilon = 1e-5);

    let ramp = pipe.block(1, &full_extent(256), 512, 512, None);
    assert_eq!(ramp.no_data_count(), 0);
    // Samples the source at (x 0.75, y 0.25) between values 0, 1, 256 and 257
    assert_relative_eq!(ramp.value(1, 2).unwrap(), 64.75, epsilon = 1e-5);
}

#[test]
fn downsample_oversampling_is_bounded() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(64));
    assert!(pipe.set(bilinear_filter().into()));

    let block = pipe.block(2, &full_extent(64), 8, 8, None);
    assert_eq!((block.width(), block.height()), (8, 8));
    for index in 0..block.len() {
        assert_relative_eq!(block.value_at(index), 7.0, epsilon = 1e-5);
    }
}

#[test]
fn source_input_terminates_at_provider() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(16));
    assert!(pipe.set(Nuller::new().into()));
    assert!(pipe.set(bilinear_filter().into()));

    let chain = pipe.chain().unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain.input().unwrap().len(), 2);

    let source = chain.source_input();
    assert_eq!(source.len(), 1);
    assert_eq!(source.top().role(), StageRole::Provider);
    assert!(source.input().is_none());

    assert_eq!(chain.capabilities(), Capabilities::SIZE);
    assert_eq!(
        source.capabilities_string(),
        "Size, Identify, IdentifyValue"
    );
    assert_eq!(chain.x_size(), 16);
    assert_eq!(chain.extent(), full_extent(16));
    assert_eq!(chain.data_type_size(1), 4);
    assert_eq!(chain.generate_band_name(2), "Band 2");
}

#[test]
fn switched_off_stage_is_transparent() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(8));
    let mut nuller = Nuller::new();
    nuller.set_no_data(1, vec![NoDataRange::new(0.0, 1000.0)]);
    assert!(pipe.set(nuller.into()));

    let extent = full_extent(8);
    let masked = pipe.block(1, &extent, 8, 8, None);
    assert_eq!(masked.no_data_count(), 64);

    assert!(pipe.set_on(1, false));
    let passed = pipe.block(1, &extent, 8, 8, None);
    let direct = pipe.chain_at(0).unwrap().block(1, &extent, 8, 8, None);
    assert_eq!(passed, direct);
    assert_eq!(passed.no_data_count(), 0);
}

#[test]
fn statistics_are_cached_per_key() {
    let reads = Arc::new(AtomicUsize::new(0));
    let mut pipe = RasterPipe::with_provider(two_band_provider(32));
    assert!(pipe.insert(
        1,
        Stage::custom(Box::new(CountingStage {
            reads: Arc::clone(&reads)
        }))
    ));

    let (stage, input) = pipe.split_at_stage(1).unwrap();
    let everything = Rectangle::default();

    assert!(!stage.has_statistics(1, Stats::ALL, &everything, 0));
    let stats = stage.band_statistics(input, 1, Stats::ALL, &everything, 0);
    let after_first = reads.load(Ordering::SeqCst);
    assert!(after_first > 0);
    assert_eq!(stats.element_count, 32 * 32);
    assert_relative_eq!(stats.min, 0.0);
    assert_relative_eq!(stats.max, 1023.0);
    assert_relative_eq!(stats.mean, 511.5);

    // Same key, and a subset of the cached statistics
    stage.band_statistics(input, 1, Stats::ALL, &everything, 0);
    stage.band_statistics(input, 1, Stats::MIN | Stats::MEAN, &everything, 0);
    assert_eq!(reads.load(Ordering::SeqCst), after_first);
    assert!(stage.has_statistics(1, Stats::MEAN, &everything, 0));

    // A different extent is a different key
    let half = Rectangle::new(0.0, 0.0, 16.0, 32.0);
    let stats = stage.band_statistics(input, 1, Stats::ALL, &half, 0);
    assert!(reads.load(Ordering::SeqCst) > after_first);
    assert_eq!(stats.element_count, 16 * 32);
    assert_relative_eq!(stats.max, 1007.0);
}

#[test]
fn histograms_are_cached_per_key() {
    let reads = Arc::new(AtomicUsize::new(0));
    let mut pipe = RasterPipe::with_provider(two_band_provider(32));
    assert!(pipe.set(Stage::custom(Box::new(CountingStage {
        reads: Arc::clone(&reads)
    }))));

    let (stage, input) = pipe.split_at_stage(1).unwrap();
    let everything = Rectangle::default();

    let histogram = stage.histogram(input, 1, 16, Some(0.0), Some(1024.0), &everything, 0, false);
    assert!(histogram.valid);
    assert_eq!(histogram.counts.len(), 16);
    assert_eq!(histogram.counts.iter().sum::<u64>(), 1024);
    assert!(histogram.counts.iter().all(|&c| c == 64));

    let after_first = reads.load(Ordering::SeqCst);
    assert!(stage.has_histogram(input, 1, 16, Some(0.0), Some(1024.0), &everything, 0, false));
    let again = stage.histogram(input, 1, 16, Some(0.0), Some(1024.0), &everything, 0, false);
    assert_eq!(again, histogram);
    assert_eq!(reads.load(Ordering::SeqCst), after_first);

    // Out-of-range values are dropped unless asked for
    let narrow = stage.histogram(input, 1, 4, Some(0.0), Some(99.0), &everything, 0, false);
    assert_eq!(narrow.counts.iter().sum::<u64>(), 100);
    assert_eq!(narrow.non_null_count, 1024);
    let clamped = stage.histogram(input, 1, 4, Some(0.0), Some(99.0), &everything, 0, true);
    assert_eq!(clamped.counts.iter().sum::<u64>(), 1024);
    assert!(reads.load(Ordering::SeqCst) > after_first);
}

#[test]
fn default_histogram_bins_follow_source_type() {
    let values = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f64);
    let provider = MemoryProvider::new(full_extent(10), DataType::Byte, vec![values.clone()]).unwrap();
    let mut pipe = RasterPipe::with_provider(provider);
    let (stage, input) = pipe.split_at_stage(0).unwrap();

    let histogram = stage.histogram(input, 1, 0, None, None, &Rectangle::default(), 0, false);
    assert_eq!(histogram.bin_count, 100);
    assert_relative_eq!(histogram.minimum, 0.0);
    assert_relative_eq!(histogram.maximum, 99.0);

    let floats = MemoryProvider::new(full_extent(10), DataType::Float64, vec![values]).unwrap();
    let mut pipe = RasterPipe::with_provider(floats);
    let (stage, input) = pipe.split_at_stage(0).unwrap();
    let histogram = stage.histogram(input, 1, 0, None, None, &Rectangle::default(), 0, false);
    assert_eq!(histogram.bin_count, 1000);
}

#[test]
fn cumulative_cut_on_byte_band() {
    let values = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f64);
    let provider = MemoryProvider::new(full_extent(10), DataType::Byte, vec![values]).unwrap();
    let mut pipe = RasterPipe::with_provider(provider);
    let (stage, input) = pipe.split_at_stage(0).unwrap();

    let (lower, upper) = stage
        .cumulative_cut(input, 1, 0.02, 0.98, &Rectangle::default(), 0)
        .unwrap();
    assert_relative_eq!(lower, 1.0);
    assert_relative_eq!(upper, 97.0);
}

#[test]
fn sample_size_limits_the_sampling_grid() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(100));
    let (stage, input) = pipe.split_at_stage(0).unwrap();

    let sampled = stage.band_statistics(input, 2, Stats::ALL, &Rectangle::default(), 400);
    assert_eq!((sampled.width, sampled.height), (20, 20));
    assert_eq!(sampled.element_count, 400);

    // Never finer than the native resolution
    let capped = stage.band_statistics(input, 2, Stats::ALL, &Rectangle::default(), 1_000_000);
    assert_eq!((capped.width, capped.height), (100, 100));
}

#[test]
fn clones_do_not_share_state() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(16));
    assert!(pipe.set(bilinear_filter().into()));
    {
        let (stage, input) = pipe.split_at_stage(1).unwrap();
        stage.band_statistics(input, 1, Stats::ALL, &Rectangle::default(), 0);
    }

    let mut copy = pipe.clone();
    copy.resample_filter_mut().unwrap().set_max_oversampling(8.0);
    copy.stage_mut(1).unwrap().clear_caches();
    copy.set_on(1, false);

    let original = pipe.stage(1).unwrap();
    assert!(original.is_on());
    assert!(original.has_statistics(1, Stats::ALL, &Rectangle::default(), 0));
    match original.kind() {
        StageKind::Resample(filter) => assert_eq!(filter.max_oversampling(), 2.0),
        other => panic!("unexpected stage {other:?}"),
    }
}

#[test]
fn pipe_xml_roundtrip_keeps_provider() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(8));
    let mut nuller = Nuller::new();
    nuller.set_no_data(1, vec![NoDataRange::single(3.0)]);
    assert!(pipe.set(nuller.into()));
    assert!(pipe.set(SingleBandRenderer::new(1, ColorRamp::Terrain).with_range(0.0, 63.0).into()));
    assert!(pipe.set(bilinear_filter().into()));
    pipe.set_on(3, false);

    let mut root = Element::new("rasterlayer");
    pipe.write_xml(&mut root);
    let parsed = Element::parse(&root.to_xml_string()).unwrap();

    let mut restored = RasterPipe::with_provider(two_band_provider(8));
    restored.read_xml(&parsed).unwrap();

    let types: Vec<_> = restored.stages().iter().map(Stage::type_name).collect();
    assert_eq!(types, vec!["provider", "nuller", "singlebandpseudocolor", "resample"]);
    assert!(!restored.stage(3).unwrap().is_on());

    let extent = full_extent(8);
    assert_eq!(
        restored.block(1, &extent, 8, 8, None),
        pipe.block(1, &extent, 8, 8, None)
    );
}

#[test]
fn rendered_blocks_are_resampled_per_channel() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(16));
    assert!(pipe.set(SingleBandRenderer::new(2, ColorRamp::Grayscale).with_range(0.0, 14.0).into()));
    assert!(pipe.set(bilinear_filter().into()));

    let block = pipe.block(1, &full_extent(16), 32, 32, None);
    assert_eq!(block.data_type(), DataType::Argb32);
    // Band 2 is 7.0 everywhere: mid grey, opaque
    let grey = (0.5f64 * 255.0).round() as u32;
    let expected = 0xFF00_0000 | grey << 16 | grey << 8 | grey;
    assert_eq!(block.color(5, 20).unwrap(), expected);
}

#[test]
fn cancelled_read_returns_requested_size() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(32));
    assert!(pipe.set(bilinear_filter().into()));

    let feedback = BlockFeedback::new();
    feedback.cancel();
    let block = pipe.block(1, &full_extent(32), 64, 64, Some(&feedback));
    assert_eq!((block.width(), block.height()), (64, 64));
    assert_eq!(block.no_data_count(), 64 * 64);
}

#[test]
fn preview_read_skips_resampling() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(16));
    assert!(pipe.set(bilinear_filter().into()));
    let extent = full_extent(16);

    let feedback = BlockFeedback::new();
    feedback.set_preview_only(true);
    let preview = pipe.block(1, &extent, 32, 32, Some(&feedback));
    let direct = pipe.chain_at(0).unwrap().block(1, &extent, 32, 32, None);
    assert_eq!(preview, direct);

    let resampled = pipe.block(1, &extent, 32, 32, None);
    assert_ne!(resampled, direct);
}

#[test]
fn unstorable_output_no_data_is_masked() {
    let fives = Array2::from_elem((4, 4), 5.0);
    let provider = MemoryProvider::new(full_extent(4), DataType::Byte, vec![fives]).unwrap();
    let mut pipe = RasterPipe::with_provider(provider);
    let mut nuller = Nuller::new();
    nuller.set_no_data(1, vec![NoDataRange::new(0.0, 10.0)]);
    nuller.set_output_no_data_value(1, Some(-9999.0));
    assert!(pipe.set(nuller.into()));

    let block = pipe.block(1, &full_extent(4), 4, 4, None);
    assert_eq!(block.data_type(), DataType::Byte);
    assert_eq!(block.no_data_count(), 16);
}

#[test]
fn switching_a_stage_drops_its_statistics() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(4));
    let mut nuller = Nuller::new();
    nuller.set_no_data(1, vec![NoDataRange::new(0.0, 7.0)]);
    assert!(pipe.set(nuller.into()));
    let everything = Rectangle::default();

    {
        let (stage, input) = pipe.split_at_stage(1).unwrap();
        let stats = stage.band_statistics(input, 1, Stats::ALL, &everything, 0);
        assert_eq!(stats.element_count, 8);
        assert_relative_eq!(stats.min, 8.0);
    }

    assert!(pipe.set_on(1, false));
    assert!(!pipe.stage(1).unwrap().has_statistics(1, Stats::ALL, &everything, 0));
    let (stage, input) = pipe.split_at_stage(1).unwrap();
    let stats = stage.band_statistics(input, 1, Stats::ALL, &everything, 0);
    assert_eq!(stats.element_count, 16);
    assert_relative_eq!(stats.min, 0.0);
}

#[test]
fn upstream_edits_drop_downstream_statistics() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(4));
    assert!(pipe.set(bilinear_filter().into()));
    let everything = Rectangle::default();

    {
        let (stage, input) = pipe.split_at_stage(1).unwrap();
        let stats = stage.band_statistics(input, 1, Stats::ALL, &everything, 0);
        assert_eq!(stats.element_count, 16);
        assert_relative_eq!(stats.min, 0.0);
    }

    let mut nuller = Nuller::new();
    nuller.set_no_data(1, vec![NoDataRange::new(0.0, 7.0)]);
    assert!(pipe.set(nuller.into()));
    let index = pipe.index_of(StageRole::Resampler).unwrap();
    assert_eq!(index, 2);
    assert!(!pipe.stage(index).unwrap().has_statistics(1, Stats::ALL, &everything, 0));

    let (stage, input) = pipe.split_at_stage(index).unwrap();
    let stats = stage.band_statistics(input, 1, Stats::ALL, &everything, 0);
    assert_eq!(stats.element_count, 8);
    assert_relative_eq!(stats.min, 8.0);

    // Removing the nuller again restores the unmasked statistics
    assert!(pipe.remove(1));
    let (stage, input) = pipe.split_at_stage(1).unwrap();
    let stats = stage.band_statistics(input, 1, Stats::ALL, &everything, 0);
    assert_eq!(stats.element_count, 16);
}

#[test]
fn unset_stretch_is_shared_by_all_blocks() {
    let mut pipe = RasterPipe::with_provider(two_band_provider(16));
    assert!(pipe.set(SingleBandRenderer::new(1, ColorRamp::Grayscale).into()));

    // Lower right quadrant starts at row 8, column 8: value 136 of 0..=255
    let quadrant = pipe.block(1, &Rectangle::new(8.0, 0.0, 16.0, 8.0), 8, 8, None);
    assert_eq!(quadrant.color(0, 0).unwrap(), 0xFF88_8888);

    let full = pipe.block(1, &full_extent(16), 16, 16, None);
    assert_eq!(full.color(8, 8).unwrap(), quadrant.color(0, 0).unwrap());
    assert_eq!(full.color(0, 0).unwrap(), 0xFF00_0000);
}
