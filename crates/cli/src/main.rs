//! strata CLI - inspect and render rasters through the filter pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use strata_core::io::write_geotiff;
use strata_core::xml::Element;
use strata_core::{DataType, GeoTransform, Rectangle};
use strata_pipe::{BlockFeedback, MemoryProvider, NoDataRange, Nuller, RasterPipe, ResampleFilter, Stats};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Raster filter pipeline", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information and band statistics of a raster file
    Info {
        /// Input raster file
        input: PathBuf,
        /// Approximate number of sampled cells (0 = every cell)
        #[arg(short, long, default_value = "0")]
        sample_size: usize,
    },
    /// Print a band histogram and its cumulative cut
    Histogram {
        /// Input raster file
        input: PathBuf,
        /// Band number (1-based)
        #[arg(short, long, default_value = "1")]
        band: usize,
        /// Number of bins (0 = chosen from the data type)
        #[arg(long, default_value = "0")]
        bins: usize,
        /// Lower histogram bound (default: band minimum)
        #[arg(long)]
        min: Option<f64>,
        /// Upper histogram bound (default: band maximum)
        #[arg(long)]
        max: Option<f64>,
        /// Approximate number of sampled cells (0 = every cell)
        #[arg(short, long, default_value = "0")]
        sample_size: usize,
        /// Lower cumulative cut fraction
        #[arg(long, default_value = "0.02")]
        cut_lower: f64,
        /// Upper cumulative cut fraction
        #[arg(long, default_value = "0.98")]
        cut_upper: f64,
    },
    /// Read one band through the pipe at a new size and write it as GeoTIFF
    Render {
        /// Input raster file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Output width in cells
        #[arg(long)]
        width: usize,
        /// Output height in cells
        #[arg(long)]
        height: usize,
        /// Band number (1-based)
        #[arg(short, long, default_value = "1")]
        band: usize,
        /// Resampling kernel: nearest, bilinear, cubic
        #[arg(short, long, default_value = "bilinear")]
        resampling: String,
        /// Maximum oversampling when zooming out
        #[arg(long, default_value = "2.0")]
        max_oversampling: f64,
        /// Extra no-data values or ranges (`v` or `min:max`), repeatable
        #[arg(short, long = "null", allow_hyphen_values = true)]
        nulls: Vec<String>,
        /// Load filter settings from a saved pipe XML file
        #[arg(long)]
        pipe: Option<PathBuf>,
        /// Save the pipe configuration as XML
        #[arg(long)]
        save_pipe: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install log subscriber")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn open_pipe(path: &Path) -> Result<RasterPipe> {
    let pb = spinner("Reading raster...");
    let provider = MemoryProvider::from_path(path).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}", provider.cols(), provider.rows());
    Ok(RasterPipe::with_provider(provider))
}

fn parse_null(text: &str) -> Result<NoDataRange> {
    let parse = |s: &str| -> Result<f64> {
        s.trim()
            .parse::<f64>()
            .with_context(|| format!("Invalid no-data value: {s}"))
    };
    match text.split_once(':') {
        Some((min, max)) => Ok(NoDataRange::new(parse(min)?, parse(max)?)),
        None => Ok(NoDataRange::single(parse(text)?)),
    }
}

/// Fail unless `band` (1-based) is one of `count` bands
fn check_band(band: usize, count: usize) -> Result<()> {
    if band == 0 || band > count {
        return Err(strata_core::Error::BandOutOfRange { band, count }.into());
    }
    Ok(())
}

/// Fail for blocks the Float32 GeoTIFF writer cannot hold
fn check_writable(data_type: DataType) -> Result<()> {
    if !data_type.is_numeric() {
        anyhow::bail!(
            "Cannot write {} blocks to a Float32 GeoTIFF; remove the renderer from the pipe",
            data_type.name()
        );
    }
    Ok(())
}

fn print_info(input: &Path, sample_size: usize) -> Result<()> {
    let mut pipe = open_pipe(input)?;
    let chain = pipe.chain().context("Empty pipe")?;

    let band_count = chain.band_count();
    let extent = chain.extent();
    let cells = chain.x_size() * chain.y_size();
    println!("File: {}", input.display());
    println!("Dimensions: {} x {} ({} cells)", chain.x_size(), chain.y_size(), cells);
    println!("Block size: {} x {}", chain.x_block_size(), chain.y_block_size());
    println!(
        "Extent: ({:.6}, {:.6}) - ({:.6}, {:.6})",
        extent.xmin, extent.ymin, extent.xmax, extent.ymax
    );
    println!("Capabilities: {}", chain.capabilities_string());
    let names: Vec<String> = (1..=band_count).map(|b| chain.generate_band_name(b)).collect();
    let types: Vec<&str> = (1..=band_count).map(|b| chain.data_type(b).name()).collect();
    if let Some(no_data) = pipe.provider().and_then(MemoryProvider::no_data) {
        println!("NoData: {}", no_data);
    }

    let (stage, input) = pipe.split_at_stage(0).context("Empty pipe")?;
    for band in 1..=band_count {
        let stats = stage.band_statistics(input, band, Stats::ALL, &Rectangle::default(), sample_size);
        println!("\n{} ({}):", names[band - 1], types[band - 1]);
        if stats.element_count == 0 {
            println!("  No valid cells");
            continue;
        }
        println!("  Min: {:.4}", stats.min);
        println!("  Max: {:.4}", stats.max);
        println!("  Mean: {:.4}", stats.mean);
        println!("  Std dev: {:.4}", stats.std_dev);
        println!(
            "  Valid cells: {} of {} sampled ({} x {})",
            stats.element_count,
            stats.width * stats.height,
            stats.width,
            stats.height
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn print_histogram(
    input: &Path,
    band: usize,
    bins: usize,
    min: Option<f64>,
    max: Option<f64>,
    sample_size: usize,
    cut_lower: f64,
    cut_upper: f64,
) -> Result<()> {
    let mut pipe = open_pipe(input)?;
    let band_count = pipe.chain().map_or(0, |c| c.band_count());
    check_band(band, band_count)?;

    let everything = Rectangle::default();
    let (stage, input) = pipe.split_at_stage(0).context("Empty pipe")?;
    let histogram = stage.histogram(input, band, bins, min, max, &everything, sample_size, false);

    println!(
        "Band {}: {} bins over [{:.4}, {:.4}], {} valid cells",
        band, histogram.bin_count, histogram.minimum, histogram.maximum, histogram.non_null_count
    );
    let width = histogram.bin_width();
    for (i, count) in histogram.counts.iter().enumerate().filter(|(_, c)| **c > 0) {
        let lower = histogram.minimum + i as f64 * width;
        println!("  [{:>12.4}, {:>12.4}) {}", lower, lower + width, count);
    }

    match stage.cumulative_cut(input, band, cut_lower, cut_upper, &everything, sample_size) {
        Some((lower, upper)) => println!(
            "Cumulative cut {:.1}%-{:.1}%: {:.4} - {:.4}",
            cut_lower * 100.0,
            cut_upper * 100.0,
            lower,
            upper
        ),
        None => println!("Cumulative cut: no valid cells"),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn render(
    input: &Path,
    output: &Path,
    width: usize,
    height: usize,
    band: usize,
    resampling: &str,
    max_oversampling: f64,
    nulls: &[String],
    pipe_xml: Option<&Path>,
    save_pipe: Option<&Path>,
) -> Result<()> {
    if width == 0 || height == 0 {
        anyhow::bail!("Output size must be positive, got {} x {}", width, height);
    }
    let mut pipe = open_pipe(input)?;

    if let Some(path) = pipe_xml {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let element = Element::parse(&text).context("Failed to parse pipe XML")?;
        pipe.read_xml(&element).context("Failed to load pipe")?;
    }

    if !nulls.is_empty() {
        let ranges = nulls.iter().map(|s| parse_null(s)).collect::<Result<Vec<_>>>()?;
        let mut nuller = Nuller::new();
        nuller.set_no_data(band, ranges);
        if !pipe.set(nuller.into()) {
            warn!("No-data filter rejected by the pipe");
        }
    }

    let kernel = |name: &str| {
        strata_pipe::resampler_from_kind(name).with_context(|| format!("Unknown resampling kernel: {name}"))
    };
    let mut filter = ResampleFilter::new()
        .with_zoomed_in_resampler(kernel(resampling)?)
        .with_zoomed_out_resampler(kernel(resampling)?);
    filter.set_max_oversampling(max_oversampling);
    if !pipe.set(filter.into()) {
        anyhow::bail!("Resample filter rejected by the pipe");
    }

    if let Some(path) = save_pipe {
        let mut root = Element::new("layer");
        pipe.write_xml(&mut root);
        std::fs::write(path, root.to_xml_string()).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Pipe saved to: {}", path.display());
    }

    let chain = pipe.chain().context("Empty pipe")?;
    check_band(band, chain.band_count())?;
    check_writable(chain.data_type(band))?;
    let extent = chain.extent();

    let start = Instant::now();
    let pb = spinner("Rendering...");
    let feedback = BlockFeedback::new();
    let block = chain.block(band, &extent, width, height, Some(&feedback));
    pb.finish_and_clear();

    let no_data = pipe.provider().and_then(MemoryProvider::no_data);
    let grid = block.to_array();
    let transform = GeoTransform::from_extent(&extent, width, height);

    let pb = spinner("Writing output...");
    write_geotiff(&grid, &transform, no_data, output).context("Failed to write output")?;
    pb.finish_and_clear();

    println!("Rendered band {} saved to: {}", band, output.display());
    println!("  Size: {} x {}, {} no-data cells", width, height, block.no_data_count());
    println!("  Processing time: {:.2?}", start.elapsed());
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Info { input, sample_size } => print_info(&input, sample_size),
        Commands::Histogram {
            input,
            band,
            bins,
            min,
            max,
            sample_size,
            cut_lower,
            cut_upper,
        } => print_histogram(&input, band, bins, min, max, sample_size, cut_lower, cut_upper),
        Commands::Render {
            input,
            output,
            width,
            height,
            band,
            resampling,
            max_oversampling,
            nulls,
            pipe,
            save_pipe,
        } => render(
            &input,
            &output,
            width,
            height,
            band,
            &resampling,
            max_oversampling,
            &nulls,
            pipe.as_deref(),
            save_pipe.as_deref(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_null() {
        let single = parse_null("-9999").unwrap();
        assert!(single.contains(-9999.0));
        assert!(!single.contains(0.0));

        let range = parse_null("0:10").unwrap();
        assert!(range.contains(5.0));
        assert!(!range.contains(10.5));

        assert!(parse_null("abc").is_err());
    }

    #[test]
    fn test_band_checks() {
        assert!(check_band(1, 2).is_ok());
        assert!(check_band(2, 2).is_ok());
        for band in [0, 3] {
            let err = check_band(band, 2).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<strata_core::Error>(),
                Some(strata_core::Error::BandOutOfRange { count: 2, .. })
            ));
        }
    }

    #[test]
    fn test_colour_blocks_are_not_written() {
        assert!(check_writable(DataType::Float32).is_ok());
        assert!(check_writable(DataType::Byte).is_ok());
        assert!(check_writable(DataType::Argb32).is_err());
        assert!(check_writable(DataType::Unknown).is_err());
    }

    #[test]
    fn test_cli_parses_render() {
        let cli = Cli::try_parse_from([
            "strata", "render", "in.tif", "out.tif", "--width", "10", "--height", "20", "--null", "-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Render {
                width, height, nulls, ..
            } => {
                assert_eq!((width, height), (10, 20));
                assert_eq!(nulls, vec!["-1".to_string()]);
            }
            _ => panic!("expected render"),
        }
    }
}
