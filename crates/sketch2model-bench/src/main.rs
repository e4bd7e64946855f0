//! sketch2model-bench: CLI tool for segmentation parameter experimentation
//! and diagnostics.
//!
//! Runs the segmentation pipeline on a given image file with configurable
//! parameters, printing detailed per-stage diagnostics. Useful for:
//!
//! - Tuning the closing radius and speck size against real scans
//! - Measuring per-stage durations to identify bottlenecks
//! - Checking how many regions a drawing resolves into
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin sketch2model-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use image::{Rgb, RgbImage};
use sketch2model_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use sketch2model_pipeline::{PipelineConfig, Region, Segmentation};

/// Segmentation parameter experimentation and diagnostics for sketch2model.
///
/// Runs the segmentation pipeline on a given image with configurable
/// parameters and prints detailed per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "sketch2model-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Radius of the cross used to close stroke gaps.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CLOSING_RADIUS)]
    closing_radius: u8,

    /// Random-walker edge weight sharpness.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BETA)]
    beta: f64,

    /// Ink specks and background gaps smaller than this are removed.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_SPECK_SIZE)]
    min_speck_size: usize,

    /// Ink threshold on the contrast-stretched image (0.0-1.0).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Write a colorized label map PNG to this path.
    #[arg(long)]
    labels_png: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Missing fields take their default values.
    #[arg(long)]
    config_json: Option<String>,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            closing_radius: cli.closing_radius,
            beta: cli.beta,
            min_speck_size: cli.min_speck_size,
            threshold: cli.threshold,
            ..PipelineConfig::default()
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image = match image::open(&cli.image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({}x{})",
        cli.image_path.display(),
        image.width(),
        image.height(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match sketch2model_pipeline::diagnostics::segment_with_diagnostics(
            &image, &config, &StdClock,
        ) {
            Ok((staged, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                for warning in &staged.warnings {
                    eprintln!("Warning: {warning:?}");
                }

                // Write the label map on the first run only.
                if run == 0
                    && let Some(ref png_path) = cli.labels_png
                {
                    if let Err(e) = write_labels_png(&staged.segmentation, png_path) {
                        eprintln!("Error writing label map to {}: {e}", png_path.display());
                        return ExitCode::FAILURE;
                    }
                    eprintln!(
                        "Label map written to {} ({} regions)",
                        png_path.display(),
                        staged.segmentation.labels().len(),
                    );
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// A stable, well-spread color for a region id. Unresolved pixels are
/// black.
fn region_color(region: Region) -> Rgb<u8> {
    match region {
        Region::Label(id) => {
            let [r, g, b, _] = id.get().wrapping_mul(0x9E37_79B9).to_be_bytes();
            Rgb([r, g, b])
        }
        Region::Unresolved => Rgb([0, 0, 0]),
    }
}

/// Render `segmentation` with one color per region.
fn colorize(segmentation: &Segmentation) -> RgbImage {
    let dims = segmentation.dimensions();
    RgbImage::from_fn(dims.width, dims.height, |x, y| {
        segmentation
            .region(x, y)
            .map_or(Rgb([0, 0, 0]), region_color)
    })
}

fn write_labels_png(segmentation: &Segmentation, path: &Path) -> Result<(), image::ImageError> {
    colorize(segmentation).save(path)
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let Some(first) = all_diagnostics.first() else {
        println!("Warning: no diagnostics to summarize");
        return;
    };

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    for (index, (name, _)) in first.stages().iter().enumerate() {
        let total: f64 = all_diagnostics
            .iter()
            .map(|d| d.stages()[index].1.duration.as_secs_f64() * 1000.0)
            .sum();
        let stage_mean = total / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::num::NonZeroU32;

    use sketch2model_pipeline::Dimensions;

    use super::*;

    #[test]
    fn flags_build_config() {
        let cli = Cli::parse_from(["bench", "in.png", "--closing-radius", "3", "--beta", "2.5"]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.closing_radius, 3);
        assert!((config.beta - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.min_speck_size, PipelineConfig::DEFAULT_MIN_SPECK_SIZE);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = Cli::parse_from([
            "bench",
            "in.png",
            "--closing-radius",
            "3",
            "--config-json",
            r#"{"closing_radius": 2}"#,
        ]);
        assert_eq!(config_from_cli(&cli).unwrap().closing_radius, 2);
    }

    #[test]
    fn invalid_config_is_reported() {
        let cli = Cli::parse_from(["bench", "in.png", "--threshold", "1.5"]);
        assert!(config_from_cli(&cli).is_err());
        let cli = Cli::parse_from(["bench", "in.png", "--config-json", "{"]);
        assert!(config_from_cli(&cli).unwrap_err().contains("--config-json"));
    }

    #[test]
    fn colorize_separates_regions() {
        let one = Region::Label(NonZeroU32::MIN);
        let two = Region::Label(NonZeroU32::new(2).unwrap());
        let segmentation = Segmentation::new(
            Dimensions {
                width: 3,
                height: 1,
            },
            vec![one, two, Region::Unresolved],
        )
        .unwrap();
        let image = colorize(&segmentation);
        assert_ne!(image.get_pixel(0, 0), image.get_pixel(1, 0));
        assert_eq!(*image.get_pixel(2, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn unwritable_label_map_is_an_error() {
        let segmentation = Segmentation::new(
            Dimensions {
                width: 1,
                height: 1,
            },
            vec![Region::Label(NonZeroU32::MIN)],
        )
        .unwrap();
        let path = std::env::temp_dir()
            .join("sketch2model-bench-missing-dir")
            .join("nested")
            .join("labels.png");
        assert!(write_labels_png(&segmentation, &path).is_err());
    }
}
