//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter tuning. [`segment_with_diagnostics`] drives the same
//! stages as [`segment_staged`](crate::segment_staged) and records the
//! wall-clock time and metrics of each one.
//!
//! Time is read through the [`Clock`] trait so callers (and tests) can
//! supply their own source. [`WebClock`] uses the `web-time` crate,
//! which is `performance.now()` on WASM and `std::time::Instant` on
//! native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{DynamicImage, PipelineConfig, PipelineError, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> Self::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &Self::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single pipeline run.
///
/// Each field captures metrics for one processing stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: decimation, luminance and shading flattening.
    pub normalize: StageDiagnostics,
    /// Stage 2: percentile contrast stretch.
    pub contrast: StageDiagnostics,
    /// Stage 3: threshold.
    pub binarize: StageDiagnostics,
    /// Stage 4: morphological closing.
    pub close: StageDiagnostics,
    /// Stage 5: speck removal and gap filling.
    pub clean: StageDiagnostics,
    /// Stage 6: skeleton and walls.
    pub skeletonize: StageDiagnostics,
    /// Stage 7: seed labeling.
    pub label: StageDiagnostics,
    /// Stage 8: random walker.
    pub diffuse: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
///
/// Each variant captures the counts and sizes meaningful for that
/// particular processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Decimation and shading flattening.
    Normalize {
        /// Source width in pixels.
        source_width: u32,
        /// Source height in pixels.
        source_height: u32,
        /// Working width in pixels.
        width: u32,
        /// Working height in pixels.
        height: u32,
        /// Sigma of the illumination estimate.
        shading_sigma: f32,
    },
    /// Percentile contrast stretch.
    Contrast {
        /// Requested low percentile.
        low_percentile: f32,
        /// Requested high percentile.
        high_percentile: f32,
        /// Value at the low percentile.
        low: f32,
        /// Value at the high percentile.
        high: f32,
        /// Whether the image was too flat to stretch.
        degenerate: bool,
    },
    /// Thresholding.
    Binarize {
        /// Ink threshold on the stretched image.
        threshold: f32,
        /// Ink pixels in the mask.
        ink_pixel_count: usize,
        /// Total pixel count for computing ink density.
        total_pixel_count: usize,
    },
    /// Morphological closing.
    Close {
        /// Cross radius.
        radius: u8,
        /// Ink pixels before closing.
        ink_before: usize,
        /// Ink pixels after closing.
        ink_after: usize,
        /// 8-connected strokes before closing.
        strokes_before: usize,
        /// 8-connected strokes after closing. Bridged gaps make this
        /// drop.
        strokes_after: usize,
    },
    /// Speck removal and gap filling.
    Clean {
        /// Minimum component size kept.
        min_size: usize,
        /// Ink components removed.
        specks_removed: usize,
        /// Background components filled.
        gaps_filled: usize,
        /// Ink pixels after cleaning.
        ink_after: usize,
        /// 8-connected strokes left after cleaning.
        strokes_after: usize,
    },
    /// Skeleton and walls.
    Skeletonize {
        /// Pixels in the one-pixel skeleton.
        skeleton_pixel_count: usize,
        /// Pixels in the dilated walls.
        wall_pixel_count: usize,
    },
    /// Seed labeling.
    Label {
        /// Distinct region ids.
        region_count: u32,
        /// Enclosed regions among them.
        interior_count: u32,
        /// Pixels carrying a seed label.
        seed_pixel_count: usize,
    },
    /// Random walker.
    Diffuse {
        /// Edge weight sharpness.
        beta: f64,
        /// Unlabeled pixels solved for.
        unknown_count: usize,
        /// Label classes in the solve.
        class_count: usize,
        /// Largest iteration count over all per-class solves.
        iterations: usize,
        /// Largest final relative residual.
        max_residual: f64,
        /// Pixels no seed could reach.
        unresolved_count: usize,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub source_width: u32,
    /// Source image height in pixels.
    pub source_height: u32,
    /// Working width in pixels.
    pub width: u32,
    /// Working height in pixels.
    pub height: u32,
    /// Working pixel count.
    pub pixel_count: u64,
    /// Regions in the final label map.
    pub region_count: u32,
    /// Enclosed regions among them.
    pub interior_count: u32,
    /// Pixels left unresolved.
    pub unresolved_count: usize,
}

impl PipelineDiagnostics {
    /// Stage display names paired with their diagnostics, in pipeline
    /// order.
    #[must_use]
    pub const fn stages(&self) -> [(&'static str, &StageDiagnostics); 8] {
        [
            ("Normalize", &self.normalize),
            ("Contrast", &self.contrast),
            ("Binarize", &self.binarize),
            ("Close", &self.close),
            ("Clean", &self.clean),
            ("Skeletonize", &self.skeletonize),
            ("Label", &self.label),
            ("Diffuse", &self.diffuse),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} -> {}x{} ({} pixels)",
            self.summary.source_width,
            self.summary.source_height,
            self.summary.width,
            self.summary.height,
            self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        // Per-stage breakdown.
        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Regions: {} ({} interior)  |  Unresolved pixels: {}",
            self.summary.region_count, self.summary.interior_count, self.summary.unresolved_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: usize, whole: usize) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Normalize {
            source_width,
            source_height,
            width,
            height,
            shading_sigma,
        } => {
            format!("{source_width}x{source_height} -> {width}x{height} sigma={shading_sigma:.1}")
        }
        StageMetrics::Contrast {
            low_percentile,
            high_percentile,
            low,
            high,
            degenerate,
        } => {
            let flat = if *degenerate { " (flat)" } else { "" };
            format!("p{low_percentile}={low:.3} p{high_percentile}={high:.3}{flat}")
        }
        StageMetrics::Binarize {
            threshold,
            ink_pixel_count,
            total_pixel_count,
        } => {
            let density = percent(*ink_pixel_count, *total_pixel_count);
            format!("t={threshold:.2} ink={ink_pixel_count} ({density:.1}%)")
        }
        StageMetrics::Close {
            radius,
            ink_before,
            ink_after,
            strokes_before,
            strokes_after,
        } => format!(
            "r={radius} ink={ink_before}->{ink_after} strokes={strokes_before}->{strokes_after}"
        ),
        StageMetrics::Clean {
            min_size,
            specks_removed,
            gaps_filled,
            ink_after,
            strokes_after,
        } => format!(
            "min={min_size} specks=-{specks_removed} gaps=+{gaps_filled} ink={ink_after} strokes={strokes_after}"
        ),
        StageMetrics::Skeletonize {
            skeleton_pixel_count,
            wall_pixel_count,
        } => format!("skeleton={skeleton_pixel_count} walls={wall_pixel_count}"),
        StageMetrics::Label {
            region_count,
            interior_count,
            seed_pixel_count,
        } => format!("{region_count} regions ({interior_count} interior), {seed_pixel_count} seeds"),
        StageMetrics::Diffuse {
            beta,
            unknown_count,
            class_count,
            iterations,
            max_residual,
            unresolved_count,
        } => format!(
            "beta={beta} {unknown_count} unknowns x {class_count} classes, \
             {iterations} iters (res {max_residual:.1e}), {unresolved_count} unresolved"
        ),
    }
}

/// Time one stage transition and collect the resulting stage's metrics.
fn timed<C, S>(
    clock: &C,
    run: impl FnOnce() -> Result<S, PipelineError>,
) -> Result<(S, StageDiagnostics), PipelineError>
where
    C: Clock,
    S: PipelineStage,
{
    let start = clock.now();
    let stage = run()?;
    let duration = clock.elapsed(&start);
    // Only Pending lacks metrics, and it is never produced here.
    #[allow(clippy::unreachable)]
    let metrics = stage
        .metrics()
        .unwrap_or_else(|| unreachable!("stage {} has no metrics", S::NAME));
    Ok((stage, StageDiagnostics { duration, metrics }))
}

/// Run the full pipeline, timing every stage.
///
/// Produces the same [`StagedResult`] as
/// [`segment_staged`](crate::segment_staged), plus per-stage
/// [`PipelineDiagnostics`].
///
/// # Errors
///
/// Returns [`PipelineError`] under the same conditions as
/// [`segment_staged`](crate::segment_staged).
pub fn segment_with_diagnostics<C: Clock>(
    image: &DynamicImage,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let total_start = clock.now();
    let pending = Pipeline::new(image.clone(), config.clone());

    let (normalized, normalize) = timed(clock, || pending.normalize())?;
    let (contrasted, contrast) = timed(clock, || Ok(normalized.contrast()))?;
    let (binarized, binarize) = timed(clock, || Ok(contrasted.binarize()))?;
    let (closed, close) = timed(clock, || Ok(binarized.close()))?;
    let (cleaned, clean) = timed(clock, || Ok(closed.clean()))?;
    let (skeletonized, skeletonize) = timed(clock, || Ok(cleaned.skeletonize()))?;
    let (labeled, label) = timed(clock, || Ok(skeletonized.label()))?;
    let (diffused, diffuse) = timed(clock, || labeled.diffuse().map_err(PipelineError::from))?;

    let result = diffused.into_result();
    let total_duration = clock.elapsed(&total_start);

    let summary = PipelineSummary {
        source_width: result.source_dimensions.width,
        source_height: result.source_dimensions.height,
        width: result.dimensions.width,
        height: result.dimensions.height,
        pixel_count: result.dimensions.pixel_count(),
        region_count: result.seeds.region_count,
        interior_count: result.seeds.interior_count,
        unresolved_count: result.segmentation.unresolved_count(),
    };

    let diagnostics = PipelineDiagnostics {
        normalize,
        contrast,
        binarize,
        close,
        clean,
        skeletonize,
        label,
        diffuse,
        total_duration,
        summary,
    };

    Ok((result, diagnostics))
}
