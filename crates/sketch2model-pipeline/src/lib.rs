//! sketch2model-pipeline: Pure sketch segmentation pipeline (sans-IO).
//!
//! Turns a decoded drawing of closed outlines into a label map in which
//! every enclosed region carries its own id:
//! decimate -> flatten shading -> contrast stretch -> binarize ->
//! close -> clean -> skeletonize -> label -> random walker.
//!
//! This crate has **no I/O dependencies** -- it operates on an
//! in-memory [`DynamicImage`] and returns structured data. Decoding and
//! writing files is left to the caller.

pub mod binarize;
pub mod blur;
pub mod contrast;
pub mod diagnostics;
pub mod grayscale;
pub mod labeling;
pub mod morphology;
pub mod normalize;
pub mod pipeline;
pub mod random_walker;
pub mod skeleton;
pub mod solver;
pub mod types;

pub use diagnostics::{Clock, PipelineDiagnostics, WebClock};
pub use labeling::SeedLabels;
pub use pipeline::{DiffuseFailure, Pipeline, PipelineStage, Stage};
pub use solver::SolverError;
pub use types::{
    Dimensions, DynamicImage, FloatImage, GrayImage, LabelImage, PipelineConfig, PipelineError,
    PipelineWarning, Region, Segmentation, Segmented, StagedResult,
};

/// Segment `image` with the default configuration.
///
/// # Errors
///
/// See [`segment_with_config`].
pub fn segment(image: &DynamicImage) -> Result<Segmented, PipelineError> {
    segment_with_config(image, &PipelineConfig::default())
}

/// Segment `image` into labeled regions.
///
/// The result is at working resolution (half the source size in each
/// direction). Every pixel carries a region id `>= 1`, except pixels no
/// seed could reach, which are [`Region::Unresolved`].
///
/// # Pipeline steps
///
/// 1. Decimate by 2 and convert to luminance
/// 2. Divide out low-frequency shading
/// 3. Percentile contrast stretch
/// 4. Threshold into an ink mask
/// 5. Morphological closing (bridges small stroke gaps)
/// 6. Remove small specks and fill small holes
/// 7. Skeletonize and thicken into walls
/// 8. Seed-label the space between walls
/// 9. Random walker fills the walls
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails
/// validation, [`PipelineError::EmptyInput`] for a zero-size image,
/// [`PipelineError::TooSmall`] when decimation leaves nothing, and
/// [`PipelineError::Solver`] if the random walker fails.
pub fn segment_with_config(
    image: &DynamicImage,
    config: &PipelineConfig,
) -> Result<Segmented, PipelineError> {
    Ok(segment_staged(image, config)?.into_segmented())
}

/// Run the full pipeline, preserving every intermediate raster.
///
/// # Errors
///
/// See [`segment_with_config`].
pub fn segment_staged(
    image: &DynamicImage,
    config: &PipelineConfig,
) -> Result<StagedResult, PipelineError> {
    Pipeline::new(image.clone(), config.clone()).complete()
}
