//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::segment_staged`] which runs the entire pipeline in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use sketch2model_pipeline::{DynamicImage, Pipeline, PipelineConfig, PipelineError};
//! # fn run(image: DynamicImage) -> Result<(), PipelineError> {
//! let labeled = Pipeline::new(image, PipelineConfig::default())
//!     .normalize()?
//!     .contrast()
//!     .binarize()
//!     .close()
//!     .clean()
//!     .skeletonize()
//!     .label();
//!
//! let staged = labeled.diffuse()?.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages). Every stage owns its predecessor,
//! so all intermediates stay reachable through accessor methods until
//! [`Diffused::into_result`] moves them into a [`StagedResult`].
//!
//! # Memory
//!
//! All rasters are at working (half) resolution. For a 2000×2000
//! source that is a 1000×1000 working grid: three `f32` rasters, five
//! byte masks and one `u32` label raster, roughly 21 MB pinned until
//! the result is extracted. Callers that only need the final labels
//! should prefer [`crate::segment`].

use imageproc::region_labelling::Connectivity;
use tracing::debug;

use crate::binarize::count_set;
use crate::contrast::Stretched;
use crate::diagnostics::StageMetrics;
use crate::labeling::SeedLabels;
use crate::morphology::count_components;
use crate::random_walker::Diffusion;
use crate::solver::ConjugateGradient;
use crate::types::{
    Dimensions, DynamicImage, FloatImage, GrayImage, PipelineConfig, PipelineError,
    PipelineWarning, Segmentation, StagedResult,
};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// The source image and config are stored but not yet touched.
/// Call [`normalize`](Self::normalize) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .normalize() to continue"]
pub struct Pending {
    config: PipelineConfig,
    source: DynamicImage,
}

impl Pending {
    /// The source image.
    #[must_use]
    pub const fn source(&self) -> &DynamicImage {
        &self.source
    }

    /// The configuration the pipeline will run with.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate the config, decimate to working resolution, convert to
    /// luminance and flatten shading.
    ///
    /// The source image is dropped after this stage; only its
    /// dimensions are kept.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an unusable config,
    /// [`PipelineError::EmptyInput`] for a zero-size image and
    /// [`PipelineError::TooSmall`] when decimation would leave nothing.
    pub fn normalize(self) -> Result<Normalized, PipelineError> {
        self.config.validate()?;
        let source_dimensions = Dimensions {
            width: self.source.width(),
            height: self.source.height(),
        };
        let grayscale = crate::grayscale::decimate_luma(&self.source)?;
        let flattened = crate::normalize::flatten_shading(&grayscale, self.config.shading_sigma);
        debug!(
            source_width = source_dimensions.width,
            source_height = source_dimensions.height,
            width = grayscale.width(),
            height = grayscale.height(),
            "normalized"
        );
        Ok(Normalized {
            config: self.config,
            source_dimensions,
            grayscale,
            flattened,
        })
    }
}

// ───────────────────────── Stage 1: Normalized ───────────────────────

/// Pipeline state after decimation, luminance conversion and shading
/// flattening.
///
/// Call [`contrast`](Self::contrast) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .contrast() to continue"]
pub struct Normalized {
    config: PipelineConfig,
    source_dimensions: Dimensions,
    grayscale: FloatImage,
    flattened: FloatImage,
}

impl Normalized {
    /// Decimated luminance in `[0, 1]`.
    #[must_use]
    pub const fn grayscale(&self) -> &FloatImage {
        &self.grayscale
    }

    /// Luminance divided by the local RMS brightness.
    #[must_use]
    pub const fn flattened(&self) -> &FloatImage {
        &self.flattened
    }

    /// Working (decimated) dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.grayscale.width(),
            height: self.grayscale.height(),
        }
    }

    /// Dimensions of the source image.
    #[must_use]
    pub const fn source_dimensions(&self) -> Dimensions {
        self.source_dimensions
    }

    /// Advance to the contrast stretch stage.
    pub fn contrast(self) -> Contrasted {
        let stretched = crate::contrast::stretch_contrast(
            &self.flattened,
            self.config.low_percentile,
            self.config.high_percentile,
        );
        debug!(
            low = stretched.low,
            high = stretched.high,
            degenerate = stretched.degenerate,
            "contrast stretched"
        );
        Contrasted {
            normalized: self,
            stretched,
        }
    }
}

// ───────────────────────── Stage 2: Contrasted ───────────────────────

/// Pipeline state after the percentile contrast stretch.
///
/// Call [`binarize`](Self::binarize) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .binarize() to continue"]
pub struct Contrasted {
    normalized: Normalized,
    stretched: Stretched,
}

impl Contrasted {
    /// Stretched values in `[0, 1]`.
    #[must_use]
    pub const fn contrasted(&self) -> &FloatImage {
        &self.stretched.image
    }

    /// Values found at the low and high percentiles.
    #[must_use]
    pub const fn percentiles(&self) -> (f32, f32) {
        (self.stretched.low, self.stretched.high)
    }

    /// Whether the stretch was skipped because the image was flat.
    #[must_use]
    pub const fn is_degenerate(&self) -> bool {
        self.stretched.degenerate
    }

    const fn config(&self) -> &PipelineConfig {
        &self.normalized.config
    }

    /// Advance to the threshold stage.
    pub fn binarize(self) -> Binarized {
        let binary = crate::binarize::binarize(&self.stretched.image, self.config().threshold);
        debug!(ink = count_set(&binary), "binarized");
        Binarized {
            contrasted: self,
            binary,
        }
    }
}

// ───────────────────────── Stage 3: Binarized ────────────────────────

/// Pipeline state after thresholding into an ink mask.
///
/// Call [`close`](Self::close) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .close() to continue"]
pub struct Binarized {
    contrasted: Contrasted,
    binary: GrayImage,
}

impl Binarized {
    /// The raw ink mask.
    #[must_use]
    pub const fn binary(&self) -> &GrayImage {
        &self.binary
    }

    const fn config(&self) -> &PipelineConfig {
        self.contrasted.config()
    }

    /// Advance to the morphological closing stage.
    pub fn close(self) -> Closed {
        let closed = crate::morphology::close(&self.binary, self.config().closing_radius);
        debug!(
            radius = self.config().closing_radius,
            ink = count_set(&closed),
            "closed"
        );
        Closed {
            binarized: self,
            closed,
        }
    }
}

// ───────────────────────── Stage 4: Closed ───────────────────────────

/// Pipeline state after bridging small stroke gaps.
///
/// Call [`clean`](Self::clean) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .clean() to continue"]
pub struct Closed {
    binarized: Binarized,
    closed: GrayImage,
}

impl Closed {
    /// The closed ink mask.
    #[must_use]
    pub const fn closed(&self) -> &GrayImage {
        &self.closed
    }

    const fn config(&self) -> &PipelineConfig {
        self.binarized.config()
    }

    /// Advance to the speck removal stage.
    ///
    /// Removes 8-connected ink specks, then fills 4-connected gaps,
    /// both below `min_speck_size` pixels.
    pub fn clean(self) -> Cleaned {
        let min_size = self.config().min_speck_size;
        let (despeckled, specks_removed) = crate::morphology::remove_small_objects(
            &self.closed,
            min_size,
            Connectivity::Eight,
        );
        let (cleaned, gaps_filled) = crate::morphology::fill_small_gaps(&despeckled, min_size);
        debug!(specks_removed, gaps_filled, "cleaned");
        Cleaned {
            closed: self,
            cleaned,
            specks_removed,
            gaps_filled,
        }
    }
}

// ───────────────────────── Stage 5: Cleaned ──────────────────────────

/// Pipeline state after speck removal and small-gap filling.
///
/// Call [`skeletonize`](Self::skeletonize) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .skeletonize() to continue"]
pub struct Cleaned {
    closed: Closed,
    cleaned: GrayImage,
    specks_removed: usize,
    gaps_filled: usize,
}

impl Cleaned {
    /// The cleaned ink mask.
    #[must_use]
    pub const fn cleaned(&self) -> &GrayImage {
        &self.cleaned
    }

    /// Number of ink specks removed.
    #[must_use]
    pub const fn specks_removed(&self) -> usize {
        self.specks_removed
    }

    /// Number of small gaps filled.
    #[must_use]
    pub const fn gaps_filled(&self) -> usize {
        self.gaps_filled
    }

    const fn config(&self) -> &PipelineConfig {
        self.closed.config()
    }

    /// Advance to the skeleton stage.
    pub fn skeletonize(self) -> Skeletonized {
        let (skeleton, walls) = crate::skeleton::walls(&self.cleaned);
        debug!(
            skeleton = count_set(&skeleton),
            walls = count_set(&walls),
            "skeletonized"
        );
        Skeletonized {
            cleaned: self,
            skeleton,
            walls,
        }
    }
}

// ───────────────────────── Stage 6: Skeletonized ─────────────────────

/// Pipeline state after thinning the ink to walls.
///
/// Call [`label`](Self::label) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .label() to continue"]
pub struct Skeletonized {
    cleaned: Cleaned,
    skeleton: GrayImage,
    walls: GrayImage,
}

impl Skeletonized {
    /// The one-pixel skeleton.
    #[must_use]
    pub const fn skeleton(&self) -> &GrayImage {
        &self.skeleton
    }

    /// The wall mask (skeleton dilated by the 4-neighbour cross).
    #[must_use]
    pub const fn walls(&self) -> &GrayImage {
        &self.walls
    }

    const fn config(&self) -> &PipelineConfig {
        self.cleaned.config()
    }

    /// Advance to the seed labeling stage.
    pub fn label(self) -> Labeled {
        let seeds = crate::labeling::label_regions(&self.walls);
        debug!(
            regions = seeds.region_count,
            interior = seeds.interior_count,
            "labeled"
        );
        Labeled {
            skeletonized: self,
            seeds,
        }
    }
}

// ───────────────────────── Stage 7: Labeled ──────────────────────────

/// Pipeline state after seed labeling.
///
/// Call [`diffuse`](Self::diffuse) to advance to the final stage, or
/// [`fallback`](Self::fallback) to settle for the seed labels.
#[must_use = "pipeline stages are consumed by advancing; call .diffuse() to continue"]
pub struct Labeled {
    skeletonized: Skeletonized,
    seeds: SeedLabels,
}

impl Labeled {
    /// The seed labels (0 on walls).
    #[must_use]
    pub const fn seeds(&self) -> &SeedLabels {
        &self.seeds
    }

    const fn config(&self) -> &PipelineConfig {
        self.skeletonized.config()
    }

    /// The seed labels as a segmentation, with every wall pixel marked
    /// [`Region::Unresolved`](crate::Region::Unresolved).
    ///
    /// The seeds are a valid (if incomplete) partition on their own. A
    /// failed [`diffuse`](Self::diffuse) hands the stage back inside a
    /// [`DiffuseFailure`], so this stays reachable after a solver error.
    #[must_use]
    pub fn fallback(&self) -> Segmentation {
        Segmentation::from_seeds(&self.seeds.labels)
    }

    /// Advance to the random-walker stage.
    ///
    /// # Errors
    ///
    /// Returns a [`DiffuseFailure`] wrapping [`PipelineError::Solver`] if
    /// a per-label solve does not converge or produces non-finite values.
    /// The failure still owns this stage; call
    /// [`DiffuseFailure::fallback`] for the seed-only segmentation.
    pub fn diffuse(self) -> Result<Diffused, DiffuseFailure> {
        let config = self.config();
        let solver = ConjugateGradient {
            tolerance: config.solver_tolerance,
            max_iterations: config.solver_max_iterations,
        };
        match crate::random_walker::random_walker(
            &self.skeletonized.walls,
            &self.seeds.labels,
            config.beta,
            &solver,
        ) {
            Ok(diffusion) => Ok(Diffused {
                labeled: self,
                diffusion,
            }),
            Err(error) => Err(DiffuseFailure {
                labeled: Box::new(self),
                error,
            }),
        }
    }
}

/// A random-walker run that failed, together with the [`Labeled`] stage
/// it was started from.
///
/// Converts into [`PipelineError`] so `?` keeps working for callers that
/// do not need the seed fallback.
#[derive(thiserror::Error)]
#[error("random walker failed: {error}")]
pub struct DiffuseFailure {
    labeled: Box<Labeled>,
    error: PipelineError,
}

impl DiffuseFailure {
    /// Why the random walker failed.
    #[must_use]
    pub const fn error(&self) -> &PipelineError {
        &self.error
    }

    /// The seed-only segmentation of the stage that failed.
    #[must_use]
    pub fn fallback(&self) -> Segmentation {
        self.labeled.fallback()
    }

    /// Take back the labeled stage, for instance to retry with a
    /// different solver budget.
    pub fn into_labeled(self) -> Labeled {
        *self.labeled
    }

    #[must_use]
    pub fn into_error(self) -> PipelineError {
        self.error
    }
}

impl std::fmt::Debug for DiffuseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffuseFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl From<DiffuseFailure> for PipelineError {
    fn from(failure: DiffuseFailure) -> Self {
        failure.error
    }
}

// ───────────────────────── Stage 8: Diffused ─────────────────────────

/// Pipeline state after the random walker, the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`StagedResult`] containing all intermediates.
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Diffused {
    labeled: Labeled,
    diffusion: Diffusion,
}

impl Diffused {
    /// The completed label map.
    #[must_use]
    pub const fn segmentation(&self) -> &Segmentation {
        &self.diffusion.segmentation
    }

    /// Working (decimated) dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.diffusion.segmentation.dimensions()
    }

    /// Non-fatal conditions met on the way here.
    #[must_use]
    pub fn warnings(&self) -> Vec<PipelineWarning> {
        let mut warnings = Vec::new();
        let stretched = &self
            .labeled
            .skeletonized
            .cleaned
            .closed
            .binarized
            .contrasted
            .stretched;
        if stretched.degenerate {
            warnings.push(PipelineWarning::DegenerateContrast {
                low: stretched.low,
                high: stretched.high,
            });
        }
        let unresolved = self.diffusion.stats.unresolved_count;
        if unresolved > 0 {
            warnings.push(PipelineWarning::DisconnectedSeed { pixels: unresolved });
        }
        warnings
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        let warnings = self.warnings();
        let dimensions = self.dimensions();

        let Self { labeled, diffusion } = self;
        let Labeled {
            skeletonized,
            seeds,
        } = labeled;
        let Skeletonized {
            cleaned: cleaned_stage,
            skeleton,
            walls,
        } = skeletonized;
        let Cleaned {
            closed: closed_stage,
            cleaned,
            ..
        } = cleaned_stage;
        let Closed { binarized, closed } = closed_stage;
        let Binarized { contrasted, binary } = binarized;
        let Contrasted {
            normalized,
            stretched,
        } = contrasted;

        StagedResult {
            source_dimensions: normalized.source_dimensions,
            grayscale: normalized.grayscale,
            flattened: normalized.flattened,
            contrasted: stretched.image,
            binary,
            closed,
            cleaned,
            skeleton,
            walls,
            seeds,
            segmentation: diffusion.segmentation,
            warnings,
            dimensions,
        }
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 9;

/// The output produced by a single pipeline stage.
///
/// Each variant borrows the data that the corresponding stage computed.
/// Use this with [`PipelineStage::output`] or [`Stage::output`] to
/// inspect intermediates in a uniform, type-erased way.
#[must_use]
pub enum StageOutput<'a> {
    /// Source image (not yet processed).
    Source {
        /// The source image.
        image: &'a DynamicImage,
    },
    /// Shading-flattened luminance.
    Normalized {
        /// The flattened image.
        flattened: &'a FloatImage,
    },
    /// Contrast-stretched image.
    Contrasted {
        /// Stretched values in `[0, 1]`.
        contrasted: &'a FloatImage,
    },
    /// Thresholded ink mask.
    Binarized {
        /// The ink mask.
        binary: &'a GrayImage,
    },
    /// Closed ink mask.
    Closed {
        /// The closed mask.
        closed: &'a GrayImage,
    },
    /// Cleaned ink mask.
    Cleaned {
        /// The cleaned mask.
        cleaned: &'a GrayImage,
    },
    /// Skeleton and walls.
    Skeletonized {
        /// The one-pixel skeleton.
        skeleton: &'a GrayImage,
        /// The dilated wall mask.
        walls: &'a GrayImage,
    },
    /// Seed labels.
    Labeled {
        /// The seeds.
        seeds: &'a SeedLabels,
    },
    /// Completed label map.
    Diffused {
        /// The final segmentation.
        segmentation: &'a Segmentation,
    },
}

/// Trait implemented by every pipeline stage, enabling uniform iteration.
///
/// Both the typed API (individual stage structs) and the dynamic API
/// ([`Stage`] enum) are available. This trait bridges the two: each
/// stage struct implements it, and [`Stage`] delegates to whichever
/// variant it holds.
///
/// # Loop pattern
///
/// ```rust
/// # use sketch2model_pipeline::{DynamicImage, Pipeline, PipelineConfig, PipelineError};
/// # use sketch2model_pipeline::pipeline::{Stage, Advance};
/// # fn run(image: DynamicImage) -> Result<(), PipelineError> {
/// let mut stage: Stage = Pipeline::new(image, PipelineConfig::default()).into();
/// loop {
///     match stage.advance()? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete()?;
/// # Ok(())
/// # }
/// ```
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"source"`, `"label"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `8` for
    /// Diffused).
    const INDEX: usize;

    /// The output this stage produced.
    fn output(&self) -> StageOutput<'_>;

    /// Stage-specific metrics for diagnostics.
    ///
    /// Returns `None` for the initial [`Pending`] stage which has not
    /// yet performed any processing.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(stage))` on success, `Ok(None)` if already at
    /// the final stage, or `Err` if the stage transition fails.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] from input validation (leaving
    /// [`Pending`]) or from the random walker (leaving [`Labeled`]).
    fn next(self) -> Result<Option<Stage>, PipelineError>;

    /// Run all remaining stages to completion and return the final
    /// [`StagedResult`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining fallible stage fails.
    fn complete(self) -> Result<StagedResult, PipelineError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Source {
            image: &self.source,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Normalized(self.normalize()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.normalize()?.complete()
    }
}

impl PipelineStage for Normalized {
    const NAME: &str = "normalize";
    const INDEX: usize = 1;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Normalized {
            flattened: &self.flattened,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        let dimensions = self.dimensions();
        Some(StageMetrics::Normalize {
            source_width: self.source_dimensions.width,
            source_height: self.source_dimensions.height,
            width: dimensions.width,
            height: dimensions.height,
            shading_sigma: self.config.shading_sigma,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Contrasted(self.contrast())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.contrast().complete()
    }
}

impl PipelineStage for Contrasted {
    const NAME: &str = "contrast";
    const INDEX: usize = 2;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Contrasted {
            contrasted: &self.stretched.image,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Contrast {
            low_percentile: self.config().low_percentile,
            high_percentile: self.config().high_percentile,
            low: self.stretched.low,
            high: self.stretched.high,
            degenerate: self.stretched.degenerate,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Binarized(self.binarize())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.binarize().complete()
    }
}

impl PipelineStage for Binarized {
    const NAME: &str = "binarize";
    const INDEX: usize = 3;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Binarized {
            binary: &self.binary,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Binarize {
            threshold: self.config().threshold,
            ink_pixel_count: count_set(&self.binary),
            total_pixel_count: self.binary.as_raw().len(),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Closed(self.close())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.close().complete()
    }
}

impl PipelineStage for Closed {
    const NAME: &str = "close";
    const INDEX: usize = 4;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Closed {
            closed: &self.closed,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Close {
            radius: self.config().closing_radius,
            ink_before: count_set(&self.binarized.binary),
            ink_after: count_set(&self.closed),
            strokes_before: count_components(&self.binarized.binary, Connectivity::Eight),
            strokes_after: count_components(&self.closed, Connectivity::Eight),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Cleaned(self.clean())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.clean().complete()
    }
}

impl PipelineStage for Cleaned {
    const NAME: &str = "clean";
    const INDEX: usize = 5;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Cleaned {
            cleaned: &self.cleaned,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Clean {
            min_size: self.config().min_speck_size,
            specks_removed: self.specks_removed,
            gaps_filled: self.gaps_filled,
            ink_after: count_set(&self.cleaned),
            strokes_after: count_components(&self.cleaned, Connectivity::Eight),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Skeletonized(self.skeletonize())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.skeletonize().complete()
    }
}

impl PipelineStage for Skeletonized {
    const NAME: &str = "skeletonize";
    const INDEX: usize = 6;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Skeletonized {
            skeleton: &self.skeleton,
            walls: &self.walls,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Skeletonize {
            skeleton_pixel_count: count_set(&self.skeleton),
            wall_pixel_count: count_set(&self.walls),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Labeled(self.label())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.label().complete()
    }
}

impl PipelineStage for Labeled {
    const NAME: &str = "label";
    const INDEX: usize = 7;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Labeled { seeds: &self.seeds }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Label {
            region_count: self.seeds.region_count,
            interior_count: self.seeds.interior_count,
            seed_pixel_count: self.seeds.seed_pixel_count(),
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Diffused(self.diffuse()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.diffuse()?.into_result())
    }
}

impl PipelineStage for Diffused {
    const NAME: &str = "diffuse";
    const INDEX: usize = 8;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Diffused {
            segmentation: &self.diffusion.segmentation,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        let stats = self.diffusion.stats;
        Some(StageMetrics::Diffuse {
            beta: self.labeled.config().beta,
            unknown_count: stats.unknown_count,
            class_count: stats.class_count,
            iterations: stats.iterations,
            max_residual: stats.max_residual,
            unresolved_count: stats.unresolved_count,
        })
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(None)
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
///
/// Use [`From`] conversions to enter the dynamic API from any typed
/// stage, then call [`advance`](Self::advance) in a loop.
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Normalized`].
    Normalized(Normalized),
    /// See [`Contrasted`].
    Contrasted(Contrasted),
    /// See [`Binarized`].
    Binarized(Binarized),
    /// See [`Closed`].
    Closed(Closed),
    /// See [`Cleaned`].
    Cleaned(Cleaned),
    /// See [`Skeletonized`].
    Skeletonized(Skeletonized),
    /// See [`Labeled`].
    Labeled(Labeled),
    /// See [`Diffused`].
    Diffused(Diffused),
}

/// Compile-time guard: if a [`Stage`] variant is added, this match becomes
/// non-exhaustive and the build fails, reminding you to bump [`STAGE_COUNT`].
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Normalized(_)
        | Stage::Contrasted(_)
        | Stage::Binarized(_)
        | Stage::Closed(_)
        | Stage::Cleaned(_)
        | Stage::Skeletonized(_)
        | Stage::Labeled(_)
        | Stage::Diffused(_) => {}
    }
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage, returned unchanged.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Normalized(s) => s.$method($($arg),*),
            Self::Contrasted(s) => s.$method($($arg),*),
            Self::Binarized(s) => s.$method($($arg),*),
            Self::Closed(s) => s.$method($($arg),*),
            Self::Cleaned(s) => s.$method($($arg),*),
            Self::Skeletonized(s) => s.$method($($arg),*),
            Self::Labeled(s) => s.$method($($arg),*),
            Self::Diffused(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Human-readable name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// The output this stage produced.
    pub fn output(&self) -> StageOutput<'_> {
        delegate!(self, output)
    }

    /// Stage-specific metrics for diagnostics.
    ///
    /// Returns `None` for the initial `Pending` stage.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Diffused(_))
    }

    /// Advance to the next stage.
    ///
    /// Returns `Ok(Some(next_stage))` on success, `Ok(None)` if
    /// already complete (the `Diffused` value is consumed), or `Err` if
    /// the transition fails.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a fallible stage transition fails.
    pub fn next(self) -> Result<Option<Self>, PipelineError> {
        delegate!(self, next)
    }

    /// Advance to the next stage, returning `self` unchanged if
    /// already complete.
    ///
    /// This is the loop-friendly version of [`next`](Self::next):
    /// the final stage comes back as [`Advance::Complete`] so you can
    /// still call [`complete`](Self::complete) on it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a fallible stage transition fails.
    pub fn advance(self) -> Result<Advance, PipelineError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        // Non-complete stages always return Ok(Some(_)) from next().
        #[allow(clippy::unreachable)]
        let next = self
            .next()?
            .unwrap_or_else(|| unreachable!("non-complete stage returned None from next()"));
        Ok(Advance::Next(next))
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining fallible stage fails.
    pub fn complete(self) -> Result<StagedResult, PipelineError> {
        delegate!(self, complete)
    }
}

// `PipelineStage`'s associated constants aren't callable via `self.NAME`,
// so the macro goes through this helper.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }
}

macro_rules! stage_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Stage {
                fn from(s: $variant) -> Self {
                    Self::$variant(s)
                }
            }
        )*
    };
}

stage_from!(
    Pending,
    Normalized,
    Contrasted,
    Binarized,
    Closed,
    Cleaned,
    Skeletonized,
    Labeled,
    Diffused,
);

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental segmentation pipeline.
///
/// Created via [`Pipeline::new`], which stores the source image and
/// config without doing any processing. Each stage method consumes the
/// current state and returns the next, making it a compile-time error
/// to skip stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a decoded image and config.
    ///
    /// No processing is performed. Call
    /// [`.normalize()`](Pending::normalize) (or convert to a [`Stage`]
    /// and loop) to begin processing.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image: DynamicImage, config: PipelineConfig) -> Pending {
        Pending {
            config,
            source: image,
        }
    }
}
