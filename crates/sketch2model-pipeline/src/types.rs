//! Shared types for the sketch2model pipeline.

use std::collections::BTreeSet;
use std::num::NonZeroU32;

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::labeling::SeedLabels;
use crate::solver::SolverError;

/// Re-export `DynamicImage` so callers can hand decoded pixel grids to
/// the pipeline without depending on `image` directly.
pub use image::DynamicImage;

/// Re-export `GrayImage` so downstream crates can reference the binary
/// intermediate masks (255 = set, 0 = clear).
pub use image::GrayImage;

/// Single-channel floating point raster used between the normalization
/// stages. Values are luminance-like; after contrast stretching they lie
/// in `[0, 1]`.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Integer label raster. `0` means "unlabeled"; `1..=N` are region ids.
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Configuration for the segmentation pipeline.
///
/// The defaults are the documented fixed constants of the algorithm.
/// They are exposed so that experiments (and the bench CLI) can vary
/// them; [`PipelineConfig::validate`] rejects values the stages cannot
/// work with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sigma of the large Gaussian used to estimate slow shading
    /// variations. Must be finite and positive.
    pub shading_sigma: f32,

    /// Percentile mapped to 0 by the contrast stretch (0-100).
    pub low_percentile: f32,

    /// Percentile mapped to 1 by the contrast stretch (0-100).
    /// Must be greater than `low_percentile`.
    pub high_percentile: f32,

    /// A pixel is ink when its stretched value is at or below this
    /// threshold (dark strokes on light paper).
    pub threshold: f32,

    /// Radius (L1 norm) of the structuring element used by the closing
    /// that bridges small stroke gaps. `0` disables closing.
    pub closing_radius: u8,

    /// Ink specks and enclosed gaps with fewer pixels than this are
    /// removed. `0` disables speck removal.
    pub min_speck_size: usize,

    /// Sharpness of the random-walker edge weights. Larger values make
    /// wall pixels a stronger barrier to diffusion.
    pub beta: f64,

    /// Relative residual at which the conjugate gradient solve is
    /// considered converged (`‖r‖ ≤ tol · ‖b‖`).
    pub solver_tolerance: f64,

    /// Iteration cap for each conjugate gradient solve.
    pub solver_max_iterations: usize,
}

impl PipelineConfig {
    /// Default shading sigma.
    pub const DEFAULT_SHADING_SIGMA: f32 = 21.0;
    /// Default low contrast percentile.
    pub const DEFAULT_LOW_PERCENTILE: f32 = 2.0;
    /// Default high contrast percentile.
    pub const DEFAULT_HIGH_PERCENTILE: f32 = 98.0;
    /// Default binarization threshold.
    pub const DEFAULT_THRESHOLD: f32 = 0.5;
    /// Default closing radius (the radius-1 disk).
    pub const DEFAULT_CLOSING_RADIUS: u8 = 1;
    /// Default minimum speck size in pixels.
    pub const DEFAULT_MIN_SPECK_SIZE: usize = 64;
    /// Default random-walker beta.
    pub const DEFAULT_BETA: f64 = 1.0;
    /// Default conjugate gradient tolerance.
    pub const DEFAULT_SOLVER_TOLERANCE: f64 = 1e-6;
    /// Default conjugate gradient iteration cap.
    pub const DEFAULT_SOLVER_MAX_ITERATIONS: usize = 10_000;

    /// Check that every parameter is usable by the pipeline stages.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.shading_sigma.is_finite() && self.shading_sigma > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "shading_sigma must be finite and positive, got {}",
                self.shading_sigma
            )));
        }
        let percentile_range = 0.0..=100.0;
        if !percentile_range.contains(&self.low_percentile)
            || !percentile_range.contains(&self.high_percentile)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "percentiles must lie in [0, 100], got ({}, {})",
                self.low_percentile, self.high_percentile
            )));
        }
        if self.low_percentile >= self.high_percentile {
            return Err(PipelineError::InvalidConfig(format!(
                "low_percentile ({}) must be below high_percentile ({})",
                self.low_percentile, self.high_percentile
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(PipelineError::InvalidConfig(format!(
                "threshold must lie in [0, 1], got {}",
                self.threshold
            )));
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "beta must be finite and non-negative, got {}",
                self.beta
            )));
        }
        if !(self.solver_tolerance.is_finite() && self.solver_tolerance > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "solver_tolerance must be finite and positive, got {}",
                self.solver_tolerance
            )));
        }
        if self.solver_max_iterations == 0 {
            return Err(PipelineError::InvalidConfig(
                "solver_max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shading_sigma: Self::DEFAULT_SHADING_SIGMA,
            low_percentile: Self::DEFAULT_LOW_PERCENTILE,
            high_percentile: Self::DEFAULT_HIGH_PERCENTILE,
            threshold: Self::DEFAULT_THRESHOLD,
            closing_radius: Self::DEFAULT_CLOSING_RADIUS,
            min_speck_size: Self::DEFAULT_MIN_SPECK_SIZE,
            beta: Self::DEFAULT_BETA,
            solver_tolerance: Self::DEFAULT_SOLVER_TOLERANCE,
            solver_max_iterations: Self::DEFAULT_SOLVER_MAX_ITERATIONS,
        }
    }
}

/// Final label of a single pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    /// The pixel belongs to the region with this id.
    Label(NonZeroU32),
    /// The pixel lies in a part of the image no seed can reach.
    Unresolved,
}

impl Region {
    /// The region id, or `None` for [`Region::Unresolved`].
    #[must_use]
    pub const fn label(self) -> Option<NonZeroU32> {
        match self {
            Self::Label(id) => Some(id),
            Self::Unresolved => None,
        }
    }
}

/// The completed label map: one [`Region`] per pixel, row-major.
///
/// Unlike the seed [`LabelImage`], this never holds a `0`; pixels that
/// could not be resolved carry [`Region::Unresolved`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segmentation {
    dimensions: Dimensions,
    regions: Vec<Region>,
}

impl Segmentation {
    /// Build a segmentation from row-major regions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `regions` does not
    /// hold exactly `width * height` entries.
    pub fn new(dimensions: Dimensions, regions: Vec<Region>) -> Result<Self, PipelineError> {
        if regions.len() as u64 != dimensions.pixel_count() {
            return Err(PipelineError::InvalidConfig(format!(
                "segmentation of {}x{} needs {} regions, got {}",
                dimensions.width,
                dimensions.height,
                dimensions.pixel_count(),
                regions.len()
            )));
        }
        Ok(Self {
            dimensions,
            regions,
        })
    }

    /// Convert a seed raster into a segmentation, marking every
    /// unlabeled (`0`) pixel as [`Region::Unresolved`].
    #[must_use]
    pub fn from_seeds(seeds: &LabelImage) -> Self {
        let regions = seeds
            .pixels()
            .map(|p| NonZeroU32::new(p.0[0]).map_or(Region::Unresolved, Region::Label))
            .collect();
        Self {
            dimensions: Dimensions {
                width: seeds.width(),
                height: seeds.height(),
            },
            regions,
        }
    }

    /// Dimensions of the label map.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// The region at `(x, y)`, or `None` outside the map.
    #[must_use]
    pub fn region(&self, x: u32, y: u32) -> Option<Region> {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        let index = y as usize * self.dimensions.width as usize + x as usize;
        self.regions.get(index).copied()
    }

    /// All regions in row-major order.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The distinct region ids present, in ascending order.
    #[must_use]
    pub fn labels(&self) -> BTreeSet<NonZeroU32> {
        self.regions.iter().filter_map(|r| r.label()).collect()
    }

    /// Number of pixels marked [`Region::Unresolved`].
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| matches!(r, Region::Unresolved))
            .count()
    }
}

/// Result of running the full pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segmented {
    /// The completed label map at working (decimated) resolution.
    pub segmentation: Segmentation,

    /// Number of distinct seed regions found by component labeling.
    ///
    /// Every region counts, including the background around the drawing
    /// and any blob that touches the image border, the same way a plain
    /// connected-component labeling of the page would count them. A
    /// single closed circle therefore gives 2. For the enclosed regions
    /// alone use [`SeedLabels::interior_count`](crate::SeedLabels::interior_count)
    /// via [`crate::segment_staged`].
    pub region_count: u32,
}

/// Non-fatal conditions met while processing an image.
///
/// Each one is resolved by a documented fallback and logged; they are
/// collected here so callers can tell a clean run from a degraded one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// The contrast percentiles collapsed onto (almost) one value; the
    /// stretch was skipped and values were only clipped to `[0, 1]`.
    DegenerateContrast {
        /// Value at the low percentile.
        low: f32,
        /// Value at the high percentile.
        high: f32,
    },
    /// Some pixels are in a part of the graph that contains no seed and
    /// were marked [`Region::Unresolved`].
    DisconnectedSeed {
        /// Number of unresolved pixels.
        pixels: usize,
    },
}

/// Result of running the pipeline with all intermediate stage outputs
/// preserved, for visualization and debugging.
///
/// Uses custom `Serialize`/`Deserialize` implementations because the
/// `image` buffers do not implement serde traits. Rasters are serialized
/// as `(width, height, raw_pixels)` tuples.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Dimensions of the source image before decimation.
    pub source_dimensions: Dimensions,
    /// Decimated luminance.
    pub grayscale: FloatImage,
    /// Luminance with slow shading divided out.
    pub flattened: FloatImage,
    /// Percentile-stretched values in `[0, 1]`.
    pub contrasted: FloatImage,
    /// Thresholded ink mask.
    pub binary: GrayImage,
    /// Ink mask after morphological closing.
    pub closed: GrayImage,
    /// Ink mask after speck and small-gap removal.
    pub cleaned: GrayImage,
    /// One-pixel skeleton of the cleaned ink.
    pub skeleton: GrayImage,
    /// Final wall mask (dilated skeleton).
    pub walls: GrayImage,
    /// Seed labels before diffusion.
    pub seeds: SeedLabels,
    /// Completed label map.
    pub segmentation: Segmentation,
    /// Non-fatal conditions met along the way.
    pub warnings: Vec<PipelineWarning>,
    /// Working (decimated) dimensions.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// Strip the intermediates, keeping only the pipeline output.
    #[must_use]
    pub fn into_segmented(self) -> Segmented {
        Segmented {
            segmentation: self.segmentation,
            region_count: self.seeds.region_count,
        }
    }
}

/// Serde-compatible proxy for `StagedResult`.
#[derive(Serialize, Deserialize)]
struct StagedResultProxy {
    source_dimensions: Dimensions,
    grayscale: (u32, u32, Vec<f32>),
    flattened: (u32, u32, Vec<f32>),
    contrasted: (u32, u32, Vec<f32>),
    binary: (u32, u32, Vec<u8>),
    closed: (u32, u32, Vec<u8>),
    cleaned: (u32, u32, Vec<u8>),
    skeleton: (u32, u32, Vec<u8>),
    walls: (u32, u32, Vec<u8>),
    seeds: (u32, u32, Vec<u32>),
    region_count: u32,
    interior_count: u32,
    exterior_labels: Vec<u32>,
    segmentation: Segmentation,
    warnings: Vec<PipelineWarning>,
    dimensions: Dimensions,
}

fn raster<P: image::Pixel>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> (u32, u32, Vec<P::Subpixel>) {
    (image.width(), image.height(), image.as_raw().clone())
}

fn from_raster<P: image::Pixel, E: serde::de::Error>(
    (width, height, raw): (u32, u32, Vec<P::Subpixel>),
    what: &str,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, E> {
    ImageBuffer::from_raw(width, height, raw)
        .ok_or_else(|| E::custom(format!("invalid {what} image dimensions")))
}

impl Serialize for StagedResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = StagedResultProxy {
            source_dimensions: self.source_dimensions,
            grayscale: raster(&self.grayscale),
            flattened: raster(&self.flattened),
            contrasted: raster(&self.contrasted),
            binary: raster(&self.binary),
            closed: raster(&self.closed),
            cleaned: raster(&self.cleaned),
            skeleton: raster(&self.skeleton),
            walls: raster(&self.walls),
            seeds: raster(&self.seeds.labels),
            region_count: self.seeds.region_count,
            interior_count: self.seeds.interior_count,
            exterior_labels: self.seeds.exterior_labels.clone(),
            segmentation: self.segmentation.clone(),
            warnings: self.warnings.clone(),
            dimensions: self.dimensions,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StagedResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = StagedResultProxy::deserialize(deserializer)?;

        Ok(Self {
            source_dimensions: proxy.source_dimensions,
            grayscale: from_raster(proxy.grayscale, "grayscale")?,
            flattened: from_raster(proxy.flattened, "flattened")?,
            contrasted: from_raster(proxy.contrasted, "contrasted")?,
            binary: from_raster(proxy.binary, "binary")?,
            closed: from_raster(proxy.closed, "closed")?,
            cleaned: from_raster(proxy.cleaned, "cleaned")?,
            skeleton: from_raster(proxy.skeleton, "skeleton")?,
            walls: from_raster(proxy.walls, "walls")?,
            seeds: SeedLabels {
                labels: from_raster(proxy.seeds, "seeds")?,
                region_count: proxy.region_count,
                interior_count: proxy.interior_count,
                exterior_labels: proxy.exterior_labels,
            },
            segmentation: proxy.segmentation,
            warnings: proxy.warnings,
            dimensions: proxy.dimensions,
        })
    }
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The input pixel grid has zero width or height.
    #[error("input image is empty")]
    EmptyInput,

    /// The input is too small to survive stride-2 decimation.
    #[error("input image {width}x{height} is too small to decimate")]
    TooSmall {
        /// Source width in pixels.
        width: u32,
        /// Source height in pixels.
        height: u32,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The diffusion solve for one label failed.
    #[error("random walker solve for label {label} failed: {source}")]
    Solver {
        /// Label whose system failed.
        label: u32,
        /// What went wrong.
        #[source]
        source: SolverError,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn label(n: u32) -> Region {
        Region::Label(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn default_config_matches_documented_constants() {
        let config = PipelineConfig::default();
        assert!((config.shading_sigma - 21.0).abs() < f32::EPSILON);
        assert!((config.low_percentile - 2.0).abs() < f32::EPSILON);
        assert!((config.high_percentile - 98.0).abs() < f32::EPSILON);
        assert!((config.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.closing_radius, 1);
        assert!((config.beta - 1.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_percentiles() {
        let config = PipelineConfig {
            low_percentile: 90.0,
            high_percentile: 10.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_non_positive_sigma() {
        let config = PipelineConfig {
            shading_sigma: 0.0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            shading_sigma: f32::NAN,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_solver_settings() {
        let config = PipelineConfig {
            solver_tolerance: 0.0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            solver_max_iterations: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_missing_fields() {
        let config: PipelineConfig = serde_json::from_str(r#"{"closing_radius": 3}"#).unwrap();
        assert_eq!(config.closing_radius, 3);
        assert_eq!(config.min_speck_size, PipelineConfig::DEFAULT_MIN_SPECK_SIZE);
    }

    #[test]
    fn segmentation_new_checks_length() {
        let dims = Dimensions {
            width: 2,
            height: 2,
        };
        assert!(Segmentation::new(dims, vec![label(1); 3]).is_err());
        assert!(Segmentation::new(dims, vec![label(1); 4]).is_ok());
    }

    #[test]
    fn segmentation_accessors() {
        let dims = Dimensions {
            width: 3,
            height: 1,
        };
        let seg = Segmentation::new(dims, vec![label(2), Region::Unresolved, label(1)]).unwrap();
        assert_eq!(seg.region(0, 0), Some(label(2)));
        assert_eq!(seg.region(1, 0), Some(Region::Unresolved));
        assert_eq!(seg.region(3, 0), None);
        assert_eq!(seg.unresolved_count(), 1);
        let labels: Vec<u32> = seg.labels().into_iter().map(NonZeroU32::get).collect();
        assert_eq!(labels, vec![1, 2]);
    }

    #[test]
    fn segmentation_from_seeds_marks_zero_unresolved() {
        let seeds = LabelImage::from_fn(3, 1, |x, _| Luma([x]));
        let seg = Segmentation::from_seeds(&seeds);
        assert_eq!(seg.region(0, 0), Some(Region::Unresolved));
        assert_eq!(seg.region(2, 0), Some(label(2)));
    }

    #[test]
    fn pipeline_error_serde_round_trip() {
        let err = PipelineError::Solver {
            label: 3,
            source: SolverError::NotConverged {
                iterations: 10,
                residual: 0.5,
                tolerance: 1e-6,
            },
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: PipelineError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, PipelineError::Solver { label: 3, .. }));
        assert!(err.to_string().contains("label 3"));
    }
}
