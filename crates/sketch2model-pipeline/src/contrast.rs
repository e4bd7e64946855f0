//! Percentile contrast stretch.
//!
//! Maps the `[low, high]` percentile band of the flattened image onto
//! `[0, 1]`, clipping values outside the band.

use image::Luma;
use tracing::warn;

use crate::types::FloatImage;

/// Percentile spreads below this are treated as a flat image.
pub const FLAT_CONTRAST_EPSILON: f32 = 1e-3;

/// Output of [`stretch_contrast`].
#[derive(Debug, Clone)]
pub struct Stretched {
    /// Stretched values in `[0, 1]`.
    pub image: FloatImage,
    /// Value found at the low percentile.
    pub low: f32,
    /// Value found at the high percentile.
    pub high: f32,
    /// `true` when the percentiles (nearly) coincided and the image was
    /// only clipped to `[0, 1]`.
    pub degenerate: bool,
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
/// Value at percentile `p` (0-100) of the ascending, non-empty `sorted`,
/// linearly interpolating between the two closest ranks.
fn percentile_sorted(sorted: &[f32], p: f32) -> f32 {
    let last = sorted.len() - 1;
    let rank = f64::from(p.clamp(0.0, 100.0)) / 100.0 * last as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(last);
    let frac = rank - lower as f64;
    let a = f64::from(sorted[lower]);
    let b = f64::from(sorted[upper]);
    (a + frac * (b - a)) as f32
}

/// Stretch `image` so that the `low_pct` percentile maps to 0 and the
/// `high_pct` percentile maps to 1.
///
/// When the two percentiles are closer than [`FLAT_CONTRAST_EPSILON`]
/// there is no contrast to stretch; the values are clipped to `[0, 1]`
/// instead and the result is flagged as degenerate.
#[must_use = "returns the stretched image"]
pub fn stretch_contrast(image: &FloatImage, low_pct: f32, high_pct: f32) -> Stretched {
    let mut sorted = image.as_raw().clone();
    if sorted.is_empty() {
        return Stretched {
            image: image.clone(),
            low: 0.0,
            high: 0.0,
            degenerate: true,
        };
    }
    sorted.sort_unstable_by(f32::total_cmp);
    let low = percentile_sorted(&sorted, low_pct);
    let high = percentile_sorted(&sorted, high_pct);

    let spread = high - low;
    if spread.is_nan() || spread < FLAT_CONTRAST_EPSILON {
        warn!(low, high, "contrast percentiles coincide; clipping only");
        let clipped = FloatImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([image.get_pixel(x, y).0[0].clamp(0.0, 1.0)])
        });
        return Stretched {
            image: clipped,
            low,
            high,
            degenerate: true,
        };
    }

    let stretched = FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0].clamp(low, high);
        Luma([((v - low) / spread).clamp(0.0, 1.0)])
    });
    Stretched {
        image: stretched,
        low,
        high,
        degenerate: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates_between_ranks() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((percentile_sorted(&values, 0.0) - 1.0).abs() < 1e-6);
        assert!((percentile_sorted(&values, 50.0) - 3.0).abs() < 1e-6);
        assert!((percentile_sorted(&values, 100.0) - 5.0).abs() < 1e-6);
        // rank 0.1 * 4 = 0.4 between 1 and 2.
        assert!((percentile_sorted(&values, 10.0) - 1.4).abs() < 1e-6);
        assert!((percentile_sorted(&values, 150.0) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn empty_image_is_degenerate() {
        let out = stretch_contrast(&FloatImage::new(0, 0), 2.0, 98.0);
        assert!(out.degenerate);
        assert!(out.low.abs() < f32::EPSILON);
        assert!(out.high.abs() < f32::EPSILON);
    }

    #[test]
    fn stretch_maps_percentiles_to_unit_range() {
        // 0..=99 across a 100x1 row.
        let img = FloatImage::from_fn(100, 1, |x, _| Luma([x as f32]));
        let out = stretch_contrast(&img, 2.0, 98.0);
        assert!(!out.degenerate);
        assert!((out.low - 1.98).abs() < 1e-4, "low {}", out.low);
        assert!((out.high - 97.02).abs() < 1e-3, "high {}", out.high);
        assert!(out.image.get_pixel(0, 0).0[0].abs() < f32::EPSILON);
        assert!((out.image.get_pixel(99, 0).0[0] - 1.0).abs() < f32::EPSILON);
        let mid = out.image.get_pixel(50, 0).0[0];
        assert!((mid - 0.5).abs() < 0.02, "mid {mid}");
    }

    #[test]
    fn flat_image_is_clipped_not_divided() {
        let img = FloatImage::from_pixel(10, 10, Luma([1.0]));
        let out = stretch_contrast(&img, 2.0, 98.0);
        assert!(out.degenerate);
        assert!(out.image.pixels().all(|p| (p.0[0] - 1.0).abs() < f32::EPSILON));

        let dark = FloatImage::from_pixel(10, 10, Luma([-0.5]));
        let out = stretch_contrast(&dark, 2.0, 98.0);
        assert!(out.degenerate);
        assert!(out.image.pixels().all(|p| p.0[0] == 0.0));
    }

    #[test]
    fn output_stays_in_unit_range() {
        let img = FloatImage::from_fn(16, 16, |x, y| Luma([(x * y) as f32 / 10.0 - 3.0]));
        let out = stretch_contrast(&img, 2.0, 98.0);
        assert!(
            out.image
                .pixels()
                .all(|p| (0.0..=1.0).contains(&p.0[0]))
        );
    }
}
