//! Thresholding of the stretched image into an ink mask.

use image::{GrayImage, Luma};

use crate::types::FloatImage;

/// Mask value of a set pixel.
pub const SET: u8 = 255;

/// Mark every pixel at or below `threshold` as ink (255).
///
/// Strokes are dark on light paper, so ink is the low side of the
/// threshold.
#[must_use = "returns the ink mask"]
pub fn binarize(image: &FloatImage, threshold: f32) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y).0[0] <= threshold {
            Luma([SET])
        } else {
            Luma([0])
        }
    })
}

/// Number of set pixels in `mask`.
#[must_use]
pub fn count_set(mask: &GrayImage) -> usize {
    mask.as_raw().iter().filter(|&&v| v != 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dark_pixels_become_ink() {
        let img = FloatImage::from_fn(4, 1, |x, _| Luma([x as f32 / 3.0]));
        let mask = binarize(&img, 0.5);
        let values: Vec<u8> = mask.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![255, 255, 0, 0]);
        assert_eq!(count_set(&mask), 2);
    }

    #[test]
    fn threshold_is_inclusive() {
        let img = FloatImage::from_pixel(2, 2, Luma([0.5]));
        assert_eq!(count_set(&binarize(&img, 0.5)), 4);
    }

    #[test]
    fn white_page_has_no_ink() {
        let img = FloatImage::from_pixel(8, 8, Luma([1.0]));
        assert_eq!(count_set(&binarize(&img, 0.5)), 0);
    }
}
