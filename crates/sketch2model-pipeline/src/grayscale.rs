//! Decimation and luminance conversion.
//!
//! This is the first step in the pipeline: an already-decoded
//! `DynamicImage` in, a half-resolution `FloatImage` of perceptual
//! luminance in `[0, 1]` out.

use image::{DynamicImage, Luma};

use crate::types::{FloatImage, PipelineError};

/// Row and column stride of the decimation step.
pub const DECIMATION_STRIDE: u32 = 2;

/// Keep every second row and column (starting at 0) and convert to
/// luminance.
///
/// The output is `(width / 2, height / 2)`; an odd trailing row or
/// column is dropped. Luminance uses the Rec. 709 weights
/// (`0.2126 R + 0.7152 G + 0.0722 B`) that `image` applies for its
/// luma conversions. Alpha is ignored.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if the image has zero width or
/// height, and [`PipelineError::TooSmall`] if decimation would leave
/// nothing (a one-pixel-wide or one-pixel-tall source).
#[must_use = "returns the decimated luminance image"]
pub fn decimate_luma(image: &DynamicImage) -> Result<FloatImage, PipelineError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(PipelineError::EmptyInput);
    }

    let (out_w, out_h) = (width / DECIMATION_STRIDE, height / DECIMATION_STRIDE);
    if out_w == 0 || out_h == 0 {
        return Err(PipelineError::TooSmall { width, height });
    }

    let luma = image.to_luma32f();
    Ok(FloatImage::from_fn(out_w, out_h, |x, y| {
        let v = luma
            .get_pixel(x * DECIMATION_STRIDE, y * DECIMATION_STRIDE)
            .0[0];
        Luma([v.clamp(0.0, 1.0)])
    }))
}
