//! Separable Gaussian blur on floating point rasters.
//!
//! `imageproc::filter::gaussian_blur_f32` only blurs within the input's
//! subpixel type and clamps at the border. Shading estimation needs a
//! wide kernel on `f32` data with a mirrored border, so the filter is
//! applied here as two 1-D passes accumulating in `f64`.

use image::Luma;

use crate::types::FloatImage;

/// Kernel half-width in units of sigma.
const TRUNCATE: f32 = 4.0;

/// Blur `image` with a Gaussian of standard deviation `sigma`.
///
/// The kernel is truncated at `4 * sigma` and the border is handled by
/// reflection (`d c b a | a b c d | d c b a`). Non-positive sigma values
/// return the image unchanged.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &FloatImage, sigma: f32) -> FloatImage {
    if sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let kernel = kernel(sigma);
    let (w, h) = image.dimensions();

    let horizontal = FloatImage::from_fn(w, h, |x, y| {
        Luma([convolve(&kernel, x, w, |i| image.get_pixel(i, y).0[0])])
    });
    FloatImage::from_fn(w, h, |x, y| {
        Luma([convolve(&kernel, y, h, |i| horizontal.get_pixel(x, i).0[0])])
    })
}

/// Normalized 1-D Gaussian weights, index 0 at offset `-radius`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn kernel(sigma: f32) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as i64;
    let sigma = f64::from(sigma);
    let denom = 2.0 * sigma * sigma;
    let mut weights: Vec<f64> = (-radius..=radius)
        .map(|offset| {
            #[allow(clippy::cast_precision_loss)]
            let d = offset as f64;
            (-d * d / denom).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    for weight in &mut weights {
        *weight /= total;
    }
    weights
}

/// Apply `kernel` centred on `center` along an axis of length `len`.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn convolve(kernel: &[f64], center: u32, len: u32, sample: impl Fn(u32) -> f32) -> f32 {
    let radius = (kernel.len() / 2) as i64;
    let center = i64::from(center);
    let acc: f64 = kernel
        .iter()
        .enumerate()
        .map(|(k, weight)| {
            let i = reflect(center + k as i64 - radius, i64::from(len));
            weight * f64::from(sample(i))
        })
        .sum();
    acc as f32
}

/// Map an out-of-range index back into `0..len` by mirroring about the
/// edges, including the edge pixel itself.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn reflect(i: i64, len: i64) -> u32 {
    let period = 2 * len;
    let m = i.rem_euclid(period);
    (if m < len { m } else { period - 1 - m }) as u32
}
