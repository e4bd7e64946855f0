//! Shading flattening.
//!
//! Divides each pixel by the local root-mean-square brightness so that
//! slow illumination gradients (a photo of a page lit from one side)
//! stop competing with the strokes.

use image::Luma;

use crate::blur::gaussian_blur;
use crate::types::FloatImage;

/// Local energy at or below this is treated as a pure black
/// neighbourhood.
const MIN_ENERGY: f32 = 1e-12;

/// Compute `I / sqrt(G_sigma(I^2))`.
///
/// Where the smoothed energy vanishes the output is 0.
#[must_use = "returns the shading-flattened image"]
pub fn flatten_shading(image: &FloatImage, sigma: f32) -> FloatImage {
    let squared = FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        Luma([v * v])
    });
    let energy = gaussian_blur(&squared, sigma);

    FloatImage::from_fn(image.width(), image.height(), |x, y| {
        let e = energy.get_pixel(x, y).0[0];
        if e <= MIN_ENERGY {
            Luma([0.0])
        } else {
            Luma([image.get_pixel(x, y).0[0] / e.sqrt()])
        }
    })
}
