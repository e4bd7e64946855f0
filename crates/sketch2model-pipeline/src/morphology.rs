//! Binary morphology on ink masks: closing, dilation and small-object
//! removal.
//!
//! Masks are `GrayImage`s with 255 for set pixels. The structuring
//! element is always an L1 ball, so radius 1 is the 4-neighbour cross.
//! Ink is 8-connected and the space between strokes is 4-connected,
//! which keeps a diagonal stroke a barrier between the regions on
//! either side.

use std::collections::HashSet;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::binarize::SET;

/// Morphological closing (dilate then erode) with the L1 ball of
/// `radius`. Radius 0 returns the mask unchanged.
#[must_use = "returns the closed mask"]
pub fn close(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    imageproc::morphology::close(mask, Norm::L1, radius)
}

/// Dilation with the L1 ball of `radius`. Radius 0 returns the mask
/// unchanged.
#[must_use = "returns the dilated mask"]
pub fn dilate(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    imageproc::morphology::dilate(mask, Norm::L1, radius)
}

/// Swap set and clear pixels.
#[must_use = "returns the inverted mask"]
pub fn invert(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] == 0 {
            Luma([SET])
        } else {
            Luma([0])
        }
    })
}

/// Number of connected set components in `mask`.
#[must_use]
pub fn count_components(mask: &GrayImage, connectivity: Connectivity) -> usize {
    let labels = connected_components(mask, connectivity, Luma([0u8]));
    labels
        .pixels()
        .map(|p| p.0[0])
        .filter(|&l| l != 0)
        .collect::<HashSet<_>>()
        .len()
}

/// Clear every set component with fewer than `min_size` pixels.
///
/// Returns the cleaned mask and the number of components removed.
/// `min_size` 0 or 1 removes nothing.
#[must_use = "returns the cleaned mask"]
pub fn remove_small_objects(
    mask: &GrayImage,
    min_size: usize,
    connectivity: Connectivity,
) -> (GrayImage, usize) {
    if min_size <= 1 {
        return (mask.clone(), 0);
    }

    let labels = connected_components(mask, connectivity, Luma([0u8]));
    let mut sizes: Vec<usize> = Vec::new();
    for p in labels.pixels() {
        let label = p.0[0] as usize;
        if label == 0 {
            continue;
        }
        if label >= sizes.len() {
            sizes.resize(label + 1, 0);
        }
        sizes[label] += 1;
    }

    let removed = sizes.iter().filter(|&&s| s > 0 && s < min_size).count();
    let cleaned = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        if label != 0 && sizes[label] >= min_size {
            Luma([SET])
        } else {
            Luma([0])
        }
    });
    (cleaned, removed)
}

/// Fill enclosed 4-connected gaps (clear components) smaller than
/// `min_size`.
///
/// Returns the filled mask and the number of gaps filled.
#[must_use = "returns the filled mask"]
pub fn fill_small_gaps(mask: &GrayImage, min_size: usize) -> (GrayImage, usize) {
    let (gaps, filled) = remove_small_objects(&invert(mask), min_size, Connectivity::Four);
    (invert(&gaps), filled)
}
