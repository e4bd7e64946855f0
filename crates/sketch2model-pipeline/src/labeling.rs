//! Seed labeling of the regions between walls.
//!
//! Non-wall space is split into 4-connected components. Components that
//! touch the image border are open (the sketch does not enclose them)
//! and are merged with the wall pixels into exterior blobs; every
//! enclosed component is an interior blob. Both kinds share one
//! numbering, `1..=N` in raster order of first appearance, and wall
//! pixels are finally reset to 0 so the random walker can fill them.

use std::collections::{HashMap, HashSet};

use image::Luma;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::morphology::invert;
use crate::types::{GrayImage, LabelImage};

/// Seed labels handed to the random walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedLabels {
    /// `0` on wall pixels, a region id everywhere else.
    pub labels: LabelImage,
    /// Number of distinct region ids.
    pub region_count: u32,
    /// How many of those ids are enclosed (interior) regions.
    pub interior_count: u32,
    /// Ids of the exterior blobs, ascending.
    pub exterior_labels: Vec<u32>,
}

impl SeedLabels {
    /// Number of labeled (non-wall) pixels.
    #[must_use]
    pub fn seed_pixel_count(&self) -> usize {
        self.labels.pixels().filter(|p| p.0[0] != 0).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Blob {
    /// Enclosed non-wall component, by its open-space component id.
    Interior(u32),
    /// Border-connected space plus walls, by its exterior component id.
    Exterior(u32),
}

/// Assign seed labels to the space between `walls`.
#[must_use = "returns the seed labels"]
pub fn label_regions(walls: &GrayImage) -> SeedLabels {
    let (w, h) = walls.dimensions();
    if w == 0 || h == 0 {
        return SeedLabels {
            labels: LabelImage::new(w, h),
            region_count: 0,
            interior_count: 0,
            exterior_labels: Vec::new(),
        };
    }
    let open = invert(walls);
    let open_components = connected_components(&open, Connectivity::Four, Luma([0u8]));

    let mut border = HashSet::new();
    for x in 0..w {
        border.insert(open_components.get_pixel(x, 0).0[0]);
        border.insert(open_components.get_pixel(x, h - 1).0[0]);
    }
    for y in 0..h {
        border.insert(open_components.get_pixel(0, y).0[0]);
        border.insert(open_components.get_pixel(w - 1, y).0[0]);
    }
    border.remove(&0);

    let is_interior = |x: u32, y: u32| {
        let c = open_components.get_pixel(x, y).0[0];
        c != 0 && !border.contains(&c)
    };

    let exterior = GrayImage::from_fn(w, h, |x, y| {
        if is_interior(x, y) {
            Luma([0])
        } else {
            Luma([255])
        }
    });
    let exterior_components = connected_components(&exterior, Connectivity::Four, Luma([0u8]));

    let mut ids: HashMap<Blob, u32> = HashMap::new();
    let mut interior_count = 0;
    let mut exterior_labels = Vec::new();
    let mut labels = LabelImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            if walls.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            let blob = if is_interior(x, y) {
                Blob::Interior(open_components.get_pixel(x, y).0[0])
            } else {
                Blob::Exterior(exterior_components.get_pixel(x, y).0[0])
            };
            let next = u32::try_from(ids.len()).map_or(u32::MAX, |n| n + 1);
            let id = *ids.entry(blob).or_insert_with(|| {
                match blob {
                    Blob::Interior(_) => interior_count += 1,
                    Blob::Exterior(_) => exterior_labels.push(next),
                }
                next
            });
            labels.put_pixel(x, y, Luma([id]));
        }
    }

    SeedLabels {
        labels,
        region_count: u32::try_from(ids.len()).unwrap_or(u32::MAX),
        interior_count,
        exterior_labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::binarize::SET;

    fn walls_from(rows: &[&str]) -> GrayImage {
        let h = rows.len() as u32;
        let w = rows[0].len() as u32;
        GrayImage::from_fn(w, h, |x, y| {
            if rows[y as usize].as_bytes()[x as usize] == b'#' {
                Luma([SET])
            } else {
                Luma([0])
            }
        })
    }

    fn label(seeds: &SeedLabels, x: u32, y: u32) -> u32 {
        seeds.labels.get_pixel(x, y).0[0]
    }

    fn assert_zero_exactly_on_walls(walls: &GrayImage, seeds: &SeedLabels) {
        for (x, y, p) in walls.enumerate_pixels() {
            assert_eq!(
                p.0[0] != 0,
                label(seeds, x, y) == 0,
                "pixel ({x}, {y}): wall {} label {}",
                p.0[0],
                label(seeds, x, y)
            );
        }
    }

    #[test]
    fn blank_page_is_one_exterior_region() {
        let walls = GrayImage::new(6, 4);
        let seeds = label_regions(&walls);
        assert_eq!(seeds.region_count, 1);
        assert_eq!(seeds.interior_count, 0);
        assert_eq!(seeds.exterior_labels, vec![1]);
        assert!(seeds.labels.pixels().all(|p| p.0[0] == 1));
    }

    #[test]
    fn closed_square_gives_interior_and_exterior() {
        let walls = walls_from(&[
            "........", //
            ".######.",
            ".#....#.",
            ".#....#.",
            ".######.",
            "........",
        ]);
        let seeds = label_regions(&walls);
        assert_eq!(seeds.region_count, 2);
        assert_eq!(seeds.interior_count, 1);
        assert_eq!(seeds.exterior_labels, vec![1]);
        assert_eq!(label(&seeds, 0, 0), 1);
        assert_eq!(label(&seeds, 3, 2), 2);
        assert_zero_exactly_on_walls(&walls, &seeds);
    }

    #[test]
    fn diagonal_gap_does_not_leak() {
        // The corner is only closed diagonally; under 4-connectivity the
        // inside is still enclosed.
        let walls = walls_from(&[
            ".......", //
            ".#####.",
            ".#...#.",
            ".#...#.",
            ".####..",
            ".....#.",
        ]);
        let seeds = label_regions(&walls);
        assert_eq!(seeds.interior_count, 1);
    }

    #[test]
    fn open_shape_is_cleared_into_exterior() {
        let walls = walls_from(&[
            "........", //
            ".######.",
            ".#....#.",
            ".#......",
            ".######.",
            "........",
        ]);
        let seeds = label_regions(&walls);
        assert_eq!(seeds.region_count, 1);
        assert_eq!(seeds.interior_count, 0);
        assert_eq!(label(&seeds, 3, 2), label(&seeds, 0, 0));
    }

    #[test]
    fn border_to_border_wall_keeps_one_exterior() {
        let walls = walls_from(&[
            "..#..", //
            "..#..",
            "..#..",
        ]);
        let seeds = label_regions(&walls);
        assert_eq!(seeds.region_count, 1);
        assert_eq!(label(&seeds, 0, 0), label(&seeds, 4, 2));
        assert_zero_exactly_on_walls(&walls, &seeds);
    }

    #[test]
    fn interior_ids_follow_raster_order() {
        let walls = walls_from(&[
            "...........", //
            ".####.####.",
            ".#..#.#..#.",
            ".####.#..#.",
            "......####.",
            "...........",
        ]);
        let seeds = label_regions(&walls);
        assert_eq!(seeds.region_count, 3);
        assert_eq!(seeds.interior_count, 2);
        assert_eq!(label(&seeds, 2, 2), 2);
        assert_eq!(label(&seeds, 7, 2), 3);
        assert_eq!(seeds.seed_pixel_count(), 66 - 22);
    }

    #[test]
    fn all_walls_have_no_regions() {
        let walls = GrayImage::from_pixel(3, 3, Luma([SET]));
        let seeds = label_regions(&walls);
        assert_eq!(seeds.region_count, 0);
        assert!(seeds.exterior_labels.is_empty());
        assert_eq!(seeds.seed_pixel_count(), 0);
    }
}
