//! Skeletonization of the repaired ink mask into one-pixel walls.
//!
//! Uses Zhang-Suen thinning: two alternating subiterations, each
//! deleting (simultaneously) the boundary pixels whose removal keeps
//! the 8-connected topology intact, repeated until nothing changes.
//! Pixels outside the image count as background.
//!
//! The skeleton is then dilated with the 4-neighbour cross so that a
//! diagonal step in the skeleton still blocks 4-connected region
//! growth.

use image::{GrayImage, Luma};

use crate::binarize::SET;
use crate::morphology::dilate;

/// Radius of the cross used to thicken the skeleton into walls.
pub const WALL_DILATION_RADIUS: u8 = 1;

/// Neighbour offsets in Zhang-Suen order P2..P9: N, NE, E, SE, S, SW,
/// W, NW.
const NEIGHBOURS: [(i64, i64); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Thin `mask` to a one-pixel-wide 8-connected skeleton.
#[must_use = "returns the skeleton mask"]
pub fn skeletonize(mask: &GrayImage) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut grid = Grid {
        width: i64::from(w),
        height: i64::from(h),
        cells: mask.as_raw().iter().map(|&v| v != 0).collect(),
    };

    let mut deletions = Vec::new();
    loop {
        let mut changed = false;
        for first in [true, false] {
            deletions.clear();
            for y in 0..grid.height {
                for x in 0..grid.width {
                    if grid.get(x, y) && grid.deletable(x, y, first) {
                        deletions.push(grid.index(x, y));
                    }
                }
            }
            for &i in &deletions {
                grid.cells[i] = false;
            }
            changed |= !deletions.is_empty();
        }
        if !changed {
            break;
        }
    }

    let mut out = GrayImage::new(w, h);
    for (cell, pixel) in grid.cells.iter().zip(out.pixels_mut()) {
        if *cell {
            *pixel = Luma([SET]);
        }
    }
    out
}

/// Skeletonize `mask` and thicken the result with the 4-neighbour
/// cross, producing the wall mask used for labeling.
#[must_use = "returns the skeleton and the wall mask"]
pub fn walls(mask: &GrayImage) -> (GrayImage, GrayImage) {
    let skeleton = skeletonize(mask);
    let walls = dilate(&skeleton, WALL_DILATION_RADIUS);
    (skeleton, walls)
}

struct Grid {
    width: i64,
    height: i64,
    cells: Vec<bool>,
}

impl Grid {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    const fn index(&self, x: i64, y: i64) -> usize {
        (y * self.width + x) as usize
    }

    fn get(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height && self.cells[self.index(x, y)]
    }

    fn deletable(&self, x: i64, y: i64, first: bool) -> bool {
        let p: [bool; 8] = std::array::from_fn(|k| {
            let (dx, dy) = NEIGHBOURS[k];
            self.get(x + dx, y + dy)
        });

        let count = p.iter().filter(|&&v| v).count();
        if !(2..=6).contains(&count) {
            return false;
        }

        let transitions = (0..8).filter(|&k| !p[k] && p[(k + 1) % 8]).count();
        if transitions != 1 {
            return false;
        }

        // p[0]=P2 (N), p[2]=P4 (E), p[4]=P6 (S), p[6]=P8 (W).
        let (n, e, s, west) = (p[0], p[2], p[4], p[6]);
        if first {
            !(n && e && s) && !(e && s && west)
        } else {
            !(n && e && west) && !(n && s && west)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use imageproc::region_labelling::Connectivity;

    use crate::binarize::count_set;
    use crate::morphology::{count_components, invert};

    fn bar(width: u32, height: u32, rows: std::ops::RangeInclusive<u32>) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if rows.contains(&y) && (2..width - 2).contains(&x) {
                Luma([SET])
            } else {
                Luma([0])
            }
        })
    }

    fn ring(size: u32, inner: f32, outer: f32) -> GrayImage {
        let c = (size as f32 - 1.0) / 2.0;
        GrayImage::from_fn(size, size, |x, y| {
            let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt();
            if d >= inner && d <= outer {
                Luma([SET])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn empty_mask_stays_empty() {
        let mask = GrayImage::new(10, 10);
        assert_eq!(count_set(&skeletonize(&mask)), 0);
    }

    #[test]
    fn thin_line_is_unchanged() {
        let mask = bar(20, 5, 2..=2);
        let skeleton = skeletonize(&mask);
        for x in 4..16 {
            assert_eq!(skeleton.get_pixel(x, 2).0[0], SET, "column {x}");
        }
    }

    #[test]
    fn thick_bar_thins_to_center_row() {
        let mask = bar(30, 9, 2..=6);
        let skeleton = skeletonize(&mask);
        for x in 8..=21 {
            let column: Vec<u32> = (0..9)
                .filter(|&y| skeleton.get_pixel(x, y).0[0] != 0)
                .collect();
            assert_eq!(column, vec![4], "column {x}");
        }
    }

    #[test]
    fn skeleton_is_a_subset_of_the_mask() {
        let mask = ring(41, 8.0, 13.0);
        let skeleton = skeletonize(&mask);
        assert!(
            skeleton
                .pixels()
                .zip(mask.pixels())
                .all(|(s, m)| s.0[0] == 0 || m.0[0] != 0)
        );
        assert!(count_set(&skeleton) < count_set(&mask));
    }

    #[test]
    fn thick_ring_keeps_its_hole() {
        let mask = ring(41, 8.0, 13.0);
        let (skeleton, walls) = walls(&mask);
        assert_eq!(count_components(&skeleton, Connectivity::Eight), 1);
        // Inside and outside stay separate under 4-connectivity.
        assert_eq!(count_components(&invert(&walls), Connectivity::Four), 2);
    }

    #[test]
    fn walls_contain_the_skeleton() {
        let mask = bar(30, 9, 2..=6);
        let (skeleton, walls) = walls(&mask);
        assert!(
            skeleton
                .pixels()
                .zip(walls.pixels())
                .all(|(s, w)| s.0[0] == 0 || w.0[0] != 0)
        );
        // Cross dilation of a horizontal line adds the rows above and below.
        assert_eq!(walls.get_pixel(15, 3).0[0], SET);
        assert_eq!(walls.get_pixel(15, 5).0[0], SET);
        assert_eq!(walls.get_pixel(15, 2).0[0], 0);
    }
}
