//! Random-walker completion of the seed labels.
//!
//! Every pixel is a graph node joined to its 4 neighbours. Edge weights
//! fall off with the squared difference of the wall mask across the
//! edge:
//!
//! ```text
//! w_ij = exp(-beta * (d_i - d_j)^2 / (10 * std(d))) + 1e-6
//! ```
//!
//! Seeded nodes are fixed. For each label class `k` the probability that
//! a walker starting at an unseeded node first reaches a class-`k` seed
//! solves `L_U x_k = B_k`, where `L_U` is the Laplacian restricted to
//! the unseeded nodes and `B_k` collects the weights into class-`k`
//! seeds. Each unseeded node takes the most probable class.

use std::collections::{BTreeSet, VecDeque};
use std::num::NonZeroU32;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::solver::{ConjugateGradient, SolveStats};
use crate::types::{Dimensions, GrayImage, LabelImage, PipelineError, Region, Segmentation};

/// Added to every edge weight so the graph stays connected.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Divisor applied to `std(d)` in the weight exponent.
const GRADIENT_SCALE: f64 = 10.0;

/// Summary of one diffusion run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DiffusionStats {
    /// Unseeded nodes that were solved for.
    pub unknown_count: usize,
    /// Distinct label classes among the seeds.
    pub class_count: usize,
    /// Largest iteration count over the per-class solves.
    pub iterations: usize,
    /// Largest final relative residual over the per-class solves.
    pub max_residual: f64,
    /// Pixels no seed could reach.
    pub unresolved_count: usize,
}

/// Output of [`random_walker`].
#[derive(Debug, Clone)]
pub struct Diffusion {
    /// Completed label map.
    pub segmentation: Segmentation,
    /// Solve statistics.
    pub stats: DiffusionStats,
}

/// Fill every unseeded pixel of `seeds` with the label a random walker
/// starting there most likely reaches first.
///
/// `walls` is the wall mask the edge weights are computed from. Ties
/// between classes go to the lower label. Unseeded pixels whose
/// 4-connected component touches no seed become
/// [`Region::Unresolved`].
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `walls` and `seeds`
/// differ in size, and [`PipelineError::Solver`] if any class's solve
/// fails.
pub fn random_walker(
    walls: &GrayImage,
    seeds: &LabelImage,
    beta: f64,
    solver: &ConjugateGradient,
) -> Result<Diffusion, PipelineError> {
    if walls.dimensions() != seeds.dimensions() {
        return Err(PipelineError::InvalidConfig(format!(
            "wall mask is {:?} but seed labels are {:?}",
            walls.dimensions(),
            seeds.dimensions()
        )));
    }
    let (w, h) = seeds.dimensions();
    let dimensions = Dimensions {
        width: w,
        height: h,
    };
    let seed_at = |i: usize| seeds.as_raw()[i];

    let unknown = UnknownNodes::find(seeds);
    let classes: Vec<u32> = seeds
        .as_raw()
        .iter()
        .copied()
        .filter(|&l| l != 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut regions: Vec<Region> = seeds
        .as_raw()
        .iter()
        .map(|&l| NonZeroU32::new(l).map_or(Region::Unresolved, Region::Label))
        .collect();

    let mut stats = DiffusionStats {
        unknown_count: unknown.count,
        class_count: classes.len(),
        unresolved_count: unknown.unresolved,
        ..DiffusionStats::default()
    };
    if unknown.unresolved > 0 {
        warn!(
            pixels = unknown.unresolved,
            "unseeded pixels cannot reach any seed; marking unresolved"
        );
    }

    if unknown.count > 0 {
        if let [only] = classes.as_slice() {
            let region = NonZeroU32::new(*only).map_or(Region::Unresolved, Region::Label);
            for (i, index) in unknown.index.iter().enumerate() {
                if index.is_some() {
                    regions[i] = region;
                }
            }
        } else {
            let graph = Graph::new(walls, beta);
            let (laplacian, rhs) = assemble(&graph, &unknown, &classes, seed_at);
            debug!(
                unknowns = unknown.count,
                classes = classes.len(),
                nnz = laplacian.nnz(),
                "solving random walker systems"
            );

            let solutions: Vec<(DVector<f64>, SolveStats)> = rhs
                .into_par_iter()
                .enumerate()
                .map(|(k, b)| {
                    solver
                        .solve(&laplacian, &DVector::from_vec(b))
                        .map_err(|source| PipelineError::Solver {
                            label: classes[k],
                            source,
                        })
                })
                .collect::<Result<_, _>>()?;

            for (_, solve) in &solutions {
                stats.iterations = stats.iterations.max(solve.iterations);
                stats.max_residual = stats.max_residual.max(solve.residual);
            }

            for (i, index) in unknown.index.iter().enumerate() {
                let Some(row) = *index else { continue };
                let mut best = 0;
                let mut best_p = f64::NEG_INFINITY;
                for (k, (x, _)) in solutions.iter().enumerate() {
                    if x[row] > best_p {
                        best_p = x[row];
                        best = k;
                    }
                }
                regions[i] = NonZeroU32::new(classes[best]).map_or(Region::Unresolved, Region::Label);
            }
        }
    }

    debug!(
        unknowns = stats.unknown_count,
        iterations = stats.iterations,
        max_residual = stats.max_residual,
        "random walker complete"
    );

    Ok(Diffusion {
        segmentation: Segmentation::new(dimensions, regions)?,
        stats,
    })
}

/// Unseeded pixels, split into those that can reach a seed (numbered
/// rows of the linear system) and those that cannot.
struct UnknownNodes {
    /// Row of each pixel in the system, `None` for seeds and
    /// unresolvable pixels.
    index: Vec<Option<usize>>,
    count: usize,
    unresolved: usize,
}

impl UnknownNodes {
    fn find(seeds: &LabelImage) -> Self {
        let (w, h) = seeds.dimensions();
        let raw = seeds.as_raw();
        let mut visited = vec![false; raw.len()];
        let mut reachable = vec![false; raw.len()];
        let mut queue = VecDeque::new();
        let mut component = Vec::new();
        let mut unresolved = 0;

        for start in 0..raw.len() {
            if raw[start] != 0 || visited[start] {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);
            component.clear();
            let mut touches_seed = false;

            while let Some(i) = queue.pop_front() {
                component.push(i);
                for j in neighbours(i, w, h) {
                    if raw[j] != 0 {
                        touches_seed = true;
                    } else if !visited[j] {
                        visited[j] = true;
                        queue.push_back(j);
                    }
                }
            }

            if touches_seed {
                for &i in &component {
                    reachable[i] = true;
                }
            } else {
                unresolved += component.len();
            }
        }

        let mut count = 0;
        let index = reachable
            .iter()
            .map(|&r| {
                r.then(|| {
                    count += 1;
                    count - 1
                })
            })
            .collect();

        Self {
            index,
            count,
            unresolved,
        }
    }
}

/// Edge weights of the 4-connected pixel graph.
struct Graph {
    width: u32,
    height: u32,
    data: Vec<f64>,
    scale: f64,
}

impl Graph {
    #[allow(clippy::cast_precision_loss)]
    fn new(walls: &GrayImage, beta: f64) -> Self {
        let data: Vec<f64> = walls
            .as_raw()
            .iter()
            .map(|&v| if v == 0 { 0.0 } else { 1.0 })
            .collect();
        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let variance = data.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        let scale = if std > 0.0 {
            beta / (GRADIENT_SCALE * std)
        } else {
            0.0
        };
        Self {
            width: walls.width(),
            height: walls.height(),
            data,
            scale,
        }
    }

    fn weight(&self, i: usize, j: usize) -> f64 {
        let g = self.data[i] - self.data[j];
        (-self.scale * g * g).exp() + WEIGHT_EPSILON
    }
}

/// Build `L_U` and one right-hand side per class.
fn assemble(
    graph: &Graph,
    unknown: &UnknownNodes,
    classes: &[u32],
    seed_at: impl Fn(usize) -> u32,
) -> (CsrMatrix<f64>, Vec<Vec<f64>>) {
    let n = unknown.count;
    let mut coo = CooMatrix::new(n, n);
    let mut rhs = vec![vec![0.0; n]; classes.len()];

    for (i, index) in unknown.index.iter().enumerate() {
        let Some(row) = *index else { continue };
        let mut degree = 0.0;
        for j in neighbours(i, graph.width, graph.height) {
            let weight = graph.weight(i, j);
            degree += weight;
            if let Some(col) = unknown.index[j] {
                coo.push(row, col, -weight);
            } else if let Ok(k) = classes.binary_search(&seed_at(j)) {
                rhs[k][row] += weight;
            }
        }
        coo.push(row, row, degree);
    }

    (CsrMatrix::from(&coo), rhs)
}

/// In-bounds 4-neighbours of the row-major index `i`.
fn neighbours(i: usize, width: u32, height: u32) -> impl Iterator<Item = usize> {
    let (w, h) = (width as usize, height as usize);
    let (x, y) = (i % w, i / w);
    let left = (x > 0).then(|| i - 1);
    let right = (x + 1 < w).then(|| i + 1);
    let up = (y > 0).then(|| i - w);
    let down = (y + 1 < h).then(|| i + w);
    [left, right, up, down].into_iter().flatten()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use image::Luma;

    use crate::solver::SolverError;
    use crate::types::PipelineConfig;

    fn default_solver() -> ConjugateGradient {
        ConjugateGradient {
            tolerance: PipelineConfig::DEFAULT_SOLVER_TOLERANCE,
            max_iterations: PipelineConfig::DEFAULT_SOLVER_MAX_ITERATIONS,
        }
    }

    fn label_at(seg: &Segmentation, x: u32, y: u32) -> u32 {
        seg.region(x, y).unwrap().label().map_or(0, NonZeroU32::get)
    }

    #[test]
    fn neighbours_respect_bounds() {
        let corner: Vec<usize> = neighbours(0, 3, 2).collect();
        assert_eq!(corner, vec![1, 3]);
        let middle: Vec<usize> = neighbours(4, 3, 2).collect();
        assert_eq!(middle, vec![3, 5, 1]);
    }

    #[test]
    fn flat_walls_give_uniform_weights() {
        let graph = Graph::new(&GrayImage::new(4, 4), 1.0);
        assert!(graph.scale.abs() < f64::EPSILON);
        assert!((graph.weight(0, 1) - (1.0 + WEIGHT_EPSILON)).abs() < 1e-12);
    }

    #[test]
    fn wall_edges_are_weaker() {
        let walls = GrayImage::from_fn(4, 1, |x, _| if x >= 2 { Luma([255]) } else { Luma([0]) });
        let graph = Graph::new(&walls, 1.0);
        // std of [0, 0, 1, 1] is 0.5.
        assert!((graph.scale - 0.2).abs() < 1e-12);
        assert!(graph.weight(1, 2) < graph.weight(0, 1));
        assert!((graph.weight(2, 3) - graph.weight(0, 1)).abs() < 1e-12);
    }

    #[test]
    fn strip_splits_between_two_seeds() {
        let walls = GrayImage::new(41, 3);
        let seeds = LabelImage::from_fn(41, 3, |x, _| match x {
            0 => Luma([1]),
            40 => Luma([2]),
            _ => Luma([0]),
        });
        let out = random_walker(&walls, &seeds, 1.0, &default_solver()).unwrap();
        assert_eq!(out.stats.class_count, 2);
        assert_eq!(out.stats.unknown_count, 39 * 3);
        for y in 0..3 {
            for x in 0..=19 {
                assert_eq!(label_at(&out.segmentation, x, y), 1, "({x}, {y})");
            }
            for x in 21..41 {
                assert_eq!(label_at(&out.segmentation, x, y), 2, "({x}, {y})");
            }
        }
        assert_eq!(out.segmentation.unresolved_count(), 0);
    }

    #[test]
    fn wide_gap_divides_between_seeds() {
        let size = 41;
        let c = 20.0_f32;
        let dist = |x: u32, y: u32| ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt();
        let in_gap = |x: u32, y: u32| x > 20 && (y as i32 - 20).abs() <= 6;

        let walls = GrayImage::from_fn(size, size, |x, y| {
            if (dist(x, y) - 12.0).abs() <= 1.0 && !in_gap(x, y) {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let seeds = LabelImage::from_fn(size, size, |x, y| {
            if dist(x, y) <= 5.0 {
                Luma([1])
            } else if x == 0 || y == 0 || x == size - 1 || y == size - 1 {
                Luma([2])
            } else {
                Luma([0])
            }
        });

        let out = random_walker(&walls, &seeds, 1.0, &default_solver()).unwrap();
        let seg = &out.segmentation;
        assert_eq!(label_at(seg, 27, 20), 1);
        assert_eq!(label_at(seg, 20, 12), 1);
        assert_eq!(label_at(seg, 20, 35), 2);
        assert_eq!(label_at(seg, 38, 20), 2);
        assert_eq!(seg.unresolved_count(), 0);

        // Through the gap the labels switch exactly once.
        let row: Vec<u32> = (26..=39).map(|x| label_at(seg, x, 20)).collect();
        let switches = row.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1, "{row:?}");
    }

    #[test]
    fn gap_splits_at_the_midpoint_between_seeds() {
        // Seed bands end at x=5 and start at x=31, so the unseeded strip
        // is mirror-symmetric about the wall at x=18.
        let size = 41;
        let wall_x = 18;
        let walls = GrayImage::from_fn(size, size, |x, y| {
            if x == wall_x && y.abs_diff(20) > 6 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let seeds = LabelImage::from_fn(size, size, |x, _| match x {
            0..=5 => Luma([1]),
            31.. => Luma([2]),
            _ => Luma([0]),
        });

        let out = random_walker(&walls, &seeds, 1.0, &default_solver()).unwrap();
        let seg = &out.segmentation;

        let row: Vec<u32> = (6..=30).map(|x| label_at(seg, x, 20)).collect();
        let first_two = row.iter().position(|&l| l == 2).unwrap();
        let switch_x = u32::try_from(first_two).unwrap() + 6;
        assert!(switch_x.abs_diff(wall_x) <= 2, "switch at {switch_x}: {row:?}");
        assert!(row[first_two..].iter().all(|&l| l == 2), "{row:?}");
        assert!(row[..first_two].iter().all(|&l| l == 1), "{row:?}");

        for x in 6..wall_x {
            assert_eq!(label_at(seg, x, 20), 1);
        }
        for x in wall_x + 1..=30 {
            assert_eq!(label_at(seg, x, 20), 2);
        }
    }

    #[test]
    fn single_class_fills_without_solving() {
        let walls = GrayImage::new(5, 5);
        let seeds = LabelImage::from_fn(5, 5, |x, _| if x == 0 { Luma([3]) } else { Luma([0]) });
        let out = random_walker(&walls, &seeds, 1.0, &default_solver()).unwrap();
        assert_eq!(out.stats.iterations, 0);
        assert!(
            out.segmentation
                .regions()
                .iter()
                .all(|r| r.label().map(NonZeroU32::get) == Some(3))
        );
    }

    #[test]
    fn no_seeds_leaves_everything_unresolved() {
        let walls = GrayImage::from_pixel(4, 4, Luma([255]));
        let seeds = LabelImage::new(4, 4);
        let out = random_walker(&walls, &seeds, 1.0, &default_solver()).unwrap();
        assert_eq!(out.stats.unresolved_count, 16);
        assert_eq!(out.segmentation.unresolved_count(), 16);
    }

    #[test]
    fn solver_failure_is_reported_with_its_label() {
        let walls = GrayImage::new(41, 3);
        let seeds = LabelImage::from_fn(41, 3, |x, _| match x {
            0 => Luma([1]),
            40 => Luma([2]),
            _ => Luma([0]),
        });
        let solver = ConjugateGradient {
            tolerance: 1e-14,
            max_iterations: 1,
        };
        let err = random_walker(&walls, &seeds, 1.0, &solver).unwrap_err();
        assert!(
            matches!(
                err,
                PipelineError::Solver {
                    label: 1 | 2,
                    source: SolverError::NotConverged { .. }
                }
            ),
            "got {err:?}"
        );
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let walls = GrayImage::new(4, 4);
        let seeds = LabelImage::new(5, 4);
        assert!(matches!(
            random_walker(&walls, &seeds, 1.0, &default_solver()),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
