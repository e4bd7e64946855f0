//! Jacobi-preconditioned conjugate gradients for sparse symmetric
//! positive definite systems.
//!
//! The random walker produces one system `L_U x = b` per label class,
//! where `L_U` is a sparse graph Laplacian block. Those systems are
//! diagonally dominant, which is where a plain diagonal preconditioner
//! does well.
//!
//! ```text
//! r_0 = b, z_0 = M^-1 r_0, p_0 = z_0
//! for k = 0, 1, ...
//!     alpha = (r_k . z_k) / (p_k . A p_k)
//!     x_{k+1} = x_k + alpha p_k
//!     r_{k+1} = r_k - alpha A p_k
//!     stop if |r_{k+1}| <= tol |b|
//!     z_{k+1} = M^-1 r_{k+1}
//!     beta = (r_{k+1} . z_{k+1}) / (r_k . z_k)
//!     p_{k+1} = z_{k+1} + beta p_k
//! ```

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

/// Why a conjugate gradient solve failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum SolverError {
    /// The iteration cap was reached before the residual dropped below
    /// the tolerance.
    #[error(
        "did not converge after {iterations} iterations \
         (relative residual {residual:e}, tolerance {tolerance:e})"
    )]
    NotConverged {
        /// Iterations performed.
        iterations: usize,
        /// Relative residual `|r| / |b|` at the last iteration.
        residual: f64,
        /// Requested tolerance.
        tolerance: f64,
    },

    /// A residual, step length or solution entry became NaN or infinite.
    #[error("non-finite value at iteration {iteration}")]
    NonFinite {
        /// Iteration at which it was detected.
        iteration: usize,
    },

    /// The search direction had non-positive curvature, so the matrix is
    /// not positive definite.
    #[error("matrix is not positive definite (curvature {curvature:e} at iteration {iteration})")]
    Indefinite {
        /// Iteration at which it was detected.
        iteration: usize,
        /// Value of `p . A p`.
        curvature: f64,
    },

    /// Matrix and right-hand side sizes disagree.
    #[error("matrix is {rows}x{cols} but right-hand side has {rhs} entries")]
    DimensionMismatch {
        /// Matrix rows.
        rows: usize,
        /// Matrix columns.
        cols: usize,
        /// Right-hand side length.
        rhs: usize,
    },
}

/// Convergence report of a successful solve.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SolveStats {
    /// Iterations performed.
    pub iterations: usize,
    /// Final relative residual `|r| / |b|`.
    pub residual: f64,
}

/// Conjugate gradient settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConjugateGradient {
    /// Stop once `|r| <= tolerance * |b|`.
    pub tolerance: f64,
    /// Give up after this many iterations.
    pub max_iterations: usize,
}

impl ConjugateGradient {
    /// Solve `a x = b` starting from `x = 0`.
    ///
    /// A zero right-hand side returns the zero vector without iterating.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError::NotConverged`] when the iteration cap is
    /// hit, [`SolverError::NonFinite`] if NaN or infinity shows up, and
    /// [`SolverError::Indefinite`] on non-positive curvature. The partial
    /// solution is never returned.
    pub fn solve(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
    ) -> Result<(DVector<f64>, SolveStats), SolverError> {
        let n = b.len();
        if a.nrows() != n || a.ncols() != n {
            return Err(SolverError::DimensionMismatch {
                rows: a.nrows(),
                cols: a.ncols(),
                rhs: n,
            });
        }

        let b_norm = b.norm();
        if !b_norm.is_finite() {
            return Err(SolverError::NonFinite { iteration: 0 });
        }
        if b_norm == 0.0 {
            return Ok((DVector::zeros(n), SolveStats::default()));
        }

        let inv_diag = jacobi(a);
        let mut x = DVector::zeros(n);
        let mut r = b.clone();
        let mut z = inv_diag.component_mul(&r);
        let mut p = z.clone();
        let mut rz = r.dot(&z);
        let mut residual = 1.0;

        for iteration in 1..=self.max_iterations {
            let ap = spmv(a, &p);
            let curvature = p.dot(&ap);
            if !curvature.is_finite() {
                return Err(SolverError::NonFinite { iteration });
            }
            if curvature <= 0.0 {
                return Err(SolverError::Indefinite {
                    iteration,
                    curvature,
                });
            }

            let alpha = rz / curvature;
            x.axpy(alpha, &p, 1.0);
            r.axpy(-alpha, &ap, 1.0);

            residual = r.norm() / b_norm;
            if !residual.is_finite() {
                return Err(SolverError::NonFinite { iteration });
            }
            if residual <= self.tolerance {
                if x.iter().any(|v| !v.is_finite()) {
                    return Err(SolverError::NonFinite { iteration });
                }
                return Ok((
                    x,
                    SolveStats {
                        iterations: iteration,
                        residual,
                    },
                ));
            }

            z = inv_diag.component_mul(&r);
            let rz_next = r.dot(&z);
            let beta = rz_next / rz;
            p = &z + &p * beta;
            rz = rz_next;
        }

        Err(SolverError::NotConverged {
            iterations: self.max_iterations,
            residual,
            tolerance: self.tolerance,
        })
    }
}

/// Inverse of the matrix diagonal; rows without a usable positive
/// diagonal entry are left unscaled.
fn jacobi(a: &CsrMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(
        a.nrows(),
        a.row_iter().enumerate().map(|(i, row)| {
            let diag: f64 = row
                .col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&c, _)| c == i)
                .map(|(_, &v)| v)
                .sum();
            if diag.is_finite() && diag > 0.0 {
                1.0 / diag
            } else {
                1.0
            }
        }),
    )
}

/// Sparse matrix-vector product `a * x`.
fn spmv(a: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        a.nrows(),
        a.row_iter().map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&c, &v)| v * x[c])
                .sum::<f64>()
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use nalgebra_sparse::CooMatrix;

    fn csr(n: usize, entries: &[(usize, usize, f64)]) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(n, n);
        for &(r, c, v) in entries {
            coo.push(r, c, v);
        }
        CsrMatrix::from(&coo)
    }

    fn tridiagonal() -> CsrMatrix<f64> {
        csr(
            3,
            &[
                (0, 0, 4.0),
                (0, 1, 1.0),
                (1, 0, 1.0),
                (1, 1, 3.0),
                (1, 2, 1.0),
                (2, 1, 1.0),
                (2, 2, 2.0),
            ],
        )
    }

    fn solver(tolerance: f64, max_iterations: usize) -> ConjugateGradient {
        ConjugateGradient {
            tolerance,
            max_iterations,
        }
    }

    #[test]
    fn solves_small_spd_system() {
        let a = tridiagonal();
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let (x, stats) = solver(1e-12, 100).solve(&a, &b).unwrap();
        let residual = (spmv(&a, &x) - &b).norm();
        assert!(residual < 1e-9, "residual {residual}");
        assert!(stats.iterations <= 3, "iterations {}", stats.iterations);
        assert!(stats.residual <= 1e-12);
    }

    #[test]
    fn diagonal_system_converges_in_one_step() {
        let a = csr(3, &[(0, 0, 2.0), (1, 1, 4.0), (2, 2, 8.0)]);
        let b = DVector::from_vec(vec![2.0, 2.0, 2.0]);
        let (x, stats) = solver(1e-10, 10).solve(&a, &b).unwrap();
        assert_eq!(stats.iterations, 1);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 0.5).abs() < 1e-12);
        assert!((x[2] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn zero_rhs_returns_zero_without_iterating() {
        let a = tridiagonal();
        let b = DVector::zeros(3);
        let (x, stats) = solver(1e-6, 100).solve(&a, &b).unwrap();
        assert!(x.iter().all(|&v| v == 0.0));
        assert_eq!(stats.iterations, 0);
    }

    #[test]
    fn iteration_cap_reports_not_converged() {
        let a = tridiagonal();
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let err = solver(1e-14, 1).solve(&a, &b).unwrap_err();
        assert!(
            matches!(err, SolverError::NotConverged { iterations: 1, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn nan_rhs_is_rejected() {
        let a = tridiagonal();
        let b = DVector::from_vec(vec![1.0, f64::NAN, 3.0]);
        assert!(matches!(
            solver(1e-6, 100).solve(&a, &b),
            Err(SolverError::NonFinite { .. })
        ));
    }

    #[test]
    fn negative_definite_matrix_is_rejected() {
        let a = csr(2, &[(0, 0, -1.0), (1, 1, -1.0)]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        assert!(matches!(
            solver(1e-6, 100).solve(&a, &b),
            Err(SolverError::Indefinite { iteration: 1, .. })
        ));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let a = tridiagonal();
        let b = DVector::zeros(2);
        assert!(matches!(
            solver(1e-6, 100).solve(&a, &b),
            Err(SolverError::DimensionMismatch { rhs: 2, .. })
        ));
    }
}
