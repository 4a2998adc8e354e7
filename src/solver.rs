use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub method: SolverMethod,
    /// Relative residual above which a solve is reported as inaccurate
    pub tolerance: f64,
    /// Reject matrices whose condition number exceeds `max_condition_number`
    pub check_condition_number: bool,
    pub max_condition_number: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            method: SolverMethod::Lu,
            tolerance: 1e-9,
            check_condition_number: true,
            max_condition_number: 1e14,
        }
    }
}

/// Available solver methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverMethod {
    /// Direct LU decomposition with partial pivoting
    Lu,
    /// QR decomposition
    Qr,
}

/// Solver statistics
#[derive(Debug, Clone)]
pub struct SolverStats {
    pub method_used: SolverMethod,
    pub residual_norm: f64,
    pub solve_time: f64,
    pub condition_number: Option<f64>,
}

/// Why a dense solve was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinearSolveError {
    #[error("matrix must be square, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("matrix has {rows} rows but the right-hand side has {len} entries")]
    DimensionMismatch { rows: usize, len: usize },

    #[error(
        "matrix is singular (smallest singular value {min_singular_value:.3e}, \
         largest {max_singular_value:.3e})"
    )]
    Singular {
        min_singular_value: f64,
        max_singular_value: f64,
    },

    #[error("matrix is ill-conditioned (condition number {condition:.3e} exceeds {limit:.3e})")]
    IllConditioned { condition: f64, limit: f64 },

    #[error("{method:?} decomposition failed - matrix may be singular")]
    DecompositionFailed { method: SolverMethod },

    #[error("solution contains non-finite values")]
    NonFinite,
}

/// Dense linear system solver
#[derive(Debug, Clone, Default)]
pub struct LinearSolver {
    config: SolverConfig,
}

impl LinearSolver {
    /// Create a new solver with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new solver with custom configuration
    pub fn with_config(config: SolverConfig) -> Self {
        LinearSolver { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve the linear system Ax = b
    pub fn solve_dense(
        &self,
        matrix: &DMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Result<(DVector<f64>, SolverStats), LinearSolveError> {
        let start_time = Instant::now();

        if matrix.nrows() != matrix.ncols() {
            return Err(LinearSolveError::NotSquare {
                rows: matrix.nrows(),
                cols: matrix.ncols(),
            });
        }

        if matrix.nrows() != rhs.len() {
            return Err(LinearSolveError::DimensionMismatch {
                rows: matrix.nrows(),
                len: rhs.len(),
            });
        }

        let method = self.config.method;
        if matrix.nrows() == 0 {
            return Ok((
                DVector::zeros(0),
                SolverStats {
                    method_used: method,
                    residual_norm: 0.0,
                    solve_time: 0.0,
                    condition_number: None,
                },
            ));
        }

        let condition_number = if self.config.check_condition_number {
            Some(self.check_conditioning(matrix)?)
        } else {
            None
        };

        let solution = match method {
            SolverMethod::Lu => matrix.clone().lu().solve(rhs),
            SolverMethod::Qr => matrix.clone().qr().solve(rhs),
        }
        .ok_or(LinearSolveError::DecompositionFailed { method })?;

        if solution.iter().any(|value| !value.is_finite()) {
            return Err(LinearSolveError::NonFinite);
        }

        let residual_norm = (matrix * &solution - rhs).norm();
        let scale = (matrix.norm() * solution.norm() + rhs.norm()).max(f64::MIN_POSITIVE);
        if residual_norm / scale > self.config.tolerance {
            warn!(
                "Inaccurate {:?} solve: relative residual {:.3e} exceeds {:.3e}",
                method,
                residual_norm / scale,
                self.config.tolerance
            );
        }

        let solve_time = start_time.elapsed().as_secs_f64();
        debug!(
            "{:?} solve of {}x{} system: residual {:.3e}, cond {:?}",
            method,
            matrix.nrows(),
            matrix.ncols(),
            residual_norm,
            condition_number
        );

        Ok((
            solution,
            SolverStats {
                method_used: method,
                residual_norm,
                solve_time,
                condition_number,
            },
        ))
    }

    /// Condition number from the singular values. A smallest singular value
    /// at round-off level counts as singular rather than ill-conditioned.
    fn check_conditioning(&self, matrix: &DMatrix<f64>) -> Result<f64, LinearSolveError> {
        let singular_values = matrix.clone().svd(false, false).singular_values;
        let max_singular_value = singular_values.iter().cloned().fold(0.0f64, f64::max);
        let min_singular_value = singular_values.iter().cloned().fold(f64::INFINITY, f64::min);

        let rank_floor = max_singular_value * f64::EPSILON * matrix.nrows() as f64;
        if !(min_singular_value > rank_floor) {
            return Err(LinearSolveError::Singular {
                min_singular_value,
                max_singular_value,
            });
        }

        let condition = max_singular_value / min_singular_value;
        if condition > self.config.max_condition_number {
            return Err(LinearSolveError::IllConditioned {
                condition,
                limit: self.config.max_condition_number,
            });
        }

        Ok(condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    #[test]
    fn test_dense_lu_solver() {
        let solver = LinearSolver::new();

        // [2 1; 1 2] * [x; y] = [3; 3] => [1; 1]
        let matrix = dmatrix![2.0, 1.0; 1.0, 2.0];
        let rhs = dvector![3.0, 3.0];

        let (solution, stats) = solver.solve_dense(&matrix, &rhs).unwrap();

        assert!((solution[0] - 1.0).abs() < 1e-10);
        assert!((solution[1] - 1.0).abs() < 1e-10);
        assert_eq!(stats.method_used, SolverMethod::Lu);
        assert!(stats.condition_number.unwrap() > 1.0);
    }

    #[test]
    fn test_dense_qr_solver() {
        let solver = LinearSolver::with_config(SolverConfig {
            method: SolverMethod::Qr,
            ..SolverConfig::default()
        });

        let matrix = dmatrix![2.0, 1.0; 1.0, 3.0];
        let rhs = dvector![5.0, 6.0];

        let (solution, stats) = solver.solve_dense(&matrix, &rhs).unwrap();

        assert!((solution[0] - 1.8).abs() < 1e-10);
        assert!((solution[1] - 1.4).abs() < 1e-10);
        assert_eq!(stats.method_used, SolverMethod::Qr);
    }

    #[test]
    fn test_singular_matrix() {
        let solver = LinearSolver::new();
        let matrix = dmatrix![1.0, 2.0; 2.0, 4.0];
        let rhs = dvector![1.0, 2.0];

        let result = solver.solve_dense(&matrix, &rhs);
        assert!(matches!(result, Err(LinearSolveError::Singular { .. })));
    }

    #[test]
    fn test_zero_column_is_singular_without_condition_check() {
        let solver = LinearSolver::with_config(SolverConfig {
            check_condition_number: false,
            ..SolverConfig::default()
        });
        let matrix = dmatrix![1.0, 0.0; 1.0, 0.0];
        let rhs = dvector![1.0, 1.0];

        let result = solver.solve_dense(&matrix, &rhs);
        assert!(matches!(
            result,
            Err(LinearSolveError::DecompositionFailed { method: SolverMethod::Lu })
        ));
    }

    #[test]
    fn test_ill_conditioned_matrix() {
        let solver = LinearSolver::new();
        let matrix = dmatrix![1.0, 0.0; 0.0, 1e-15];
        let rhs = dvector![1.0, 1.0];

        let result = solver.solve_dense(&matrix, &rhs);
        assert!(matches!(result, Err(LinearSolveError::IllConditioned { .. })));
    }

    #[test]
    fn test_dimension_checks() {
        let solver = LinearSolver::new();
        let square = dmatrix![1.0, 0.0; 0.0, 1.0];

        let result = solver.solve_dense(&square, &dvector![1.0, 2.0, 3.0]);
        assert_eq!(result.unwrap_err(), LinearSolveError::DimensionMismatch { rows: 2, len: 3 });

        let wide = DMatrix::<f64>::zeros(2, 3);
        let result = solver.solve_dense(&wide, &dvector![1.0, 2.0]);
        assert_eq!(result.unwrap_err(), LinearSolveError::NotSquare { rows: 2, cols: 3 });
    }

    #[test]
    fn test_empty_system() {
        let solver = LinearSolver::new();
        let (solution, _) = solver
            .solve_dense(&DMatrix::zeros(0, 0), &DVector::zeros(0))
            .unwrap();
        assert_eq!(solution.len(), 0);
    }
}
