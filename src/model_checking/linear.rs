use log::{debug, info};
use ndarray::Array2;

use super::environment::{LinearEquationMethod, LinearEquationSettings};
use super::error::SolverError;
use super::sparse::SparseMatrix;
use super::types::SolverStatus;
use super::value_type::SolverValue;

/// Pivots below this magnitude count as zero for floating point systems.
const SINGULAR_PIVOT_TOLERANCE: f64 = 1e-12;

fn is_singular_pivot<V: SolverValue>(pivot: &V) -> bool {
    if V::IS_EXACT {
        pivot.is_zero()
    } else {
        pivot.abs().to_double() < SINGULAR_PIVOT_TOLERANCE
    }
}

/// Solves `x = A x + b` for a matrix without nondeterminism, i.e. the system
/// induced by fixing a deterministic scheduler.
#[derive(Debug, Clone)]
pub struct LinearEquationSolver<V> {
    matrix: SparseMatrix<V>,
    settings: LinearEquationSettings,
}

impl<V: SolverValue> LinearEquationSolver<V> {
    pub fn new(matrix: SparseMatrix<V>, settings: LinearEquationSettings) -> LinearEquationSolver<V> {
        debug_assert!(matrix.has_trivial_row_grouping(), "linear equation systems have one row per state");
        LinearEquationSolver { matrix, settings }
    }

    pub fn set_matrix(&mut self, matrix: SparseMatrix<V>) {
        debug_assert!(matrix.has_trivial_row_grouping());
        self.matrix = matrix;
    }

    pub fn matrix(&self) -> &SparseMatrix<V> {
        &self.matrix
    }

    pub fn method(&self) -> LinearEquationMethod {
        if V::IS_EXACT && self.settings.method != LinearEquationMethod::Elimination {
            info!("Selecting 'elimination' for the linear equation system to guarantee exact results.");
            return LinearEquationMethod::Elimination;
        }
        self.settings.method
    }

    /// Writes the solution into `x`; `x` also serves as the starting point of
    /// the iterative method.
    pub fn solve_equations(&self, x: &mut [V], b: &[V]) -> Result<SolverStatus, SolverError> {
        debug_assert_eq!(x.len(), self.matrix.row_count());
        debug_assert_eq!(b.len(), self.matrix.row_count());
        match self.method() {
            LinearEquationMethod::Elimination => self.solve_by_elimination(x, b),
            LinearEquationMethod::GaussSeidel => self.solve_by_gauss_seidel(x, b),
        }
    }

    fn solve_by_elimination(&self, x: &mut [V], b: &[V]) -> Result<SolverStatus, SolverError> {
        let n = self.matrix.row_count();
        // augmented matrix [I - A | b]
        let mut system: Array2<V> = Array2::from_elem((n, n + 1), V::zero());
        for row in 0..n {
            system[[row, row]] = V::one();
            for entry in self.matrix.row(row) {
                system[[row, entry.column]] = system[[row, entry.column]].clone() - entry.value.clone();
            }
            system[[row, n]] = b[row].clone();
        }

        for col in 0..n {
            let mut pivot = col;
            for row in col + 1..n {
                if system[[row, col]].abs() > system[[pivot, col]].abs() {
                    pivot = row;
                }
            }
            if is_singular_pivot(&system[[pivot, col]]) {
                return Err(SolverError::SingularSystem { row: col });
            }
            if pivot != col {
                for c in col..=n {
                    system.swap([pivot, c], [col, c]);
                }
            }
            for row in col + 1..n {
                if system[[row, col]].is_zero() {
                    continue;
                }
                let factor = system[[row, col]].clone() / system[[col, col]].clone();
                for c in col..=n {
                    let update = factor.clone() * system[[col, c]].clone();
                    system[[row, c]] = system[[row, c]].clone() - update;
                }
            }
        }

        for row in (0..n).rev() {
            let mut value = system[[row, n]].clone();
            for c in row + 1..n {
                value = value - system[[row, c]].clone() * x[c].clone();
            }
            x[row] = value / system[[row, row]].clone();
        }
        debug!("Solved linear equation system with {} rows by elimination.", n);
        Ok(SolverStatus::Converged)
    }

    fn solve_by_gauss_seidel(&self, x: &mut [V], b: &[V]) -> Result<SolverStatus, SolverError> {
        let precision = V::from_double(self.settings.precision);
        let mut iterations = 0u64;
        while iterations < self.settings.max_iterations {
            let mut max_diff = V::zero();
            for row in 0..self.matrix.row_count() {
                let mut diagonal = V::zero();
                let mut sum = b[row].clone();
                for entry in self.matrix.row(row) {
                    if entry.column == row {
                        diagonal = diagonal + entry.value.clone();
                    } else {
                        sum = sum + entry.value.clone() * x[entry.column].clone();
                    }
                }
                let denominator = V::one() - diagonal;
                if is_singular_pivot(&denominator) {
                    return Err(SolverError::SingularSystem { row });
                }
                let value = sum / denominator;
                max_diff = V::max_of(max_diff, (value.clone() - x[row].clone()).abs());
                x[row] = value;
            }
            iterations += 1;
            if max_diff <= precision {
                debug!("Gauss-Seidel converged after {} iterations.", iterations);
                return Ok(SolverStatus::Converged);
            }
        }
        Ok(SolverStatus::MaximalIterationsExceeded)
    }
}
