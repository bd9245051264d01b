//! Rational search: value iteration in a cheap number type, followed by
//! sharpening the iterate to a rational candidate that is checked exactly
//! against the Bellman equation.
use log::{info, trace, warn};
use num::rational::BigRational;
use num::BigInt;

use super::environment::SolverEnvironment;
use super::error::SolverError;
use super::minmax::{is_solution, report_status, IterativeMinMaxSolver};
use super::sparse::{convert_vector, SparseMatrix};
use super::types::{OptimizationDirection, SolverGuarantee, SolverStatus};
use super::value_type::{decimal_digits, SolverValue};

/// Result of one rational search run in a fixed pair of number types.
pub(super) enum RationalSearchOutcome<R> {
    Finished {
        status: SolverStatus,
        iterations: u64,
        solution: Option<Vec<R>>,
    },
    /// The imprecise type cannot represent the required precision.
    RetryWithHigherPrecision,
}

impl<V: SolverValue> IterativeMinMaxSolver<V> {
    pub(super) fn solve_equations_rational_search(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<SolverStatus, SolverError> {
        self.create_lower_bounds_vector(x);
        let (status, iterations) = if V::IS_EXACT && !env.minmax.imprecise_rational_helper {
            self.rational_search_exact(env, dir, x, b)?
        } else if V::IS_EXACT {
            self.rational_search_with_imprecise_helper(env, dir, x, b)?
        } else {
            self.rational_search_imprecise(env, dir, x, b)?
        };
        self.set_last_iterations(iterations);
        if status == SolverStatus::Converged && self.is_track_scheduler_set() {
            let mut scratch = self.take_auxiliary_vector();
            self.store_scheduler_choices(dir, x, b, &mut scratch);
            self.auxiliary_row_group_vector = Some(scratch);
        }
        Ok(status)
    }

    /// Exact value type throughout.
    fn rational_search_exact(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<(SolverStatus, u64), SolverError> {
        let mut tmp = self.take_auxiliary_vector();
        let outcome = rational_search_core(env, dir, self, self.matrix(), b, x, b, &mut tmp)?;
        self.auxiliary_row_group_vector = Some(tmp);
        match outcome {
            RationalSearchOutcome::Finished {
                status,
                iterations,
                solution,
            } => {
                if let Some(solution) = solution {
                    *x = solution;
                }
                Ok((status, iterations))
            }
            RationalSearchOutcome::RetryWithHigherPrecision => Err(precision_exceeded(env)),
        }
    }

    /// Exact value type, iterating in `f64` until `f64` runs out of digits.
    fn rational_search_with_imprecise_helper(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<(SolverStatus, u64), SolverError> {
        let mut imprecise_solver = IterativeMinMaxSolver::new(self.matrix().convert::<f64>());
        imprecise_solver.set_caching_enabled(true);
        let mut imprecise_x: Vec<f64> = convert_vector(x);
        let imprecise_b: Vec<f64> = convert_vector(b);
        let mut imprecise_tmp = vec![0.0; imprecise_x.len()];

        let outcome = rational_search_core(
            env,
            dir,
            &imprecise_solver,
            self.matrix(),
            b,
            &mut imprecise_x,
            &imprecise_b,
            &mut imprecise_tmp,
        )?;
        match outcome {
            RationalSearchOutcome::Finished {
                status,
                iterations,
                solution,
            } => {
                *x = solution.unwrap_or_else(|| convert_vector(&imprecise_x));
                Ok((status, iterations))
            }
            RationalSearchOutcome::RetryWithHigherPrecision => {
                warn!("Precision of value type was exceeded, trying to recover by switching to rational arithmetic.");
                *x = convert_vector(&imprecise_x);
                self.rational_search_exact(env, dir, x, b)
            }
        }
    }

    /// Imprecise value type validated in rationals, promoted to rationals
    /// entirely when its precision is exceeded.
    fn rational_search_imprecise(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<(SolverStatus, u64), SolverError> {
        let rational_a: SparseMatrix<BigRational> = self.matrix().convert();
        let rational_b: Vec<BigRational> = convert_vector(b);
        let mut tmp = self.take_auxiliary_vector();
        let outcome = rational_search_core(env, dir, self, &rational_a, &rational_b, x, b, &mut tmp)?;
        self.auxiliary_row_group_vector = Some(tmp);

        match outcome {
            RationalSearchOutcome::Finished {
                status,
                iterations,
                solution,
            } => {
                if let Some(solution) = solution {
                    *x = convert_vector(&solution);
                }
                Ok((status, iterations))
            }
            RationalSearchOutcome::RetryWithHigherPrecision => {
                warn!("Precision of value type was exceeded, rebuilding the system in rational arithmetic.");
                let mut exact_x: Vec<BigRational> = convert_vector(x);
                let mut exact_tmp = vec![BigRational::from_integer(BigInt::from(0)); exact_x.len()];
                let mut exact_solver = IterativeMinMaxSolver::new(rational_a);
                exact_solver.set_caching_enabled(true);
                let outcome = rational_search_core(
                    env,
                    dir,
                    &exact_solver,
                    exact_solver.matrix(),
                    &rational_b,
                    &mut exact_x,
                    &rational_b,
                    &mut exact_tmp,
                )?;
                match outcome {
                    RationalSearchOutcome::Finished {
                        status,
                        iterations,
                        solution,
                    } => {
                        *x = convert_vector(solution.as_ref().unwrap_or(&exact_x));
                        Ok((status, iterations))
                    }
                    RationalSearchOutcome::RetryWithHigherPrecision => Err(precision_exceeded(env)),
                }
            }
        }
    }
}

fn precision_exceeded(env: &SolverEnvironment) -> SolverError {
    let digits = BigRational::from_float(env.minmax.precision).map_or(0, |precision| decimal_digits(&precision));
    SolverError::PrecisionExceeded { digits }
}

/// Runs value iteration in `I` from `x` with successively finer precision;
/// after every run the iterate is sharpened into an `R` candidate for
/// `(rational_a, rational_b)`. Iterations accumulate across runs.
#[allow(clippy::too_many_arguments)]
pub(super) fn rational_search_core<R: SolverValue, I: SolverValue>(
    env: &SolverEnvironment,
    dir: OptimizationDirection,
    imprecise_solver: &IterativeMinMaxSolver<I>,
    rational_a: &SparseMatrix<R>,
    rational_b: &[R],
    x: &mut Vec<I>,
    b: &[I],
    tmp: &mut Vec<I>,
) -> Result<RationalSearchOutcome<R>, SolverError> {
    let max_iterations = env.minmax.max_iterations;
    let mut precision = BigRational::from_float(env.minmax.precision).ok_or_else(|| {
        SolverError::InvalidEnvironment(format!("precision {} is not a finite number", env.minmax.precision))
    })?;
    let ten = BigRational::from_integer(BigInt::from(10));

    let mut status = SolverStatus::InProgress;
    let mut overall_iterations = 0u64;
    let mut invocations = 0u64;
    let mut candidate: Vec<R> = Vec::with_capacity(x.len());
    while status == SolverStatus::InProgress && overall_iterations < max_iterations {
        let result = imprecise_solver.perform_value_iteration(
            dir,
            x,
            tmp,
            b,
            &I::from_rational(&precision),
            env.minmax.relative,
            SolverGuarantee::LessOrEqual,
            overall_iterations,
            max_iterations,
            env.minmax.multiplication_style,
        );
        invocations += 1;
        overall_iterations += result.iterations;
        trace!(
            "Completed {} value iteration invocations, the last one with precision {} in {} iterations.",
            invocations,
            precision,
            result.iterations
        );

        let digits = decimal_digits(&precision);
        match sharpen(dir, digits, rational_a, x, rational_b, &mut candidate) {
            Ok(true) => status = SolverStatus::Converged,
            Ok(false) => precision = precision / ten.clone(),
            Err(SolverError::PrecisionExceeded { digits }) => {
                info!("Sharpening to {} digits exceeds the precision of the value type.", digits);
                return Ok(RationalSearchOutcome::RetryWithHigherPrecision);
            }
            Err(e) => return Err(e),
        }
    }
    if status == SolverStatus::InProgress {
        status = SolverStatus::MaximalIterationsExceeded;
    }
    report_status(status, overall_iterations);

    Ok(RationalSearchOutcome::Finished {
        status,
        iterations: overall_iterations,
        solution: if status == SolverStatus::Converged { Some(candidate) } else { None },
    })
}

/// Tries every precision from `0` to `digits`; on success the solution is
/// left in `candidate`.
fn sharpen<R: SolverValue, I: SolverValue>(
    dir: OptimizationDirection,
    digits: u64,
    rational_a: &SparseMatrix<R>,
    x: &[I],
    rational_b: &[R],
    candidate: &mut Vec<R>,
) -> Result<bool, SolverError> {
    for p in 0..=digits {
        candidate.clear();
        for value in x {
            candidate.push(R::from_rational(&value.sharpen(p)?));
        }
        if is_solution(dir, rational_a, candidate, rational_b) {
            return Ok(true);
        }
    }
    Ok(false)
}
