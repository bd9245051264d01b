//! Interval iteration (Haddad and Monmege, extended to rewards by Baier et
//! al.): a lower and an upper iterate approach the fixpoint from both sides.
use std::mem;

use log::trace;

use super::environment::{MultiplicationStyle, SolverEnvironment};
use super::error::SolverError;
use super::minmax::{report_status, IterativeMinMaxSolver};
use super::sparse::{equal_modulo_precision, equal_modulo_precision_filtered};
use super::types::{OptimizationDirection, SolverGuarantee, SolverStatus};
use super::value_type::SolverValue;

/// Both bounds are improved every this many iterations regardless of their
/// last differences.
const BOTH_STEPS_INTERVAL: u64 = 1000;

impl<V: SolverValue> IterativeMinMaxSolver<V> {
    pub(super) fn solve_equations_sound_value_iteration(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<SolverStatus, SolverError> {
        if !self.has_upper_bound() || !self.has_lower_bound() {
            return Err(SolverError::UnmetRequirement(
                "sound value iteration requires a lower and an upper bound, but none was given".to_string(),
            ));
        }

        let gauss_seidel = env.minmax.multiplication_style == MultiplicationStyle::GaussSeidel;
        self.create_lower_bounds_vector(x);
        let mut upper = self.take_auxiliary_vector();
        self.create_upper_bounds_vector(&mut upper);
        let mut tmp = if gauss_seidel { None } else { Some(self.take_auxiliary_vector2()) };

        let relevant = self.relevant_values().map(<[bool]>::to_vec);
        let mut old_values: Vec<V> = Vec::new();
        let mut max_lower_diff = V::zero();
        let mut max_upper_diff = V::zero();
        let relative = env.minmax.relative;
        let max_iterations = env.minmax.max_iterations;
        let mut precision = V::from_double(env.minmax.precision);
        if !relative {
            // the mean of both bounds is within half their distance
            precision = precision.clone() + precision;
        }

        let mut iterations = 0u64;
        let mut status = SolverStatus::InProgress;
        let mut do_convergence_check = true;
        while status == SolverStatus::InProgress && iterations < max_iterations {
            let both = iterations % BOTH_STEPS_INTERVAL == 0 || max_lower_diff == max_upper_diff;
            let lower_step = both || max_lower_diff >= max_upper_diff;
            let upper_step = both || !lower_step;
            if lower_step {
                max_lower_diff = self.sound_step(
                    dir,
                    x,
                    tmp.as_mut(),
                    b,
                    relevant.as_deref(),
                    &mut old_values,
                    max_lower_diff,
                );
            }
            if upper_step {
                max_upper_diff = self.sound_step(
                    dir,
                    &mut upper,
                    tmp.as_mut(),
                    b,
                    relevant.as_deref(),
                    &mut old_values,
                    max_upper_diff,
                );
            }
            debug_assert!(!max_lower_diff.is_negative() && !max_upper_diff.is_negative());
            if iterations % BOTH_STEPS_INTERVAL == 0 {
                trace!(
                    "Iteration {}: lower difference: {}, upper difference: {}.",
                    iterations,
                    max_lower_diff,
                    max_upper_diff
                );
            }

            if do_convergence_check {
                let converged = match relevant.as_deref() {
                    Some(filter) => equal_modulo_precision_filtered(x, &upper, filter, &precision, relative),
                    None => equal_modulo_precision(x, &upper, &precision, relative),
                };
                if converged {
                    status = SolverStatus::Converged;
                }
            }

            iterations += 1;
            do_convergence_check = !do_convergence_check;
            if lower_step {
                status = self.update_status_if_not_converged(status, x, iterations, max_iterations, SolverGuarantee::LessOrEqual);
            }
            if upper_step {
                status = self.update_status_if_not_converged(
                    status,
                    &upper,
                    iterations,
                    max_iterations,
                    SolverGuarantee::GreaterOrEqual,
                );
            }
        }
        if status == SolverStatus::InProgress {
            status = SolverStatus::MaximalIterationsExceeded;
        }
        report_status(status, iterations);
        self.set_last_iterations(iterations);

        let two = V::one() + V::one();
        for (lower, upper) in x.iter_mut().zip(upper.iter()) {
            *lower = (lower.clone() + upper.clone()) / two.clone();
        }

        if self.is_track_scheduler_set() {
            self.store_scheduler_choices(dir, x, b, &mut upper);
        }
        self.auxiliary_row_group_vector = Some(upper);
        self.auxiliary_row_group_vector2 = tmp;
        Ok(status)
    }

    /// One Bellman update of `values`, in place or through `tmp`. Returns the
    /// maximal change over the relevant states, or `previous_diff` when no
    /// relevant states are set.
    #[allow(clippy::too_many_arguments)]
    fn sound_step(
        &self,
        dir: OptimizationDirection,
        values: &mut Vec<V>,
        tmp: Option<&mut Vec<V>>,
        b: &[V],
        relevant: Option<&[bool]>,
        old_values: &mut Vec<V>,
        previous_diff: V,
    ) -> V {
        match tmp {
            None => {
                if let Some(filter) = relevant {
                    preserve_relevant_values(values, filter, old_values);
                }
                self.matrix().multiply_and_reduce_gauss_seidel(dir, values, b);
                match relevant {
                    Some(filter) => max_abs_diff_to_preserved(values, filter, old_values),
                    None => previous_diff,
                }
            }
            Some(tmp) => {
                self.matrix().multiply_and_reduce(dir, values, b, tmp, None);
                let diff = match relevant {
                    Some(filter) => max_abs_diff(values, tmp, filter),
                    None => previous_diff,
                };
                mem::swap(values, tmp);
                diff
            }
        }
    }
}

fn preserve_relevant_values<V: SolverValue>(values: &[V], relevant: &[bool], old_values: &mut Vec<V>) {
    old_values.clear();
    old_values.extend(
        values
            .iter()
            .zip(relevant.iter())
            .filter(|(_, r)| **r)
            .map(|(v, _)| v.clone()),
    );
}

fn max_abs_diff_to_preserved<V: SolverValue>(values: &[V], relevant: &[bool], old_values: &[V]) -> V {
    values
        .iter()
        .zip(relevant.iter())
        .filter(|(_, r)| **r)
        .zip(old_values.iter())
        .fold(V::zero(), |acc, ((new, _), old)| V::max_of(acc, (new.clone() - old.clone()).abs()))
}

fn max_abs_diff<V: SolverValue>(old: &[V], new: &[V], relevant: &[bool]) -> V {
    relevant
        .iter()
        .enumerate()
        .filter(|(_, r)| **r)
        .fold(V::zero(), |acc, (i, _)| V::max_of(acc, (new[i].clone() - old[i].clone()).abs()))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::model_checking::environment::MinMaxMethod;
    use crate::model_checking::minmax::TerminationCondition;
    use crate::model_checking::sparse::matrix_from_groups;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Geometric retry loop: from 0, reach 1 with 0.1 per step or stay; a
    /// second choice reaches 1 with 0.05 and the sink 2 with 0.05.
    fn slow_chain() -> (crate::model_checking::sparse::SparseMatrix<f64>, Vec<f64>) {
        let matrix = matrix_from_groups(vec![
            vec![vec![(0, 0.9), (1, 0.1)], vec![(0, 0.9), (1, 0.05), (2, 0.05)]],
            vec![vec![]],
            vec![vec![]],
        ]);
        (matrix, vec![0.0, 0.0, 1.0, 0.0])
    }

    /// Records every iterate with the side it bounds.
    struct Recorder {
        seen: Rc<RefCell<Vec<(f64, SolverGuarantee)>>>,
    }

    impl TerminationCondition<f64> for Recorder {
        fn terminate_now(&self, x: &[f64], guarantee: SolverGuarantee) -> bool {
            self.seen.borrow_mut().push((x[0], guarantee));
            false
        }

        fn requires_guarantee(&self, _guarantee: SolverGuarantee) -> bool {
            false
        }
    }

    #[test]
    fn test_bounds_bracket_true_value() {
        let (matrix, b) = slow_chain();
        let mut solver = IterativeMinMaxSolver::new(matrix);
        solver.set_bounds(0.0, 1.0);
        solver.set_has_no_end_components(true);
        let seen = Rc::new(RefCell::new(Vec::new()));
        solver.set_termination_condition(Box::new(Recorder { seen: seen.clone() }));
        let env = SolverEnvironment::sound().with_precision(1e-8);
        let mut x = vec![0.0; 3];
        let status = solver.solve_equations(&env, OptimizationDirection::Maximize, &mut x, &b).unwrap();
        assert_eq!(status, SolverStatus::Converged);
        assert!((x[0] - 1.0).abs() <= 1e-8);
        let seen = seen.borrow();
        assert!(!seen.is_empty());
        for (value, guarantee) in seen.iter() {
            match guarantee {
                SolverGuarantee::LessOrEqual => assert!(*value <= 1.0 + 1e-12),
                SolverGuarantee::GreaterOrEqual => assert!(*value >= 1.0 - 1e-12),
                SolverGuarantee::None => panic!("sound iterates always carry a guarantee"),
            }
        }
    }

    #[test]
    fn test_minimize_with_relevant_values() {
        let (matrix, b) = slow_chain();
        let mut solver = IterativeMinMaxSolver::new(matrix);
        solver.set_bounds(0.0, 1.0);
        solver.set_has_no_end_components(true);
        solver.set_relevant_values(vec![true, false, false]);
        solver.set_track_scheduler(true);
        let env = SolverEnvironment::new()
            .with_minmax_method(MinMaxMethod::SoundValueIteration)
            .with_precision(1e-6);
        let mut x = vec![0.0; 3];
        let status = solver.solve_equations(&env, OptimizationDirection::Minimize, &mut x, &b).unwrap();
        assert_eq!(status, SolverStatus::Converged);
        assert!((x[0] - 0.5).abs() <= 1e-6);
        assert_eq!(solver.scheduler_choices().unwrap()[0], 1);
    }

    #[test]
    fn test_regular_multiplication() {
        let (matrix, b) = slow_chain();
        let mut solver = IterativeMinMaxSolver::new(matrix);
        solver.set_bounds(0.0, 1.0);
        solver.set_has_no_end_components(true);
        let mut env = SolverEnvironment::sound().with_precision(1e-6);
        env.minmax.multiplication_style = MultiplicationStyle::Regular;
        let mut x = vec![0.0; 3];
        solver.solve_equations(&env, OptimizationDirection::Minimize, &mut x, &b).unwrap();
        assert!((x[0] - 0.5).abs() <= 1e-6);
    }

    #[test]
    fn test_missing_upper_bound() {
        let (matrix, b) = slow_chain();
        let mut solver = IterativeMinMaxSolver::new(matrix);
        solver.set_lower_bound(0.0);
        solver.set_requirements_checked(true);
        let mut x = vec![0.0; 3];
        let result = solver.solve_equations(&SolverEnvironment::sound(), OptimizationDirection::Maximize, &mut x, &b);
        assert!(matches!(result, Err(SolverError::UnmetRequirement(_))));
    }
}
