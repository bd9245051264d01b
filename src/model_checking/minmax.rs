use std::mem;

use log::{debug, info, warn};

use super::environment::{LinearEquationSettings, MinMaxMethod, MultiplicationStyle, SolverEnvironment};
use super::error::SolverError;
use super::linear::LinearEquationSolver;
use super::requirements::MinMaxRequirements;
use super::scheduler::Scheduler;
use super::sparse::{equal_modulo_precision, select_vector_values, SparseMatrix};
use super::types::{OptimizationDirection, SolverGuarantee, SolverStatus};
use super::value_type::SolverValue;

/// Custom early termination, queried after every iteration with the current
/// iterate and the side of the true solution it is known to lie on.
pub trait TerminationCondition<V> {
    fn terminate_now(&self, x: &[V], guarantee: SolverGuarantee) -> bool;

    /// Whether the condition can only fire under the given guarantee.
    fn requires_guarantee(&self, guarantee: SolverGuarantee) -> bool;
}

/// Stops as soon as the minimum (or maximum) over the filtered states is
/// known to exceed a threshold. Only lower bounds of the true values can
/// establish this.
#[derive(Debug, Clone)]
pub struct TerminateIfFilteredExtremumExceedsThreshold<V> {
    filter: Vec<bool>,
    threshold: V,
    strict: bool,
    use_minimum: bool,
}

impl<V: SolverValue> TerminateIfFilteredExtremumExceedsThreshold<V> {
    pub fn new(filter: Vec<bool>, strict: bool, threshold: V, use_minimum: bool) -> Self {
        TerminateIfFilteredExtremumExceedsThreshold {
            filter,
            threshold,
            strict,
            use_minimum,
        }
    }
}

impl<V: SolverValue> TerminationCondition<V> for TerminateIfFilteredExtremumExceedsThreshold<V> {
    fn terminate_now(&self, x: &[V], guarantee: SolverGuarantee) -> bool {
        if guarantee != SolverGuarantee::LessOrEqual {
            return false;
        }
        let extremum = self
            .filter
            .iter()
            .zip(x.iter())
            .filter(|(relevant, _)| **relevant)
            .map(|(_, value)| value.clone())
            .fold(None, |acc: Option<V>, value| match acc {
                None => Some(value),
                Some(current) if self.use_minimum => Some(V::min_of(current, value)),
                Some(current) => Some(V::max_of(current, value)),
            });
        match extremum {
            Some(value) if self.strict => value > self.threshold,
            Some(value) => value >= self.threshold,
            None => false,
        }
    }

    fn requires_guarantee(&self, guarantee: SolverGuarantee) -> bool {
        guarantee == SolverGuarantee::LessOrEqual
    }
}

/// Either one bound for all states or a bound per state.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverBound<V> {
    Scalar(V),
    PerState(Vec<V>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueIterationResult {
    pub iterations: u64,
    pub status: SolverStatus,
}

/// Solves `x = min/max_a (A_a x + b_a)` over the row groups of a sparse
/// matrix with one of several iterative or exact methods.
pub struct IterativeMinMaxSolver<V> {
    matrix: SparseMatrix<V>,
    unique_solution: bool,
    no_end_components: bool,
    lower_bound: Option<SolverBound<V>>,
    upper_bound: Option<SolverBound<V>>,
    initial_scheduler: Option<Vec<usize>>,
    relevant_values: Option<Vec<bool>>,
    track_scheduler: bool,
    scheduler_choices: Option<Vec<usize>>,
    requirements_checked: bool,
    caching_enabled: bool,
    termination_condition: Option<Box<dyn TerminationCondition<V>>>,
    pub(super) auxiliary_row_group_vector: Option<Vec<V>>,
    pub(super) auxiliary_row_group_vector2: Option<Vec<V>>,
    last_iterations: u64,
}

impl<V: SolverValue> IterativeMinMaxSolver<V> {
    pub fn new(matrix: SparseMatrix<V>) -> IterativeMinMaxSolver<V> {
        IterativeMinMaxSolver {
            matrix,
            unique_solution: false,
            no_end_components: false,
            lower_bound: None,
            upper_bound: None,
            initial_scheduler: None,
            relevant_values: None,
            track_scheduler: false,
            scheduler_choices: None,
            requirements_checked: false,
            caching_enabled: false,
            termination_condition: None,
            auxiliary_row_group_vector: None,
            auxiliary_row_group_vector2: None,
            last_iterations: 0,
        }
    }

    pub fn matrix(&self) -> &SparseMatrix<V> {
        &self.matrix
    }

    /// Replaces the system; cached vectors and the last scheduler are dropped.
    pub fn set_matrix(&mut self, matrix: SparseMatrix<V>) {
        self.matrix = matrix;
        self.scheduler_choices = None;
        self.clear_cache();
    }

    pub fn set_has_unique_solution(&mut self, value: bool) {
        self.unique_solution = value;
    }

    pub fn set_has_no_end_components(&mut self, value: bool) {
        self.no_end_components = value;
    }

    /// Absence of end components implies uniqueness.
    pub fn has_unique_solution(&self) -> bool {
        self.unique_solution || self.no_end_components
    }

    pub fn has_no_end_components(&self) -> bool {
        self.no_end_components
    }

    pub fn set_lower_bound(&mut self, value: V) {
        self.lower_bound = Some(SolverBound::Scalar(value));
    }

    pub fn set_upper_bound(&mut self, value: V) {
        self.upper_bound = Some(SolverBound::Scalar(value));
    }

    pub fn set_bounds(&mut self, lower: V, upper: V) {
        self.set_lower_bound(lower);
        self.set_upper_bound(upper);
    }

    pub fn set_lower_bounds(&mut self, values: Vec<V>) {
        debug_assert_eq!(values.len(), self.matrix.row_group_count());
        self.lower_bound = Some(SolverBound::PerState(values));
    }

    pub fn set_upper_bounds(&mut self, values: Vec<V>) {
        debug_assert_eq!(values.len(), self.matrix.row_group_count());
        self.upper_bound = Some(SolverBound::PerState(values));
    }

    pub fn has_lower_bound(&self) -> bool {
        self.lower_bound.is_some()
    }

    pub fn has_upper_bound(&self) -> bool {
        self.upper_bound.is_some()
    }

    pub fn set_initial_scheduler(&mut self, choices: Vec<usize>) {
        debug_assert_eq!(choices.len(), self.matrix.row_group_count());
        self.initial_scheduler = Some(choices);
    }

    pub fn has_initial_scheduler(&self) -> bool {
        self.initial_scheduler.is_some()
    }

    /// Restricts the convergence check of sound value iteration to the
    /// flagged states.
    pub fn set_relevant_values(&mut self, relevant: Vec<bool>) {
        debug_assert_eq!(relevant.len(), self.matrix.row_group_count());
        self.relevant_values = Some(relevant);
    }

    pub fn clear_relevant_values(&mut self) {
        self.relevant_values = None;
    }

    pub fn set_track_scheduler(&mut self, value: bool) {
        self.track_scheduler = value;
    }

    pub fn is_track_scheduler_set(&self) -> bool {
        self.track_scheduler
    }

    pub fn has_scheduler(&self) -> bool {
        self.scheduler_choices.is_some()
    }

    pub fn set_requirements_checked(&mut self, value: bool) {
        self.requirements_checked = value;
    }

    pub fn set_caching_enabled(&mut self, value: bool) {
        self.caching_enabled = value;
        if !value {
            self.clear_cache();
        }
    }

    pub fn set_termination_condition(&mut self, condition: Box<dyn TerminationCondition<V>>) {
        self.termination_condition = Some(condition);
    }

    pub fn reset_termination_condition(&mut self) {
        self.termination_condition = None;
    }

    pub fn last_iteration_count(&self) -> u64 {
        self.last_iterations
    }

    pub fn clear_cache(&mut self) {
        self.auxiliary_row_group_vector = None;
        self.auxiliary_row_group_vector2 = None;
    }

    /// Optimal local choice per state of the last solve.
    pub fn scheduler_choices(&self) -> Result<&[usize], SolverError> {
        if !self.track_scheduler {
            return Err(SolverError::InvalidOperation(
                "cannot retrieve a scheduler, because scheduler tracking was not enabled".to_string(),
            ));
        }
        self.scheduler_choices
            .as_deref()
            .ok_or_else(|| SolverError::InvalidOperation("no scheduler was computed yet".to_string()))
    }

    pub fn scheduler(&self) -> Result<Scheduler<V>, SolverError> {
        Ok(Scheduler::from_choices(self.scheduler_choices()?))
    }

    /// The method actually used under `env`: defaults are escalated to policy
    /// iteration for exact results and to sound value iteration for sound ones.
    pub fn get_method(&self, env: &SolverEnvironment) -> MinMaxMethod {
        let mut method = env.minmax.method();
        let exact_mode = V::IS_EXACT || env.force_exact;
        if exact_mode && method != MinMaxMethod::PolicyIteration && method != MinMaxMethod::RationalSearch {
            if env.minmax.is_method_set_from_default() {
                info!(
                    "Selecting 'policy iteration' as the solution technique to guarantee exact results. \
                     If you want to override this, please explicitly specify a different method."
                );
                method = MinMaxMethod::PolicyIteration;
            } else {
                warn!("The selected solution method {:?} does not guarantee exact results.", method);
            }
        } else if env.force_soundness && method == MinMaxMethod::ValueIteration {
            info!("Selecting 'sound value iteration' as the solution technique to guarantee sound results.");
            method = MinMaxMethod::SoundValueIteration;
        }
        method
    }

    /// Preconditions of the selected method for the given direction, `None`
    /// meaning the direction is not known yet.
    pub fn requirements(&self, env: &SolverEnvironment, direction: Option<OptimizationDirection>) -> MinMaxRequirements {
        let mut requirements = MinMaxRequirements::new();
        let maximizing_possible = direction.map_or(true, OptimizationDirection::maximize);
        let minimizing_possible = direction.map_or(true, OptimizationDirection::minimize);
        match self.get_method(env) {
            MinMaxMethod::SoundValueIteration => {
                if !self.has_unique_solution() {
                    requirements.require_no_end_components();
                }
                requirements.require_bounds();
            }
            MinMaxMethod::ValueIteration => {
                if !self.has_unique_solution() {
                    if self.track_scheduler {
                        requirements.require_no_end_components();
                    } else {
                        if maximizing_possible {
                            requirements.require_lower_bounds();
                        }
                        if minimizing_possible {
                            requirements.require_upper_bounds();
                        }
                    }
                }
            }
            MinMaxMethod::RationalSearch => {
                requirements.require_lower_bounds();
                if !self.has_unique_solution() && (minimizing_possible || self.track_scheduler) {
                    requirements.require_no_end_components();
                }
            }
            MinMaxMethod::PolicyIteration => {
                if !self.has_unique_solution() {
                    requirements.require_valid_initial_scheduler();
                }
            }
        }
        requirements
    }

    /// Unless marked as checked, every critical requirement not covered by
    /// the data given to the solver is an error.
    fn check_requirements(&self, env: &SolverEnvironment, dir: OptimizationDirection) -> Result<(), SolverError> {
        if self.requirements_checked {
            return Ok(());
        }
        let mut requirements = self.requirements(env, Some(dir));
        if self.has_lower_bound() {
            requirements.clear_lower_bounds();
        }
        if self.has_upper_bound() {
            requirements.clear_upper_bounds();
        }
        if self.has_initial_scheduler() {
            requirements.clear_valid_initial_scheduler();
        }
        if requirements.has_enabled_critical_requirement() {
            return Err(SolverError::UnmetRequirement(requirements.enabled_requirements_as_string()));
        }
        Ok(())
    }

    /// Solves the system for `dir`, overwriting `x` (which may carry an
    /// initial guess). `b` has one entry per row.
    pub fn solve_equations(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<SolverStatus, SolverError> {
        env.validate()?;
        if x.len() != self.matrix.row_group_count() || b.len() != self.matrix.row_count() {
            return Err(SolverError::InvalidOperation(format!(
                "dimension mismatch: {} states and {} rows, but got {} values and {} right-hand sides",
                self.matrix.row_group_count(),
                self.matrix.row_count(),
                x.len(),
                b.len()
            )));
        }
        if let Some(group) = self.matrix.first_empty_row_group() {
            return Err(SolverError::InvalidOperation(format!("state {} has no choices", group)));
        }
        self.check_requirements(env, dir)?;
        let method = self.get_method(env);
        debug!("Solving MinMax equation system ({}) with {:?}.", dir, method);
        let status = match method {
            MinMaxMethod::ValueIteration => self.solve_equations_value_iteration(env, dir, x, b)?,
            MinMaxMethod::SoundValueIteration => self.solve_equations_sound_value_iteration(env, dir, x, b)?,
            MinMaxMethod::PolicyIteration => self.solve_equations_policy_iteration(env, dir, x, b)?,
            MinMaxMethod::RationalSearch => self.solve_equations_rational_search(env, dir, x, b)?,
        };
        if !self.caching_enabled {
            self.clear_cache();
        }
        Ok(status)
    }

    fn solve_equations_value_iteration(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<SolverStatus, SolverError> {
        let mut tmp = self.take_auxiliary_vector();
        let mut guarantee = SolverGuarantee::None;

        if let Some(initial) = self.initial_scheduler.as_deref() {
            let settings = self.induced_linear_settings(env);
            self.solve_induced_equation_system(&settings, initial, x, b)?;
            // an induced solution bounds the optimum from one side
            guarantee = if dir.maximize() {
                SolverGuarantee::LessOrEqual
            } else {
                SolverGuarantee::GreaterOrEqual
            };
        } else if !self.has_unique_solution() {
            if dir.maximize() {
                self.create_lower_bounds_vector(x);
                guarantee = SolverGuarantee::LessOrEqual;
            } else {
                self.create_upper_bounds_vector(x);
                guarantee = SolverGuarantee::GreaterOrEqual;
            }
        } else if let Some(condition) = self.termination_condition.as_ref() {
            if condition.requires_guarantee(SolverGuarantee::LessOrEqual) && self.has_lower_bound() {
                self.create_lower_bounds_vector(x);
                guarantee = SolverGuarantee::LessOrEqual;
            } else if condition.requires_guarantee(SolverGuarantee::GreaterOrEqual) && self.has_upper_bound() {
                self.create_upper_bounds_vector(x);
                guarantee = SolverGuarantee::GreaterOrEqual;
            }
        }

        let precision = V::from_double(env.minmax.precision);
        let result = self.perform_value_iteration(
            dir,
            x,
            &mut tmp,
            b,
            &precision,
            env.minmax.relative,
            guarantee,
            0,
            env.minmax.max_iterations,
            env.minmax.multiplication_style,
        );
        report_status(result.status, result.iterations);
        self.last_iterations = result.iterations;

        if self.track_scheduler {
            self.store_scheduler_choices(dir, x, b, &mut tmp);
        }
        self.auxiliary_row_group_vector = Some(tmp);
        Ok(result.status)
    }

    /// Bellman iterations from `x` until two successive iterates agree up to
    /// `precision`. `tmp` is scratch space; the final iterate is always in `x`.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn perform_value_iteration(
        &self,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        tmp: &mut Vec<V>,
        b: &[V],
        precision: &V,
        relative: bool,
        guarantee: SolverGuarantee,
        current_iterations: u64,
        max_iterations: u64,
        style: MultiplicationStyle,
    ) -> ValueIterationResult {
        tmp.resize(x.len(), V::zero());
        let mut iterations = current_iterations;
        let mut status = SolverStatus::InProgress;
        while status == SolverStatus::InProgress {
            match style {
                MultiplicationStyle::GaussSeidel => {
                    tmp.clone_from(x);
                    self.matrix.multiply_and_reduce_gauss_seidel(dir, tmp, b);
                }
                MultiplicationStyle::Regular => self.matrix.multiply_and_reduce(dir, x, b, tmp, None),
            }
            if equal_modulo_precision(x, tmp, precision, relative) {
                status = SolverStatus::Converged;
            }
            mem::swap(x, tmp);
            iterations += 1;
            status = self.update_status_if_not_converged(status, x, iterations, max_iterations, guarantee);
        }
        ValueIterationResult {
            iterations: iterations - current_iterations,
            status,
        }
    }

    pub(super) fn update_status_if_not_converged(
        &self,
        status: SolverStatus,
        x: &[V],
        iterations: u64,
        max_iterations: u64,
        guarantee: SolverGuarantee,
    ) -> SolverStatus {
        if status == SolverStatus::Converged {
            return status;
        }
        match self.termination_condition.as_ref() {
            Some(condition) if condition.terminate_now(x, guarantee) => SolverStatus::TerminatedEarly,
            _ if iterations >= max_iterations => SolverStatus::MaximalIterationsExceeded,
            _ => status,
        }
    }

    /// The linear solver has to be at least as precise as this one.
    pub(super) fn induced_linear_settings(&self, env: &SolverEnvironment) -> LinearEquationSettings {
        let mut settings = env.linear.clone();
        if !V::IS_EXACT && settings.precision > env.minmax.precision {
            settings.precision = env.minmax.precision;
        }
        settings
    }

    /// Solves the Markov chain obtained by fixing `scheduler`.
    pub(super) fn solve_induced_equation_system(
        &self,
        settings: &LinearEquationSettings,
        scheduler: &[usize],
        x: &mut [V],
        b: &[V],
    ) -> Result<SolverStatus, SolverError> {
        let submatrix = self.matrix.select_rows_from_row_groups(scheduler);
        let sub_b = select_vector_values(scheduler, self.matrix.row_group_indices(), b);
        let solver = LinearEquationSolver::new(submatrix, settings.clone());
        let status = solver.solve_equations(x, &sub_b)?;
        if status != SolverStatus::Converged {
            warn!("Linear equation solver for the induced system did not converge.");
        }
        Ok(status)
    }

    pub(super) fn store_scheduler_choices(&mut self, dir: OptimizationDirection, x: &[V], b: &[V], scratch: &mut Vec<V>) {
        scratch.resize(x.len(), V::zero());
        let mut choices = vec![0; self.matrix.row_group_count()];
        self.matrix.multiply_and_reduce(dir, x, b, scratch, Some(&mut choices));
        self.scheduler_choices = Some(choices);
    }

    pub(super) fn set_scheduler_choices(&mut self, choices: Vec<usize>) {
        self.scheduler_choices = Some(choices);
    }

    pub(super) fn set_last_iterations(&mut self, iterations: u64) {
        self.last_iterations = iterations;
    }

    pub(super) fn initial_scheduler(&self) -> Option<&[usize]> {
        self.initial_scheduler.as_deref()
    }

    pub(super) fn relevant_values(&self) -> Option<&[bool]> {
        self.relevant_values.as_deref()
    }

    pub(super) fn take_auxiliary_vector(&mut self) -> Vec<V> {
        let mut vector = self.auxiliary_row_group_vector.take().unwrap_or_default();
        vector.resize(self.matrix.row_group_count(), V::zero());
        vector
    }

    pub(super) fn take_auxiliary_vector2(&mut self) -> Vec<V> {
        let mut vector = self.auxiliary_row_group_vector2.take().unwrap_or_default();
        vector.resize(self.matrix.row_group_count(), V::zero());
        vector
    }

    /// Fills `x` with the lower bounds; leaves it untouched without bounds.
    pub(super) fn create_lower_bounds_vector(&self, x: &mut [V]) -> bool {
        fill_from_bound(self.lower_bound.as_ref(), x)
    }

    pub(super) fn create_upper_bounds_vector(&self, x: &mut [V]) -> bool {
        fill_from_bound(self.upper_bound.as_ref(), x)
    }
}

fn fill_from_bound<V: SolverValue>(bound: Option<&SolverBound<V>>, x: &mut [V]) -> bool {
    match bound {
        Some(SolverBound::Scalar(value)) => {
            x.iter_mut().for_each(|entry| *entry = value.clone());
            true
        }
        Some(SolverBound::PerState(values)) => {
            x.clone_from_slice(values);
            true
        }
        None => {
            debug!("No bound available to initialise the solution vector.");
            false
        }
    }
}

pub(super) fn report_status(status: SolverStatus, iterations: u64) {
    match status {
        SolverStatus::Converged => info!("Iterative solver converged after {} iterations.", iterations),
        SolverStatus::TerminatedEarly => info!("Iterative solver terminated early after {} iterations.", iterations),
        SolverStatus::MaximalIterationsExceeded => {
            warn!("Iterative solver did not converge after {} iterations.", iterations)
        }
        SolverStatus::InProgress => warn!("Iterative solver stopped while still in progress."),
    }
}

/// Whether `values` satisfies the Bellman equation of `(matrix, b)` exactly.
pub fn is_solution<V: SolverValue>(dir: OptimizationDirection, matrix: &SparseMatrix<V>, values: &[V], b: &[V]) -> bool {
    (0..matrix.row_group_count()).all(|group| {
        let (optimum, _) = matrix.optimal_value_for_row_group(dir, group, values, b);
        optimum == values[group]
    })
}
