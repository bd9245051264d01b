//! Long-run average values of nondeterministic models (Guck et al., ATVA'14).
//!
//! Every maximal end component is solved in isolation. The rest of the model
//! is then reduced to a stochastic shortest path problem in which each MEC
//! is collapsed into one auxiliary state that can either leave through one of
//! the MEC's exit choices or stay and collect the MEC's value.
use std::borrow::Cow;

use itertools::Itertools;
use log::{debug, info, warn};

use super::environment::{LraMethod, SolverEnvironment};
use super::error::SolverError;
use super::lra_lp::compute_lra_for_mec_lp;
use super::lra_vi::LraViHelper;
use super::mec::{MaximalEndComponent, MaximalEndComponentDecomposition};
use super::minmax::IterativeMinMaxSolver;
use super::scheduler::Scheduler;
use super::sparse::{SparseMatrix, SparseMatrixBuilder};
use super::types::OptimizationDirection;
use super::value_type::SolverValue;

/// Optional state rewards and state-action rewards (one per row).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewardModel<V> {
    state_rewards: Option<Vec<V>>,
    state_action_rewards: Option<Vec<V>>,
}

impl<V: SolverValue> RewardModel<V> {
    pub fn new(state_rewards: Option<Vec<V>>, state_action_rewards: Option<Vec<V>>) -> RewardModel<V> {
        RewardModel {
            state_rewards,
            state_action_rewards,
        }
    }

    pub fn has_state_rewards(&self) -> bool {
        self.state_rewards.is_some()
    }

    pub fn has_state_action_rewards(&self) -> bool {
        self.state_action_rewards.is_some()
    }

    pub fn state_reward(&self, state: usize) -> V {
        self.state_rewards.as_ref().map_or_else(V::zero, |r| r[state].clone())
    }

    pub fn state_action_reward(&self, row: usize) -> V {
        self.state_action_rewards.as_ref().map_or_else(V::zero, |r| r[row].clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelCheckingResult<V> {
    pub values: Vec<V>,
    pub scheduler: Option<Scheduler<V>>,
}

/// Computes optimal long-run average values, optionally with a memoryless
/// deterministic scheduler attaining them.
///
/// Backward transitions and the MEC decomposition are computed on first use
/// and cached; callers may supply their own instead.
pub struct NondeterministicInfiniteHorizonHelper<'a, V: SolverValue> {
    transitions: &'a SparseMatrix<V>,
    markovian_states: Option<&'a [bool]>,
    exit_rates: Option<&'a [V]>,
    backward_transitions: Option<Cow<'a, SparseMatrix<V>>>,
    mec_decomposition: Option<Cow<'a, MaximalEndComponentDecomposition>>,
    direction: Option<OptimizationDirection>,
    produce_scheduler: bool,
    produced_choices: Option<Vec<Option<usize>>>,
}

impl<'a, V: SolverValue> NondeterministicInfiniteHorizonHelper<'a, V> {
    /// Helper for a discrete-time MDP.
    pub fn new(transitions: &'a SparseMatrix<V>) -> NondeterministicInfiniteHorizonHelper<'a, V> {
        NondeterministicInfiniteHorizonHelper {
            transitions,
            markovian_states: None,
            exit_rates: None,
            backward_transitions: None,
            mec_decomposition: None,
            direction: None,
            produce_scheduler: false,
            produced_choices: None,
        }
    }

    /// Helper for a Markov automaton; `exit_rates` matter for Markovian
    /// states only.
    pub fn new_markov_automaton(
        transitions: &'a SparseMatrix<V>,
        markovian_states: &'a [bool],
        exit_rates: &'a [V],
    ) -> NondeterministicInfiniteHorizonHelper<'a, V> {
        debug_assert_eq!(markovian_states.len(), transitions.row_group_count());
        debug_assert_eq!(exit_rates.len(), transitions.row_group_count());
        NondeterministicInfiniteHorizonHelper {
            markovian_states: Some(markovian_states),
            exit_rates: Some(exit_rates),
            ..NondeterministicInfiniteHorizonHelper::new(transitions)
        }
    }

    pub fn provide_backward_transitions(&mut self, backward_transitions: &'a SparseMatrix<V>) {
        if self.backward_transitions.is_some() {
            warn!("Backward transitions were provided but they were already computed or set before.");
        }
        self.backward_transitions = Some(Cow::Borrowed(backward_transitions));
    }

    pub fn provide_mec_decomposition(&mut self, decomposition: &'a MaximalEndComponentDecomposition) {
        if self.mec_decomposition.is_some() {
            warn!("A MEC decomposition was provided but it was already computed or set before.");
        }
        self.mec_decomposition = Some(Cow::Borrowed(decomposition));
    }

    /// Drops the backward transitions and the decomposition computed here;
    /// provided ones are kept.
    pub fn clear_cache(&mut self) {
        if let Some(Cow::Owned(_)) = self.backward_transitions {
            self.backward_transitions = None;
        }
        if let Some(Cow::Owned(_)) = self.mec_decomposition {
            self.mec_decomposition = None;
        }
        self.produced_choices = None;
    }

    pub fn set_optimization_direction(&mut self, direction: OptimizationDirection) {
        self.direction = Some(direction);
    }

    pub fn optimization_direction(&self) -> Option<OptimizationDirection> {
        self.direction
    }

    pub fn set_produce_scheduler(&mut self, value: bool) {
        self.produce_scheduler = value;
    }

    pub fn is_produce_scheduler_set(&self) -> bool {
        self.produce_scheduler
    }

    pub fn is_continuous_time(&self) -> bool {
        debug_assert_eq!(
            self.markovian_states.is_some(),
            self.exit_rates.is_some(),
            "Markovian states and exit rates must be given together"
        );
        self.markovian_states.is_some()
    }

    /// Long-run fraction of time spent in `psi_states`.
    pub fn compute_long_run_average_probabilities(
        &mut self,
        env: &SolverEnvironment,
        psi_states: &[bool],
    ) -> Result<Vec<V>, SolverError> {
        self.compute_long_run_average_values_with(
            env,
            &|state| if psi_states[state] { V::one() } else { V::zero() },
            &|_| V::zero(),
        )
    }

    pub fn compute_long_run_average_rewards(
        &mut self,
        env: &SolverEnvironment,
        reward_model: &RewardModel<V>,
    ) -> Result<Vec<V>, SolverError> {
        self.compute_long_run_average_values_with(
            env,
            &|state| reward_model.state_reward(state),
            &|row| reward_model.state_action_reward(row),
        )
    }

    /// Missing vectors count as zero.
    pub fn compute_long_run_average_values(
        &mut self,
        env: &SolverEnvironment,
        state_values: Option<&[V]>,
        action_values: Option<&[V]>,
    ) -> Result<Vec<V>, SolverError> {
        self.compute_long_run_average_values_with(
            env,
            &|state| state_values.map_or_else(V::zero, |v| v[state].clone()),
            &|row| action_values.map_or_else(V::zero, |v| v[row].clone()),
        )
    }

    /// Long-run average of the rewards given by `state_reward` (per state)
    /// and `action_reward` (per global row).
    pub fn compute_long_run_average_values_with(
        &mut self,
        env: &SolverEnvironment,
        state_reward: &dyn Fn(usize) -> V,
        action_reward: &dyn Fn(usize) -> V,
    ) -> Result<Vec<V>, SolverError> {
        env.validate()?;
        let dir = self.direction.ok_or_else(|| {
            SolverError::InvalidOperation("no optimization direction was set for the LRA computation".to_string())
        })?;
        let number_of_states = self.transitions.row_group_count();
        if self.produce_scheduler {
            self.produced_choices = Some(vec![None; number_of_states]);
        }
        if number_of_states == 0 {
            return Ok(Vec::new());
        }

        let sub_env = self.underlying_environment(env);
        let decomposition = self.take_mec_decomposition();
        let result = self.solve_with_decomposition(&sub_env, dir, &decomposition, state_reward, action_reward);
        self.mec_decomposition = Some(decomposition);
        result
    }

    /// Local choice per state of the last computation.
    pub fn produced_optimal_choices(&self) -> Result<Vec<usize>, SolverError> {
        if !self.produce_scheduler {
            return Err(SolverError::InvalidOperation(
                "trying to get the produced optimal choices although no scheduler was requested".to_string(),
            ));
        }
        let choices = self.produced_choices.as_ref().ok_or_else(|| {
            SolverError::InvalidOperation("no optimal choices were produced yet".to_string())
        })?;
        choices
            .iter()
            .enumerate()
            .map(|(state, choice)| {
                choice.ok_or_else(|| SolverError::InvalidOperation(format!("no choice was resolved for state {}", state)))
            })
            .collect()
    }

    pub fn extract_scheduler(&self) -> Result<Scheduler<V>, SolverError> {
        Ok(Scheduler::from_choices(&self.produced_optimal_choices()?))
    }

    /// Bundles `values` with the scheduler, if one was requested.
    pub fn result(&self, values: Vec<V>) -> Result<ModelCheckingResult<V>, SolverError> {
        let scheduler = if self.produce_scheduler {
            Some(self.extract_scheduler()?)
        } else {
            None
        };
        Ok(ModelCheckingResult { values, scheduler })
    }

    /// The errors of the MEC values and of the SSP add up, so each gets half
    /// of the precision when soundness is required.
    fn underlying_environment(&self, env: &SolverEnvironment) -> SolverEnvironment {
        let mut sub_env = env.clone();
        if env.force_soundness {
            let precision = env.lra.precision / 2.0;
            sub_env.minmax.precision = precision;
            sub_env.minmax.relative = env.lra.relative;
            sub_env.linear.precision = precision;
            sub_env.lra.precision = precision;
        }
        sub_env
    }

    fn take_mec_decomposition(&mut self) -> Cow<'a, MaximalEndComponentDecomposition> {
        if let Some(decomposition) = self.mec_decomposition.take() {
            return decomposition;
        }
        let transitions = self.transitions;
        let backward = self
            .backward_transitions
            .get_or_insert_with(|| Cow::Owned(transitions.transpose()));
        Cow::Owned(MaximalEndComponentDecomposition::new(transitions, &**backward))
    }

    fn solve_with_decomposition(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        decomposition: &MaximalEndComponentDecomposition,
        state_reward: &dyn Fn(usize) -> V,
        action_reward: &dyn Fn(usize) -> V,
    ) -> Result<Vec<V>, SolverError> {
        let mut mec_values = Vec::with_capacity(decomposition.len());
        for mec in decomposition.iter() {
            mec_values.push(self.compute_lra_for_mec(env, dir, state_reward, action_reward, mec)?);
        }
        debug!("Computed the values of {} maximal end components.", mec_values.len());
        self.build_and_solve_ssp(env, dir, decomposition, &mec_values)
    }

    fn compute_lra_for_mec(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        state_reward: &dyn Fn(usize) -> V,
        action_reward: &dyn Fn(usize) -> V,
        mec: &MaximalEndComponent,
    ) -> Result<V, SolverError> {
        if let Some(markovian) = self.markovian_states {
            if let Some((state, _)) = mec
                .iter()
                .find(|(state, _)| markovian[*state] && self.transitions.row_group_size(*state) > 1)
            {
                return Err(SolverError::UnsupportedStructure(format!(
                    "Markovian state {} has {} choices; Markovian states must be deterministic",
                    state,
                    self.transitions.row_group_size(state)
                )));
            }
        }
        if mec.size() == 1 {
            return self.compute_lra_for_singleton_mec(dir, state_reward, action_reward, mec);
        }

        let method = self.lra_method(env);
        if self.produce_scheduler && method == LraMethod::LinearProgramming {
            return Err(SolverError::NotImplemented(
                "scheduler extraction is not implemented for the LP based LRA method, try value iteration".to_string(),
            ));
        }
        match method {
            LraMethod::LinearProgramming => compute_lra_for_mec_lp(
                self.transitions,
                self.markovian_states,
                self.exit_rates,
                dir,
                mec,
                state_reward,
                action_reward,
            ),
            LraMethod::ValueIteration => {
                let helper = LraViHelper::new(
                    mec,
                    self.transitions,
                    V::from_double(env.lra.aperiodic_factor),
                    self.markovian_states,
                    self.exit_rates,
                )?;
                helper.perform_value_iteration(env, dir, state_reward, action_reward, self.produced_choices.as_deref_mut())
            }
        }
    }

    fn compute_lra_for_singleton_mec(
        &mut self,
        dir: OptimizationDirection,
        state_reward: &dyn Fn(usize) -> V,
        action_reward: &dyn Fn(usize) -> V,
        mec: &MaximalEndComponent,
    ) -> Result<V, SolverError> {
        let (state, choices) = mec
            .iter()
            .next()
            .ok_or_else(|| SolverError::InvalidOperation("empty end component".to_string()))?;
        let first_row = self.transitions.row_group(state).start;
        let mut rows = choices.iter().copied();
        let first = rows
            .next()
            .ok_or_else(|| SolverError::InvalidOperation(format!("end component state {} has no choice", state)))?;

        if let (Some(markovian), Some(exit_rates)) = (self.markovian_states, self.exit_rates) {
            // non-Zenoness: a singleton MEC of a Markov automaton is a Markovian state with one choice
            if !markovian[state] {
                return Err(SolverError::UnsupportedStructure(format!(
                    "Markov automaton has Zeno behavior at state {}; long-run averages are not supported",
                    state
                )));
            }
            if let Some(produced) = self.produced_choices.as_mut() {
                produced[state] = Some(first - first_row);
            }
            return Ok(state_reward(state) + exit_rates[state].clone() * action_reward(first));
        }

        let mut best_value = action_reward(first);
        let mut best_row = first;
        for row in rows {
            let value = action_reward(row);
            if dir.improves(&best_value, &value) {
                best_value = value;
                best_row = row;
            }
        }
        if let Some(produced) = self.produced_choices.as_mut() {
            produced[state] = Some(best_row - first_row);
        }
        Ok(best_value + state_reward(state))
    }

    fn lra_method(&self, env: &SolverEnvironment) -> LraMethod {
        let mut method = env.lra.method();
        let from_default = env.lra.is_method_set_from_default();
        if (V::IS_EXACT || env.force_exact) && from_default && method != LraMethod::LinearProgramming {
            info!(
                "Selecting 'LP' as the solution technique for long-run properties to guarantee exact results. \
                 If you want to override this, please explicitly specify a different LRA method."
            );
            method = LraMethod::LinearProgramming;
        } else if env.force_soundness && from_default && method != LraMethod::ValueIteration {
            info!(
                "Selecting 'VI' as the solution technique for long-run properties to guarantee sound results. \
                 If you want to override this, please explicitly specify a different LRA method."
            );
            method = LraMethod::ValueIteration;
        }
        method
    }

    /// Solves the SSP in which each MEC is one auxiliary state, then stitches
    /// the scheduler and maps the values back to the original states.
    fn build_and_solve_ssp(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        decomposition: &MaximalEndComponentDecomposition,
        mec_values: &[V],
    ) -> Result<Vec<V>, SolverError> {
        let transitions = self.transitions;
        let number_of_states = transitions.row_group_count();
        let state_to_mec = decomposition.state_to_mec(number_of_states);
        let states_not_in_mecs: Vec<usize> = (0..number_of_states).filter(|s| state_to_mec[*s].is_none()).collect();
        let number_of_states_not_in_mecs = states_not_in_mecs.len();

        // MEC states point to the auxiliary state of their MEC
        let mut to_ssp_state = vec![0; number_of_states];
        for (ssp_state, state) in states_not_in_mecs.iter().enumerate() {
            to_ssp_state[*state] = ssp_state;
        }
        for (state, mec) in state_to_mec.iter().enumerate() {
            if let Some(mec) = mec {
                to_ssp_state[state] = number_of_states_not_in_mecs + mec;
            }
        }
        let number_of_ssp_states = number_of_states_not_in_mecs + decomposition.len();
        let ssp_row = |row: usize| {
            transitions
                .row(row)
                .iter()
                .filter(|e| !e.value.is_zero())
                .map(|e| (to_ssp_state[e.column], e.value.clone()))
                .collect::<Vec<_>>()
        };

        let mut builder = SparseMatrixBuilder::new();
        let mut rhs = Vec::new();
        for state in states_not_in_mecs.iter() {
            builder.new_row_group();
            for row in transitions.row_group(*state) {
                builder.add_row(ssp_row(row));
                rhs.push(V::zero());
            }
        }
        // exit choice of every auxiliary row as (state, local choice); `None` stays in the MEC
        let mut exit_choices: Vec<Option<(usize, usize)>> = Vec::new();
        for (mec, value) in decomposition.iter().zip(mec_values.iter()) {
            builder.new_row_group();
            for (state, choices) in mec.iter() {
                let first_row = transitions.row_group(state).start;
                for row in transitions.row_group(state).filter(|row| !choices.contains(row)) {
                    builder.add_row(ssp_row(row));
                    rhs.push(V::zero());
                    exit_choices.push(Some((state, row - first_row)));
                }
            }
            builder.add_row(Vec::new());
            rhs.push(value.clone());
            exit_choices.push(None);
        }
        let ssp_matrix = builder.build(number_of_ssp_states);
        let exit_choice_offset = ssp_matrix.row_group_indices()[number_of_states_not_in_mecs];

        let mut solver = IterativeMinMaxSolver::new(ssp_matrix);
        solver.set_has_unique_solution(true);
        solver.set_has_no_end_components(true);
        solver.set_track_scheduler(self.produce_scheduler);
        let mut requirements = solver.requirements(env, Some(dir));
        requirements.clear_bounds();
        if requirements.has_enabled_critical_requirement() {
            return Err(SolverError::UnmetRequirement(requirements.enabled_requirements_as_string()));
        }
        if let Some((lower, upper)) = mec_values.iter().minmax().into_option() {
            solver.set_bounds(lower.clone(), upper.clone());
        }
        solver.set_requirements_checked(true);

        let mut x = vec![V::zero(); number_of_ssp_states];
        let status = solver.solve_equations(env, dir, &mut x, &rhs)?;
        debug!(
            "Solved SSP with {} states ({} outside MECs): {:?}.",
            number_of_ssp_states, number_of_states_not_in_mecs, status
        );

        if self.produce_scheduler {
            let ssp_choices = solver.scheduler_choices()?;
            let ssp_matrix = solver.matrix();
            let backward = self
                .backward_transitions
                .get_or_insert_with(|| Cow::Owned(transitions.transpose()));
            if let Some(produced) = self.produced_choices.as_mut() {
                for (ssp_state, state) in states_not_in_mecs.iter().enumerate() {
                    produced[*state] = Some(ssp_choices[ssp_state]);
                }
                for (index, mec) in decomposition.iter().enumerate() {
                    let ssp_state = number_of_states_not_in_mecs + index;
                    let chosen_row = ssp_matrix.row_group(ssp_state).start + ssp_choices[ssp_state];
                    match exit_choices[chosen_row - exit_choice_offset] {
                        // staying keeps the choices of the MEC computation
                        None => debug_assert!(ssp_matrix.row(chosen_row).is_empty()),
                        Some((exit_state, exit_choice)) => {
                            produced[exit_state] = Some(exit_choice);
                            reach_exit_state(transitions, &**backward, mec, exit_state, produced);
                        }
                    }
                }
            }
        }

        Ok((0..number_of_states).map(|state| x[to_ssp_state[state]].clone()).collect())
    }
}

/// Resolves every other state of `mec` to a MEC choice that moves towards
/// `exit_state`, by a backward search from it.
fn reach_exit_state<V: SolverValue>(
    transitions: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    mec: &MaximalEndComponent,
    exit_state: usize,
    produced: &mut [Option<usize>],
) {
    for state in mec.states().filter(|s| *s != exit_state) {
        produced[state] = None;
    }
    let mut stack = vec![exit_state];
    while let Some(current) = stack.pop() {
        for predecessor in backward.row(current).iter().map(|e| e.column) {
            if !mec.contains_state(predecessor) || produced[predecessor].is_some() {
                continue;
            }
            let first_row = transitions.row_group(predecessor).start;
            let towards_current = mec.choices_for_state(predecessor).and_then(|choices| {
                choices.iter().copied().find(|row| {
                    transitions
                        .row(*row)
                        .iter()
                        .any(|e| e.column == current && !e.value.is_zero())
                })
            });
            if let Some(row) = towards_current {
                produced[predecessor] = Some(row - first_row);
                stack.push(predecessor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use num::rational::BigRational;
    use num::BigInt;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use test_log::test;

    use super::*;
    use crate::model_checking::environment::{LraMethod, MinMaxMethod};
    use crate::model_checking::mdp::random_transition_matrix;
    use crate::model_checking::sparse::{matrix_from_groups, select_vector_values};

    fn ratio(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    fn lra<V: SolverValue>(
        matrix: &SparseMatrix<V>,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        state_rewards: Option<&[V]>,
        action_rewards: Option<&[V]>,
    ) -> Vec<V> {
        let mut helper = NondeterministicInfiniteHorizonHelper::new(matrix);
        helper.set_optimization_direction(dir);
        helper.compute_long_run_average_values(env, state_rewards, action_rewards).unwrap()
    }

    #[test]
    fn test_two_isolated_self_loops() {
        let matrix = matrix_from_groups(vec![vec![vec![(0, 1.0)]], vec![vec![(1, 1.0)]]]);
        let rewards = [1.0, 0.0];
        for dir in [OptimizationDirection::Minimize, OptimizationDirection::Maximize].iter() {
            let values = lra(&matrix, &SolverEnvironment::new(), *dir, Some(&rewards), None);
            assert_eq!(values, vec![1.0, 0.0]);
        }

        let exact = matrix_from_groups(vec![vec![vec![(0, ratio(1, 1))]], vec![vec![(1, ratio(1, 1))]]]);
        let rewards = [ratio(1, 1), ratio(0, 1)];
        let values = lra(&exact, &SolverEnvironment::new(), OptimizationDirection::Maximize, Some(&rewards), None);
        assert_eq!(values, vec![ratio(1, 1), ratio(0, 1)]);
    }

    /// 0 gambles (a) between the absorbing 1 (reward 1) and 2 (reward 1/5),
    /// or (b) moves to 2 surely.
    fn gamble<V: SolverValue>() -> (SparseMatrix<V>, Vec<V>) {
        let v = |n: i64, d: i64| V::from_rational(&ratio(n, d));
        let matrix = matrix_from_groups(vec![
            vec![vec![(1, v(1, 2)), (2, v(1, 2))], vec![(2, v(1, 1))]],
            vec![vec![(1, v(1, 1))]],
            vec![vec![(2, v(1, 1))]],
        ]);
        (matrix, vec![V::zero(), V::zero(), V::one(), v(1, 5)])
    }

    #[test]
    fn test_reduces_to_shortest_path_problem() {
        let (matrix, rewards) = gamble::<f64>();
        let env = SolverEnvironment::new().with_precision(1e-8);
        let max = lra(&matrix, &env, OptimizationDirection::Maximize, None, Some(&rewards));
        let min = lra(&matrix, &env, OptimizationDirection::Minimize, None, Some(&rewards));

        // the same question as a plain reachability-reward system
        let direct = matrix_from_groups(vec![
            vec![vec![(1, 0.5), (2, 0.5)], vec![(2, 1.0)]],
            vec![vec![]],
            vec![vec![]],
        ]);
        let b = vec![0.0, 0.0, 1.0, 0.2];
        for (dir, values) in [(OptimizationDirection::Maximize, max), (OptimizationDirection::Minimize, min)].iter() {
            let mut solver = IterativeMinMaxSolver::new(direct.clone());
            solver.set_has_no_end_components(true);
            let mut x = vec![0.0; 3];
            solver.solve_equations(&env, *dir, &mut x, &b).unwrap();
            for (a, b) in values.iter().zip(x.iter()) {
                assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_exact_values() {
        let (matrix, rewards) = gamble::<BigRational>();
        let values = lra(
            &matrix,
            &SolverEnvironment::new(),
            OptimizationDirection::Maximize,
            None,
            Some(&rewards),
        );
        assert_eq!(values, vec![ratio(3, 5), ratio(1, 1), ratio(1, 5)]);
    }

    #[test]
    fn test_exact_cycle_through_linear_program() {
        // 0 -> 1 -> 2 -> 0 earning 1 on the step out of 0
        let one = ratio(1, 1);
        let matrix = matrix_from_groups(vec![
            vec![vec![(1, one.clone())]],
            vec![vec![(2, one.clone())]],
            vec![vec![(0, one.clone())]],
        ]);
        let rewards = [one, ratio(0, 1), ratio(0, 1)];
        for dir in [OptimizationDirection::Minimize, OptimizationDirection::Maximize].iter() {
            let values = lra(&matrix, &SolverEnvironment::new(), *dir, None, Some(&rewards));
            assert_eq!(values, vec![ratio(1, 3); 3]);
        }
    }

    /// {0, 1} is a MEC without reward; 1 may leave to the absorbing 2 that
    /// earns 1 per step.
    fn leave_mec() -> (SparseMatrix<f64>, Vec<f64>) {
        let matrix = matrix_from_groups(vec![
            vec![vec![(1, 1.0)]],
            vec![vec![(0, 1.0)], vec![(2, 1.0)]],
            vec![vec![(2, 1.0)]],
        ]);
        (matrix, vec![0.0, 0.0, 0.0, 1.0])
    }

    #[test]
    fn test_scheduler_leaves_mec_through_exit() {
        let (matrix, rewards) = leave_mec();
        let mut helper = NondeterministicInfiniteHorizonHelper::new(&matrix);
        helper.set_optimization_direction(OptimizationDirection::Maximize);
        helper.set_produce_scheduler(true);
        let values = helper
            .compute_long_run_average_values(&SolverEnvironment::new(), None, Some(&rewards))
            .unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert_eq!(helper.produced_optimal_choices().unwrap(), vec![0, 1, 0]);

        helper.set_optimization_direction(OptimizationDirection::Minimize);
        let values = helper
            .compute_long_run_average_values(&SolverEnvironment::new(), None, Some(&rewards))
            .unwrap();
        assert!(values[0].abs() < 1e-6 && values[1].abs() < 1e-6);
        assert_eq!(helper.produced_optimal_choices().unwrap(), vec![0, 0, 0]);
        let result = helper.result(values).unwrap();
        assert!(result.scheduler.unwrap().is_fully_defined());
    }

    #[test]
    fn test_sound_environment() {
        let (matrix, rewards) = leave_mec();
        let values = lra(
            &matrix,
            &SolverEnvironment::sound().with_precision(1e-6),
            OptimizationDirection::Maximize,
            None,
            Some(&rewards),
        );
        assert!(values.iter().all(|v| (v - 1.0).abs() <= 1e-6));
    }

    #[test]
    fn test_lp_agrees_with_value_iteration() {
        let matrix = matrix_from_groups(vec![vec![vec![(1, 1.0)], vec![(0, 1.0)]], vec![vec![(0, 0.5), (1, 0.5)]]]);
        let rewards = vec![3.0, 1.0, 0.0];
        for dir in [OptimizationDirection::Minimize, OptimizationDirection::Maximize].iter() {
            let lp_env = SolverEnvironment::new().with_lra_method(LraMethod::LinearProgramming);
            let vi_env = SolverEnvironment::new().with_precision(1e-9);
            let lp = lra(&matrix, &lp_env, *dir, None, Some(&rewards));
            let vi = lra(&matrix, &vi_env, *dir, None, Some(&rewards));
            for (a, b) in lp.iter().zip(vi.iter()) {
                assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_lp_scheduler_is_not_implemented() {
        let (matrix, rewards) = leave_mec();
        let mut helper = NondeterministicInfiniteHorizonHelper::new(&matrix);
        helper.set_optimization_direction(OptimizationDirection::Maximize);
        helper.set_produce_scheduler(true);
        let env = SolverEnvironment::new().with_lra_method(LraMethod::LinearProgramming);
        assert!(matches!(
            helper.compute_long_run_average_values(&env, None, Some(&rewards)),
            Err(SolverError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_missing_direction_and_scheduler() {
        let (matrix, _) = leave_mec();
        let mut helper = NondeterministicInfiniteHorizonHelper::new(&matrix);
        assert!(matches!(
            helper.compute_long_run_average_values(&SolverEnvironment::new(), None, None),
            Err(SolverError::InvalidOperation(_))
        ));
        assert!(helper.produced_optimal_choices().is_err());
        helper.set_produce_scheduler(true);
        assert!(helper.extract_scheduler().is_err());
    }

    #[test]
    fn test_zeno_singleton_is_rejected() {
        let matrix = matrix_from_groups(vec![vec![vec![(0, 1.0)]]]);
        let markovian = [false];
        let rates = [0.0];
        let mut helper = NondeterministicInfiniteHorizonHelper::new_markov_automaton(&matrix, &markovian, &rates);
        helper.set_optimization_direction(OptimizationDirection::Maximize);
        assert!(helper.is_continuous_time());
        assert!(matches!(
            helper.compute_long_run_average_probabilities(&SolverEnvironment::new(), &[true]),
            Err(SolverError::UnsupportedStructure(_))
        ));
    }

    #[test]
    fn test_nondeterministic_markovian_state_is_rejected() {
        // Markovian 0 may go to 1 or loop; both choices stay in the MEC {0, 1}
        let matrix = matrix_from_groups(vec![vec![vec![(1, 1.0)], vec![(0, 1.0)]], vec![vec![(0, 1.0)]]]);
        let markovian = [true, true];
        let rates = [1.0, 1.0];
        for method in [LraMethod::ValueIteration, LraMethod::LinearProgramming].iter() {
            let mut helper = NondeterministicInfiniteHorizonHelper::new_markov_automaton(&matrix, &markovian, &rates);
            helper.set_optimization_direction(OptimizationDirection::Maximize);
            let env = SolverEnvironment::new().with_lra_method(*method);
            assert!(matches!(
                helper.compute_long_run_average_probabilities(&env, &[true, false]),
                Err(SolverError::UnsupportedStructure(_))
            ));
        }
    }

    #[test]
    fn test_markov_automaton_probabilities() {
        // 0 (rate 2) -> 1 (instant) -> {0, 2}; 2 (rate 1) -> 0
        let matrix = matrix_from_groups(vec![
            vec![vec![(1, 1.0)]],
            vec![vec![(0, 1.0)], vec![(2, 1.0)]],
            vec![vec![(0, 1.0)]],
        ]);
        let markovian = [true, false, true];
        let rates = [2.0, 0.0, 1.0];
        let mut helper = NondeterministicInfiniteHorizonHelper::new_markov_automaton(&matrix, &markovian, &rates);
        helper.set_optimization_direction(OptimizationDirection::Maximize);
        helper.set_produce_scheduler(true);
        let env = SolverEnvironment::new().with_precision(1e-8);
        let values = helper
            .compute_long_run_average_probabilities(&env, &[false, false, true])
            .unwrap();
        assert!(values.iter().all(|v| (v - 2.0 / 3.0).abs() < 1e-6));
        assert_eq!(helper.produced_optimal_choices().unwrap(), vec![0, 1, 0]);
    }

    #[test]
    fn test_reward_model_and_provided_decomposition() {
        let (matrix, rewards) = leave_mec();
        let backward = matrix.transpose();
        let decomposition = MaximalEndComponentDecomposition::new(&matrix, &backward);
        let mut helper = NondeterministicInfiniteHorizonHelper::new(&matrix);
        helper.provide_backward_transitions(&backward);
        helper.provide_mec_decomposition(&decomposition);
        helper.set_optimization_direction(OptimizationDirection::Maximize);
        let reward_model = RewardModel::new(Some(vec![0.5, 0.5, 0.0]), Some(rewards));
        let values = helper
            .compute_long_run_average_rewards(&SolverEnvironment::new(), &reward_model)
            .unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-6));
        helper.clear_cache();
        let again = helper
            .compute_long_run_average_rewards(&SolverEnvironment::new(), &reward_model)
            .unwrap();
        assert_eq!(values, again);
    }

    #[test]
    fn test_random_schedulers_attain_values() {
        let mut rng = StdRng::seed_from_u64(5);
        let env = SolverEnvironment::new().with_precision(1e-9);
        for _ in 0..10 {
            let matrix = random_transition_matrix(&mut rng, 8, 3, 3);
            let rewards: Vec<f64> = (0..matrix.row_count()).map(|_| rng.gen::<f64>()).collect();
            for dir in [OptimizationDirection::Minimize, OptimizationDirection::Maximize].iter() {
                let mut helper = NondeterministicInfiniteHorizonHelper::new(&matrix);
                helper.set_optimization_direction(*dir);
                helper.set_produce_scheduler(true);
                let values = helper.compute_long_run_average_values(&env, None, Some(&rewards)).unwrap();
                let choices = helper.produced_optimal_choices().unwrap();

                let induced = matrix.select_rows_from_row_groups(&choices);
                let induced_rewards = select_vector_values(&choices, matrix.row_group_indices(), &rewards);
                let chain = lra(&induced, &env, *dir, None, Some(&induced_rewards));
                for (a, b) in values.iter().zip(chain.iter()) {
                    assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_ssp_solver_method_is_configurable() {
        let (matrix, rewards) = gamble::<f64>();
        let env = SolverEnvironment::new().with_minmax_method(MinMaxMethod::PolicyIteration);
        let values = lra(&matrix, &env, OptimizationDirection::Maximize, None, Some(&rewards));
        assert!((values[0] - 0.6).abs() < 1e-12);
    }
}
