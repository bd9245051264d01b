//! Value iteration for the long-run average of a single end component.
//!
//! States of the component are split into timed states (all states of an
//! MDP, the Markovian states of a Markov automaton) and instant states. The
//! timed part is uniformized with rate `q = max exit rate * (1 + aperiodic
//! factor)`, which adds a self-loop to every timed state and makes the chain
//! aperiodic. The gain is read off the per-step difference of successive
//! iterates: once `max - min` of that difference is small enough, the
//! average gain is `(max + min) / 2 * q`.
use std::collections::HashMap;
use std::mem;

use log::{debug, trace, warn};

use super::environment::{MinMaxMethod, SolverEnvironment};
use super::error::SolverError;
use super::mec::MaximalEndComponent;
use super::minmax::IterativeMinMaxSolver;
use super::sparse::{SparseMatrix, SparseMatrixBuilder};
use super::types::OptimizationDirection;
use super::value_type::SolverValue;

pub(super) struct LraViHelper<'a, V> {
    transitions: &'a SparseMatrix<V>,
    exit_rates: Option<&'a [V]>,
    uniformization_rate: V,
    timed_states: Vec<usize>,
    instant_states: Vec<usize>,
    ts_to_ts: SparseMatrix<V>,
    ts_to_is: SparseMatrix<V>,
    is_to_is: SparseMatrix<V>,
    is_to_ts: SparseMatrix<V>,
    /// Global row of every row of `ts_to_ts` and of `is_to_is`.
    ts_rows: Vec<usize>,
    is_rows: Vec<usize>,
}

/// Buffers of one run; `timed` always holds the latest timed iterate after
/// the swap at the end of a step.
struct Iterate<V> {
    timed: Vec<V>,
    timed_next: Vec<V>,
    timed_scratch: Vec<V>,
    instant: Vec<V>,
    instant_rhs: Vec<V>,
    instant_solver: Option<IterativeMinMaxSolver<V>>,
}

impl<'a, V: SolverValue> LraViHelper<'a, V> {
    /// `markovian` and `exit_rates` are given for Markov automata only; then
    /// every Markovian state must have exactly one choice inside the MEC.
    pub(super) fn new(
        mec: &'a MaximalEndComponent,
        transitions: &'a SparseMatrix<V>,
        aperiodic_factor: V,
        markovian: Option<&'a [bool]>,
        exit_rates: Option<&'a [V]>,
    ) -> Result<LraViHelper<'a, V>, SolverError> {
        debug_assert_eq!(markovian.is_some(), exit_rates.is_some());
        let is_timed = |state: usize| markovian.map_or(true, |m| m[state]);

        let mut timed_states = Vec::new();
        let mut instant_states = Vec::new();
        let mut sub_index: HashMap<usize, usize> = HashMap::with_capacity(mec.size());
        for state in mec.states() {
            if is_timed(state) {
                sub_index.insert(state, timed_states.len());
                timed_states.push(state);
            } else {
                sub_index.insert(state, instant_states.len());
                instant_states.push(state);
            }
        }
        if timed_states.is_empty() {
            return Err(SolverError::UnsupportedStructure(format!(
                "Markov automaton has Zeno behavior: the end component of state {} has no Markovian state",
                instant_states.first().copied().unwrap_or_default()
            )));
        }

        let max_rate = match exit_rates {
            Some(rates) => timed_states
                .iter()
                .fold(V::zero(), |max, state| V::max_of(max, rates[*state].clone())),
            None => V::one(),
        };
        let uniformization_rate = max_rate * (V::one() + aperiodic_factor);

        let mut ts_to_ts = SparseMatrixBuilder::new();
        let mut ts_to_is = SparseMatrixBuilder::new();
        let mut ts_rows = Vec::new();
        for (index, state) in timed_states.iter().enumerate() {
            let choices = mec.choices_for_state(*state).map(|c| c.iter().copied().collect::<Vec<_>>()).unwrap_or_default();
            if markovian.is_some() && choices.len() != 1 {
                return Err(SolverError::UnsupportedStructure(format!(
                    "Markovian state {} has {} choices inside its end component",
                    state,
                    choices.len()
                )));
            }
            let exit_rate = exit_rates.map_or_else(V::one, |rates| rates[*state].clone());
            let scale = exit_rate / uniformization_rate.clone();
            ts_to_ts.new_row_group();
            ts_to_is.new_row_group();
            for row in choices {
                let mut to_timed = vec![(index, V::one() - scale.clone())];
                let mut to_instant = Vec::new();
                for entry in transitions.row(row).iter().filter(|e| !e.value.is_zero()) {
                    debug_assert!(sub_index.contains_key(&entry.column), "MEC choice {} leaves the component", row);
                    if let Some(target) = sub_index.get(&entry.column) {
                        let value = entry.value.clone() * scale.clone();
                        if is_timed(entry.column) {
                            to_timed.push((*target, value));
                        } else {
                            to_instant.push((*target, value));
                        }
                    }
                }
                ts_to_ts.add_row(to_timed);
                ts_to_is.add_row(to_instant);
                ts_rows.push(row);
            }
        }

        let mut is_to_is = SparseMatrixBuilder::new();
        let mut is_to_ts = SparseMatrixBuilder::new();
        let mut is_rows = Vec::new();
        for state in instant_states.iter() {
            is_to_is.new_row_group();
            is_to_ts.new_row_group();
            for row in mec.choices_for_state(*state).into_iter().flatten() {
                let mut to_timed = Vec::new();
                let mut to_instant = Vec::new();
                for entry in transitions.row(*row).iter().filter(|e| !e.value.is_zero()) {
                    if let Some(target) = sub_index.get(&entry.column) {
                        if is_timed(entry.column) {
                            to_timed.push((*target, entry.value.clone()));
                        } else {
                            to_instant.push((*target, entry.value.clone()));
                        }
                    }
                }
                is_to_is.add_row(to_instant);
                is_to_ts.add_row(to_timed);
                is_rows.push(*row);
            }
        }

        let timed_count = timed_states.len();
        let instant_count = instant_states.len();
        Ok(LraViHelper {
            transitions,
            exit_rates,
            uniformization_rate,
            timed_states,
            instant_states,
            ts_to_ts: ts_to_ts.build(timed_count),
            ts_to_is: ts_to_is.build(instant_count),
            is_to_is: is_to_is.build(instant_count),
            is_to_ts: is_to_ts.build(timed_count),
            ts_rows,
            is_rows,
        })
    }

    /// Runs the iteration and returns the optimal long-run average of the
    /// component. With `choices`, the optimal local choice of every state of
    /// the component is written into it.
    pub(super) fn perform_value_iteration(
        &self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        state_reward: &dyn Fn(usize) -> V,
        action_reward: &dyn Fn(usize) -> V,
        choices: Option<&mut [Option<usize>]>,
    ) -> Result<V, SolverError> {
        let ts_values = self.timed_choice_values(state_reward, action_reward);
        let is_values: Vec<V> = self.is_rows.iter().map(|row| action_reward(*row)).collect();

        let inner_env = self.instant_environment(env);
        let mut iterate = self.initial_iterate();
        let precision = V::from_double(env.lra.precision);
        let relative = env.lra.relative;
        let threshold = precision.clone() / self.uniformization_rate.clone();

        let mut iterations = 0u64;
        let (min_diff, max_diff) = loop {
            self.step(&inner_env, dir, &ts_values, &is_values, &mut iterate, None)?;
            iterations += 1;
            let (min_diff, max_diff) = difference_range(&iterate.timed, &iterate.timed_next);
            mem::swap(&mut iterate.timed, &mut iterate.timed_next);

            let spread = max_diff.clone() - min_diff.clone();
            let converged = if relative {
                spread <= precision.clone() * min_diff.abs()
            } else {
                spread <= threshold
            };
            if iterations % 1000 == 0 {
                trace!("LRA value iteration: {} iterations, spread {}.", iterations, spread);
            }
            if converged {
                debug!(
                    "LRA value iteration for an end component with {} states converged after {} iterations.",
                    self.timed_states.len() + self.instant_states.len(),
                    iterations
                );
                break (min_diff, max_diff);
            }
            if iterations >= env.lra.max_iterations {
                warn!(
                    "LRA value iteration did not converge within {} iterations, the result may be inaccurate.",
                    iterations
                );
                break (min_diff, max_diff);
            }
        };

        if let Some(choices) = choices {
            self.record_choices(&inner_env, dir, &ts_values, &is_values, &mut iterate, choices)?;
        }

        let two = V::one() + V::one();
        Ok((max_diff + min_diff) / two * self.uniformization_rate.clone())
    }

    /// Rewards of the timed rows, scaled to one uniformized step.
    fn timed_choice_values(&self, state_reward: &dyn Fn(usize) -> V, action_reward: &dyn Fn(usize) -> V) -> Vec<V> {
        let mut values = Vec::with_capacity(self.ts_rows.len());
        for (index, state) in self.timed_states.iter().enumerate() {
            let exit_rate = self.exit_rates.map_or_else(V::one, |rates| rates[*state].clone());
            for row in self.ts_to_ts.row_group(index) {
                let global = self.ts_rows[row];
                let value = state_reward(*state) + exit_rate.clone() * action_reward(global);
                values.push(value / self.uniformization_rate.clone());
            }
        }
        values
    }

    /// The instant subsystem is solved with a plain iterative solver; the
    /// outer loop already controls the error.
    fn instant_environment(&self, env: &SolverEnvironment) -> SolverEnvironment {
        let mut inner = env.clone();
        inner.force_soundness = false;
        if inner.minmax.method == Some(MinMaxMethod::SoundValueIteration) {
            inner.minmax.set_method(MinMaxMethod::ValueIteration);
        }
        inner
    }

    fn initial_iterate(&self) -> Iterate<V> {
        let timed = self.timed_states.len();
        let instant = self.instant_states.len();
        let instant_solver = if instant == 0 {
            None
        } else {
            let mut solver = IterativeMinMaxSolver::new(self.is_to_is.clone());
            solver.set_has_unique_solution(true);
            solver.set_has_no_end_components(true);
            solver.set_requirements_checked(true);
            solver.set_caching_enabled(true);
            Some(solver)
        };
        Iterate {
            timed: vec![V::zero(); timed],
            timed_next: vec![V::zero(); timed],
            timed_scratch: vec![V::zero(); self.ts_to_ts.row_count()],
            instant: vec![V::zero(); instant],
            instant_rhs: vec![V::zero(); self.is_to_is.row_count()],
            instant_solver,
        }
    }

    /// One uniformized step from `timed` into `timed_next`, followed by
    /// solving the instant states against the new timed values.
    fn step(
        &self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        ts_values: &[V],
        is_values: &[V],
        iterate: &mut Iterate<V>,
        ts_choices: Option<&mut [usize]>,
    ) -> Result<(), SolverError> {
        match iterate.instant_solver.as_mut() {
            None => {
                self.ts_to_ts
                    .multiply_and_reduce(dir, &iterate.timed, ts_values, &mut iterate.timed_next, ts_choices);
            }
            Some(solver) => {
                self.ts_to_is
                    .multiply(&iterate.instant, Some(ts_values), &mut iterate.timed_scratch);
                self.ts_to_ts
                    .multiply(&iterate.timed, Some(&iterate.timed_scratch), &mut iterate.timed_next);
                self.is_to_ts
                    .multiply(&iterate.timed_next, Some(is_values), &mut iterate.instant_rhs);
                solver.solve_equations(env, dir, &mut iterate.instant, &iterate.instant_rhs)?;
            }
        }
        Ok(())
    }

    /// One more step that records the optimal choices, translated to local
    /// choice indices of the full model.
    fn record_choices(
        &self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        ts_values: &[V],
        is_values: &[V],
        iterate: &mut Iterate<V>,
        choices: &mut [Option<usize>],
    ) -> Result<(), SolverError> {
        let mut ts_choices = vec![0; self.timed_states.len()];
        if let Some(solver) = iterate.instant_solver.as_mut() {
            solver.set_track_scheduler(true);
        }
        self.step(env, dir, ts_values, is_values, iterate, Some(ts_choices.as_mut_slice()))?;

        for (index, state) in self.timed_states.iter().enumerate() {
            let row = self.ts_rows[self.ts_to_ts.row_group(index).start + ts_choices[index]];
            choices[*state] = Some(row - self.transitions.row_group(*state).start);
        }
        if let Some(solver) = iterate.instant_solver.as_ref() {
            let is_choices = solver.scheduler_choices()?;
            for (index, state) in self.instant_states.iter().enumerate() {
                let row = self.is_rows[self.is_to_is.row_group(index).start + is_choices[index]];
                choices[*state] = Some(row - self.transitions.row_group(*state).start);
            }
        }
        Ok(())
    }
}

/// Minimum and maximum of `new - old`.
fn difference_range<V: SolverValue>(old: &[V], new: &[V]) -> (V, V) {
    let mut diffs = old.iter().zip(new.iter()).map(|(o, n)| n.clone() - o.clone());
    let first = diffs.next().unwrap_or_else(V::zero);
    diffs.fold((first.clone(), first), |(min, max), diff| {
        (V::min_of(min, diff.clone()), V::max_of(max, diff))
    })
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::model_checking::mec::MaximalEndComponentDecomposition;
    use crate::model_checking::sparse::matrix_from_groups;

    /// 0 <-> 1 with reward 2 on 0 -> 1 and reward 0 on 1 -> 0; state 0 can
    /// also loop on itself with reward 1.
    fn cycle() -> SparseMatrix<f64> {
        matrix_from_groups(vec![vec![vec![(1, 1.0)], vec![(0, 1.0)]], vec![vec![(0, 1.0)]]])
    }

    fn rewards(row: usize) -> f64 {
        [2.0, 1.0, 0.0][row]
    }

    fn only_mec(matrix: &SparseMatrix<f64>) -> MaximalEndComponent {
        let decomposition = MaximalEndComponentDecomposition::new(matrix, &matrix.transpose());
        assert_eq!(decomposition.len(), 1);
        decomposition[0].clone()
    }

    #[test]
    fn test_mdp_component_maximize_and_minimize() {
        let matrix = cycle();
        let mec = only_mec(&matrix);
        let helper = LraViHelper::new(&mec, &matrix, 0.125, None, None).unwrap();
        let env = SolverEnvironment::new().with_precision(1e-8);
        let zero = |_: usize| 0.0;

        let mut choices = vec![None; 2];
        let max = helper
            .perform_value_iteration(&env, OptimizationDirection::Maximize, &zero, &rewards, Some(choices.as_mut_slice()))
            .unwrap();
        // the 2-cycle averages 1, the self-loop earns 1 as well; both tie
        assert!((max - 1.0).abs() < 1e-6);
        assert!(choices.iter().all(Option::is_some));

        let min = helper
            .perform_value_iteration(&env, OptimizationDirection::Minimize, &zero, &|row: usize| [3.0, 1.0, 0.0][row], None)
            .unwrap();
        assert!((min - 1.0).abs() < 1e-6);
        let max = helper
            .perform_value_iteration(&env, OptimizationDirection::Maximize, &zero, &|row: usize| [3.0, 1.0, 0.0][row], Some(choices.as_mut_slice()))
            .unwrap();
        assert!((max - 1.5).abs() < 1e-6);
        assert_eq!(choices, vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_state_rewards_count_per_step() {
        let matrix = cycle();
        let mec = only_mec(&matrix);
        let helper = LraViHelper::new(&mec, &matrix, 0.125, None, None).unwrap();
        let env = SolverEnvironment::new().with_precision(1e-8);
        let value = helper
            .perform_value_iteration(&env, OptimizationDirection::Minimize, &|s: usize| [4.0, 0.0][s], &|_: usize| 0.0, None)
            .unwrap();
        // staying in 0 forever earns 4; alternating earns 2; minimizing alternates
        assert!((value - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_markov_automaton_component() {
        // 0 is Markovian (rate 2) and moves to the instant state 1, which can
        // go back to 0 or to the Markovian state 2 (rate 1) that returns to 0.
        let matrix = matrix_from_groups(vec![
            vec![vec![(1, 1.0)]],
            vec![vec![(0, 1.0)], vec![(2, 1.0)]],
            vec![vec![(0, 1.0)]],
        ]);
        let markovian = vec![true, false, true];
        let rates = vec![2.0, 0.0, 1.0];
        let mec = only_mec(&matrix);
        let helper = LraViHelper::new(&mec, &matrix, 0.125, Some(markovian.as_slice()), Some(rates.as_slice())).unwrap();
        let env = SolverEnvironment::new().with_precision(1e-8);
        // reward rate 1 while in state 2: time fraction spent there
        let in_two = |s: usize| if s == 2 { 1.0 } else { 0.0 };
        let mut choices = vec![None; 3];
        let max = helper
            .perform_value_iteration(&env, OptimizationDirection::Maximize, &in_two, &|_: usize| 0.0, Some(choices.as_mut_slice()))
            .unwrap();
        // cycle 0 -> 1 -> 2 -> 0 spends 1/2 in 0 and 1 in 2
        assert!((max - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(choices, vec![Some(0), Some(1), Some(0)]);
        let min = helper
            .perform_value_iteration(&env, OptimizationDirection::Minimize, &in_two, &|_: usize| 0.0, None)
            .unwrap();
        assert!(min.abs() < 1e-6);
    }

    #[test]
    fn test_zeno_component_is_rejected() {
        let matrix = matrix_from_groups(vec![vec![vec![(1, 1.0)]], vec![vec![(0, 1.0)]]]);
        let markovian = vec![false, false];
        let rates = vec![0.0, 0.0];
        let mec = only_mec(&matrix);
        assert!(matches!(
            LraViHelper::new(&mec, &matrix, 0.125, Some(markovian.as_slice()), Some(rates.as_slice())),
            Err(SolverError::UnsupportedStructure(_))
        ));
    }

    #[test]
    fn test_nondeterministic_markovian_state_is_rejected() {
        let matrix = cycle();
        let markovian = vec![true, true];
        let rates = vec![1.0, 1.0];
        let mec = only_mec(&matrix);
        assert!(matches!(
            LraViHelper::new(&mec, &matrix, 0.125, Some(markovian.as_slice()), Some(rates.as_slice())),
            Err(SolverError::UnsupportedStructure(_))
        ));
    }
}
