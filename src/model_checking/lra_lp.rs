use std::collections::BTreeMap;

use log::{debug, trace};
use minilp::{ComparisonOp, OptimizationDirection as LpDirection, Problem, Variable};
use petgraph::algo::kosaraju_scc;
use petgraph::graph::NodeIndex;
use petgraph::Graph;

use super::environment::LinearEquationSettings;
use super::error::SolverError;
use super::linear::LinearEquationSolver;
use super::mec::MaximalEndComponent;
use super::sparse::{SparseMatrix, SparseMatrixBuilder};
use super::types::OptimizationDirection;
use super::value_type::SolverValue;

/// Relative slack under which an LP constraint counts as tight.
const TIGHT_TOLERANCE: f64 = 1e-9;

/// One choice of the component as the constraint
/// `x_s {<=, >=} -gain k + sum_s' P(s, a, s') x_s' + value`,
/// with states renumbered to the component.
#[derive(Debug, Clone)]
struct ChoiceConstraint<V> {
    state: usize,
    row: usize,
    successors: Vec<(usize, V)>,
    gain: V,
    value: V,
}

impl<V: SolverValue> ChoiceConstraint<V> {
    fn right_hand_side(&self, x: &[V], k: &V) -> V {
        self.successors.iter().fold(
            self.value.clone() - self.gain.clone() * k.clone(),
            |acc, (target, probability)| acc + probability.clone() * x[*target].clone(),
        )
    }

    fn holds(&self, dir: OptimizationDirection, x: &[V], k: &V) -> bool {
        let rhs = self.right_hand_side(x, k);
        if dir.minimize() {
            x[self.state] <= rhs
        } else {
            x[self.state] >= rhs
        }
    }

    /// Nonnegative for feasible points of the LP.
    fn slack(&self, dir: OptimizationDirection, x: &[f64], k: f64) -> f64 {
        let rhs = self.successors.iter().fold(
            self.value.to_double() - self.gain.to_double() * k,
            |acc, (target, probability)| acc + probability.to_double() * x[*target],
        );
        if dir.minimize() {
            rhs - x[self.state]
        } else {
            x[self.state] - rhs
        }
    }
}

/// Long-run average of one end component as a linear program over one
/// variable per state and the gain `k`:
///
/// `x_s {<=, >=} -k / E(s) + sum_s' P(s, a, s') x_s' + value(s, a)`
///
/// for every choice `a` of `s` in the component, optimizing `k` in the
/// inverted direction. The `k` term is dropped for probabilistic states of a
/// Markov automaton and `E(s)` is one for MDPs.
///
/// The program is solved in `f64`. For exact value types the tight choices
/// of the LP optimum are turned into a policy whose gain is then computed in
/// `V` and checked against every constraint.
pub(super) fn compute_lra_for_mec_lp<V: SolverValue>(
    transitions: &SparseMatrix<V>,
    markovian: Option<&[bool]>,
    exit_rates: Option<&[V]>,
    dir: OptimizationDirection,
    mec: &MaximalEndComponent,
    state_reward: &dyn Fn(usize) -> V,
    action_reward: &dyn Fn(usize) -> V,
) -> Result<V, SolverError> {
    let constraints = component_constraints(transitions, markovian, exit_rates, mec, state_reward, action_reward)?;
    let number_of_states = mec.size();

    let lp_direction = match dir.invert() {
        OptimizationDirection::Minimize => LpDirection::Minimize,
        OptimizationDirection::Maximize => LpDirection::Maximize,
    };
    let mut problem = Problem::new(lp_direction);
    // potentials are only determined up to a shift
    let variables: Vec<Variable> = (0..number_of_states)
        .map(|_| problem.add_var(0.0, (0.0, f64::INFINITY)))
        .collect();
    let k = problem.add_var(1.0, (f64::NEG_INFINITY, f64::INFINITY));

    let op = if dir.minimize() { ComparisonOp::Le } else { ComparisonOp::Ge };
    for constraint in constraints.iter() {
        // x_s - sum P x_s' + gain k {<=, >=} value
        let mut coefficients: BTreeMap<usize, f64> = BTreeMap::new();
        *coefficients.entry(constraint.state).or_insert(0.0) += 1.0;
        for (target, probability) in constraint.successors.iter() {
            *coefficients.entry(*target).or_insert(0.0) -= probability.to_double();
        }
        let mut expression: Vec<(Variable, f64)> = coefficients
            .into_iter()
            .map(|(state, coefficient)| (variables[state], coefficient))
            .collect();
        if !constraint.gain.is_zero() {
            expression.push((k, constraint.gain.to_double()));
        }
        problem.add_constraint(expression.as_slice(), op, constraint.value.to_double());
    }

    debug!(
        "Solving LRA linear program with {} variables and {} constraints.",
        number_of_states + 1,
        constraints.len()
    );
    let solution = problem.solve()?;
    let gain = solution[k];
    if !gain.is_finite() {
        return Err(SolverError::InvalidOperation(format!(
            "linear program returned the gain {} for an end component",
            gain
        )));
    }
    if !V::IS_EXACT {
        return Ok(V::from_double(gain));
    }
    let potentials: Vec<f64> = variables.iter().map(|variable| solution[*variable]).collect();
    exact_gain(dir, number_of_states, &constraints, &potentials, gain)
}

fn component_constraints<V: SolverValue>(
    transitions: &SparseMatrix<V>,
    markovian: Option<&[bool]>,
    exit_rates: Option<&[V]>,
    mec: &MaximalEndComponent,
    state_reward: &dyn Fn(usize) -> V,
    action_reward: &dyn Fn(usize) -> V,
) -> Result<Vec<ChoiceConstraint<V>>, SolverError> {
    let continuous_time = markovian.is_some();
    let local: BTreeMap<usize, usize> = mec.states().enumerate().map(|(i, state)| (state, i)).collect();
    let mut constraints = Vec::new();
    for (state, choices) in mec.iter() {
        let is_markovian = markovian.map_or(false, |m| m[state]);
        let exit_rate = match exit_rates {
            Some(rates) if is_markovian => {
                if !rates[state].is_positive() {
                    return Err(SolverError::InvalidOperation(format!(
                        "Markovian state {} has the exit rate {}",
                        state, rates[state]
                    )));
                }
                Some(rates[state].clone())
            }
            _ => None,
        };
        for row in choices.iter() {
            let successors = transitions
                .row(*row)
                .iter()
                .map(|entry| {
                    local
                        .get(&entry.column)
                        .map(|target| (*target, entry.value.clone()))
                        .ok_or_else(|| {
                            SolverError::InvalidOperation(format!(
                                "choice {} of state {} leaves its end component",
                                row, state
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let (gain, value) = match &exit_rate {
                Some(rate) => (
                    V::one() / rate.clone(),
                    state_reward(state) / rate.clone() + action_reward(*row),
                ),
                None if !continuous_time => (V::one(), state_reward(state) + action_reward(*row)),
                None => (V::zero(), action_reward(*row)),
            };
            constraints.push(ChoiceConstraint {
                state: local[&state],
                row: *row,
                successors,
                gain,
                value,
            });
        }
    }
    Ok(constraints)
}

/// Recovers the gain in `V` from an approximate LP optimum `(x, k)`.
///
/// Choices that are tight at the optimum and stay among states with tight
/// choices contain the recurrent class of an optimal policy. One such class
/// is fixed, the remaining states are routed towards it, preferring tight
/// choices, and the gain equations of the resulting policy are solved
/// exactly. The result is accepted only if the exact potentials and gain
/// satisfy every constraint of the component.
fn exact_gain<V: SolverValue>(
    dir: OptimizationDirection,
    number_of_states: usize,
    constraints: &[ChoiceConstraint<V>],
    x: &[f64],
    k: f64,
) -> Result<V, SolverError> {
    let tight: Vec<bool> = constraints
        .iter()
        .map(|c| c.slack(dir, x, k) <= TIGHT_TOLERANCE * (1.0 + x[c.state].abs() + k.abs()))
        .collect();

    let mut in_set = vec![false; number_of_states];
    for (c, _) in constraints.iter().zip(tight.iter()).filter(|(_, t)| **t) {
        in_set[c.state] = true;
    }
    let mut allowed = tight.clone();
    loop {
        let mut changed = false;
        for (index, c) in constraints.iter().enumerate() {
            if allowed[index] && (!in_set[c.state] || c.successors.iter().any(|(t, p)| !p.is_zero() && !in_set[*t])) {
                allowed[index] = false;
                changed = true;
            }
        }
        for state in 0..number_of_states {
            if in_set[state] && !constraints.iter().enumerate().any(|(i, c)| allowed[i] && c.state == state) {
                in_set[state] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut policy: Vec<Option<usize>> = vec![None; number_of_states];
    for (index, c) in constraints.iter().enumerate() {
        if allowed[index] && policy[c.state].is_none() {
            policy[c.state] = Some(index);
        }
    }
    let recurrent = bottom_component(constraints, &policy).ok_or_else(|| {
        SolverError::NotImplemented(
            "no closed set of tight choices in the LP optimum, try value iteration for exact LRA values".to_string(),
        )
    })?;
    let root = recurrent[0];
    trace!("Exact LRA recovery fixes a recurrent class of {} states.", recurrent.len());

    let mut chosen: Vec<Option<usize>> = vec![None; number_of_states];
    for state in recurrent.iter() {
        chosen[*state] = policy[*state];
    }
    loop {
        let mut progress = false;
        for prefer_tight in [true, false].iter() {
            for (index, c) in constraints.iter().enumerate() {
                if chosen[c.state].is_none()
                    && (!*prefer_tight || tight[index])
                    && c.successors.iter().any(|(t, p)| !p.is_zero() && chosen[*t].is_some())
                {
                    chosen[c.state] = Some(index);
                    progress = true;
                }
            }
            if progress {
                break;
            }
        }
        if !progress {
            break;
        }
    }

    // unknowns are the potentials followed by the gain; x_root = 0
    let mut builder = SparseMatrixBuilder::new();
    let mut b = Vec::with_capacity(number_of_states + 1);
    for state in 0..number_of_states {
        let index = chosen[state].ok_or_else(|| {
            SolverError::InvalidOperation(format!("state {} of the end component cannot reach the others", state))
        })?;
        let c = &constraints[index];
        builder.new_row_group();
        let mut row: Vec<(usize, V)> = c.successors.clone();
        if !c.gain.is_zero() {
            row.push((number_of_states, -c.gain.clone()));
        }
        builder.add_row(row);
        b.push(c.value.clone());
    }
    builder.new_row_group();
    builder.add_row(vec![(number_of_states, V::one()), (root, V::one())]);
    b.push(V::zero());

    let solver = LinearEquationSolver::new(builder.build(number_of_states + 1), LinearEquationSettings::default());
    let mut solution = vec![V::zero(); number_of_states + 1];
    solver.solve_equations(&mut solution, &b)?;
    let gain = solution[number_of_states].clone();
    let potentials = &solution[..number_of_states];

    if let Some(violated) = constraints.iter().find(|c| !c.holds(dir, potentials, &gain)) {
        return Err(SolverError::NotImplemented(format!(
            "exact gain {} violates the constraint of choice {}, try value iteration for exact LRA values",
            gain, violated.row
        )));
    }
    debug!("Recovered the exact gain {} (LP reported {}).", gain, k);
    Ok(gain)
}

/// States of a closed SCC of the graph induced by `policy`, if any state has
/// a choice.
fn bottom_component<V: SolverValue>(
    constraints: &[ChoiceConstraint<V>],
    policy: &[Option<usize>],
) -> Option<Vec<usize>> {
    let mut graph: Graph<usize, ()> = Graph::new();
    let nodes: Vec<Option<NodeIndex>> = policy
        .iter()
        .enumerate()
        .map(|(state, choice)| choice.map(|_| graph.add_node(state)))
        .collect();
    for (state, choice) in policy.iter().enumerate() {
        if let (Some(source), Some(index)) = (nodes[state], choice) {
            for (target, probability) in constraints[*index].successors.iter() {
                if let Some(target) = nodes[*target].filter(|_| !probability.is_zero()) {
                    graph.update_edge(source, target, ());
                }
            }
        }
    }
    kosaraju_scc(&graph)
        .into_iter()
        .find(|scc| {
            scc.iter()
                .all(|node| graph.neighbors(*node).all(|target| scc.contains(&target)))
        })
        .map(|scc| scc.into_iter().map(|node| graph[node]).collect())
}
