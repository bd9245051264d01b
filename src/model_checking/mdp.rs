use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::SolverError;
use super::lra::RewardModel;
use super::sparse::{SparseMatrix, SparseMatrixBuilder};
use super::value_type::{SolverValue, DOUBLE_SHARPEN_DIGITS};

/// Tolerance on the probability mass of a choice read from JSON.
const DISTRIBUTION_TOLERANCE: f64 = 1e-9;

/// Explicit model as read from JSON. States are arbitrary ids; a model with
/// `markovian` states and `exit_rates` is a Markov automaton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MDP {
    pub states: Vec<u32>,
    pub initial: u32,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub labelling: Vec<MDPLabellingPair>,
    #[serde(default)]
    pub markovian: Vec<u32>,
    #[serde(default)]
    pub exit_rates: Vec<StateValuePair>,
    #[serde(default)]
    pub state_rewards: Vec<StateValuePair>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MDPLabellingPair {
    pub s: u32,
    pub w: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateValuePair {
    pub s: u32,
    pub v: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub s: u32,
    pub a: String,
    pub s_prime: Vec<TransitionPair>,
    #[serde(default)]
    pub rewards: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionPair {
    pub s: u32,
    pub p: f64,
}

/// Row-grouped form of an `MDP`; state `i` is `states[i]` of the source.
#[derive(Debug, Clone)]
pub struct SparseModel<V> {
    pub transitions: SparseMatrix<V>,
    pub initial: usize,
    pub state_ids: Vec<u32>,
    pub action_names: Vec<String>,
    pub action_rewards: Vec<V>,
    pub state_rewards: Option<Vec<V>>,
    pub markovian: Option<Vec<bool>>,
    pub exit_rates: Option<Vec<V>>,
    labels: BTreeMap<String, Vec<bool>>,
}

impl<V: SolverValue> SparseModel<V> {
    pub fn number_of_states(&self) -> usize {
        self.transitions.row_group_count()
    }

    pub fn is_markov_automaton(&self) -> bool {
        self.markovian.is_some()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.labels.keys().map(String::as_str)
    }

    pub fn labelled_states(&self, label: &str) -> Result<&[bool], SolverError> {
        self.labels
            .get(label)
            .map(Vec::as_slice)
            .ok_or_else(|| SolverError::InvalidModel(format!("no state carries the label '{}'", label)))
    }

    pub fn reward_model(&self) -> RewardModel<V> {
        RewardModel::new(self.state_rewards.clone(), Some(self.action_rewards.clone()))
    }
}

impl MDP {
    pub fn is_markov_automaton(&self) -> bool {
        !self.markovian.is_empty() || !self.exit_rates.is_empty()
    }

    fn state_index(&self) -> Result<HashMap<u32, usize>, SolverError> {
        let mut index = HashMap::with_capacity(self.states.len());
        for (i, s) in self.states.iter().enumerate() {
            if index.insert(*s, i).is_some() {
                return Err(SolverError::InvalidModel(format!("state {} is declared twice", s)));
            }
        }
        Ok(index)
    }

    /// Checks references, probabilities and the Markovian annotation.
    pub fn validate(&self) -> Result<(), SolverError> {
        let index = self.state_index()?;
        let lookup = |s: u32| {
            index
                .get(&s)
                .copied()
                .ok_or_else(|| SolverError::InvalidModel(format!("unknown state {}", s)))
        };
        lookup(self.initial)?;

        let mut enabled = vec![0usize; self.states.len()];
        for transition in self.transitions.iter() {
            enabled[lookup(transition.s)?] += 1;
            let mut mass = 0.0;
            for pair in transition.s_prime.iter() {
                lookup(pair.s)?;
                if pair.p.is_nan() || pair.p < 0.0 || pair.p > 1.0 {
                    return Err(SolverError::InvalidModel(format!(
                        "probability {} of ({}, {}) -> {} is not in [0, 1]",
                        pair.p, transition.s, transition.a, pair.s
                    )));
                }
                mass += pair.p;
            }
            if (mass - 1.0).abs() > DISTRIBUTION_TOLERANCE {
                return Err(SolverError::InvalidModel(format!(
                    "successors of ({}, {}) sum to {}",
                    transition.s, transition.a, mass
                )));
            }
            if transition.rewards.is_nan() {
                return Err(SolverError::InvalidModel(format!(
                    "reward of ({}, {}) is not a number",
                    transition.s, transition.a
                )));
            }
        }
        if let Some(state) = enabled.iter().position(|e| *e == 0) {
            return Err(SolverError::InvalidModel(format!(
                "state {} has no enabled action",
                self.states[state]
            )));
        }

        for pair in self.state_rewards.iter() {
            lookup(pair.s)?;
            if pair.v.is_nan() {
                return Err(SolverError::InvalidModel(format!("state reward of {} is not a number", pair.s)));
            }
        }
        for pair in self.labelling.iter() {
            lookup(pair.s)?;
        }
        for s in self.markovian.iter() {
            let actions = enabled[lookup(*s)?];
            if actions > 1 {
                return Err(SolverError::UnsupportedStructure(format!(
                    "Markovian state {} has {} actions instead of one",
                    s, actions
                )));
            }
            match self.exit_rates.iter().find(|pair| pair.s == *s) {
                Some(pair) if pair.v > 0.0 && pair.v.is_finite() => {}
                Some(pair) => {
                    return Err(SolverError::InvalidModel(format!(
                        "exit rate {} of Markovian state {} is not positive",
                        pair.v, s
                    )))
                }
                None => {
                    return Err(SolverError::InvalidModel(format!(
                        "Markovian state {} has no exit rate",
                        s
                    )))
                }
            }
        }
        for pair in self.exit_rates.iter() {
            if !self.markovian.contains(&pair.s) {
                return Err(SolverError::InvalidModel(format!(
                    "state {} has an exit rate but is not Markovian",
                    pair.s
                )));
            }
        }
        Ok(())
    }

    /// Validates and converts to row-grouped form. Choices of a state keep
    /// the order in which they appear in `transitions`.
    pub fn to_sparse<V: SolverValue>(&self) -> Result<SparseModel<V>, SolverError> {
        self.validate()?;
        let index = self.state_index()?;
        let n = self.states.len();
        let mut per_state: Vec<Vec<&Transition>> = vec![Vec::new(); n];
        for transition in self.transitions.iter() {
            per_state[index[&transition.s]].push(transition);
        }

        let mut builder = SparseMatrixBuilder::new();
        let mut action_names = Vec::with_capacity(self.transitions.len());
        let mut action_rewards = Vec::with_capacity(self.transitions.len());
        for transitions in per_state.iter() {
            builder.new_row_group();
            for transition in transitions.iter() {
                let mut row = Vec::with_capacity(transition.s_prime.len());
                for pair in transition.s_prime.iter().filter(|pair| pair.p > 0.0) {
                    row.push((index[&pair.s], parse_value(pair.p)?));
                }
                builder.add_row(row);
                action_names.push(transition.a.clone());
                action_rewards.push(parse_value(transition.rewards)?);
            }
        }

        let state_rewards = if self.state_rewards.is_empty() {
            None
        } else {
            let mut rewards = vec![V::zero(); n];
            for pair in self.state_rewards.iter() {
                rewards[index[&pair.s]] = parse_value(pair.v)?;
            }
            Some(rewards)
        };

        let (markovian, exit_rates) = if self.is_markov_automaton() {
            let mut markovian = vec![false; n];
            let mut rates = vec![V::zero(); n];
            for s in self.markovian.iter() {
                markovian[index[s]] = true;
            }
            for pair in self.exit_rates.iter() {
                rates[index[&pair.s]] = parse_value(pair.v)?;
            }
            (Some(markovian), Some(rates))
        } else {
            (None, None)
        };

        let mut labels: BTreeMap<String, Vec<bool>> = BTreeMap::new();
        for pair in self.labelling.iter() {
            labels.entry(pair.w.clone()).or_insert_with(|| vec![false; n])[index[&pair.s]] = true;
        }

        Ok(SparseModel {
            transitions: builder.build(n),
            initial: index[&self.initial],
            state_ids: self.states.clone(),
            action_names,
            action_rewards,
            state_rewards,
            markovian,
            exit_rates,
            labels,
        })
    }
}

/// Exact types recover the decimal the JSON number was written as.
fn parse_value<V: SolverValue>(value: f64) -> Result<V, SolverError> {
    if V::IS_EXACT {
        Ok(V::from_rational(&value.sharpen(DOUBLE_SHARPEN_DIGITS)?))
    } else {
        Ok(V::from_double(value))
    }
}

fn random_distribution<R: Rng>(rng: &mut R, states: usize, max_successors: usize) -> Vec<(usize, f64)> {
    let successors = rng.gen_range(1, max_successors + 1);
    let weights: Vec<(usize, f64)> = (0..successors)
        .map(|_| (rng.gen_range(0, states), rng.gen::<f64>() + 0.1))
        .collect();
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    let mut distribution: Vec<(usize, f64)> = weights.into_iter().map(|(s, w)| (s, w / total)).collect();
    // the last entry takes the rounding error
    let rest: f64 = distribution[..successors - 1].iter().map(|(_, p)| p).sum();
    distribution[successors - 1].1 = 1.0 - rest;
    distribution
}

/// Random model with `states` states, each with 1 to `max_choices` choices
/// over 1 to `max_successors` successors.
pub fn random_transition_matrix<R: Rng>(
    rng: &mut R,
    states: usize,
    max_choices: usize,
    max_successors: usize,
) -> SparseMatrix<f64> {
    let mut builder = SparseMatrixBuilder::new();
    for _ in 0..states {
        builder.new_row_group();
        for _ in 0..rng.gen_range(1, max_choices + 1) {
            builder.add_row(random_distribution(rng, states, max_successors));
        }
    }
    builder.build(states)
}

/// JSON-level counterpart of `random_transition_matrix` with rewards in
/// `[0, 1)` on every choice.
pub fn random_mdp<R: Rng>(rng: &mut R, states: usize, max_choices: usize, max_successors: usize) -> MDP {
    let mut transitions = Vec::new();
    for s in 0..states {
        for a in 0..rng.gen_range(1, max_choices + 1) {
            transitions.push(Transition {
                s: s as u32,
                a: format!("a{}", a),
                s_prime: random_distribution(rng, states, max_successors)
                    .into_iter()
                    .map(|(t, p)| TransitionPair { s: t as u32, p })
                    .collect(),
                rewards: rng.gen::<f64>(),
            });
        }
    }
    MDP {
        states: (0..states as u32).collect(),
        initial: 0,
        transitions,
        labelling: Vec::new(),
        markovian: Vec::new(),
        exit_rates: Vec::new(),
        state_rewards: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use num::rational::BigRational;
    use num::BigInt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use test_log::test;

    use super::*;

    const TWO_STATES: &str = r#"{
        "states": [10, 20],
        "initial": 10,
        "transitions": [
            {"s": 10, "a": "stay", "s_prime": [{"s": 10, "p": 1.0}], "rewards": 1.0},
            {"s": 10, "a": "go", "s_prime": [{"s": 10, "p": 0.3}, {"s": 20, "p": 0.7}], "rewards": 0.0},
            {"s": 20, "a": "loop", "s_prime": [{"s": 20, "p": 1.0}], "rewards": 0.5}
        ],
        "labelling": [{"s": 20, "w": "goal"}]
    }"#;

    #[test]
    fn test_convert_json_model() {
        let mdp: MDP = serde_json::from_str(TWO_STATES).unwrap();
        let model: SparseModel<f64> = mdp.to_sparse().unwrap();
        assert_eq!(model.number_of_states(), 2);
        assert_eq!(model.transitions.row_count(), 3);
        assert_eq!(model.transitions.row_group_size(0), 2);
        assert_eq!(model.action_names, vec!["stay", "go", "loop"]);
        assert_eq!(model.action_rewards, vec![1.0, 0.0, 0.5]);
        assert_eq!(model.labelled_states("goal").unwrap(), &[false, true]);
        assert!(model.labelled_states("missing").is_err());
        assert!(!model.is_markov_automaton());
    }

    #[test]
    fn test_exact_conversion_recovers_decimals() {
        let mdp: MDP = serde_json::from_str(TWO_STATES).unwrap();
        let model: SparseModel<BigRational> = mdp.to_sparse().unwrap();
        let row = model.transitions.row(1);
        assert_eq!(row[0].value, BigRational::new(BigInt::from(3), BigInt::from(10)));
        assert_eq!(row[1].value, BigRational::new(BigInt::from(7), BigInt::from(10)));
    }

    #[test]
    fn test_rejects_bad_distribution() {
        let mut mdp: MDP = serde_json::from_str(TWO_STATES).unwrap();
        mdp.transitions[1].s_prime[0].p = 0.2;
        assert!(matches!(mdp.validate(), Err(SolverError::InvalidModel(_))));
        mdp.transitions[1].s_prime[0].p = f64::NAN;
        assert!(matches!(mdp.validate(), Err(SolverError::InvalidModel(_))));
    }

    #[test]
    fn test_rejects_deadlock_and_unknown_states() {
        let mut mdp: MDP = serde_json::from_str(TWO_STATES).unwrap();
        mdp.transitions.pop();
        assert!(mdp.validate().is_err());
        let mut mdp: MDP = serde_json::from_str(TWO_STATES).unwrap();
        mdp.transitions[0].s_prime[0].s = 99;
        assert!(mdp.validate().is_err());
    }

    #[test]
    fn test_markovian_annotation() {
        let mut mdp: MDP = serde_json::from_str(TWO_STATES).unwrap();
        mdp.markovian = vec![20];
        assert!(mdp.validate().is_err());
        mdp.exit_rates = vec![StateValuePair { s: 20, v: 2.0 }];
        let model: SparseModel<f64> = mdp.to_sparse().unwrap();
        assert_eq!(model.markovian, Some(vec![false, true]));
        assert_eq!(model.exit_rates, Some(vec![0.0, 2.0]));
    }

    #[test]
    fn test_nondeterministic_markovian_state_is_unsupported() {
        let mut mdp: MDP = serde_json::from_str(TWO_STATES).unwrap();
        // state 10 has both "stay" and "go"
        mdp.markovian = vec![10];
        mdp.exit_rates = vec![StateValuePair { s: 10, v: 1.0 }];
        assert!(matches!(mdp.validate(), Err(SolverError::UnsupportedStructure(_))));
        assert!(mdp.to_sparse::<f64>().is_err());
    }

    #[test]
    fn test_random_mdp_is_valid() {
        let mut rng = StdRng::seed_from_u64(3);
        let mdp = random_mdp(&mut rng, 20, 3, 4);
        assert!(mdp.validate().is_ok());
        let model: SparseModel<f64> = mdp.to_sparse().unwrap();
        assert_eq!(model.number_of_states(), 20);
    }
}
