use std::fmt;

use super::error::SolverError;
use super::value_type::SolverValue;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerChoice<V> {
    Undefined,
    Deterministic(usize),
    /// Distribution over local choice indices.
    Randomized(Vec<(usize, V)>),
}

impl<V: SolverValue> SchedulerChoice<V> {
    pub fn is_defined(&self) -> bool {
        !matches!(self, SchedulerChoice::Undefined)
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self, SchedulerChoice::Deterministic(_))
    }

    pub fn deterministic_choice(&self) -> Option<usize> {
        match self {
            SchedulerChoice::Deterministic(choice) => Some(*choice),
            _ => None,
        }
    }
}

/// Memoryless scheduler over the states of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler<V> {
    choices: Vec<SchedulerChoice<V>>,
}

impl<V: SolverValue> Scheduler<V> {
    pub fn new(number_of_states: usize) -> Scheduler<V> {
        Scheduler {
            choices: vec![SchedulerChoice::Undefined; number_of_states],
        }
    }

    pub fn from_choices(choices: &[usize]) -> Scheduler<V> {
        Scheduler {
            choices: choices.iter().map(|c| SchedulerChoice::Deterministic(*c)).collect(),
        }
    }

    pub fn number_of_states(&self) -> usize {
        self.choices.len()
    }

    pub fn set_choice(&mut self, state: usize, choice: usize) {
        self.choices[state] = SchedulerChoice::Deterministic(choice);
    }

    /// Sets a randomized choice; the probabilities have to sum up to one.
    pub fn set_randomized_choice(&mut self, state: usize, distribution: Vec<(usize, V)>) -> Result<(), SolverError> {
        let total = distribution.iter().fold(V::zero(), |acc, (_, p)| acc + p.clone());
        let deviation = (total - V::one()).abs();
        if deviation > V::from_double(1e-9) || distribution.iter().any(|(_, p)| p.is_negative()) {
            return Err(SolverError::InvalidOperation(format!(
                "randomized choice for state {} is not a distribution",
                state
            )));
        }
        self.choices[state] = if distribution.len() == 1 {
            SchedulerChoice::Deterministic(distribution[0].0)
        } else {
            SchedulerChoice::Randomized(distribution)
        };
        Ok(())
    }

    pub fn choice(&self, state: usize) -> &SchedulerChoice<V> {
        &self.choices[state]
    }

    pub fn is_deterministic(&self) -> bool {
        self.choices.iter().all(|c| !matches!(c, SchedulerChoice::Randomized(_)))
    }

    pub fn undefined_states(&self) -> Vec<usize> {
        self.choices
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_defined())
            .map(|(s, _)| s)
            .collect()
    }

    pub fn is_fully_defined(&self) -> bool {
        self.choices.iter().all(SchedulerChoice::is_defined)
    }

    /// Local choice index per state, if the scheduler is deterministic and
    /// defined everywhere.
    pub fn deterministic_choices(&self) -> Option<Vec<usize>> {
        self.choices.iter().map(SchedulerChoice::deterministic_choice).collect()
    }
}

impl<V: SolverValue> fmt::Display for Scheduler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (state, choice) in self.choices.iter().enumerate() {
            match choice {
                SchedulerChoice::Undefined => writeln!(f, "{}: undefined", state)?,
                SchedulerChoice::Deterministic(c) => writeln!(f, "{}: {}", state, c)?,
                SchedulerChoice::Randomized(dist) => {
                    write!(f, "{}: {{", state)?;
                    for (i, (c, p)) in dist.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}: {}", c, p)?;
                    }
                    writeln!(f, "}}")?;
                }
            }
        }
        Ok(())
    }
}
