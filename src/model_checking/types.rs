use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizationDirection {
    Minimize,
    Maximize,
}

impl OptimizationDirection {
    pub fn minimize(self) -> bool {
        self == OptimizationDirection::Minimize
    }

    pub fn maximize(self) -> bool {
        self == OptimizationDirection::Maximize
    }

    pub fn invert(self) -> OptimizationDirection {
        match self {
            OptimizationDirection::Minimize => OptimizationDirection::Maximize,
            OptimizationDirection::Maximize => OptimizationDirection::Minimize,
        }
    }

    /// Whether `candidate` is strictly better than `current` in this direction.
    pub fn improves<V: PartialOrd>(self, current: &V, candidate: &V) -> bool {
        match self {
            OptimizationDirection::Minimize => candidate < current,
            OptimizationDirection::Maximize => candidate > current,
        }
    }
}

impl fmt::Display for OptimizationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationDirection::Minimize => write!(f, "minimize"),
            OptimizationDirection::Maximize => write!(f, "maximize"),
        }
    }
}

/// Side of the true fixpoint an in-progress iterate is known to lie on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverGuarantee {
    None,
    LessOrEqual,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    InProgress,
    Converged,
    TerminatedEarly,
    MaximalIterationsExceeded,
}

impl SolverStatus {
    /// Converged or stopped by a termination condition.
    pub fn is_success(self) -> bool {
        matches!(self, SolverStatus::Converged | SolverStatus::TerminatedEarly)
    }
}
