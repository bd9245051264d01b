use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Solver requirements {0} not checked.")]
    UnmetRequirement(String),
    #[error("Unsupported model structure: {0}")]
    UnsupportedStructure(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Precision of the value type exceeded while sharpening to {digits} digits")]
    PrecisionExceeded { digits: u64 },
    #[error("Invalid solver environment: {0}")]
    InvalidEnvironment(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Equation system is singular (no pivot for row {row})")]
    SingularSystem { row: usize },
    #[error("Linear program could not be solved: {0}")]
    LinearProgram(#[from] minilp::Error),
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type SolverResult<T> = Result<T, SolverError>;
