extern crate serde_json;
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub mod model_checking;

pub use model_checking::environment::{read_environment_json, LraMethod, MinMaxMethod, SolverEnvironment};
pub use model_checking::error::SolverError;
pub use model_checking::lra::{ModelCheckingResult, NondeterministicInfiniteHorizonHelper, RewardModel};
pub use model_checking::mdp::{SparseModel, MDP};
pub use model_checking::mec::{MaximalEndComponent, MaximalEndComponentDecomposition};
pub use model_checking::minmax::IterativeMinMaxSolver;
pub use model_checking::scheduler::Scheduler;
pub use model_checking::sparse::{SparseMatrix, SparseMatrixBuilder};
pub use model_checking::types::{OptimizationDirection, SolverStatus};
pub use model_checking::value_type::SolverValue;

pub fn read_mdp_json<P: AsRef<Path>>(path: P) -> std::result::Result<MDP, Box<dyn Error>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let u: MDP = serde_json::from_reader(reader)?;
    u.validate()?;
    Ok(u)
}

/// Loads a model and converts it to sparse form in the value type `V`.
pub fn read_sparse_model<V: SolverValue, P: AsRef<Path>>(path: P) -> std::result::Result<SparseModel<V>, Box<dyn Error>> {
    let mdp = read_mdp_json(path)?;
    Ok(mdp.to_sparse()?)
}
