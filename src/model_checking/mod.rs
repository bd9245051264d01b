pub mod value_type;
pub mod error;
pub mod types;
pub mod requirements;
pub mod environment;
pub mod sparse;
pub mod scheduler;
pub mod linear;
pub mod minmax;
mod sound_vi;
mod policy_iteration;
mod rational_search;
pub mod mec;
pub mod lra;
mod lra_vi;
mod lra_lp;
pub mod mdp;
