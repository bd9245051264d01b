use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::SolverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinMaxMethod {
    ValueIteration,
    SoundValueIteration,
    PolicyIteration,
    RationalSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiplicationStyle {
    GaussSeidel,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LraMethod {
    ValueIteration,
    LinearProgramming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearEquationMethod {
    Elimination,
    GaussSeidel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinMaxSettings {
    /// `None` means the method was not chosen explicitly and may be escalated.
    pub method: Option<MinMaxMethod>,
    pub precision: f64,
    pub relative: bool,
    pub max_iterations: u64,
    pub multiplication_style: MultiplicationStyle,
    /// Run the fast phase of rational search in `f64` even for exact value types.
    pub imprecise_rational_helper: bool,
}

impl Default for MinMaxSettings {
    fn default() -> Self {
        MinMaxSettings {
            method: None,
            precision: 1e-6,
            relative: false,
            max_iterations: 1_000_000,
            multiplication_style: MultiplicationStyle::GaussSeidel,
            imprecise_rational_helper: true,
        }
    }
}

impl MinMaxSettings {
    pub fn method(&self) -> MinMaxMethod {
        self.method.unwrap_or(MinMaxMethod::ValueIteration)
    }

    pub fn is_method_set_from_default(&self) -> bool {
        self.method.is_none()
    }

    pub fn set_method(&mut self, method: MinMaxMethod) {
        self.method = Some(method);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LraSettings {
    pub method: Option<LraMethod>,
    pub aperiodic_factor: f64,
    pub precision: f64,
    pub relative: bool,
    pub max_iterations: u64,
}

impl Default for LraSettings {
    fn default() -> Self {
        LraSettings {
            method: None,
            aperiodic_factor: 0.125,
            precision: 1e-6,
            relative: false,
            max_iterations: 1_000_000,
        }
    }
}

impl LraSettings {
    pub fn method(&self) -> LraMethod {
        self.method.unwrap_or(LraMethod::ValueIteration)
    }

    pub fn is_method_set_from_default(&self) -> bool {
        self.method.is_none()
    }

    pub fn set_method(&mut self, method: LraMethod) {
        self.method = Some(method);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearEquationSettings {
    pub method: LinearEquationMethod,
    pub precision: f64,
    pub max_iterations: u64,
}

impl Default for LinearEquationSettings {
    fn default() -> Self {
        LinearEquationSettings {
            method: LinearEquationMethod::Elimination,
            precision: 1e-6,
            max_iterations: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverEnvironment {
    pub minmax: MinMaxSettings,
    pub lra: LraSettings,
    pub linear: LinearEquationSettings,
    pub force_soundness: bool,
    pub force_exact: bool,
}

impl SolverEnvironment {
    pub fn new() -> SolverEnvironment {
        SolverEnvironment::default()
    }

    pub fn sound() -> SolverEnvironment {
        SolverEnvironment {
            force_soundness: true,
            ..SolverEnvironment::default()
        }
    }

    pub fn exact() -> SolverEnvironment {
        SolverEnvironment {
            force_exact: true,
            ..SolverEnvironment::default()
        }
    }

    pub fn with_minmax_method(mut self, method: MinMaxMethod) -> SolverEnvironment {
        self.minmax.set_method(method);
        self
    }

    pub fn with_lra_method(mut self, method: LraMethod) -> SolverEnvironment {
        self.lra.set_method(method);
        self
    }

    pub fn with_precision(mut self, precision: f64) -> SolverEnvironment {
        self.minmax.precision = precision;
        self.lra.precision = precision;
        self.linear.precision = precision;
        self
    }

    pub fn validate(&self) -> Result<(), SolverError> {
        if !(self.minmax.precision > 0.0) || !(self.lra.precision > 0.0) {
            return Err(SolverError::InvalidEnvironment(format!(
                "precision must be positive (minmax: {}, lra: {})",
                self.minmax.precision, self.lra.precision
            )));
        }
        if !(self.lra.aperiodic_factor > 0.0 && self.lra.aperiodic_factor < 1.0) {
            return Err(SolverError::InvalidEnvironment(format!(
                "aperiodic factor must lie in (0, 1), got {}",
                self.lra.aperiodic_factor
            )));
        }
        Ok(())
    }
}

pub fn read_environment_json<P: AsRef<Path>>(path: P) -> Result<SolverEnvironment, SolverError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let env: SolverEnvironment = serde_json::from_reader(reader)?;
    env.validate()?;
    Ok(env)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let env: SolverEnvironment = serde_json::from_str(
            r#"{ "minmax": { "method": "PolicyIteration" }, "force_soundness": true }"#,
        )
        .unwrap();
        assert_eq!(env.minmax.method(), MinMaxMethod::PolicyIteration);
        assert!(!env.minmax.is_method_set_from_default());
        assert_eq!(env.minmax.precision, 1e-6);
        assert!(env.lra.is_method_set_from_default());
        assert!(env.force_soundness);
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_invalid_aperiodic_factor() {
        let mut env = SolverEnvironment::new();
        env.lra.aperiodic_factor = 1.5;
        assert!(matches!(env.validate(), Err(SolverError::InvalidEnvironment(_))));
    }
}
