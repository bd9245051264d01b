use std::fmt;

use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SolverRequirement {
    pub enabled: bool,
    pub critical: bool,
}

impl SolverRequirement {
    fn enable(&mut self, critical: bool) {
        self.enabled = true;
        self.critical = critical;
    }

    fn is_enabled_critical(&self) -> bool {
        self.enabled && self.critical
    }
}

/// Preconditions a MinMax solving method needs from its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MinMaxRequirements {
    no_end_components: SolverRequirement,
    valid_initial_scheduler: SolverRequirement,
    lower_bounds: SolverRequirement,
    upper_bounds: SolverRequirement,
}

impl MinMaxRequirements {
    pub fn new() -> MinMaxRequirements {
        MinMaxRequirements::default()
    }

    pub fn require_no_end_components(&mut self) {
        self.no_end_components.enable(true);
    }

    pub fn require_valid_initial_scheduler(&mut self) {
        self.valid_initial_scheduler.enable(true);
    }

    pub fn require_lower_bounds(&mut self) {
        self.lower_bounds.enable(true);
    }

    pub fn require_upper_bounds(&mut self) {
        self.upper_bounds.enable(true);
    }

    pub fn require_bounds(&mut self) {
        self.require_lower_bounds();
        self.require_upper_bounds();
    }

    pub fn no_end_components(&self) -> SolverRequirement {
        self.no_end_components
    }

    pub fn valid_initial_scheduler(&self) -> SolverRequirement {
        self.valid_initial_scheduler
    }

    pub fn lower_bounds(&self) -> SolverRequirement {
        self.lower_bounds
    }

    pub fn upper_bounds(&self) -> SolverRequirement {
        self.upper_bounds
    }

    pub fn clear_no_end_components(&mut self) {
        self.no_end_components = SolverRequirement::default();
    }

    pub fn clear_valid_initial_scheduler(&mut self) {
        self.valid_initial_scheduler = SolverRequirement::default();
    }

    pub fn clear_lower_bounds(&mut self) {
        self.lower_bounds = SolverRequirement::default();
    }

    pub fn clear_upper_bounds(&mut self) {
        self.upper_bounds = SolverRequirement::default();
    }

    pub fn clear_bounds(&mut self) {
        self.clear_lower_bounds();
        self.clear_upper_bounds();
    }

    pub fn has_enabled_requirement(&self) -> bool {
        self.entries().iter().any(|(_, r)| r.enabled)
    }

    pub fn has_enabled_critical_requirement(&self) -> bool {
        self.entries().iter().any(|(_, r)| r.is_enabled_critical())
    }

    /// Names of the enabled requirements, critical ones marked with a `!`.
    pub fn enabled_requirements_as_string(&self) -> String {
        let names = self
            .entries()
            .iter()
            .filter(|(_, r)| r.enabled)
            .map(|(name, r)| if r.critical { format!("{}!", name) } else { name.to_string() })
            .join(", ");
        format!("[{}]", names)
    }

    fn entries(&self) -> [(&'static str, SolverRequirement); 4] {
        [
            ("NoEndComponents", self.no_end_components),
            ("ValidInitialScheduler", self.valid_initial_scheduler),
            ("LowerBounds", self.lower_bounds),
            ("UpperBounds", self.upper_bounds),
        ]
    }
}

impl fmt::Display for MinMaxRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.enabled_requirements_as_string())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_requirements_string() {
        let mut requirements = MinMaxRequirements::new();
        assert!(!requirements.has_enabled_requirement());
        requirements.require_bounds();
        requirements.require_no_end_components();
        assert_eq!(
            requirements.enabled_requirements_as_string(),
            "[NoEndComponents!, LowerBounds!, UpperBounds!]"
        );
        requirements.clear_bounds();
        assert!(requirements.has_enabled_critical_requirement());
        requirements.clear_no_end_components();
        assert!(!requirements.has_enabled_requirement());
    }
}
