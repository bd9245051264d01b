use log::debug;

use super::environment::SolverEnvironment;
use super::error::SolverError;
use super::minmax::{report_status, IterativeMinMaxSolver};
use super::types::{OptimizationDirection, SolverGuarantee, SolverStatus};
use super::value_type::SolverValue;

impl<V: SolverValue> IterativeMinMaxSolver<V> {
    /// Alternates between solving the chain induced by the current scheduler
    /// and switching every state to a strictly better choice, until no state
    /// switches.
    pub(super) fn solve_equations_policy_iteration(
        &mut self,
        env: &SolverEnvironment,
        dir: OptimizationDirection,
        x: &mut Vec<V>,
        b: &[V],
    ) -> Result<SolverStatus, SolverError> {
        let group_count = self.matrix().row_group_count();
        let mut scheduler = match self.initial_scheduler() {
            Some(initial) => initial.to_vec(),
            None => vec![0; group_count],
        };
        let settings = self.induced_linear_settings(env);
        let guarantee = if dir.minimize() {
            SolverGuarantee::GreaterOrEqual
        } else {
            SolverGuarantee::LessOrEqual
        };

        let mut status = SolverStatus::InProgress;
        let mut iterations = 0u64;
        while status == SolverStatus::InProgress {
            self.solve_induced_equation_system(&settings, &scheduler, x, b)?;

            // Near-ties can flip back and forth when the induced solve is inexact.
            let mut changed = 0usize;
            let matrix = self.matrix();
            for group in 0..group_count {
                let current = scheduler[group];
                for (offset, row) in matrix.row_group(group).enumerate() {
                    if offset == current {
                        continue;
                    }
                    let value = matrix.multiply_row_with_vector(row, x) + b[row].clone();
                    if dir.improves(&x[group], &value) {
                        scheduler[group] = offset;
                        x[group] = value;
                        changed += 1;
                    }
                }
            }
            if changed == 0 {
                status = SolverStatus::Converged;
            }
            debug!("Policy iteration round {} switched {} choices.", iterations + 1, changed);

            iterations += 1;
            status = self.update_status_if_not_converged(status, x, iterations, env.minmax.max_iterations, guarantee);
        }
        report_status(status, iterations);
        self.set_last_iterations(iterations);

        if self.is_track_scheduler_set() {
            self.set_scheduler_choices(scheduler);
        }
        Ok(status)
    }
}
