//! Newton iteration with per-equation residual convergence and the
//! damping hooks of the device problem.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::damping::{DampingFlags, DampingKind};
use super::linear::{LinearSolveError, LinearSolver};
use super::norms::SolutionNorms;
use super::timing::{record_jacobian, record_residual};
use super::ResidualTolerances;
use crate::assembly::{DofLayout, ParMatrix, ParVector};
use crate::parallel::ExecutionContext;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("linear solve failed in Newton iteration {iteration}: {source}")]
    LinearSolveFailed {
        iteration: usize,
        #[source]
        source: LinearSolveError,
    },
    #[error("Newton did not converge in {iterations} iterations ({norms})")]
    MaxIterations { iterations: usize, norms: SolutionNorms },
    #[error("non-finite residual in Newton iteration {iteration}")]
    NonFinite { iteration: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_iterations: usize,
    pub damping: DampingKind,
    /// Multiplier on the thermal voltage in the damping factor.
    pub potential_update: f64,
    pub tolerances: ResidualTolerances,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            damping: DampingKind::Potential,
            potential_update: 1.0,
            tolerances: ResidualTolerances::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonReport {
    pub iterations: usize,
    pub norms: SolutionNorms,
}

/// What Newton needs from the discretized device. Every method is
/// collective.
pub trait NonlinearProblem {
    fn exec(&self) -> &ExecutionContext;

    fn layout(&self) -> &DofLayout;

    /// Row-scaled residual at `x`.
    fn build_residual(&mut self, x: &ParVector, f: &mut ParVector);

    /// Row-scaled Jacobian at `x`.
    fn build_jacobian(&mut self, x: &ParVector, jac: &mut ParMatrix);

    /// Norms of `x` and of the unscaled counterpart of `f`.
    fn error_norm(&self, x: &ParVector, f: &ParVector) -> SolutionNorms;

    fn potential_damping(&self, x: &ParVector, y: &ParVector, w: &mut ParVector) -> DampingFlags;

    fn check_positive_density(&self, x: &ParVector, y: &ParVector, w: &mut ParVector) -> DampingFlags;
}

pub struct NewtonSolver<'a> {
    pub settings: NewtonSettings,
    pub linear: &'a dyn LinearSolver,
}

impl<'a> NewtonSolver<'a> {
    pub fn new(settings: NewtonSettings, linear: &'a dyn LinearSolver) -> Self {
        Self { settings, linear }
    }

    /// Solve `F(x) = 0` from the initial guess in `x`. On success `x`
    /// holds the converged solution; on failure it holds the last iterate.
    pub fn solve<P: NonlinearProblem>(&self, problem: &mut P, x: &mut ParVector) -> Result<NewtonReport, SolverError> {
        let layout = problem.layout().clone();
        let mut f = ParVector::new(&layout);
        let mut jac = ParMatrix::new(&layout);
        let tol = &self.settings.tolerances;

        let mut iteration = 0;
        loop {
            record_residual(|| problem.build_residual(x, &mut f));
            if !f.all_finite(problem.exec()) {
                warn!(iteration, "residual is not finite");
                return Err(SolverError::NonFinite { iteration });
            }
            let norms = problem.error_norm(x, &f);
            debug!(
                iteration,
                poisson = norms.poisson,
                elec = norms.elec_continuity,
                hole = norms.hole_continuity,
                heat = norms.heat,
                electrode = norms.electrode,
                "newton"
            );
            if norms.converged(tol) {
                return Ok(NewtonReport { iterations: iteration, norms });
            }
            if iteration == self.settings.max_iterations {
                return Err(SolverError::MaxIterations {
                    iterations: iteration,
                    norms,
                });
            }

            record_jacobian(|| problem.build_jacobian(x, &mut jac));
            let y = self
                .linear
                .solve(problem.exec(), &layout, &jac, &f)
                .map_err(|source| SolverError::LinearSolveFailed { iteration, source })?;

            let mut w = ParVector::difference(x, &y);
            let mut flags = DampingFlags::default();
            if self.settings.damping == DampingKind::Potential {
                flags |= problem.potential_damping(x, &y, &mut w);
            }
            flags |= problem.check_positive_density(x, &y, &mut w);
            trace!(iteration, changed_w = flags.changed_w, changed_y = flags.changed_y, "update checked");
            x.copy_from(&w);
            iteration += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::linear::DenseLu;
    use approx::assert_relative_eq;

    /// `u_k^2 - a_k = 0`, rows scaled by one, norms reported as Poisson.
    struct Roots {
        exec: ExecutionContext,
        layout: DofLayout,
        a: Vec<f64>,
    }

    impl NonlinearProblem for Roots {
        fn exec(&self) -> &ExecutionContext {
            &self.exec
        }

        fn layout(&self) -> &DofLayout {
            &self.layout
        }

        fn build_residual(&mut self, x: &ParVector, f: &mut ParVector) {
            for (k, (xv, a)) in x.owned().iter().zip(&self.a).enumerate() {
                f.insert_value(k, xv * xv - a);
            }
        }

        fn build_jacobian(&mut self, x: &ParVector, jac: &mut ParMatrix) {
            jac.zero_entries();
            for (k, xv) in x.owned().iter().enumerate() {
                jac.add_value(k, k, 2.0 * xv);
            }
        }

        fn error_norm(&self, _x: &ParVector, f: &ParVector) -> SolutionNorms {
            SolutionNorms {
                poisson: f.norm2(&self.exec),
                ..Default::default()
            }
        }

        fn potential_damping(&self, _x: &ParVector, _y: &ParVector, _w: &mut ParVector) -> DampingFlags {
            DampingFlags::default()
        }

        fn check_positive_density(&self, _x: &ParVector, _y: &ParVector, _w: &mut ParVector) -> DampingFlags {
            DampingFlags::default()
        }
    }

    fn settings(max_iterations: usize) -> NewtonSettings {
        NewtonSettings {
            max_iterations,
            damping: DampingKind::None,
            tolerances: ResidualTolerances {
                poisson: 1e-12,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn converges_quadratically_to_the_roots() {
        let layout = DofLayout::single(2);
        let mut problem = Roots {
            exec: ExecutionContext::serial(),
            layout: layout.clone(),
            a: vec![4.0, 9.0],
        };
        let mut x = ParVector::from_global(&layout, &[1.0, 1.0]);
        let report = NewtonSolver::new(settings(30), &DenseLu).solve(&mut problem, &mut x).unwrap();
        assert_relative_eq!(x.owned()[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(x.owned()[1], 3.0, epsilon = 1e-10);
        assert!(report.iterations < 10);
    }

    #[test]
    fn running_out_of_iterations_carries_the_norms() {
        let layout = DofLayout::single(1);
        let mut problem = Roots {
            exec: ExecutionContext::serial(),
            layout: layout.clone(),
            a: vec![1e6],
        };
        let mut x = ParVector::from_global(&layout, &[1.0]);
        let err = NewtonSolver::new(settings(2), &DenseLu).solve(&mut problem, &mut x).unwrap_err();
        match err {
            SolverError::MaxIterations { iterations, norms } => {
                assert_eq!(iterations, 2);
                assert!(norms.poisson > 1e-12);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn singular_jacobian_is_a_linear_failure() {
        let layout = DofLayout::single(1);
        let mut problem = Roots {
            exec: ExecutionContext::serial(),
            layout: layout.clone(),
            a: vec![1.0],
        };
        let mut x = ParVector::from_global(&layout, &[0.0]);
        let err = NewtonSolver::new(settings(5), &DenseLu).solve(&mut problem, &mut x).unwrap_err();
        assert!(matches!(err, SolverError::LinearSolveFailed { iteration: 0, .. }));
    }
}
