//! Linear solve backends. Every rank gathers the assembled system and
//! solves it redundantly, then keeps its owned segment of the solution.

use std::fmt;
use std::sync::Arc;

use kryst::parallel::{NoComm, UniverseComm};
use kryst::preconditioner::PcSide;
use kryst::solver::LinearSolver as _;
use nalgebra::{DMatrix, DVector};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::assembly::{DofLayout, ParMatrix, ParVector};
use crate::numerics::timing::record_linear_solve;
use crate::parallel::ExecutionContext;

#[derive(Debug, Error)]
pub enum LinearSolveError {
    #[error("matrix is singular")]
    Singular,
    #[error("iterative solver broke down: {0}")]
    Breakdown(String),
    #[error("dimension mismatch: {rows} rows against a right-hand side of {rhs}")]
    DimensionMismatch { rows: usize, rhs: usize },
    #[error("linear solve produced non-finite values")]
    NonFinite,
}

/// A global system in CSR form.
pub struct CsrSystem<'a> {
    pub n: usize,
    pub indptr: &'a [usize],
    pub indices: &'a [usize],
    pub data: &'a [f64],
}

pub trait LinearSolver: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn solve_csr(&self, a: &CsrSystem, b: &[f64]) -> Result<Vec<f64>, LinearSolveError>;

    /// Collective. Solve `A y = b` for the distributed system.
    fn solve(
        &self,
        exec: &ExecutionContext,
        layout: &DofLayout,
        a: &ParMatrix,
        b: &ParVector,
    ) -> Result<ParVector, LinearSolveError> {
        let (indptr, indices, data) = a.gather_csr(exec);
        let rhs = b.gather_global(exec);
        if rhs.len() + 1 != indptr.len() {
            return Err(LinearSolveError::DimensionMismatch {
                rows: indptr.len().saturating_sub(1),
                rhs: rhs.len(),
            });
        }
        let system = CsrSystem {
            n: rhs.len(),
            indptr: &indptr,
            indices: &indices,
            data: &data,
        };
        let y = record_linear_solve(|| self.solve_csr(&system, &rhs))?;
        if !y.iter().all(|v| v.is_finite()) {
            return Err(LinearSolveError::NonFinite);
        }
        Ok(ParVector::from_global(layout, &y))
    }
}

/// Direct solve through a dense LU factorization.
#[derive(Debug, Clone, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn name(&self) -> &'static str {
        "lu"
    }

    fn solve_csr(&self, a: &CsrSystem, b: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        let mut m = DMatrix::<f64>::zeros(a.n, a.n);
        for r in 0..a.n {
            for k in a.indptr[r]..a.indptr[r + 1] {
                m[(r, a.indices[k])] += a.data[k];
            }
        }
        let rhs = DVector::from_column_slice(b);
        m.lu()
            .solve(&rhs)
            .map(|y| y.as_slice().to_vec())
            .ok_or(LinearSolveError::Singular)
    }
}

/// BiCGStab with Jacobi row equilibration.
#[derive(Debug, Clone)]
pub struct BiCgStab {
    pub rtol: f64,
    pub max_iterations: usize,
}

impl Default for BiCgStab {
    fn default() -> Self {
        Self {
            rtol: 1e-10,
            max_iterations: 2000,
        }
    }
}

impl LinearSolver for BiCgStab {
    fn name(&self) -> &'static str {
        "bicgstab"
    }

    fn solve_csr(&self, a: &CsrSystem, b: &[f64]) -> Result<Vec<f64>, LinearSolveError> {
        let n = a.n;
        let diag: Vec<f64> = (0..n)
            .map(|r| {
                let d = (a.indptr[r]..a.indptr[r + 1])
                    .find(|&k| a.indices[k] == r)
                    .map_or(1.0, |k| a.data[k]);
                if d.abs() < 1e-300 { 1.0 } else { d }
            })
            .collect();

        let mut data = a.data.to_vec();
        for r in 0..n {
            for v in &mut data[a.indptr[r]..a.indptr[r + 1]] {
                *v /= diag[r];
            }
        }
        let rhs: Vec<f64> = b.iter().zip(&diag).map(|(v, d)| v / d).collect();

        let matrix =
            kryst::matrix::sparse::CsrMatrix::from_csr(n, n, a.indptr.to_vec(), a.indices.to_vec(), data);
        let op = kryst::matrix::op::CsrOp::new(Arc::new(matrix));
        let mut solver = kryst::solver::bicgstab::BiCgStabSolver::new(self.rtol, self.max_iterations);
        let mut workspace = kryst::context::ksp_context::Workspace::new(n);
        solver.setup_workspace(&mut workspace);

        let mut y = vec![0.0; n];
        match solver.solve(
            &op,
            None,
            &rhs,
            &mut y,
            PcSide::Left,
            &UniverseComm::NoComm(NoComm {}),
            None,
            Some(&mut workspace),
        ) {
            Ok(stats) => {
                debug!(?stats, "bicgstab finished");
                Ok(y)
            }
            Err(e) => {
                warn!(error = ?e, "bicgstab failed");
                Err(LinearSolveError::Breakdown(format!("{e:?}")))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearSolverKind {
    #[default]
    Lu,
    Bicgstab,
}

impl LinearSolverKind {
    pub fn build(self) -> Box<dyn LinearSolver> {
        match self {
            LinearSolverKind::Lu => Box::new(DenseLu),
            LinearSolverKind::Bicgstab => Box::new(BiCgStab::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // [4 1 0; 1 4 1; 0 1 4]
    fn tridiagonal() -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        (
            vec![0, 2, 5, 7],
            vec![0, 1, 0, 1, 2, 1, 2],
            vec![4.0, 1.0, 1.0, 4.0, 1.0, 1.0, 4.0],
        )
    }

    #[test]
    fn dense_lu_solves_a_small_system() {
        let (indptr, indices, data) = tridiagonal();
        let a = CsrSystem {
            n: 3,
            indptr: &indptr,
            indices: &indices,
            data: &data,
        };
        let y = DenseLu.solve_csr(&a, &[5.0, 6.0, 5.0]).unwrap();
        for v in y {
            assert_relative_eq!(v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn singular_matrix_is_reported() {
        let indptr = vec![0, 1, 1];
        let indices = vec![0];
        let data = vec![1.0];
        let a = CsrSystem {
            n: 2,
            indptr: &indptr,
            indices: &indices,
            data: &data,
        };
        assert!(matches!(DenseLu.solve_csr(&a, &[1.0, 1.0]), Err(LinearSolveError::Singular)));
    }

    #[test]
    fn distributed_solve_keeps_the_owned_segment() {
        let exec = ExecutionContext::serial();
        let layout = DofLayout::single(3);
        let mut a = ParMatrix::new(&layout);
        let (indptr, indices, data) = tridiagonal();
        for r in 0..3 {
            for k in indptr[r]..indptr[r + 1] {
                a.add_value(r, indices[k], data[k]);
            }
        }
        let b = ParVector::from_global(&layout, &[5.0, 6.0, 5.0]);
        let y = DenseLu.solve(&exec, &layout, &a, &b).unwrap();
        assert_relative_eq!(y.owned()[1], 1.0, epsilon = 1e-12);
    }
}
