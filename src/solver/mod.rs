//! The discretized device as a nonlinear problem: region and boundary
//! dispatch for residual and Jacobian, row scaling, damping hooks, norms
//! and the time-step error estimate.

pub mod modes;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

pub use modes::{ElectrodeSample, OperatingPoint, SweepSettings};

use crate::assembly::{Assemble, DofLayout, DofMap, InsertMode, ParMatrix, ParVector, RowDirectives};
use crate::bc::{BcContext, BoundaryCondition, BoundaryPhysics};
use crate::error::{Result, SimError};
use crate::numerics::damping::{self, DampingFlags};
use crate::numerics::linear::{LinearSolver, LinearSolverKind};
use crate::numerics::lte::{self, LteTolerances, SolutionHistory};
use crate::numerics::newton::{NewtonReport, NewtonSettings, NewtonSolver, NonlinearProblem, SolverError};
use crate::numerics::norms::{self, SolutionNorms};
use crate::numerics::{ElectrodeBlock, NodeBlock, StepContext};
use crate::parallel::ExecutionContext;
use crate::physics::{KB_OVER_Q, RegionKind};
use crate::region::{EvalContext, Region};

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub newton: NewtonSettings,
    pub linear: LinearSolverKind,
}

pub struct DeviceSolver {
    pub exec: ExecutionContext,
    pub regions: Vec<Region>,
    pub bcs: Vec<BoundaryCondition>,
    pub dofs: DofMap,
    /// Last accepted solution.
    pub x: ParVector,
    /// Row scaling.
    pub l: ParVector,
    pub step: StepContext,
    pub settings: SolverSettings,
    linear: Arc<dyn LinearSolver>,
    blocks: Vec<NodeBlock>,
    history: SolutionHistory,
}

impl DeviceSolver {
    /// Number the unknowns and load the node data into `x`. Every rank
    /// passes the same device description.
    pub fn new(
        exec: ExecutionContext,
        mut regions: Vec<Region>,
        mut bcs: Vec<BoundaryCondition>,
        settings: SolverSettings,
        t_external: f64,
    ) -> Result<Self> {
        validate(&bcs)?;
        let dofs = DofMap::build(&exec, &mut regions, &mut bcs);
        let blocks = node_blocks(&regions, &dofs.layout, exec.rank);
        info!(
            rank = exec.rank,
            size = exec.size,
            regions = regions.len(),
            boundaries = bcs.len(),
            unknowns = dofs.layout.n_global,
            linear = settings.linear.build().name(),
            "device assembled"
        );
        let mut solver = Self {
            x: ParVector::new(&dofs.layout),
            l: ParVector::new(&dofs.layout),
            linear: Arc::from(settings.linear.build()),
            step: StepContext::steady(t_external),
            exec,
            regions,
            bcs,
            dofs,
            settings,
            blocks,
            history: SolutionHistory::default(),
        };
        solver.pre_solve_process(true);
        Ok(solver)
    }

    pub fn layout(&self) -> &DofLayout {
        &self.dofs.layout
    }

    /// Owned nodes with unknowns, as the per-node numerics see them.
    pub fn node_blocks(&self) -> &[NodeBlock] {
        &self.blocks
    }

    /// Electrode and hub unknowns owned here, scaled by the factor their
    /// rows apply to the device current.
    pub fn electrode_blocks(&self) -> Vec<ElectrodeBlock> {
        let lo = self.x.range().start;
        self.bcs
            .iter()
            .filter_map(|bc| {
                let dof = bc.state.dof?;
                self.x.is_owned(dof.global_offset).then(|| ElectrodeBlock {
                    offset: dof.global_offset - lo,
                    scaling: bc.state.current_scale(self.step.dt),
                })
            })
            .collect()
    }

    /// Collective. Fresh owned+ghost copy of `v`.
    pub fn scatter(&self, v: &ParVector) -> Vec<f64> {
        self.dofs.scatter.scatter(&self.exec, v)
    }

    /// Write node data and electrode potentials into `x` (when
    /// `load_solution`) and the row scales into `L`.
    fn fill_value(&mut self, load_solution: bool) {
        let layout = self.dofs.layout.clone();
        let mut x = ParVector::new(&layout);
        let mut l = ParVector::new(&layout);
        let cx = EvalContext {
            exec: &self.exec,
            step: &self.step,
        };
        for region in &self.regions {
            region.fill_value(&cx, &mut x, &mut l);
        }
        let bcx = BcContext {
            exec: &self.exec,
            step: &self.step,
            regions: &self.regions,
        };
        for bc in &self.bcs {
            bc.fill_value(&bcx, &mut x, &mut l);
        }
        x.assemble(&self.exec);
        l.assemble(&self.exec);
        if load_solution {
            self.x = x;
        }
        self.l = l;
    }

    /// Collective. Refresh the row scales, and `x` from node data when
    /// `load_solution` is set.
    pub fn pre_solve_process(&mut self, load_solution: bool) {
        self.fill_value(load_solution);
    }

    /// Collective. Commit `x` to node data and circuits.
    pub fn post_solve_process(&mut self) {
        let lx = self.scatter(&self.x);
        let cx = EvalContext {
            exec: &self.exec,
            step: &self.step,
        };
        for region in &mut self.regions {
            region.update_solution(&cx, &lx);
        }
        let bcx = BcContext {
            exec: &self.exec,
            step: &self.step,
            regions: &self.regions,
        };
        for bc in &mut self.bcs {
            bc.update_solution(&bcx, &lx);
        }
    }

    /// Collective. Write an intermediate vector into region node data
    /// without touching the circuits.
    pub fn flush_system(&mut self, v: &ParVector) {
        let lx = self.scatter(v);
        let cx = EvalContext {
            exec: &self.exec,
            step: &self.step,
        };
        for region in &mut self.regions {
            region.update_solution(&cx, &lx);
        }
    }

    /// Collective. Reload the last accepted state into `x` and `L` after a
    /// failed solve.
    pub fn diverged_recovery(&mut self) {
        for bc in &mut self.bcs {
            if let Some(c) = bc.circuit_mut() {
                c.restore();
            }
        }
        self.fill_value(true);
        debug!("state restored after divergence");
    }

    /// Collective. Residual `L * F(x)` into `f`.
    pub fn residual(&mut self, x: &ParVector, f: &mut ParVector) {
        let lx = self.scatter(x);
        f.zero();
        let mut mode = InsertMode::NotSet;
        let cx = EvalContext {
            exec: &self.exec,
            step: &self.step,
        };
        for region in &self.regions {
            region.function(&cx, &lx, f, &mut mode);
        }
        if self.step.time_dependent {
            for region in &self.regions {
                region.time_dependent_function(&cx, &lx, f, &mut mode);
            }
        }
        f.assemble(&self.exec);

        let bcx = BcContext {
            exec: &self.exec,
            step: &self.step,
            regions: &self.regions,
        };
        let mut directives = RowDirectives::new();
        for bc in &self.bcs {
            directives.extend(bc.function_preprocess(&bcx, &lx));
        }
        directives.apply_to_vector(&self.exec, f);

        let mut mode = InsertMode::NotSet;
        for bc in &mut self.bcs {
            bc.function(&bcx, &lx, f, &mut mode);
        }
        f.assemble(&self.exec);
        f.pointwise_mult(&self.l);
    }

    /// Collective. Jacobian of [`DeviceSolver::residual`], row-scaled.
    pub fn jacobian(&mut self, x: &ParVector, jac: &mut ParMatrix) {
        let lx = self.scatter(x);
        jac.zero_entries();
        let mut mode = InsertMode::NotSet;
        let cx = EvalContext {
            exec: &self.exec,
            step: &self.step,
        };
        for region in &self.regions {
            region.jacobian(&cx, &lx, jac, &mut mode);
        }
        if self.step.time_dependent {
            for region in &self.regions {
                region.time_dependent_jacobian(&cx, &lx, jac, &mut mode);
            }
        }
        jac.assemble(&self.exec);

        let bcx = BcContext {
            exec: &self.exec,
            step: &self.step,
            regions: &self.regions,
        };
        let mut directives = RowDirectives::new();
        for bc in &self.bcs {
            directives.extend(bc.jacobian_preprocess(&bcx, &lx));
        }
        directives.apply_to_matrix(&self.exec, jac);

        let mut mode = InsertMode::NotSet;
        for bc in &self.bcs {
            bc.jacobian(&bcx, &lx, jac, &mut mode);
        }
        jac.close(&self.exec, true);
        jac.scale_rows(&self.l);
    }

    /// Collective. Floors densities and temperatures of a predicted `x`
    /// against the previous accepted `xo`.
    pub fn projection_positive_density_check(&self, x: &mut ParVector, xo: &ParVector) {
        damping::projection_positive_density_check(&self.blocks, x.owned_mut(), xo.owned(), self.step.t_external);
    }

    /// Collective. Whether the proposed step may use second order.
    pub fn bdf2_positive_defined(&self, step: &StepContext) -> bool {
        let nodes = self
            .regions
            .iter()
            .filter(|r| r.kind() == RegionKind::Semiconductor)
            .flat_map(|r| {
                let state = &r.state;
                state
                    .owned_nodes(self.exec.rank)
                    .map(move |(i, _)| (&state.layout, &state.data[i]))
            });
        lte::bdf2_positive_defined(&self.exec, step, nodes)
    }

    /// Collective. Truncation error ratio of `x` against the accepted
    /// history for the current step. Falls back to the first-order
    /// predictor while only two levels exist. `None` without history.
    pub fn lte_norm(&self, tol: &LteTolerances) -> Option<f64> {
        let x_n = self.history.level(0)?;
        let x_n1 = self.history.level(1)?;
        let mut step = self.step;
        let x_n2 = match self.history.level(2) {
            Some(v) => v,
            None => {
                step.bdf2_lower_order = true;
                x_n1
            }
        };
        Some(lte::lte_norm(
            &self.exec,
            &self.blocks,
            &step,
            tol,
            self.x.owned(),
            [x_n.owned(), x_n1.owned(), x_n2.owned()],
        ))
    }

    /// Collective. Newton from the current `x`. On failure `x` keeps the
    /// last accepted solution.
    pub fn newton(&mut self) -> std::result::Result<NewtonReport, SolverError> {
        let linear = Arc::clone(&self.linear);
        let mut x = self.x.clone();
        let report = NewtonSolver::new(self.settings.newton, linear.as_ref()).solve(self, &mut x)?;
        self.x = x;
        Ok(report)
    }

    pub fn boundary(&self, label: &str) -> Result<&BoundaryCondition> {
        self.bcs
            .iter()
            .find(|bc| bc.label() == label)
            .ok_or_else(|| SimError::UnknownBoundary(label.to_string()))
    }

    pub fn boundary_mut(&mut self, label: &str) -> Result<&mut BoundaryCondition> {
        self.bcs
            .iter_mut()
            .find(|bc| bc.label() == label)
            .ok_or_else(|| SimError::UnknownBoundary(label.to_string()))
    }

    /// Set the applied voltage or current of an electrode's source.
    pub fn set_applied(&mut self, label: &str, value: f64) -> Result<()> {
        let bc = self.boundary_mut(label)?;
        let circuit = bc
            .circuit_mut()
            .ok_or_else(|| SimError::InvalidDevice(format!("boundary `{label}` has no external circuit")))?;
        circuit.set_applied(value);
        Ok(())
    }

    pub fn electrode_potential(&self, label: &str) -> Result<f64> {
        let bc = self.boundary(label)?;
        bc.potential()
            .ok_or_else(|| SimError::InvalidDevice(format!("boundary `{label}` is not an electrode")))
    }

    pub fn electrode_current(&self, label: &str) -> Result<f64> {
        let bc = self.boundary(label)?;
        bc.current()
            .ok_or_else(|| SimError::InvalidDevice(format!("boundary `{label}` is not an electrode")))
    }
}

impl NonlinearProblem for DeviceSolver {
    fn exec(&self) -> &ExecutionContext {
        &self.exec
    }

    fn layout(&self) -> &DofLayout {
        &self.dofs.layout
    }

    fn build_residual(&mut self, x: &ParVector, f: &mut ParVector) {
        self.residual(x, f);
    }

    fn build_jacobian(&mut self, x: &ParVector, jac: &mut ParMatrix) {
        self.jacobian(x, jac);
    }

    fn error_norm(&self, x: &ParVector, f: &ParVector) -> SolutionNorms {
        let mut unscaled = f.clone();
        unscaled.pointwise_divide(&self.l);
        norms::error_norm(
            &self.exec,
            &self.blocks,
            &self.electrode_blocks(),
            x.owned(),
            unscaled.owned(),
        )
    }

    fn potential_damping(&self, x: &ParVector, y: &ParVector, w: &mut ParVector) -> DampingFlags {
        let vut = KB_OVER_Q * self.step.t_external * self.settings.newton.potential_update;
        damping::potential_damping(&self.exec, &self.blocks, x.owned(), y.owned(), w.owned_mut(), vut)
    }

    fn check_positive_density(&self, x: &ParVector, _y: &ParVector, w: &mut ParVector) -> DampingFlags {
        damping::check_positive_density(&self.blocks, x.owned(), w.owned_mut(), self.step.t_external)
    }
}

fn node_blocks(regions: &[Region], layout: &DofLayout, rank: usize) -> Vec<NodeBlock> {
    let lo = layout.owned_range().start;
    regions
        .iter()
        .filter(|r| r.state.layout.n_vars() > 0)
        .flat_map(|r| {
            r.state.owned_nodes(rank).map(move |(_, node)| NodeBlock {
                kind: r.kind(),
                layout: r.state.layout,
                offset: node.global_offset - lo,
            })
        })
        .collect()
}

/// Labels are unique, electrodes and hubs carry a circuit, and every
/// inter-connect names a hub through a positive resistance.
fn validate(bcs: &[BoundaryCondition]) -> Result<()> {
    let mut labels = HashSet::new();
    for (i, bc) in bcs.iter().enumerate() {
        if !labels.insert(bc.label()) {
            return Err(SimError::InvalidDevice(format!("duplicate boundary label `{}`", bc.label())));
        }
        if bc.has_electrode_dof() && bc.circuit().is_none() {
            return Err(SimError::InvalidDevice(format!(
                "{} boundary `{}` needs an external circuit",
                bc.physics.name(),
                bc.label()
            )));
        }
        if let Some(link) = &bc.state.inter_connect {
            if !(link.resistance > 0.0) {
                return Err(SimError::InvalidDevice(format!(
                    "inter-connect resistance of `{}` must be positive, got {}",
                    bc.label(),
                    link.resistance
                )));
            }
            let hub_ok = link.hub != i && matches!(bcs.get(link.hub).map(|h| &h.physics), Some(BoundaryPhysics::Hub(_)));
            if !hub_ok || !bc.is_electrode() {
                return Err(SimError::InvalidDevice(format!(
                    "boundary `{}` is tied to something that is not an inter-connect hub",
                    bc.label()
                )));
            }
        }
    }
    Ok(())
}
