use num_dual::DualNum;

use super::fvm::{self, EdgeCtx, FvmKernel, NodeCtx};
use super::{EvalContext, RegionEquations, RegionState};
use crate::assembly::{InsertMode, ParMatrix, ParVector};
use crate::discretization::mesh::FvmNode;
use crate::physics::{ConductorMaterial, NodeData, SolutionVariable, VariableLayout};

/// Current continuity in a resistive conductor plus heat conduction.
/// Metal regions deposit Joule heat; electrode regions are treated as
/// ideal and do not.
#[derive(Debug, Clone)]
pub struct ConductorPhysics {
    pub material: ConductorMaterial,
    it: Option<usize>,
    joule: bool,
}

impl ConductorPhysics {
    pub fn new(material: ConductorMaterial, layout: VariableLayout, joule: bool) -> Self {
        Self {
            material,
            it: layout.offset(SolutionVariable::Temperature),
            joule,
        }
    }

    fn edge_temperature<T: DualNum<f64>>(&self, ui: &[T], uj: &[T], edge: &EdgeCtx) -> T {
        match self.it {
            Some(k) => (ui[k].clone() + uj[k].clone()) * 0.5,
            None => T::from(0.5 * (edge.di.t + edge.dj.t)),
        }
    }
}

impl FvmKernel for ConductorPhysics {
    fn edge_flux<T: DualNum<f64>>(&self, f: &mut [T], ui: &[T], uj: &[T], edge: &EdgeCtx) {
        let d = edge.distance;
        let drop = ui[0].clone() - uj[0].clone();
        let j = self
            .material
            .current_density(drop.clone() / d, self.edge_temperature(ui, uj, edge));
        f[0] = -j.clone();
        if let Some(k) = self.it {
            let mut q = (uj[k].clone() - ui[k].clone()) * (self.material.kappa / d);
            if self.joule {
                q += j * drop * 0.5;
            }
            f[k] = q;
        }
    }

    fn node_source<T: DualNum<f64>>(&self, f: &mut [T], _u: &[T], _node: &NodeCtx) {
        for v in f.iter_mut() {
            *v = T::zero();
        }
    }

    fn storage<T: DualNum<f64>>(&self, s: &mut [T], u: &[T], _data: &NodeData) {
        s[0] = T::zero();
        if let Some(k) = self.it {
            s[k] = u[k].clone() * self.material.heat_capacity;
        }
    }

    fn scale(&self, var: SolutionVariable, node: &FvmNode, data: &NodeData) -> f64 {
        match var {
            SolutionVariable::Temperature => 1.0 / (self.material.heat_capacity * node.volume),
            _ => 1.0 / (self.material.sigma(data.t) * node.volume),
        }
    }
}

impl RegionEquations for ConductorPhysics {
    fn fill_value(&self, region: &RegionState, cx: &EvalContext, x: &mut ParVector, l: &mut ParVector) {
        fvm::fill_value(self, region, cx, x, l);
    }

    fn function(&self, region: &RegionState, cx: &EvalContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        fvm::function(self, region, cx, lx, f, mode);
    }

    fn jacobian(&self, region: &RegionState, cx: &EvalContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        fvm::jacobian(self, region, cx, lx, jac, mode);
    }

    fn time_dependent_function(
        &self,
        region: &RegionState,
        cx: &EvalContext,
        lx: &[f64],
        f: &mut ParVector,
        mode: &mut InsertMode,
    ) {
        if self.it.is_some() {
            fvm::time_dependent_function(self, region, cx, lx, f, mode);
        }
    }

    fn time_dependent_jacobian(
        &self,
        region: &RegionState,
        cx: &EvalContext,
        lx: &[f64],
        jac: &mut ParMatrix,
        mode: &mut InsertMode,
    ) {
        if self.it.is_some() {
            fvm::time_dependent_jacobian(self, region, cx, lx, jac, mode);
        }
    }

    fn update_solution(&self, region: &mut RegionState, cx: &EvalContext, lx: &[f64]) {
        fvm::update_solution(region, cx, lx);
    }
}
