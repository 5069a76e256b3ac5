use num_dual::DualNum;

use super::fvm::{self, EdgeCtx, FvmKernel, NodeCtx};
use super::{EvalContext, RegionEquations, RegionState};
use crate::assembly::{InsertMode, ParMatrix, ParVector};
use crate::discretization::mesh::FvmNode;
use crate::physics::{InsulatorMaterial, NodeData, SolutionVariable, VariableLayout};

/// Laplace equation for the potential and heat conduction.
#[derive(Debug, Clone)]
pub struct InsulatorPhysics {
    pub material: InsulatorMaterial,
    it: Option<usize>,
}

impl InsulatorPhysics {
    pub fn new(material: InsulatorMaterial, layout: VariableLayout) -> Self {
        Self {
            material,
            it: layout.offset(SolutionVariable::Temperature),
        }
    }
}

impl FvmKernel for InsulatorPhysics {
    fn edge_flux<T: DualNum<f64>>(&self, f: &mut [T], ui: &[T], uj: &[T], edge: &EdgeCtx) {
        let d = edge.distance;
        let eps = 0.5 * (edge.di.eps + edge.dj.eps);
        f[0] = (uj[0].clone() - ui[0].clone()) * (eps / d);
        if let Some(k) = self.it {
            f[k] = (uj[k].clone() - ui[k].clone()) * (self.material.kappa / d);
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
            _ => 1.0 / (data.eps * node.volume),
        }
    }
}

impl RegionEquations for InsulatorPhysics {
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
