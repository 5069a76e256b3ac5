//! Per-region governing equations.
//!
//! Each region kind implements [`RegionEquations`]; every operation has a
//! no-op default, so a kind only spells out what its physics needs and
//! Vacuum spells out nothing.

pub mod conductor;
pub mod fvm;
pub mod insulator;
pub mod semiconductor;
pub mod vacuum;

use crate::assembly::{InsertMode, ParMatrix, ParVector};
use crate::discretization::mesh::FvmNode;
use crate::error::SimError;
use crate::numerics::StepContext;
use crate::parallel::ExecutionContext;
use crate::physics::{
    AdvancedModel, ConductorMaterial, KB_OVER_Q, Material, NodeData, RegionKind, SemiconductorMaterial,
    VariableLayout,
};

pub use conductor::ConductorPhysics;
pub use insulator::InsulatorPhysics;
pub use semiconductor::SemiconductorPhysics;
pub use vacuum::VacuumPhysics;

/// What a region call needs besides its own state.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub exec: &'a ExecutionContext,
    pub step: &'a StepContext,
}

/// Geometry and node data of one region.
#[derive(Debug, Clone)]
pub struct RegionState {
    pub name: String,
    pub kind: RegionKind,
    pub layout: VariableLayout,
    pub nodes: Vec<FvmNode>,
    pub data: Vec<NodeData>,
}

impl RegionState {
    /// Nodes whose rows this rank owns.
    pub fn owned_nodes(&self, rank: usize) -> impl Iterator<Item = (usize, &FvmNode)> + '_ {
        self.nodes.iter().enumerate().filter(move |(_, n)| n.owner == rank)
    }

    /// The node's unknowns out of a scattered local array.
    pub fn node_values(&self, lx: &[f64], i: usize) -> Vec<f64> {
        let m = self.layout.n_vars();
        match self.nodes[i].local_offset {
            Some(o) => lx[o..o + m].to_vec(),
            None => self.data[i].values(&self.layout),
        }
    }
}

pub trait RegionEquations {
    /// Write node data into `x` and the row scaling into `l`.
    fn fill_value(&self, _region: &RegionState, _cx: &EvalContext, _x: &mut ParVector, _l: &mut ParVector) {}

    fn function(
        &self,
        _region: &RegionState,
        _cx: &EvalContext,
        _lx: &[f64],
        _f: &mut ParVector,
        _mode: &mut InsertMode,
    ) {
    }

    fn jacobian(
        &self,
        _region: &RegionState,
        _cx: &EvalContext,
        _lx: &[f64],
        _jac: &mut ParMatrix,
        _mode: &mut InsertMode,
    ) {
    }

    fn time_dependent_function(
        &self,
        _region: &RegionState,
        _cx: &EvalContext,
        _lx: &[f64],
        _f: &mut ParVector,
        _mode: &mut InsertMode,
    ) {
    }

    fn time_dependent_jacobian(
        &self,
        _region: &RegionState,
        _cx: &EvalContext,
        _lx: &[f64],
        _jac: &mut ParMatrix,
        _mode: &mut InsertMode,
    ) {
    }

    /// Read converged values back into node data.
    fn update_solution(&self, _region: &mut RegionState, _cx: &EvalContext, _lx: &[f64]) {}
}

#[derive(Debug, Clone)]
pub enum RegionPhysics {
    Semiconductor(SemiconductorPhysics),
    Insulator(InsulatorPhysics),
    Conductor(ConductorPhysics),
    Vacuum(VacuumPhysics),
}

impl RegionPhysics {
    pub fn equations(&self) -> &dyn RegionEquations {
        match self {
            RegionPhysics::Semiconductor(p) => p,
            RegionPhysics::Insulator(p) => p,
            RegionPhysics::Conductor(p) => p,
            RegionPhysics::Vacuum(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    pub state: RegionState,
    pub physics: RegionPhysics,
}

impl Region {
    /// Build a region over `nodes` and seed its node data with an
    /// equilibrium guess at `t_external`. `doping` gives Nd - Na per node.
    pub fn new(
        name: impl Into<String>,
        kind: RegionKind,
        material: Material,
        nodes: Vec<FvmNode>,
        model: &AdvancedModel,
        t_external: f64,
        doping: impl Fn(&FvmNode) -> f64,
    ) -> Result<Self, SimError> {
        let name = name.into();
        if !material.fits(kind) {
            return Err(SimError::InvalidDevice(format!(
                "region `{name}` of kind {kind:?} cannot use material {material:?}"
            )));
        }
        let (layout, physics, data) = match material {
            Material::Semiconductor(m) => {
                let layout = VariableLayout::semiconductor(model);
                let data = nodes.iter().map(|n| semiconductor_equilibrium(&m, doping(n), t_external)).collect();
                (
                    layout,
                    RegionPhysics::Semiconductor(SemiconductorPhysics::new(m, layout)),
                    data,
                )
            }
            Material::Insulator(m) => {
                let layout = VariableLayout::lattice(model);
                let data = nodes
                    .iter()
                    .map(|_| lattice_node(m.eps(), m.affinity, t_external))
                    .collect();
                (layout, RegionPhysics::Insulator(InsulatorPhysics::new(m, layout)), data)
            }
            Material::Conductor(m) => {
                let layout = VariableLayout::lattice(model);
                let data = nodes
                    .iter()
                    .map(|_| lattice_node(0.0, m.affinity(t_external), t_external))
                    .collect();
                let joule = kind == RegionKind::Metal;
                (
                    layout,
                    RegionPhysics::Conductor(ConductorPhysics::new(m, layout, joule)),
                    data,
                )
            }
            Material::Vacuum => (
                VariableLayout::empty(),
                RegionPhysics::Vacuum(VacuumPhysics),
                nodes.iter().map(|_| lattice_node(0.0, 0.0, t_external)).collect(),
            ),
        };
        Ok(Self {
            state: RegionState {
                name,
                kind,
                layout,
                nodes,
                data,
            },
            physics,
        })
    }

    pub fn kind(&self) -> RegionKind {
        self.state.kind
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn semiconductor(&self) -> Option<&SemiconductorMaterial> {
        match &self.physics {
            RegionPhysics::Semiconductor(p) => Some(&p.material),
            _ => None,
        }
    }

    pub fn conductor(&self) -> Option<&ConductorMaterial> {
        match &self.physics {
            RegionPhysics::Conductor(p) => Some(&p.material),
            _ => None,
        }
    }

    pub fn fill_value(&self, cx: &EvalContext, x: &mut ParVector, l: &mut ParVector) {
        self.physics.equations().fill_value(&self.state, cx, x, l);
    }

    pub fn function(&self, cx: &EvalContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        self.physics.equations().function(&self.state, cx, lx, f, mode);
    }

    pub fn jacobian(&self, cx: &EvalContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        self.physics.equations().jacobian(&self.state, cx, lx, jac, mode);
    }

    pub fn time_dependent_function(&self, cx: &EvalContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        self.physics.equations().time_dependent_function(&self.state, cx, lx, f, mode);
    }

    pub fn time_dependent_jacobian(&self, cx: &EvalContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        self.physics.equations().time_dependent_jacobian(&self.state, cx, lx, jac, mode);
    }

    pub fn update_solution(&mut self, cx: &EvalContext, lx: &[f64]) {
        let Self { state, physics } = self;
        physics.equations().update_solution(state, cx, lx);
    }

    /// Shift every node's current values into its last values, after a
    /// time step is accepted.
    pub fn advance_time_level(&mut self) {
        for d in &mut self.state.data {
            d.advance();
        }
    }
}

/// Charge-neutral Boltzmann equilibrium with the Fermi level at zero.
pub fn semiconductor_equilibrium(m: &SemiconductorMaterial, net_doping: f64, t: f64) -> NodeData {
    let ni = m.ni(t);
    let vt = KB_OVER_Q * t;
    let (n, p) = neutral_densities(net_doping, ni);
    let psi = vt * (net_doping / (2.0 * ni)).asinh();
    let mut data = NodeData {
        psi,
        n,
        p,
        t,
        tn: t,
        tp: t,
        eps: m.eps(),
        affinity: m.affinity,
        net_doping,
        ni,
        ..Default::default()
    };
    data.advance();
    data
}

/// Majority density from neutrality, minority from the mass-action law,
/// computed without cancellation.
pub fn neutral_densities(net_doping: f64, ni: f64) -> (f64, f64) {
    let half = 0.5 * net_doping;
    let root = (half * half + ni * ni).sqrt();
    if net_doping >= 0.0 {
        let n = half + root;
        (n, ni * ni / n)
    } else {
        let p = -half + root;
        (ni * ni / p, p)
    }
}

fn lattice_node(eps: f64, affinity: f64, t: f64) -> NodeData {
    let mut data = NodeData {
        t,
        tn: t,
        tp: t,
        eps,
        affinity,
        ..Default::default()
    };
    data.advance();
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_densities_obey_mass_action() {
        for &nd in &[1e17, -1e16, 0.0, 3e10] {
            let (n, p) = neutral_densities(nd, 1e10);
            assert!((n * p / 1e20 - 1.0).abs() < 1e-12);
            assert!(((p - n + nd) / (n + p)).abs() < 1e-12);
        }
    }

    #[test]
    fn material_kind_mismatch_is_rejected() {
        let r = Region::new(
            "bad",
            RegionKind::Insulator,
            Material::Conductor(ConductorMaterial::aluminium()),
            Vec::new(),
            &AdvancedModel::default(),
            300.0,
            |_| 0.0,
        );
        assert!(r.is_err());
    }
}
