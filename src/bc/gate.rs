use serde::Deserialize;

use super::{
    BcContext, BoundaryEquations, BoundaryState, Site, displacement_current, electrode_fill_value,
    electrode_function, electrode_jacobian, electrode_update, follower_function, follower_jacobian,
    follower_preprocess, heat_transfer_function, heat_transfer_jacobian,
};
use crate::assembly::{InsertMode, ParMatrix, ParVector, RowDirectives, switch_mode};
use crate::physics::{RegionKind, SolutionVariable};

/// Gate contact on an insulator. The insulator potential row becomes
/// `V + workfunction - Ve`; conductor nodes at the same location mirror the
/// insulator node. In transient runs the displacement current through the
/// insulator feeds the electrode equation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GateContact {
    /// Gate work function relative to the reference level, V.
    pub workfunction: f64,
}

impl GateContact {
    pub fn new(workfunction: f64) -> Self {
        Self { workfunction }
    }
}

/// The insulator node first, then every conductor node bound to it.
fn sites<'a>(cx: &BcContext<'a>, bc: &BoundaryState, rank: usize) -> Vec<(Site<'a>, Vec<Site<'a>>)> {
    bc.owned_nodes(rank)
        .filter_map(|bn| {
            let all: Vec<Site> = bn.region_nodes.iter().map(|rn| Site::resolve(cx.regions, rn)).collect();
            let insulator = all.iter().find(|s| s.kind() == RegionKind::Insulator).copied()?;
            let conductors = all.into_iter().filter(|s| s.kind().is_conductor()).collect();
            Some((insulator, conductors))
        })
        .collect()
}

impl BoundaryEquations for GateContact {
    fn fill_value(&self, bc: &BoundaryState, cx: &BcContext, x: &mut ParVector, l: &mut ParVector) {
        electrode_fill_value(bc, cx, x, l);
    }

    fn function_preprocess(&self, bc: &BoundaryState, cx: &BcContext, _lx: &[f64]) -> RowDirectives {
        let mut d = RowDirectives::new();
        for (ins, conductors) in sites(cx, bc, cx.exec.rank) {
            if let Some(g) = ins.global(SolutionVariable::Potential) {
                d.clear_row(g);
            }
            for c in &conductors {
                follower_preprocess(&ins, c, &mut d);
            }
        }
        d
    }

    fn function(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, f, cx.exec);
        let ve = bc.dof.and_then(|d| d.local_offset).map_or(0.0, |o| lx[o]);
        let mut current = 0.0;
        for (ins, conductors) in sites(cx, bc, cx.exec.rank) {
            if let Some(g) = ins.global(SolutionVariable::Potential) {
                let v = ins.value(lx, SolutionVariable::Potential);
                f.add_value(g, v + self.workfunction - ve);
            }
            heat_transfer_function(bc, &ins, lx, f);
            current += displacement_current(&ins, lx, cx.step).0;
            for c in &conductors {
                follower_function(&ins, c, lx, f);
            }
        }
        electrode_function(bc, cx, lx, f, current * bc.z_width);
    }

    fn jacobian(&self, bc: &BoundaryState, cx: &BcContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, jac, cx.exec);
        let mut partials = Vec::new();
        for (ins, conductors) in sites(cx, bc, cx.exec.rank) {
            if let Some(g) = ins.global(SolutionVariable::Potential) {
                jac.add_value(g, g, 1.0);
                if let Some(dof) = bc.dof {
                    jac.add_value(g, dof.global_offset, -1.0);
                }
            }
            heat_transfer_jacobian(bc, &ins, jac);
            let (_, d) = displacement_current(&ins, lx, cx.step);
            partials.extend(d.into_iter().map(|(col, v)| (col, v * bc.z_width)));
            for c in &conductors {
                follower_jacobian(&ins, c, jac);
            }
        }
        electrode_jacobian(bc, cx, jac, &partials);
    }

    fn update_solution(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64]) {
        electrode_update(bc, cx, lx);
    }
}
