use nalgebra::{Dyn, U1};
use num_dual::{Derivative, DualDVec64, DualNum};

use super::{
    BcContext, BoundaryEquations, BoundaryState, Site, displacement_current, electrode_fill_value,
    electrode_function, electrode_jacobian, electrode_update, heat_transfer_function, heat_transfer_jacobian,
};
use crate::assembly::{InsertMode, ParMatrix, ParVector, RowDirectives, switch_mode};
use crate::physics::{ConductorMaterial, RegionKind, SolutionVariable};

/// Metal pad driven by an external circuit. Metal nodes follow
/// `V + affinity - Ve` and conduct current into the pad; insulator nodes
/// sharing the location are tied to the metal work function and add their
/// displacement current.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolderPad;

fn dual(v: f64, n: usize, k: usize) -> DualDVec64 {
    DualDVec64::new(v, Derivative::derivative_generic(Dyn(n), U1, k))
}

/// Conduction current leaving a metal node along one edge, as a function
/// of `(V, V_nb, T, T_nb)`.
fn edge_current<T: DualNum<f64>>(m: &ConductorMaterial, v: T, v_nb: T, t: T, t_nb: T, distance: f64, area: f64) -> T {
    m.current_density((v - v_nb) / distance, (t + t_nb) * 0.5) * area
}

impl SolderPad {
    /// Conduction current into the metal at one node plus its partials.
    fn conduction(site: &Site, lx: &[f64]) -> (f64, Vec<(usize, f64)>) {
        let Some(material) = site.region.conductor() else {
            return (0.0, Vec::new());
        };
        let state = &site.region.state;
        let it = state.layout.offset(SolutionVariable::Temperature);
        let v = site.value(lx, SolutionVariable::Potential);
        let t = site.value(lx, SolutionVariable::Temperature);
        let mut current = 0.0;
        let mut partials = Vec::new();
        for nb in &site.node.neighbors {
            let other = Site {
                region: site.region,
                index: nb.node,
                node: &state.nodes[nb.node],
                data: &state.data[nb.node],
            };
            let v_nb = other.value(lx, SolutionVariable::Potential);
            let t_nb = other.value(lx, SolutionVariable::Temperature);
            let area = nb.cv_area.abs();
            let j = edge_current(
                material,
                dual(v, 4, 0),
                dual(v_nb, 4, 1),
                dual(t, 4, 2),
                dual(t_nb, 4, 3),
                nb.distance,
                area,
            );
            current += j.re;
            let d = j.eps.unwrap_generic(Dyn(4), U1);
            partials.push((site.node.global_offset, d[(0, 0)]));
            partials.push((other.node.global_offset, d[(1, 0)]));
            if let Some(k) = it {
                partials.push((site.node.global_offset + k, d[(2, 0)]));
                partials.push((other.node.global_offset + k, d[(3, 0)]));
            }
        }
        (current, partials)
    }

    fn metal_affinity(sites: &[Site], t_external: f64) -> f64 {
        sites
            .iter()
            .find_map(|s| s.region.conductor())
            .map_or(0.0, |m| m.affinity(t_external))
    }
}

fn sites<'a>(cx: &BcContext<'a>, bc: &BoundaryState, rank: usize) -> Vec<Vec<Site<'a>>> {
    bc.owned_nodes(rank)
        .map(|bn| {
            bn.region_nodes
                .iter()
                .map(|rn| Site::resolve(cx.regions, rn))
                .filter(|s| s.has_unknowns())
                .collect()
        })
        .collect()
}

impl BoundaryEquations for SolderPad {
    fn fill_value(&self, bc: &BoundaryState, cx: &BcContext, x: &mut ParVector, l: &mut ParVector) {
        for node_sites in sites(cx, bc, cx.exec.rank) {
            for s in node_sites {
                if let Some(g) = s.global(SolutionVariable::Potential) {
                    l.insert_value(g, 1.0);
                }
            }
        }
        electrode_fill_value(bc, cx, x, l);
    }

    fn function_preprocess(&self, bc: &BoundaryState, cx: &BcContext, _lx: &[f64]) -> RowDirectives {
        let mut d = RowDirectives::new();
        for node_sites in sites(cx, bc, cx.exec.rank) {
            for s in node_sites {
                if matches!(s.kind(), RegionKind::Metal | RegionKind::Electrode | RegionKind::Insulator) {
                    if let Some(g) = s.global(SolutionVariable::Potential) {
                        d.clear_row(g);
                    }
                }
            }
        }
        d
    }

    fn function(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, f, cx.exec);
        let ve = bc.dof.and_then(|d| d.local_offset).map_or(0.0, |o| lx[o]);
        let mut current = 0.0;
        for node_sites in sites(cx, bc, cx.exec.rank) {
            let workfunction = Self::metal_affinity(&node_sites, bc.t_external);
            for s in &node_sites {
                let Some(g) = s.global(SolutionVariable::Potential) else {
                    continue;
                };
                let v = s.value(lx, SolutionVariable::Potential);
                match s.kind() {
                    RegionKind::Metal | RegionKind::Electrode => {
                        f.add_value(g, v + s.data.affinity - ve);
                        heat_transfer_function(bc, s, lx, f);
                        current += Self::conduction(s, lx).0;
                    }
                    RegionKind::Insulator => {
                        f.add_value(g, v + workfunction - ve);
                        current += displacement_current(s, lx, cx.step).0;
                    }
                    _ => {}
                }
            }
        }
        electrode_function(bc, cx, lx, f, current * bc.z_width);
    }

    fn jacobian(&self, bc: &BoundaryState, cx: &BcContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, jac, cx.exec);
        let dof = bc.dof.map(|d| d.global_offset);
        let mut partials = Vec::new();
        for node_sites in sites(cx, bc, cx.exec.rank) {
            for s in &node_sites {
                let Some(g) = s.global(SolutionVariable::Potential) else {
                    continue;
                };
                let d = match s.kind() {
                    RegionKind::Metal | RegionKind::Electrode => {
                        heat_transfer_jacobian(bc, s, jac);
                        Self::conduction(s, lx).1
                    }
                    RegionKind::Insulator => displacement_current(s, lx, cx.step).1,
                    _ => continue,
                };
                jac.add_value(g, g, 1.0);
                if let Some(dof) = dof {
                    jac.add_value(g, dof, -1.0);
                }
                partials.extend(d.into_iter().map(|(col, v)| (col, v * bc.z_width)));
            }
        }
        electrode_jacobian(bc, cx, jac, &partials);
    }

    fn update_solution(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64]) {
        electrode_update(bc, cx, lx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_current_follows_ohms_law() {
        let al = ConductorMaterial::aluminium();
        let j: f64 = edge_current(&al, 1e-3, 0.0, 300.0, 300.0, 1e-4, 2.0);
        assert!((j - al.conductivity * 10.0 * 2.0).abs() < 1e-6 * j);
    }
}
