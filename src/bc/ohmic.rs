use nalgebra::{Dyn, U1};
use num_dual::{Derivative, DualDVec64, DualNum};
use num_traits::Zero;

use super::{
    BcContext, BoundaryEquations, BoundaryState, Site, electrode_fill_value, electrode_function, electrode_jacobian,
    electrode_update, follower_function, follower_jacobian, follower_preprocess, heat_transfer_function,
    heat_transfer_jacobian,
};
use crate::assembly::{InsertMode, ParMatrix, ParVector, RowDirectives, switch_mode};
use crate::physics::{KB_OVER_Q, NodeData, RegionKind, SolutionVariable};
use crate::region::fvm::{self, EdgeCtx};
use crate::region::{RegionPhysics, SemiconductorPhysics};

/// Ohmic contact on a semiconductor. Contact nodes sit at charge-neutral
/// equilibrium shifted by the electrode potential; the carrier current
/// through their edges feeds the electrode equation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OhmicContact;

/// `(row offset, residual)` of every equation the contact replaces.
fn equilibrium_rows<T: DualNum<f64>>(phys: &SemiconductorPhysics, data: &NodeData, u: &[T], ve: T) -> Vec<(usize, T)> {
    let layout = phys.layout();
    let t = match layout.offset(SolutionVariable::Temperature) {
        Some(k) => u[k].clone(),
        None => T::from(data.t),
    };
    let ni = phys.material.ni(t.clone());
    let vt = t.clone() * KB_OVER_Q;
    let half = 0.5 * data.net_doping;
    let root = (ni.clone() * ni.clone() + half * half).sqrt();
    let (n, p) = if data.net_doping >= 0.0 {
        let n = root + half;
        (n.clone(), ni.clone() * ni.clone() / n)
    } else {
        let p = root - half;
        (ni.clone() * ni.clone() / p.clone(), p)
    };
    let psi = ve + vt * (ni.recip() * half).asinh();

    let mut rows = vec![(0, u[0].clone() - psi), (1, u[1].clone() - n), (2, u[2].clone() - p)];
    if let Some(k) = layout.offset(SolutionVariable::ElectronTemperature) {
        rows.push((k, u[k].clone() - u[1].clone() * t.clone()));
    }
    if let Some(k) = layout.offset(SolutionVariable::HoleTemperature) {
        rows.push((k, u[k].clone() - u[2].clone() * t));
    }
    rows
}

fn replaced_offsets(phys: &SemiconductorPhysics) -> Vec<usize> {
    let layout = phys.layout();
    let mut offsets = vec![0, 1, 2];
    offsets.extend(layout.offset(SolutionVariable::ElectronTemperature));
    offsets.extend(layout.offset(SolutionVariable::HoleTemperature));
    offsets
}

struct ContactSite<'a> {
    semi: Site<'a>,
    phys: &'a SemiconductorPhysics,
    followers: Vec<Site<'a>>,
}

fn sites<'a>(cx: &BcContext<'a>, bc: &BoundaryState, rank: usize) -> Vec<ContactSite<'a>> {
    bc.owned_nodes(rank)
        .filter_map(|bn| {
            let all: Vec<Site> = bn.region_nodes.iter().map(|rn| Site::resolve(cx.regions, rn)).collect();
            let semi = all.iter().find(|s| s.kind() == RegionKind::Semiconductor).copied()?;
            let RegionPhysics::Semiconductor(phys) = &semi.region.physics else {
                return None;
            };
            let followers = all.into_iter().filter(|s| s.kind().is_conductor()).collect();
            Some(ContactSite { semi, phys, followers })
        })
        .collect()
}

/// Total carrier current from the contact node into the device through
/// each of its edges, seeded over both ends.
fn contact_current(site: &ContactSite, lx: &[f64], t_external: f64) -> (f64, Vec<(usize, f64)>) {
    let state = &site.semi.region.state;
    let m = state.layout.n_vars();
    let ui = site.semi.values(lx);
    let mut current = 0.0;
    let mut partials = Vec::new();
    for nb in &site.semi.node.neighbors {
        let uj = state.node_values(lx, nb.node);
        let ectx = EdgeCtx {
            distance: nb.distance,
            ui: &ui,
            uj: &uj,
            di: site.semi.data,
            dj: &state.data[nb.node],
            t_external,
        };
        let di = fvm::seed(&ui, 2 * m, 0);
        let dj = fvm::seed(&uj, 2 * m, m);
        let c = site.phys.edge_currents(&di, &dj, &ectx);
        let i = (c.jn + c.jp) * nb.cv_area;
        current += i.re;
        let d = fvm::partials(&i, 2 * m);
        let col_j = state.nodes[nb.node].global_offset;
        for k in 0..m {
            partials.push((site.semi.node.global_offset + k, d[k]));
            partials.push((col_j + k, d[m + k]));
        }
    }
    (current, partials)
}

impl BoundaryEquations for OhmicContact {
    fn fill_value(&self, bc: &BoundaryState, cx: &BcContext, x: &mut ParVector, l: &mut ParVector) {
        for s in sites(cx, bc, cx.exec.rank) {
            for k in replaced_offsets(s.phys) {
                l.insert_value(s.semi.node.global_offset + k, 1.0);
            }
        }
        electrode_fill_value(bc, cx, x, l);
    }

    fn function_preprocess(&self, bc: &BoundaryState, cx: &BcContext, _lx: &[f64]) -> RowDirectives {
        let mut d = RowDirectives::new();
        for s in sites(cx, bc, cx.exec.rank) {
            for k in replaced_offsets(s.phys) {
                d.clear_row(s.semi.node.global_offset + k);
            }
            for f in &s.followers {
                follower_preprocess(&s.semi, f, &mut d);
            }
        }
        d
    }

    fn function(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, f, cx.exec);
        let ve = bc.dof.and_then(|d| d.local_offset).map_or(0.0, |o| lx[o]);
        let mut current = 0.0;
        for s in sites(cx, bc, cx.exec.rank) {
            let u = s.semi.values(lx);
            let row = s.semi.node.global_offset;
            for (k, r) in equilibrium_rows(s.phys, s.semi.data, &u, ve) {
                f.add_value(row + k, r);
            }
            heat_transfer_function(bc, &s.semi, lx, f);
            current += contact_current(&s, lx, cx.step.t_external).0;
            for fl in &s.followers {
                follower_function(&s.semi, fl, lx, f);
            }
        }
        electrode_function(bc, cx, lx, f, current * bc.z_width);
    }

    fn jacobian(&self, bc: &BoundaryState, cx: &BcContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, jac, cx.exec);
        let ve = bc.dof.and_then(|d| d.local_offset).map_or(0.0, |o| lx[o]);
        let mut partials = Vec::new();
        for s in sites(cx, bc, cx.exec.rank) {
            let m = s.semi.region.state.layout.n_vars();
            let row = s.semi.node.global_offset;
            // node unknowns plus the electrode potential
            let u = fvm::seed(&s.semi.values(lx), m + 1, 0);
            let dve = DualDVec64::new(ve, Derivative::derivative_generic(Dyn(m + 1), U1, m));
            for (k, r) in equilibrium_rows(s.phys, s.semi.data, &u, dve) {
                let d = r.eps.unwrap_generic(Dyn(m + 1), U1);
                for j in 0..m {
                    if !d[(j, 0)].is_zero() {
                        jac.add_value(row + k, row + j, d[(j, 0)]);
                    }
                }
                if let Some(dof) = bc.dof {
                    jac.add_value(row + k, dof.global_offset, d[(m, 0)]);
                }
            }
            heat_transfer_jacobian(bc, &s.semi, jac);
            let (_, d) = contact_current(&s, lx, cx.step.t_external);
            partials.extend(d.into_iter().map(|(col, v)| (col, v * bc.z_width)));
            for fl in &s.followers {
                follower_jacobian(&s.semi, fl, jac);
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
    use crate::physics::{AdvancedModel, SemiconductorMaterial, VariableLayout};
    use crate::region::semiconductor_equilibrium;
    use approx::assert_relative_eq;

    #[test]
    fn equilibrium_node_has_zero_residual_at_zero_bias() {
        let m = SemiconductorMaterial::silicon();
        let phys = SemiconductorPhysics::new(m.clone(), VariableLayout::semiconductor(&AdvancedModel::default()));
        let data = semiconductor_equilibrium(&m, 1e17, 300.0);
        let u = [data.psi, data.n, data.p];
        for (k, r) in equilibrium_rows(&phys, &data, &u, 0.0) {
            assert!(r.abs() <= 1e-12 * u[k].abs().max(1.0), "row {k}: {r}");
        }
        // a bias shifts only the potential
        let rows = equilibrium_rows(&phys, &data, &u, 0.5);
        assert_relative_eq!(rows[0].1, -0.5, epsilon = 1e-12);
        assert!(rows[1].1.abs() <= 1e-12 * data.n);
    }
}
