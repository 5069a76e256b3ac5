//! Row-wise finite-volume assembly shared by every region with unknowns.
//!
//! For each owned node i the residual row is
//! `sum_j flux(u_i, u_j) * A_ij + source(u_i) * V_i - dS(u_i)/dt * V_i`.
//! Only owned rows are written, so regions never stash off-processor
//! entries. Jacobian rows come from forward-mode duals seeded over the
//! node (m partials) or the edge pair (2m partials); the active count is
//! passed explicitly to every seed.

use nalgebra::{Dyn, U1};
use num_dual::{Derivative, DualDVec64, DualNum};
use num_traits::Zero;

use super::{EvalContext, RegionState};
use crate::assembly::{InsertMode, ParMatrix, ParVector, switch_mode};
use crate::discretization::mesh::FvmNode;
use crate::physics::{NodeData, SolutionVariable};

/// Everything a node term may look at besides the unknowns.
pub struct NodeCtx<'a> {
    pub node: &'a FvmNode,
    pub data: &'a NodeData,
    /// Real parts of the unknowns.
    pub u: &'a [f64],
    pub t_external: f64,
}

/// Everything an edge flux may look at besides the unknowns.
pub struct EdgeCtx<'a> {
    pub distance: f64,
    pub ui: &'a [f64],
    pub uj: &'a [f64],
    pub di: &'a NodeData,
    pub dj: &'a NodeData,
    pub t_external: f64,
}

pub trait FvmKernel {
    /// Flux density leaving node i towards node j.
    fn edge_flux<T: DualNum<f64>>(&self, f: &mut [T], ui: &[T], uj: &[T], edge: &EdgeCtx);

    /// Volumetric source at a node.
    fn node_source<T: DualNum<f64>>(&self, f: &mut [T], u: &[T], node: &NodeCtx);

    /// Stored density whose time derivative enters the balance.
    fn storage<T: DualNum<f64>>(&self, s: &mut [T], u: &[T], data: &NodeData);

    /// Row scaling factor.
    fn scale(&self, var: SolutionVariable, node: &FvmNode, data: &NodeData) -> f64;
}

/// Seed `values` as duals with `n_active` partials, the first at `start`.
#[inline]
pub fn seed(values: &[f64], n_active: usize, start: usize) -> Vec<DualDVec64> {
    values
        .iter()
        .enumerate()
        .map(|(j, &v)| DualDVec64::new(v, Derivative::derivative_generic(Dyn(n_active), U1, start + j)))
        .collect()
}

/// Partials of a dual over `n_active` seeds; zero when nothing was seeded.
#[inline]
pub fn partials(v: &DualDVec64, n_active: usize) -> Vec<f64> {
    let d = v.eps.clone().unwrap_generic(Dyn(n_active), U1);
    (0..n_active).map(|j| d[(j, 0)]).collect()
}

pub fn fill_value<K: FvmKernel>(kernel: &K, region: &RegionState, cx: &EvalContext, x: &mut ParVector, l: &mut ParVector) {
    for (i, node) in region.owned_nodes(cx.exec.rank) {
        let data = &region.data[i];
        for (k, var) in region.layout.variables().enumerate() {
            x.insert_value(node.global_offset + k, data.value(var));
            l.insert_value(node.global_offset + k, kernel.scale(var, node, data));
        }
    }
}

pub fn function<K: FvmKernel>(
    kernel: &K,
    region: &RegionState,
    cx: &EvalContext,
    lx: &[f64],
    f: &mut ParVector,
    mode: &mut InsertMode,
) {
    switch_mode(InsertMode::Add, mode, f, cx.exec);
    let m = region.layout.n_vars();
    let t_external = cx.step.t_external;
    let mut acc = vec![0.0; m];
    let mut tmp = vec![0.0; m];

    for (i, node) in region.owned_nodes(cx.exec.rank) {
        let ui = region.node_values(lx, i);
        acc.fill(0.0);

        tmp.fill(0.0);
        let nctx = NodeCtx {
            node,
            data: &region.data[i],
            u: &ui,
            t_external,
        };
        kernel.node_source(&mut tmp, &ui, &nctx);
        for (a, t) in acc.iter_mut().zip(&tmp) {
            *a += t * node.volume;
        }

        for nb in &node.neighbors {
            let uj = region.node_values(lx, nb.node);
            let ectx = EdgeCtx {
                distance: nb.distance,
                ui: &ui,
                uj: &uj,
                di: &region.data[i],
                dj: &region.data[nb.node],
                t_external,
            };
            tmp.fill(0.0);
            kernel.edge_flux(&mut tmp, &ui, &uj, &ectx);
            for (a, t) in acc.iter_mut().zip(&tmp) {
                *a += t * nb.cv_area;
            }
        }

        for (k, a) in acc.iter().enumerate() {
            f.add_value(node.global_offset + k, *a);
        }
    }
}

pub fn jacobian<K: FvmKernel>(
    kernel: &K,
    region: &RegionState,
    cx: &EvalContext,
    lx: &[f64],
    jac: &mut ParMatrix,
    mode: &mut InsertMode,
) {
    switch_mode(InsertMode::Add, mode, jac, cx.exec);
    let m = region.layout.n_vars();
    let t_external = cx.step.t_external;

    for (i, node) in region.owned_nodes(cx.exec.rank) {
        let ui = region.node_values(lx, i);
        let row = node.global_offset;

        // (A) node source, m partials
        {
            let u = seed(&ui, m, 0);
            let mut f = vec![DualDVec64::zero(); m];
            let nctx = NodeCtx {
                node,
                data: &region.data[i],
                u: &ui,
                t_external,
            };
            kernel.node_source(&mut f, &u, &nctx);
            for (r, fr) in f.iter().enumerate() {
                for (j, d) in partials(fr, m).into_iter().enumerate() {
                    if d != 0.0 {
                        jac.add_value(row + r, row + j, d * node.volume);
                    }
                }
            }
        }

        // (B) edges, 2m partials: first block is node i, second node j
        for nb in &node.neighbors {
            let uj = region.node_values(lx, nb.node);
            let col_j = region.nodes[nb.node].global_offset;
            let di = seed(&ui, 2 * m, 0);
            let dj = seed(&uj, 2 * m, m);
            let ectx = EdgeCtx {
                distance: nb.distance,
                ui: &ui,
                uj: &uj,
                di: &region.data[i],
                dj: &region.data[nb.node],
                t_external,
            };
            let mut f = vec![DualDVec64::zero(); m];
            kernel.edge_flux(&mut f, &di, &dj, &ectx);
            for (r, fr) in f.iter().enumerate() {
                let d = partials(fr, 2 * m);
                for j in 0..m {
                    if d[j] != 0.0 {
                        jac.add_value(row + r, row + j, d[j] * nb.cv_area);
                    }
                    if d[m + j] != 0.0 {
                        jac.add_value(row + r, col_j + j, d[m + j] * nb.cv_area);
                    }
                }
            }
        }
    }
}

pub fn time_dependent_function<K: FvmKernel>(
    kernel: &K,
    region: &RegionState,
    cx: &EvalContext,
    lx: &[f64],
    f: &mut ParVector,
    mode: &mut InsertMode,
) {
    switch_mode(InsertMode::Add, mode, f, cx.exec);
    let m = region.layout.n_vars();
    let (c0, c1, c2, denom) = cx.step.derivative_coefficients();
    let mut s = vec![0.0; m];
    let mut s_n = vec![0.0; m];
    let mut s_n1 = vec![0.0; m];

    for (i, node) in region.owned_nodes(cx.exec.rank) {
        let data = &region.data[i];
        let u = region.node_values(lx, i);
        let u_n = data.values(&region.layout);
        let u_n1 = data.last_values(&region.layout);
        s.fill(0.0);
        s_n.fill(0.0);
        s_n1.fill(0.0);
        kernel.storage(&mut s, &u, data);
        kernel.storage(&mut s_n, &u_n, data);
        if c2 != 0.0 {
            kernel.storage(&mut s_n1, &u_n1, data);
        }
        for k in 0..m {
            let rate = (c0 * s[k] + c1 * s_n[k] + c2 * s_n1[k]) / denom;
            if rate != 0.0 {
                f.add_value(node.global_offset + k, -rate * node.volume);
            }
        }
    }
}

pub fn time_dependent_jacobian<K: FvmKernel>(
    kernel: &K,
    region: &RegionState,
    cx: &EvalContext,
    lx: &[f64],
    jac: &mut ParMatrix,
    mode: &mut InsertMode,
) {
    switch_mode(InsertMode::Add, mode, jac, cx.exec);
    let m = region.layout.n_vars();
    let (c0, _, _, denom) = cx.step.derivative_coefficients();

    for (i, node) in region.owned_nodes(cx.exec.rank) {
        let ui = region.node_values(lx, i);
        let u = seed(&ui, m, 0);
        let mut s = vec![DualDVec64::zero(); m];
        kernel.storage(&mut s, &u, &region.data[i]);
        let row = node.global_offset;
        for (r, sr) in s.iter().enumerate() {
            for (j, d) in partials(sr, m).into_iter().enumerate() {
                if d != 0.0 {
                    jac.add_value(row + r, row + j, -c0 / denom * d * node.volume);
                }
            }
        }
    }
}

/// Load every node this rank can see (owned and ghost) and refresh the
/// field of owned nodes.
pub fn update_solution(region: &mut RegionState, cx: &EvalContext, lx: &[f64]) {
    let m = region.layout.n_vars();
    if m == 0 {
        return;
    }
    let RegionState { layout, nodes, data, .. } = region;
    for (node, d) in nodes.iter().zip(data.iter_mut()) {
        if let Some(o) = node.local_offset {
            d.load(layout, &lx[o..o + m]);
        }
    }
    let psi: Vec<f64> = data.iter().map(|d| d.psi).collect();
    for (i, node) in nodes.iter().enumerate().filter(|(_, n)| n.owner == cx.exec.rank) {
        let g = node.gradient(|j| psi[j], psi[i], |j| nodes[j].position);
        data[i].e_field = g.length();
    }
}
