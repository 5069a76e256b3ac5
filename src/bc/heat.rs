use super::{BcContext, BoundaryEquations, BoundaryState, Site, heat_transfer_function, heat_transfer_jacobian};
use crate::assembly::{InsertMode, ParMatrix, ParVector, switch_mode};

/// Exterior surface exchanging heat with the ambient:
/// `h (T_ext - T) S` on every lattice temperature row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatTransfer;

impl BoundaryEquations for HeatTransfer {
    fn function(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, f, cx.exec);
        for bn in bc.owned_nodes(cx.exec.rank) {
            for rn in &bn.region_nodes {
                heat_transfer_function(bc, &Site::resolve(cx.regions, rn), lx, f);
            }
        }
    }

    fn jacobian(&self, bc: &BoundaryState, cx: &BcContext, _lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, jac, cx.exec);
        for bn in bc.owned_nodes(cx.exec.rank) {
            for rn in &bn.region_nodes {
                heat_transfer_jacobian(bc, &Site::resolve(cx.regions, rn), jac);
            }
        }
    }
}
