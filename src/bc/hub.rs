use super::{BcContext, BoundaryEquations, BoundaryState, ElectrodeDof};
use crate::assembly::{InsertMode, ParMatrix, ParVector, switch_mode};

/// An electrode tied to a hub through its series resistance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HubMember {
    pub dof: ElectrodeDof,
    pub resistance: f64,
}

/// Shared circuit node driving a group of inter-connected electrodes.
/// Its row is `mna_scaling I_hub + mna_function` with
/// `I_hub = sum_k (V_hub - Ve_k) / R_k`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterConnectHub {
    pub members: Vec<HubMember>,
}

impl InterConnectHub {
    fn hub_current(&self, v_hub: f64, lx: &[f64]) -> f64 {
        self.members
            .iter()
            .filter_map(|m| m.dof.local_offset.map(|o| (v_hub - lx[o]) / m.resistance))
            .sum()
    }
}

impl BoundaryEquations for InterConnectHub {
    fn fill_value(&self, bc: &BoundaryState, cx: &BcContext, x: &mut ParVector, l: &mut ParVector) {
        let (Some(dof), Some(circuit)) = (bc.dof, bc.circuit.as_deref()) else {
            return;
        };
        if x.is_owned(dof.global_offset) {
            x.insert_value(dof.global_offset, circuit.potential());
            l.insert_value(dof.global_offset, circuit.electrode_scaling(cx.step.dt));
        }
    }

    fn function(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, f, cx.exec);
        let Some(dof) = bc.dof else {
            return;
        };
        let (Some(local), Some(circuit)) = (dof.local_offset, bc.circuit.as_mut()) else {
            return;
        };
        let v_hub = lx[local];
        let current = self.hub_current(v_hub, lx);
        circuit.set_potential(v_hub);
        circuit.set_current(current);
        if cx.exec.is_last_rank() {
            let dt = cx.step.dt;
            f.add_value(dof.global_offset, circuit.mna_scaling(dt) * current + circuit.mna_function(dt));
        }
    }

    fn jacobian(&self, bc: &BoundaryState, cx: &BcContext, _lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        switch_mode(InsertMode::Add, mode, jac, cx.exec);
        let (Some(dof), Some(circuit)) = (bc.dof, bc.circuit.as_deref()) else {
            return;
        };
        if !cx.exec.is_last_rank() {
            return;
        }
        let dt = cx.step.dt;
        let scale = circuit.mna_scaling(dt);
        let row = dof.global_offset;
        let mut diag = circuit.mna_jacobian(dt);
        for m in &self.members {
            diag += scale / m.resistance;
            jac.add_value(row, m.dof.global_offset, -scale / m.resistance);
        }
        jac.add_value(row, row, diag);
    }

    fn update_solution(&self, bc: &mut BoundaryState, cx: &BcContext, lx: &[f64]) {
        let Some(local) = bc.dof.and_then(|d| d.local_offset) else {
            return;
        };
        let v_hub = lx[local];
        let current = self.hub_current(v_hub, lx);
        if let Some(circuit) = bc.circuit.as_mut() {
            circuit.set_potential(v_hub);
            circuit.set_current(current);
            circuit.update(cx.step.dt);
        }
    }
}
