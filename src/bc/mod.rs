//! Boundary conditions: per-label equations that override, merge or
//! extend the region rows of the nodes they own, plus the electrode
//! unknowns coupling contacts to their external circuits.
//!
//! A boundary contributes in two stages. Its preprocess step returns
//! [`RowDirectives`] that the assembly layer applies to the accumulated
//! region rows; its `function`/`jacobian` then add the boundary's own
//! equations into the rows it cleared.

pub mod circuit;
pub mod gate;
pub mod heat;
pub mod hub;
pub mod interface;
pub mod ohmic;
pub mod solderpad;

use crate::assembly::{InsertMode, ParMatrix, ParVector, RowDirectives};
use crate::discretization::mesh::FvmNode;
use crate::numerics::StepContext;
use crate::parallel::ExecutionContext;
use crate::physics::{NodeData, RegionKind, SolutionVariable};
use crate::region::Region;

pub use circuit::{CircuitSpec, CurrentSource, ExternalCircuit, VoltageSource};
pub use gate::GateContact;
pub use heat::HeatTransfer;
pub use hub::{HubMember, InterConnectHub};
pub use interface::InterfaceCoupling;
pub use ohmic::OhmicContact;
pub use solderpad::SolderPad;

/// One region's copy of a boundary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionNodeRef {
    pub region: usize,
    pub node: usize,
}

/// A geometric node on the boundary with every region node bound to it,
/// ordered by [`RegionKind::priority`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryNode {
    pub root: usize,
    pub owner: usize,
    pub region_nodes: Vec<RegionNodeRef>,
}

/// Offsets of an electrode or hub potential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectrodeDof {
    pub global_offset: usize,
    pub local_offset: Option<usize>,
}

/// Tie from an electrode to the hub that drives it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterConnectLink {
    /// Index of the hub boundary.
    pub hub: usize,
    pub resistance: f64,
    pub hub_dof: Option<ElectrodeDof>,
}

#[derive(Debug)]
pub struct BoundaryState {
    pub label: String,
    pub nodes: Vec<BoundaryNode>,
    /// Device extent perpendicular to the simulated cross-section.
    pub z_width: f64,
    /// Ambient temperature seen by the heat transfer term, K.
    pub t_external: f64,
    /// Surface heat transfer coefficient, W/(cm^2 K).
    pub heat_transfer: f64,
    pub circuit: Option<Box<dyn ExternalCircuit>>,
    pub inter_connect: Option<InterConnectLink>,
    pub dof: Option<ElectrodeDof>,
    /// This rank's share of the electrode current from the last residual.
    pub current_local: f64,
}

impl BoundaryState {
    pub fn new(label: impl Into<String>, nodes: Vec<BoundaryNode>) -> Self {
        Self {
            label: label.into(),
            nodes,
            z_width: 1.0,
            t_external: 300.0,
            heat_transfer: 0.0,
            circuit: None,
            inter_connect: None,
            dof: None,
            current_local: 0.0,
        }
    }

    pub fn owned_nodes(&self, rank: usize) -> impl Iterator<Item = &BoundaryNode> + '_ {
        self.nodes.iter().filter(move |n| n.owner == rank)
    }

    /// Scale applied to the device current in the electrode row.
    pub fn current_scale(&self, dt: f64) -> f64 {
        match (&self.inter_connect, &self.circuit) {
            (Some(link), _) => link.resistance,
            (None, Some(c)) => c.mna_scaling(dt),
            (None, None) => 1.0,
        }
    }
}

/// What a boundary call needs besides its own state.
#[derive(Clone, Copy)]
pub struct BcContext<'a> {
    pub exec: &'a ExecutionContext,
    pub step: &'a StepContext,
    pub regions: &'a [Region],
}

/// One region node resolved against the region list.
#[derive(Clone, Copy)]
pub struct Site<'a> {
    pub region: &'a Region,
    pub index: usize,
    pub node: &'a FvmNode,
    pub data: &'a NodeData,
}

impl<'a> Site<'a> {
    pub fn resolve(regions: &'a [Region], rn: &RegionNodeRef) -> Self {
        let region = &regions[rn.region];
        Self {
            region,
            index: rn.node,
            node: &region.state.nodes[rn.node],
            data: &region.state.data[rn.node],
        }
    }

    pub fn kind(&self) -> RegionKind {
        self.region.kind()
    }

    pub fn has_unknowns(&self) -> bool {
        self.region.state.layout.n_vars() > 0
    }

    pub fn global(&self, var: SolutionVariable) -> Option<usize> {
        self.region.state.layout.offset(var).map(|k| self.node.global_offset + k)
    }

    pub fn values(&self, lx: &[f64]) -> Vec<f64> {
        self.region.state.node_values(lx, self.index)
    }

    /// Value of `var` out of the local array, or the node data when the
    /// variable is not solved in this region.
    pub fn value(&self, lx: &[f64], var: SolutionVariable) -> f64 {
        match (self.region.state.layout.offset(var), self.node.local_offset) {
            (Some(k), Some(o)) => lx[o + k],
            _ => self.data.value(var),
        }
    }
}

pub trait BoundaryEquations {
    /// Write electrode potentials into `x` and their row scaling into `l`.
    fn fill_value(&self, _bc: &BoundaryState, _cx: &BcContext, _x: &mut ParVector, _l: &mut ParVector) {}

    /// Rows to merge and clear before the boundary adds its own residual.
    fn function_preprocess(&self, _bc: &BoundaryState, _cx: &BcContext, _lx: &[f64]) -> RowDirectives {
        RowDirectives::new()
    }

    fn function(
        &self,
        _bc: &mut BoundaryState,
        _cx: &BcContext,
        _lx: &[f64],
        _f: &mut ParVector,
        _mode: &mut InsertMode,
    ) {
    }

    fn jacobian_preprocess(&self, bc: &BoundaryState, cx: &BcContext, lx: &[f64]) -> RowDirectives {
        self.function_preprocess(bc, cx, lx)
    }

    fn jacobian(&self, _bc: &BoundaryState, _cx: &BcContext, _lx: &[f64], _jac: &mut ParMatrix, _mode: &mut InsertMode) {}

    /// Collective for electrodes: the current is summed across ranks.
    fn update_solution(&self, _bc: &mut BoundaryState, _cx: &BcContext, _lx: &[f64]) {}
}

#[derive(Debug, Clone)]
pub enum BoundaryPhysics {
    Gate(GateContact),
    SolderPad(SolderPad),
    Ohmic(OhmicContact),
    Interface(InterfaceCoupling),
    HeatTransfer(HeatTransfer),
    Hub(InterConnectHub),
}

impl BoundaryPhysics {
    pub fn equations(&self) -> &dyn BoundaryEquations {
        match self {
            BoundaryPhysics::Gate(p) => p,
            BoundaryPhysics::SolderPad(p) => p,
            BoundaryPhysics::Ohmic(p) => p,
            BoundaryPhysics::Interface(p) => p,
            BoundaryPhysics::HeatTransfer(p) => p,
            BoundaryPhysics::Hub(p) => p,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BoundaryPhysics::Gate(_) => "gate",
            BoundaryPhysics::SolderPad(_) => "solderpad",
            BoundaryPhysics::Ohmic(_) => "ohmic",
            BoundaryPhysics::Interface(_) => "interface",
            BoundaryPhysics::HeatTransfer(_) => "heat_transfer",
            BoundaryPhysics::Hub(_) => "inter_connect",
        }
    }
}

#[derive(Debug)]
pub struct BoundaryCondition {
    pub state: BoundaryState,
    pub physics: BoundaryPhysics,
}

impl BoundaryCondition {
    pub fn new(state: BoundaryState, physics: BoundaryPhysics) -> Self {
        Self { state, physics }
    }

    pub fn label(&self) -> &str {
        &self.state.label
    }

    pub fn is_electrode(&self) -> bool {
        matches!(
            self.physics,
            BoundaryPhysics::Gate(_) | BoundaryPhysics::SolderPad(_) | BoundaryPhysics::Ohmic(_)
        )
    }

    /// Electrodes and hubs carry one extra unknown.
    pub fn has_electrode_dof(&self) -> bool {
        self.is_electrode() || matches!(self.physics, BoundaryPhysics::Hub(_))
    }

    pub fn circuit(&self) -> Option<&dyn ExternalCircuit> {
        self.state.circuit.as_deref()
    }

    pub fn circuit_mut(&mut self) -> Option<&mut Box<dyn ExternalCircuit>> {
        self.state.circuit.as_mut()
    }

    pub fn potential(&self) -> Option<f64> {
        self.circuit().map(|c| c.potential())
    }

    pub fn current(&self) -> Option<f64> {
        self.circuit().map(|c| c.current())
    }

    pub fn fill_value(&self, cx: &BcContext, x: &mut ParVector, l: &mut ParVector) {
        self.physics.equations().fill_value(&self.state, cx, x, l);
    }

    pub fn function_preprocess(&self, cx: &BcContext, lx: &[f64]) -> RowDirectives {
        self.physics.equations().function_preprocess(&self.state, cx, lx)
    }

    pub fn function(&mut self, cx: &BcContext, lx: &[f64], f: &mut ParVector, mode: &mut InsertMode) {
        let Self { state, physics } = self;
        physics.equations().function(state, cx, lx, f, mode);
    }

    pub fn jacobian_preprocess(&self, cx: &BcContext, lx: &[f64]) -> RowDirectives {
        self.physics.equations().jacobian_preprocess(&self.state, cx, lx)
    }

    pub fn jacobian(&self, cx: &BcContext, lx: &[f64], jac: &mut ParMatrix, mode: &mut InsertMode) {
        self.physics.equations().jacobian(&self.state, cx, lx, jac, mode);
    }

    pub fn update_solution(&mut self, cx: &BcContext, lx: &[f64]) {
        let Self { state, physics } = self;
        physics.equations().update_solution(state, cx, lx);
    }
}

/// Hand every inter-connected electrode its hub's offsets and every hub
/// the offsets and resistances of its members. Runs after DOF numbering.
pub fn link_inter_connects(bcs: &mut [BoundaryCondition]) {
    let dofs: Vec<Option<ElectrodeDof>> = bcs.iter().map(|b| b.state.dof).collect();
    let mut members: Vec<(usize, HubMember)> = Vec::new();
    for bc in bcs.iter_mut() {
        if let Some(link) = bc.state.inter_connect.as_mut() {
            link.hub_dof = dofs.get(link.hub).copied().flatten();
            if let Some(dof) = bc.state.dof {
                members.push((
                    link.hub,
                    HubMember {
                        dof,
                        resistance: link.resistance,
                    },
                ));
            }
        }
    }
    for (i, bc) in bcs.iter_mut().enumerate() {
        if let BoundaryPhysics::Hub(hub) = &mut bc.physics {
            hub.members = members.iter().filter(|(h, _)| *h == i).map(|(_, m)| *m).collect();
        }
    }
}

// ---------------------------------------------------------------------------
// Electrode row shared by gate, solder pad and ohmic contacts.
// ---------------------------------------------------------------------------

/// Write `Ve` and its row scale; only the last rank owns electrode rows.
pub(crate) fn electrode_fill_value(bc: &BoundaryState, cx: &BcContext, x: &mut ParVector, l: &mut ParVector) {
    let (Some(dof), Some(circuit)) = (bc.dof, bc.circuit.as_deref()) else {
        return;
    };
    if !x.is_owned(dof.global_offset) {
        return;
    }
    x.insert_value(dof.global_offset, circuit.potential());
    let scale = if bc.inter_connect.is_some() {
        1.0
    } else {
        circuit.electrode_scaling(cx.step.dt)
    };
    l.insert_value(dof.global_offset, scale);
}

/// Electrode residual: every rank adds its scaled share of the current,
/// the last rank closes the row with the circuit (or hub) equation.
pub(crate) fn electrode_function(bc: &mut BoundaryState, cx: &BcContext, lx: &[f64], f: &mut ParVector, current: f64) {
    bc.current_local = current;
    let Some(dof) = bc.dof else {
        return;
    };
    let Some(local) = dof.local_offset else {
        return;
    };
    let dt = cx.step.dt;
    let scale = bc.current_scale(dt);
    let ve = lx[local];
    if let Some(circuit) = bc.circuit.as_mut() {
        circuit.set_potential(ve);
    }

    f.add_value(dof.global_offset, scale * current);
    if !cx.exec.is_last_rank() {
        return;
    }
    match (&bc.inter_connect, bc.circuit.as_deref()) {
        (Some(link), _) => {
            let v_hub = link.hub_dof.and_then(|d| d.local_offset).map_or(0.0, |o| lx[o]);
            f.add_value(dof.global_offset, ve - v_hub);
        }
        (None, Some(circuit)) => f.add_value(dof.global_offset, circuit.mna_function(dt)),
        (None, None) => f.add_value(dof.global_offset, ve),
    }
}

/// Electrode Jacobian row. `current_partials` holds `(column, dI/dx)`.
pub(crate) fn electrode_jacobian(bc: &BoundaryState, cx: &BcContext, jac: &mut ParMatrix, current_partials: &[(usize, f64)]) {
    let Some(dof) = bc.dof else {
        return;
    };
    let row = dof.global_offset;
    let dt = cx.step.dt;
    let scale = bc.current_scale(dt);
    if scale != 0.0 {
        for &(col, d) in current_partials {
            if d != 0.0 {
                jac.add_value(row, col, scale * d);
            }
        }
    }
    if !cx.exec.is_last_rank() {
        return;
    }
    match (&bc.inter_connect, bc.circuit.as_deref()) {
        (Some(link), _) => {
            jac.add_value(row, row, 1.0);
            if let Some(hub) = link.hub_dof {
                jac.add_value(row, hub.global_offset, -1.0);
            }
        }
        (None, Some(circuit)) => jac.add_value(row, row, circuit.mna_jacobian(dt)),
        (None, None) => jac.add_value(row, row, 1.0),
    }
}

/// Sum the electrode current across ranks and commit it to the circuit.
pub(crate) fn electrode_update(bc: &mut BoundaryState, cx: &BcContext, lx: &[f64]) {
    let total = cx.exec.sum(bc.current_local);
    let ve = bc.dof.and_then(|d| d.local_offset).map(|o| lx[o]);
    if let Some(circuit) = bc.circuit.as_mut() {
        if let Some(ve) = ve {
            circuit.set_potential(ve);
        }
        circuit.set_current(total);
        circuit.update(cx.step.dt);
    }
}

// ---------------------------------------------------------------------------
// Pieces shared by several boundary kinds.
// ---------------------------------------------------------------------------

/// Displacement current `cv eps dE/dt` leaving an insulator node through
/// its edges, with `(column, partial)` pairs. Zero in steady state.
pub(crate) fn displacement_current(site: &Site, lx: &[f64], step: &StepContext) -> (f64, Vec<(usize, f64)>) {
    if !step.time_dependent {
        return (0.0, Vec::new());
    }
    let (c0, c1, c2, denom) = step.derivative_coefficients();
    let state = &site.region.state;
    let eps = site.data.eps;
    let v = site.value(lx, SolutionVariable::Potential);
    let mut current = 0.0;
    let mut partials = Vec::with_capacity(2 * site.node.neighbors.len());
    for nb in &site.node.neighbors {
        let other = &state.nodes[nb.node];
        let od = &state.data[nb.node];
        let v_nb = match other.local_offset {
            Some(o) => lx[o],
            None => od.psi,
        };
        let drop = c0 * (v - v_nb) + c1 * (site.data.psi - od.psi) + c2 * (site.data.psi_last - od.psi_last);
        let k = nb.cv_area * eps / nb.distance;
        current += k * drop / denom;
        let d = k * c0 / denom;
        partials.push((site.node.global_offset, d));
        partials.push((other.global_offset, -d));
    }
    (current, partials)
}

/// Robin heat loss `h (T_ext - T) S` on an exterior lattice temperature row.
pub(crate) fn heat_transfer_function(bc: &BoundaryState, site: &Site, lx: &[f64], f: &mut ParVector) {
    if bc.heat_transfer == 0.0 || !site.node.on_boundary {
        return;
    }
    if let Some(row) = site.global(SolutionVariable::Temperature) {
        let t = site.value(lx, SolutionVariable::Temperature);
        f.add_value(row, bc.heat_transfer * (bc.t_external - t) * site.node.boundary_area);
    }
}

pub(crate) fn heat_transfer_jacobian(bc: &BoundaryState, site: &Site, jac: &mut ParMatrix) {
    if bc.heat_transfer == 0.0 || !site.node.on_boundary {
        return;
    }
    if let Some(row) = site.global(SolutionVariable::Temperature) {
        jac.add_value(row, row, -bc.heat_transfer * site.node.boundary_area);
    }
}

/// A region node that mirrors `primary`: its potential row is replaced by
/// `V - V_p` and its temperature row is folded into the primary's.
pub(crate) fn follower_preprocess(primary: &Site, follower: &Site, d: &mut RowDirectives) {
    if let Some(g) = follower.global(SolutionVariable::Potential) {
        d.clear_row(g);
    }
    if let (Some(gt), Some(pt)) = (
        follower.global(SolutionVariable::Temperature),
        primary.global(SolutionVariable::Temperature),
    ) {
        d.merge(gt, pt);
        d.clear_row(gt);
    }
}

pub(crate) fn follower_function(primary: &Site, follower: &Site, lx: &[f64], f: &mut ParVector) {
    for var in [SolutionVariable::Potential, SolutionVariable::Temperature] {
        if let (Some(g), Some(_)) = (follower.global(var), primary.global(var)) {
            f.add_value(g, follower.value(lx, var) - primary.value(lx, var));
        }
    }
}

pub(crate) fn follower_jacobian(primary: &Site, follower: &Site, jac: &mut ParMatrix) {
    for var in [SolutionVariable::Potential, SolutionVariable::Temperature] {
        if let (Some(g), Some(p)) = (follower.global(var), primary.global(var)) {
            jac.add_value(g, g, 1.0);
            jac.add_value(g, p, -1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn electrode(label: &str, hub: Option<usize>) -> BoundaryCondition {
        let mut state = BoundaryState::new(label, Vec::new());
        state.circuit = Some(Box::new(VoltageSource::new(0.0, 10.0, 0.0, 0.0)));
        state.inter_connect = hub.map(|hub| InterConnectLink {
            hub,
            resistance: 10.0,
            hub_dof: None,
        });
        BoundaryCondition::new(state, BoundaryPhysics::Gate(GateContact::default()))
    }

    #[test]
    fn hub_collects_its_members() {
        let mut hub_state = BoundaryState::new("hub", Vec::new());
        hub_state.circuit = Some(Box::new(VoltageSource::ideal(1.0)));
        let mut bcs = vec![
            electrode("a", Some(2)),
            electrode("b", None),
            BoundaryCondition::new(hub_state, BoundaryPhysics::Hub(InterConnectHub::default())),
            electrode("c", Some(2)),
        ];
        for (i, bc) in bcs.iter_mut().enumerate() {
            bc.state.dof = Some(ElectrodeDof {
                global_offset: 100 + i,
                local_offset: Some(i),
            });
        }
        link_inter_connects(&mut bcs);
        let BoundaryPhysics::Hub(hub) = &bcs[2].physics else {
            panic!("hub kind changed");
        };
        let offsets: Vec<usize> = hub.members.iter().map(|m| m.dof.global_offset).collect();
        assert_eq!(offsets, vec![100, 103]);
        assert_eq!(bcs[0].state.inter_connect.and_then(|l| l.hub_dof).map(|d| d.global_offset), Some(102));
        assert!(bcs[1].state.inter_connect.is_none());
    }
}
