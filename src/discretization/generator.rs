//! One-dimensional layered devices. Layers are stacked along x; adjacent
//! layers share their interface node, which each region keeps its own
//! copy of and a boundary condition binds back together.

use std::collections::HashMap;

use glam::DVec3;
use serde::Deserialize;
use tracing::debug;

use super::mesh::{FvmNode, Neighbor};
use crate::bc::{
    BoundaryCondition, BoundaryNode, BoundaryPhysics, BoundaryState, CircuitSpec, ExternalCircuit, GateContact,
    HeatTransfer, InterConnectHub, InterConnectLink, InterfaceCoupling, OhmicContact, RegionNodeRef, SolderPad,
};
use crate::error::{Result, SimError};
use crate::parallel::block_owner;
use crate::physics::{AdvancedModel, Material, RegionKind};
use crate::region::Region;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub kind: RegionKind,
    pub material: String,
    /// cm
    pub thickness: f64,
    /// Mesh points including both ends.
    #[serde(default = "default_points")]
    pub points: usize,
    /// cm^-3
    #[serde(default)]
    pub donor_density: f64,
    #[serde(default)]
    pub acceptor_density: f64,
    /// Abrupt change of doping at a depth into the layer.
    #[serde(default)]
    pub junction: Option<JunctionSpec>,
}

fn default_points() -> usize {
    11
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct JunctionSpec {
    /// Distance from the start of the layer, cm.
    pub depth: f64,
    #[serde(default)]
    pub donor_density: f64,
    #[serde(default)]
    pub acceptor_density: f64,
}

impl LayerSpec {
    fn net_doping(&self, depth: f64) -> f64 {
        match self.junction {
            Some(j) if depth >= j.depth => j.donor_density - j.acceptor_density,
            _ => self.donor_density - self.acceptor_density,
        }
    }
}

/// Where a boundary sits in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    #[default]
    Left,
    Right,
    /// Between layer `i` and `i + 1`.
    Interface(usize),
    /// No nodes, as for an inter-connect hub.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryKind {
    Gate,
    SolderPad,
    Ohmic,
    Interface,
    HeatTransfer,
    InterConnect,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoundarySpec {
    pub label: String,
    pub kind: BoundaryKind,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub circuit: CircuitSpec,
    /// Gate work function, V.
    #[serde(default)]
    pub workfunction: f64,
    /// W/(cm^2 K)
    #[serde(default)]
    pub heat_transfer: f64,
    /// Label of the hub this electrode is tied to through its circuit
    /// resistance.
    #[serde(default)]
    pub inter_connect: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceSpec {
    /// Ambient temperature, K.
    pub t_external: f64,
    /// Cross-section of the 1-D stack, cm^2.
    pub area: f64,
    pub model: AdvancedModel,
    pub layers: Vec<LayerSpec>,
    pub boundaries: Vec<BoundarySpec>,
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self {
            t_external: 300.0,
            area: 1e-8,
            model: AdvancedModel::default(),
            layers: Vec::new(),
            boundaries: Vec::new(),
        }
    }
}

/// Regions and boundaries of a generated device, identical on every rank
/// apart from node ownership being relative to `size`.
#[derive(Debug)]
pub struct Device {
    pub regions: Vec<Region>,
    pub bcs: Vec<BoundaryCondition>,
}

/// Geometric node ids of one layer, first to last.
fn layer_roots(layers: &[LayerSpec]) -> Vec<Vec<usize>> {
    let mut next = 0;
    layers
        .iter()
        .map(|l| {
            let roots: Vec<usize> = (next..next + l.points).collect();
            next += l.points - 1;
            roots
        })
        .collect()
}

fn layer_nodes(layer: &LayerSpec, roots: &[usize], x0: f64, area: f64, owner: impl Fn(usize) -> usize) -> Vec<FvmNode> {
    let m = roots.len();
    let h = layer.thickness / (m - 1) as f64;
    roots
        .iter()
        .enumerate()
        .map(|(j, &root)| {
            let end = j == 0 || j + 1 == m;
            let volume = if end { 0.5 * h * area } else { h * area };
            let mut node = FvmNode::new(root, DVec3::new(x0 + j as f64 * h, 0.0, 0.0), volume);
            node.owner = owner(root);
            if j > 0 {
                node.neighbors.push(Neighbor {
                    node: j - 1,
                    distance: h,
                    cv_area: area,
                });
            }
            if j + 1 < m {
                node.neighbors.push(Neighbor {
                    node: j + 1,
                    distance: h,
                    cv_area: area,
                });
            }
            node
        })
        .collect()
}

impl DeviceSpec {
    fn check(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(SimError::InvalidDevice("device has no layers".into()));
        }
        if !(self.area > 0.0) || !(self.t_external > 0.0) {
            return Err(SimError::InvalidDevice("area and temperature must be positive".into()));
        }
        for l in &self.layers {
            if l.points < 2 || !(l.thickness > 0.0) {
                return Err(SimError::InvalidDevice(format!(
                    "layer `{}` needs a positive thickness and at least two points",
                    l.name
                )));
            }
        }
        for pair in self.layers.windows(2) {
            if pair[0].kind == RegionKind::Semiconductor && pair[1].kind == RegionKind::Semiconductor {
                return Err(SimError::InvalidDevice(format!(
                    "semiconductor layers `{}` and `{}` touch; use one layer with a junction",
                    pair[0].name, pair[1].name
                )));
            }
        }
        Ok(())
    }

    /// Build the regions and boundaries for a run over `size` ranks. Every
    /// interface without an explicit boundary gets an interface coupling.
    pub fn build(&self, size: usize) -> Result<Device> {
        self.check()?;
        let roots = layer_roots(&self.layers);
        let n_roots = roots.last().and_then(|r| r.last()).map_or(0, |r| r + 1);
        let owner = |root: usize| block_owner(n_roots, size, root);

        let mut regions = Vec::with_capacity(self.layers.len());
        let mut x0 = 0.0;
        for (layer, roots) in self.layers.iter().zip(&roots) {
            let material = Material::lookup(&layer.material)?;
            let nodes = layer_nodes(layer, roots, x0, self.area, owner);
            let start = x0;
            regions.push(Region::new(
                layer.name.clone(),
                layer.kind,
                material,
                nodes,
                &self.model,
                self.t_external,
                |n: &FvmNode| layer.net_doping(n.position.x - start),
            )?);
            x0 += layer.thickness;
        }
        mark_exterior(&mut regions, self.area);

        let mut specs: Vec<BoundarySpec> = self.boundaries.clone();
        for i in 0..self.layers.len() - 1 {
            if !specs.iter().any(|b| b.location == Location::Interface(i)) {
                specs.push(BoundarySpec {
                    label: format!("{}_{}", self.layers[i].name, self.layers[i + 1].name),
                    kind: BoundaryKind::Interface,
                    location: Location::Interface(i),
                    circuit: CircuitSpec::default(),
                    workfunction: 0.0,
                    heat_transfer: 0.0,
                    inter_connect: None,
                });
            }
        }

        let index: HashMap<&str, usize> = specs.iter().enumerate().map(|(i, b)| (b.label.as_str(), i)).collect();
        let mut bcs = Vec::with_capacity(specs.len());
        for spec in &specs {
            let nodes = self.boundary_nodes(spec.location, &regions, &roots, owner)?;
            let mut state = BoundaryState::new(spec.label.clone(), nodes);
            state.t_external = self.t_external;
            state.heat_transfer = spec.heat_transfer;
            let physics = match spec.kind {
                BoundaryKind::Gate => BoundaryPhysics::Gate(GateContact::new(spec.workfunction)),
                BoundaryKind::SolderPad => BoundaryPhysics::SolderPad(SolderPad),
                BoundaryKind::Ohmic => BoundaryPhysics::Ohmic(OhmicContact),
                BoundaryKind::Interface => BoundaryPhysics::Interface(InterfaceCoupling),
                BoundaryKind::HeatTransfer => BoundaryPhysics::HeatTransfer(HeatTransfer),
                BoundaryKind::InterConnect => BoundaryPhysics::Hub(InterConnectHub::default()),
            };
            let circuit = spec.circuit.build();
            if let Some(hub) = &spec.inter_connect {
                let hub = *index.get(hub.as_str()).ok_or_else(|| SimError::UnknownBoundary(hub.clone()))?;
                state.inter_connect = Some(InterConnectLink {
                    hub,
                    resistance: circuit.inter_connect_resistance(),
                    hub_dof: None,
                });
            }
            if matches!(
                spec.kind,
                BoundaryKind::Gate | BoundaryKind::SolderPad | BoundaryKind::Ohmic | BoundaryKind::InterConnect
            ) {
                state.circuit = Some(circuit);
            }
            bcs.push(BoundaryCondition::new(state, physics));
        }
        debug!(regions = regions.len(), boundaries = bcs.len(), nodes = n_roots, "device generated");
        Ok(Device { regions, bcs })
    }

    fn boundary_nodes(
        &self,
        location: Location,
        regions: &[Region],
        roots: &[Vec<usize>],
        owner: impl Fn(usize) -> usize,
    ) -> Result<Vec<BoundaryNode>> {
        let last = self.layers.len() - 1;
        let root = match location {
            Location::Detached => return Ok(Vec::new()),
            Location::Left => roots[0][0],
            Location::Right => *roots[last].last().unwrap_or(&0),
            Location::Interface(i) if i < last => *roots[i].last().unwrap_or(&0),
            Location::Interface(i) => {
                return Err(SimError::InvalidDevice(format!("no interface {i} in a stack of {} layers", last + 1)));
            }
        };
        let mut region_nodes: Vec<RegionNodeRef> = regions
            .iter()
            .enumerate()
            .flat_map(|(r, region)| {
                region
                    .state
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(move |(_, n)| n.root == root)
                    .map(move |(node, _)| RegionNodeRef { region: r, node })
            })
            .collect();
        region_nodes.sort_by_key(|rn| regions[rn.region].kind().priority());
        Ok(vec![BoundaryNode {
            root,
            owner: owner(root),
            region_nodes,
        }])
    }
}

/// Stack ends and nodes facing vacuum lie on the exterior surface.
fn mark_exterior(regions: &mut [Region], area: f64) {
    let n = regions.len();
    let vacuum: Vec<bool> = regions.iter().map(|r| r.kind() == RegionKind::Vacuum).collect();
    for (i, region) in regions.iter_mut().enumerate() {
        let m = region.state.nodes.len();
        let left_open = i == 0 || vacuum[i - 1];
        let right_open = i + 1 == n || vacuum[i + 1];
        for (j, open) in [(0, left_open), (m - 1, right_open)] {
            if open {
                let node = &mut region.state.nodes[j];
                node.on_boundary = true;
                node.boundary_area = area;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, kind: RegionKind, material: &str, points: usize) -> LayerSpec {
        LayerSpec {
            name: name.into(),
            kind,
            material: material.into(),
            thickness: 1e-4,
            points,
            donor_density: 1e16,
            acceptor_density: 0.0,
            junction: None,
        }
    }

    fn mos() -> DeviceSpec {
        DeviceSpec {
            layers: vec![
                layer("gate", RegionKind::Electrode, "elec", 3),
                layer("oxide", RegionKind::Insulator, "sio2", 4),
                layer("bulk", RegionKind::Semiconductor, "si", 6),
            ],
            boundaries: vec![
                BoundarySpec {
                    label: "gate".into(),
                    kind: BoundaryKind::Gate,
                    location: Location::Interface(0),
                    circuit: CircuitSpec::default(),
                    workfunction: 4.1,
                    heat_transfer: 0.0,
                    inter_connect: None,
                },
                BoundarySpec {
                    label: "substrate".into(),
                    kind: BoundaryKind::Ohmic,
                    location: Location::Right,
                    circuit: CircuitSpec::default(),
                    workfunction: 0.0,
                    heat_transfer: 0.0,
                    inter_connect: None,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn interface_nodes_are_shared_and_ordered_by_priority() {
        let device = mos().build(1).unwrap();
        assert_eq!(device.regions.len(), 3);
        assert_eq!(device.bcs.len(), 3);
        let gate = &device.bcs[0];
        assert_eq!(gate.state.nodes[0].root, 2);
        let kinds: Vec<RegionKind> = gate.state.nodes[0]
            .region_nodes
            .iter()
            .map(|rn| device.regions[rn.region].kind())
            .collect();
        assert_eq!(kinds, vec![RegionKind::Insulator, RegionKind::Electrode]);
        // the oxide/bulk interface gets an implicit coupling
        assert_eq!(device.bcs[2].label(), "oxide_bulk");
        assert_eq!(device.bcs[2].state.nodes[0].root, 5);
    }

    #[test]
    fn control_volumes_sum_to_the_layer_volume() {
        let spec = mos();
        let device = spec.build(1).unwrap();
        for (region, l) in device.regions.iter().zip(&spec.layers) {
            let v: f64 = region.state.nodes.iter().map(|n| n.volume).sum();
            assert!((v - l.thickness * spec.area).abs() < 1e-12 * v);
        }
        assert!(device.regions[0].state.nodes[0].on_boundary);
        assert!(!device.regions[1].state.nodes[0].on_boundary);
    }

    #[test]
    fn ownership_follows_geometric_blocks() {
        // 11 geometric nodes over 2 ranks: 0..6 and 6..11
        let device = mos().build(2).unwrap();
        let bulk = &device.regions[2].state.nodes;
        assert_eq!(bulk[0].root, 5);
        assert_eq!(bulk[0].owner, 0);
        assert_eq!(bulk[1].owner, 1);
        let oxide = &device.regions[1].state.nodes;
        assert_eq!(oxide.last().map(|n| n.owner), Some(bulk[0].owner));
    }

    #[test]
    fn touching_semiconductors_and_bad_hubs_are_rejected() {
        let mut spec = mos();
        spec.layers[1].kind = RegionKind::Semiconductor;
        spec.layers[1].material = "si".into();
        assert!(spec.build(1).is_err());

        let mut spec = mos();
        spec.boundaries[1].inter_connect = Some("nowhere".into());
        assert!(matches!(spec.build(1), Err(SimError::UnknownBoundary(_))));
    }

    #[test]
    fn junction_switches_the_doping() {
        let l = LayerSpec {
            junction: Some(JunctionSpec {
                depth: 0.5e-4,
                donor_density: 0.0,
                acceptor_density: 1e17,
            }),
            ..layer("diode", RegionKind::Semiconductor, "si", 5)
        };
        assert_eq!(l.net_doping(0.0), 1e16);
        assert_eq!(l.net_doping(0.75e-4), -1e17);
    }
}
