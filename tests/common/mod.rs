#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use vfvm_device::bc::CircuitSpec;
use vfvm_device::discretization::generator::{BoundaryKind, BoundarySpec, DeviceSpec, JunctionSpec, LayerSpec, Location};
use vfvm_device::parallel::{ExecutionContext, ThreadComm};
use vfvm_device::physics::RegionKind;
use vfvm_device::solver::{DeviceSolver, SolverSettings};

pub fn contact(label: &str, kind: BoundaryKind, location: Location) -> BoundarySpec {
    BoundarySpec {
        label: label.into(),
        kind,
        location,
        circuit: CircuitSpec::default(),
        workfunction: 0.0,
        heat_transfer: 0.0,
        inter_connect: None,
    }
}

pub fn semiconductor(name: &str, thickness: f64, points: usize, donor: f64, acceptor: f64) -> LayerSpec {
    LayerSpec {
        name: name.into(),
        kind: RegionKind::Semiconductor,
        material: "si".into(),
        thickness,
        points,
        donor_density: donor,
        acceptor_density: acceptor,
        junction: None,
    }
}

/// 1 um n-type bar with ohmic contacts at both ends.
pub fn resistor(points: usize) -> DeviceSpec {
    DeviceSpec {
        layers: vec![semiconductor("bar", 1e-4, points, 1e16, 0.0)],
        boundaries: vec![
            contact("anode", BoundaryKind::Ohmic, Location::Left),
            contact("cathode", BoundaryKind::Ohmic, Location::Right),
        ],
        ..Default::default()
    }
}

/// Abrupt silicon PN junction in the middle of a 2 um bar.
pub fn diode(points: usize) -> DeviceSpec {
    let mut layer = semiconductor("diode", 2e-4, points, 0.0, 1e17);
    layer.junction = Some(JunctionSpec {
        depth: 1e-4,
        donor_density: 1e17,
        acceptor_density: 0.0,
    });
    DeviceSpec {
        layers: vec![layer],
        boundaries: vec![
            contact("anode", BoundaryKind::Ohmic, Location::Left),
            contact("cathode", BoundaryKind::Ohmic, Location::Right),
        ],
        ..Default::default()
    }
}

/// Metal / oxide / p-silicon stack. The gate terminal is tied through a
/// 50 ohm link to a detached hub that carries the source.
pub fn mos_with_hub() -> DeviceSpec {
    let mut gate = contact("gate", BoundaryKind::Gate, Location::Interface(0));
    gate.workfunction = 4.1;
    gate.inter_connect = Some("hub".into());
    gate.circuit = CircuitSpec::Voltage {
        value: 0.0,
        r: 50.0,
        c: 0.0,
        l: 0.0,
    };
    DeviceSpec {
        layers: vec![
            LayerSpec {
                name: "metal".into(),
                kind: RegionKind::Electrode,
                material: "elec".into(),
                thickness: 1e-5,
                points: 3,
                donor_density: 0.0,
                acceptor_density: 0.0,
                junction: None,
            },
            LayerSpec {
                name: "oxide".into(),
                kind: RegionKind::Insulator,
                material: "sio2".into(),
                thickness: 1e-6,
                points: 5,
                donor_density: 0.0,
                acceptor_density: 0.0,
                junction: None,
            },
            semiconductor("bulk", 1e-4, 21, 0.0, 1e17),
        ],
        boundaries: vec![
            gate,
            contact("hub", BoundaryKind::InterConnect, Location::Detached),
            contact("substrate", BoundaryKind::Ohmic, Location::Right),
        ],
        ..Default::default()
    }
}

pub fn serial_solver(spec: &DeviceSpec) -> DeviceSolver {
    solver_on(spec, ExecutionContext::serial())
}

pub fn solver_on(spec: &DeviceSpec, exec: ExecutionContext) -> DeviceSolver {
    let device = spec.build(exec.size).unwrap();
    DeviceSolver::new(exec, device.regions, device.bcs, SolverSettings::default(), spec.t_external).unwrap()
}

/// Run `f` on `ranks` threads, each with its own solver, and collect the
/// results in rank order.
pub fn on_ranks<T, F>(spec: &DeviceSpec, ranks: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&mut DeviceSolver) -> T + Sync,
{
    let comms = ThreadComm::universe(ranks);
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || {
                    let mut solver = solver_on(spec, ExecutionContext::new(Arc::new(comm)));
                    f(&mut solver)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}
