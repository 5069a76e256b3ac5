use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use vfvm_device::assembly::{ParMatrix, ParVector};
use vfvm_device::bc::CircuitSpec;
use vfvm_device::discretization::generator::{BoundaryKind, BoundarySpec, DeviceSpec, JunctionSpec, LayerSpec, Location};
use vfvm_device::numerics::linear::LinearSolverKind;
use vfvm_device::parallel::ExecutionContext;
use vfvm_device::physics::RegionKind;
use vfvm_device::solver::{DeviceSolver, SolverSettings};

fn problem_sizes() -> Vec<usize> {
    vec![101, 401]
}

fn contact(label: &str, location: Location) -> BoundarySpec {
    BoundarySpec {
        label: label.into(),
        kind: BoundaryKind::Ohmic,
        location,
        circuit: CircuitSpec::default(),
        workfunction: 0.0,
        heat_transfer: 0.0,
        inter_connect: None,
    }
}

fn diode(points: usize, linear: LinearSolverKind) -> DeviceSolver {
    let spec = DeviceSpec {
        layers: vec![LayerSpec {
            name: "diode".into(),
            kind: RegionKind::Semiconductor,
            material: "si".into(),
            thickness: 2e-4,
            points,
            donor_density: 0.0,
            acceptor_density: 1e17,
            junction: Some(JunctionSpec {
                depth: 1e-4,
                donor_density: 1e17,
                acceptor_density: 0.0,
            }),
        }],
        boundaries: vec![contact("anode", Location::Left), contact("cathode", Location::Right)],
        ..Default::default()
    };
    let device = spec.build(1).unwrap();
    let settings = SolverSettings {
        linear,
        ..Default::default()
    };
    DeviceSolver::new(ExecutionContext::serial(), device.regions, device.bcs, settings, spec.t_external).unwrap()
}

fn bench_residual(c: &mut Criterion) {
    let mut group = c.benchmark_group("residual");
    for &size in &problem_sizes() {
        let mut solver = diode(size, LinearSolverKind::Lu);
        let x = solver.x.clone();
        let mut f = ParVector::new(solver.layout());
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter(|| {
                solver.residual(&x, &mut f);
                std::hint::black_box(f.owned()[0]);
            });
        });
    }
    group.finish();
}

fn bench_jacobian(c: &mut Criterion) {
    let mut group = c.benchmark_group("jacobian");
    for &size in &problem_sizes() {
        let mut solver = diode(size, LinearSolverKind::Lu);
        let x = solver.x.clone();
        let mut jac = ParMatrix::new(solver.layout());
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter(|| {
                solver.jacobian(&x, &mut jac);
                std::hint::black_box(jac.nnz_local());
            });
        });
    }
    group.finish();
}

fn bench_steady_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_solve");
    group.sample_size(10);
    for linear in [LinearSolverKind::Lu, LinearSolverKind::Bicgstab] {
        group.bench_with_input(BenchmarkId::new(format!("{linear:?}"), 101), &101, |b, &size| {
            b.iter_batched(
                || diode(size, linear),
                |mut solver| {
                    let _ = solver.solve_steady();
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_residual, bench_jacobian, bench_steady_solve);
criterion_main!(benches);
