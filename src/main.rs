use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing::{debug, error, info};

use vfvm_device::config::{SimulationConfig, SolveMode};
use vfvm_device::parallel::{ExecutionContext, ThreadComm};
use vfvm_device::processing::csv_writer;
use vfvm_device::processing::summary::RunSummary;
use vfvm_device::solver::DeviceSolver;
use vfvm_device::telemetry::{get_subscriber, init_subscriber};

fn main() -> Result<()> {
    color_eyre::install()?;
    let cfg = SimulationConfig::load().wrap_err("failed to load the configuration")?;
    let (subscriber, _guard) = get_subscriber(&cfg.logging);
    init_subscriber(subscriber)?;
    fs::create_dir_all(&cfg.output.dir).wrap_err("failed to create the output directory")?;

    let ranks = cfg.ranks.max(1);
    info!(ranks, mode = ?cfg.mode, "starting");
    let outcome = if ranks == 1 {
        run(&cfg, ExecutionContext::serial())
    } else {
        let comms = ThreadComm::universe(ranks);
        thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let cfg = &cfg;
                    s.spawn(move || run(cfg, ExecutionContext::new(Arc::new(comm))))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| eyre!("a rank panicked")).and_then(|r| r))
                .collect::<Result<Vec<()>>>()
                .map(|_| ())
        })
    };
    if let Err(e) = &outcome {
        error!(error = %e, "run failed");
    }
    outcome
}

fn run(cfg: &SimulationConfig, exec: ExecutionContext) -> Result<()> {
    let started = Instant::now();
    let device = cfg.device.build(exec.size)?;
    let mut solver = DeviceSolver::new(exec, device.regions, device.bcs, cfg.solver, cfg.device.t_external)?;
    let mut summary = RunSummary::from_solver(&solver, cfg.mode);
    let writer = solver.exec.rank == 0;
    let dir = cfg.output.dir.as_path();

    let report = solver.solve_steady().wrap_err("initial steady state failed")?;
    summary.newton_iterations = Some(report.iterations);
    let mut applied = 0.0;

    match cfg.mode {
        SolveMode::Steady => {}
        SolveMode::Sweep => {
            let points = solver.dc_sweep(&cfg.sweep).wrap_err("DC sweep failed")?;
            summary.sweep_points = Some(points.len());
            applied = points.last().map_or(cfg.sweep.start, |p| p.applied);
            if writer {
                csv_writer::write_operating_points(dir.join("iv.csv"), "V_applied", &points)?;
                info!(path = %dir.join("iv.csv").display(), "IV curve saved");
            }
        }
        SolveMode::Transient => {
            let mut wave = vec![solver.operating_point(cfg.transient.t_start)];
            let ctl = solver
                .solve_transient(cfg.transient, |s| wave.push(s.operating_point(s.step.time)))
                .wrap_err("transient failed")?;
            summary.accepted_steps = Some(ctl.accepted);
            summary.rejected_steps = Some(ctl.rejected);
            summary.final_time = Some(ctl.time);
            applied = ctl.time;
            if writer {
                csv_writer::write_operating_points(dir.join("transient.csv"), "time", &wave)?;
                info!(path = %dir.join("transient.csv").display(), "waveforms saved");
            }
        }
    }

    summary.terminals = Some(solver.operating_point(applied));
    summary.wall_time = started.elapsed();
    if writer {
        save_profiles(&solver, dir)?;
        summary.write_to_file(dir.join("summary.txt"))?;
        summary.log();
    }
    Ok(())
}

/// Node values are only current for nodes the rank can see, so profiles
/// are written for serial runs alone.
fn save_profiles(solver: &DeviceSolver, dir: &Path) -> Result<()> {
    if solver.exec.size > 1 {
        debug!("skipping region profiles in a distributed run");
        return Ok(());
    }
    for region in solver.regions.iter().filter(|r| r.state.layout.n_vars() > 0) {
        let path = dir.join(format!("profile_{}.csv", region.name()));
        csv_writer::write_region_profile(&path, region)?;
    }
    Ok(())
}
