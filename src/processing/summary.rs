use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::config::SolveMode;
use crate::solver::{DeviceSolver, OperatingPoint};

pub struct RunSummary {
    // Device info
    pub ranks: usize,
    pub regions: Vec<(String, usize)>,
    pub boundaries: usize,
    pub unknowns: usize,
    pub t_external: f64,

    // Run info
    pub mode: SolveMode,
    pub newton_iterations: Option<usize>,
    pub sweep_points: Option<usize>,
    pub accepted_steps: Option<usize>,
    pub rejected_steps: Option<usize>,
    pub final_time: Option<f64>,
    pub wall_time: Duration,

    pub terminals: Option<OperatingPoint>,
}

impl RunSummary {
    pub fn from_solver(solver: &DeviceSolver, mode: SolveMode) -> Self {
        Self {
            ranks: solver.exec.size,
            regions: solver
                .regions
                .iter()
                .map(|r| (r.name().to_string(), r.state.nodes.len()))
                .collect(),
            boundaries: solver.bcs.len(),
            unknowns: solver.layout().n_global,
            t_external: solver.step.t_external,
            mode,
            newton_iterations: None,
            sweep_points: None,
            accepted_steps: None,
            rejected_steps: None,
            final_time: None,
            wall_time: Duration::ZERO,
            terminals: None,
        }
    }

    pub fn log(&self) {
        info!(
            mode = ?self.mode,
            ranks = self.ranks,
            unknowns = self.unknowns,
            newton_iterations = self.newton_iterations,
            sweep_points = self.sweep_points,
            accepted_steps = self.accepted_steps,
            rejected_steps = self.rejected_steps,
            wall_s = self.wall_time.as_secs_f64(),
            "run finished"
        );
        if let Some(point) = &self.terminals {
            for e in &point.electrodes {
                info!(electrode = %e.label, potential = e.potential, current = e.current, "terminal");
            }
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;

        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file, "DEVICE SIMULATION SUMMARY")?;
        writeln!(file, "{}", "=".repeat(60))?;
        writeln!(file)?;

        writeln!(file, "DEVICE")?;
        writeln!(file, "{}", "-".repeat(60))?;
        for (name, nodes) in &self.regions {
            writeln!(file, "Region {:<14} {} nodes", name, nodes)?;
        }
        writeln!(file, "Boundaries:          {}", self.boundaries)?;
        writeln!(file, "Unknowns:            {}", self.unknowns)?;
        writeln!(file, "Ranks:               {}", self.ranks)?;
        writeln!(file, "Temperature:         {:.2} K", self.t_external)?;
        writeln!(file)?;

        writeln!(file, "SOLVE")?;
        writeln!(file, "{}", "-".repeat(60))?;
        writeln!(file, "Mode:                {:?}", self.mode)?;
        if let Some(it) = self.newton_iterations {
            writeln!(file, "Newton iterations:   {}", it)?;
        }
        if let Some(n) = self.sweep_points {
            writeln!(file, "Sweep points:        {}", n)?;
        }
        if let (Some(a), Some(r)) = (self.accepted_steps, self.rejected_steps) {
            writeln!(file, "Accepted steps:      {}", a)?;
            writeln!(file, "Rejected steps:      {}", r)?;
        }
        if let Some(t) = self.final_time {
            writeln!(file, "Final time:          {:.6e} s", t)?;
        }
        writeln!(file, "Wall time:           {:.3} s", self.wall_time.as_secs_f64())?;
        writeln!(file)?;

        if let Some(point) = &self.terminals {
            writeln!(file, "TERMINALS")?;
            writeln!(file, "{}", "-".repeat(60))?;
            for e in &point.electrodes {
                writeln!(file, "{:<14} V = {:+.6e} V   I = {:+.6e} A", e.label, e.potential, e.current)?;
            }
            writeln!(file)?;
        }

        writeln!(file, "{}", "=".repeat(60))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ElectrodeSample;

    #[test]
    fn summary_lists_terminals() {
        let summary = RunSummary {
            ranks: 2,
            regions: vec![("bulk".into(), 21)],
            boundaries: 2,
            unknowns: 65,
            t_external: 300.0,
            mode: SolveMode::Sweep,
            newton_iterations: None,
            sweep_points: Some(11),
            accepted_steps: None,
            rejected_steps: None,
            final_time: None,
            wall_time: Duration::from_millis(250),
            terminals: Some(OperatingPoint {
                time: 0.0,
                applied: 1.0,
                electrodes: vec![ElectrodeSample {
                    label: "anode".into(),
                    potential: 1.0,
                    current: 2e-3,
                }],
            }),
        };
        let path = std::env::temp_dir().join("vfvm_test_summary.txt");
        summary.write_to_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Sweep points:        11"));
        assert!(content.contains("anode"));
        std::fs::remove_file(&path).ok();
    }
}
