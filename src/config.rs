//! Run configuration, layered from `config/default.toml`, an optional
//! `config/{RUN_MODE}.toml` and `VFVM_` environment variables
//! (`VFVM_SOLVER__NEWTON__MAX_ITERATIONS=50`).

use std::env;
use std::path::PathBuf;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::discretization::generator::DeviceSpec;
use crate::error::Result;
use crate::numerics::transient::TransientSettings;
use crate::solver::{SolverSettings, SweepSettings};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Also write JSON records to this file.
    pub json_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveMode {
    #[default]
    Steady,
    Sweep,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: "output".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub logging: LoggingConfig,
    /// In-process ranks the device is decomposed over.
    pub ranks: usize,
    pub mode: SolveMode,
    pub device: DeviceSpec,
    pub solver: SolverSettings,
    pub sweep: SweepSettings,
    pub transient: TransientSettings,
    pub output: OutputConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            ranks: 1,
            mode: SolveMode::default(),
            device: DeviceSpec::default(),
            solver: SolverSettings::default(),
            sweep: SweepSettings::default(),
            transient: TransientSettings::default(),
            output: OutputConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn load() -> Result<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(Environment::with_prefix("VFVM").prefix_separator("_").separator("__"))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let s = Config::builder().add_source(File::from_str(text, FileFormat::Toml)).build()?;
        Ok(s.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bc::ExternalCircuit;
    use crate::discretization::generator::{BoundaryKind, Location};
    use crate::numerics::damping::DampingKind;
    use crate::numerics::linear::LinearSolverKind;
    use crate::physics::RegionKind;

    #[test]
    fn missing_sections_take_their_defaults() {
        let cfg = SimulationConfig::from_toml("ranks = 2").unwrap();
        assert_eq!(cfg.ranks, 2);
        assert_eq!(cfg.mode, SolveMode::Steady);
        assert_eq!(cfg.solver.newton.max_iterations, 30);
        assert_eq!(cfg.device.area, 1e-8);
    }

    #[test]
    fn device_and_solver_tables_deserialize() {
        let cfg = SimulationConfig::from_toml(
            r#"
            mode = "sweep"

            [solver]
            linear = "bicgstab"
            newton = { damping = "none", max_iterations = 12 }

            [sweep]
            electrode = "anode"
            stop = 0.5

            [[device.layers]]
            name = "diode"
            kind = "semiconductor"
            material = "Si"
            thickness = 2e-4
            points = 41
            acceptor_density = 1e17
            junction = { depth = 1e-4, donor_density = 1e17 }

            [[device.boundaries]]
            label = "anode"
            kind = "ohmic"
            location = "left"

            [[device.boundaries]]
            label = "cathode"
            kind = "ohmic"
            location = "right"
            circuit = { type = "voltage", value = 0.0, r = 100.0 }

            [[device.boundaries]]
            label = "gate"
            kind = "gate"
            location = { interface = 0 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, SolveMode::Sweep);
        assert_eq!(cfg.solver.linear, LinearSolverKind::Bicgstab);
        assert_eq!(cfg.solver.newton.damping, DampingKind::None);
        assert_eq!(cfg.solver.newton.max_iterations, 12);
        assert_eq!(cfg.sweep.stop, 0.5);
        let layer = &cfg.device.layers[0];
        assert_eq!(layer.kind, RegionKind::Semiconductor);
        assert_eq!(layer.junction.map(|j| j.donor_density), Some(1e17));
        assert_eq!(cfg.device.boundaries[1].kind, BoundaryKind::Ohmic);
        assert_eq!(cfg.device.boundaries[1].circuit.build().inter_connect_resistance(), 100.0);
        assert_eq!(cfg.device.boundaries[2].location, Location::Interface(0));
    }
}
