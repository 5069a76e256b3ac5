use thiserror::Error;

use crate::numerics::linear::LinearSolveError;
use crate::numerics::newton::SolverError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    LinearSolve(#[from] LinearSolveError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("time step {dt:.3e}s fell below the minimum {dt_min:.3e}s at t = {time:.3e}s")]
    TimeStepTooSmall { dt: f64, dt_min: f64, time: f64 },
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("no boundary labelled `{0}`")]
    UnknownBoundary(String),
    #[error("unknown material `{0}`")]
    UnknownMaterial(String),
    #[error("invalid device description: {0}")]
    InvalidDevice(String),
    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
