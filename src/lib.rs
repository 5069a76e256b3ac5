pub mod assembly;
pub mod bc;
pub mod config;
pub mod discretization;
pub mod error;
pub mod numerics;
pub mod parallel;
pub mod physics;
pub mod processing;
pub mod region;
pub mod solver;
pub mod telemetry;

pub use error::{Result, SimError};
